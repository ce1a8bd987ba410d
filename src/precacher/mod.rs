//! Single-producer packet precacher.
//!
//! A [`DataPrecacher`] serves `get_packet(i)` with minimal latency when `i`
//! is close to the previously requested index, by running one worker
//! thread that decodes ahead of the consumer into a byte-bounded scratch
//! ring. The consumer stays synchronous and single-threaded; the worker
//! repairs the cache on out-of-order access instead of failing.
//!
//! # Architecture
//! - Caller and worker meet over two single-slot channels: the caller
//!   sends the requested index, then polls the reply channel on a short
//!   retry interval; the worker polls the request channel and uses the
//!   idle timeouts to opportunistically refill the ring.
//! - The scratch ring, the slot queue and the prefetch counters belong to
//!   the worker alone. Served packets are copied out of the ring into
//!   owned payloads, so the caller may hold a packet for as long as it
//!   likes without pinning ring memory.
//! - When the precacher is not started, `get_packet` falls through to the
//!   loader callback directly, memoising the last request.
//!
//! # Request handling
//! For a request `r` against the in-order queue covering
//! `[next_expected, next_precache)`:
//! - `r == next_expected - 1`: the previous reply is re-published without
//!   touching the loader.
//! - `r` inside the queued range: older entries are discarded and `r` is
//!   served from the ring.
//! - anything else (gap, backward jump, empty queue): the queue is
//!   flushed and the packet is loaded synchronously.

mod ring;

use crate::packet::Packet;
use crate::CACHE_MAX_BYTES;
use anyhow::{anyhow, bail, ensure, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use ring::CacheRing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Retry interval for the caller waiting on a reply.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(1);
/// Idle interval after which the worker considers refilling the ring.
const QUERY_TIMEOUT: Duration = Duration::from_millis(10);
/// Upper bound on the warm-up pass at start.
const PREFILL_TIMEOUT: Duration = Duration::from_secs(5);
/// Packets loaded per opportunistic fill pass.
const FILL_BATCH: usize = 10;

/// Loader callback contract: deterministic for a given index, returns the
/// empty packet for end-of-stream or absence, never calls back into the
/// precacher.
pub type LoaderCallback = Box<dyn FnMut(u64) -> Packet + Send + 'static>;

enum Engine {
    /// Not started: requests go straight to the loader.
    Direct { loader: LoaderCallback },
    /// Started: requests rendezvous with the worker thread.
    Spooling {
        request_tx: Sender<u64>,
        reply_rx: Receiver<Packet>,
        shutdown: Arc<AtomicBool>,
        worker: JoinHandle<LoaderCallback>,
    },
}

/// Asynchronous packet precacher over a deterministic loader callback.
pub struct DataPrecacher {
    engine: Option<Engine>,
    last: Option<(u64, Packet)>,
}

impl DataPrecacher {
    pub fn new(loader: impl FnMut(u64) -> Packet + Send + 'static) -> Self {
        Self {
            engine: Some(Engine::Direct {
                loader: Box::new(loader),
            }),
            last: None,
        }
    }

    /// Allocates a scratch ring of `buffer_bytes` (clamped to the
    /// system-wide ceiling) and spawns the precache worker. An already
    /// started precacher is stopped and restarted.
    pub fn start(&mut self, buffer_bytes: usize) -> Result<()> {
        ensure!(buffer_bytes > 0, "precache buffer size must be > 0");
        if matches!(self.engine, Some(Engine::Spooling { .. })) {
            self.stop()?;
        }
        let loader = match self.engine.take() {
            Some(Engine::Direct { loader }) => loader,
            _ => bail!("precacher is unusable after a worker failure"),
        };
        let capacity = buffer_bytes.min(CACHE_MAX_BYTES);
        tracing::debug!(capacity_mb = capacity / (1024 * 1024), "starting precache worker");
        let (request_tx, request_rx) = bounded(1);
        let (reply_tx, reply_rx) = bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = thread::Builder::new()
            .name("precache-worker".into())
            .spawn({
                let shutdown = shutdown.clone();
                move || spool(loader, capacity, request_rx, reply_tx, shutdown)
            })
            .context("failed to spawn precache worker")?;
        self.engine = Some(Engine::Spooling {
            request_tx,
            reply_rx,
            shutdown,
            worker,
        });
        Ok(())
    }

    /// Stops the worker and releases the scratch ring. The loader callback
    /// is recovered from the worker so the direct path keeps working.
    pub fn stop(&mut self) -> Result<()> {
        match self.engine.take() {
            Some(Engine::Spooling {
                request_tx,
                reply_rx,
                shutdown,
                worker,
            }) => {
                shutdown.store(true, Ordering::Relaxed);
                // Closing the request channel wakes the worker's poll.
                drop(request_tx);
                drop(reply_rx);
                let loader = worker
                    .join()
                    .map_err(|_| anyhow!("precache worker panicked"))?;
                self.engine = Some(Engine::Direct { loader });
                Ok(())
            }
            other => {
                self.engine = other;
                Ok(())
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.engine, Some(Engine::Spooling { .. }))
    }

    /// Fetches the packet at `idx`, blocking until it is available.
    ///
    /// Never fails on timeout; the only error conditions are a dead worker
    /// thread or a precacher already poisoned by one.
    pub fn get_packet(&mut self, idx: u64) -> Result<Packet> {
        match self.engine.as_mut() {
            Some(Engine::Direct { loader }) => {
                if let Some((last_idx, packet)) = &self.last {
                    if *last_idx == idx {
                        return Ok(packet.clone());
                    }
                }
                let packet = loader(idx);
                self.last = Some((idx, packet.clone()));
                Ok(packet)
            }
            Some(Engine::Spooling {
                request_tx,
                reply_rx,
                ..
            }) => {
                request_tx
                    .send(idx)
                    .map_err(|_| anyhow!("precache worker terminated unexpectedly"))?;
                loop {
                    match reply_rx.recv_timeout(REQUEST_TIMEOUT) {
                        Ok(packet) => {
                            self.last = Some((idx, packet.clone()));
                            return Ok(packet);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            bail!("precache worker terminated unexpectedly")
                        }
                    }
                }
            }
            None => bail!("precacher is unusable after a worker failure"),
        }
    }
}

impl Drop for DataPrecacher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Worker entry point. Returns the loader so `stop()` can restore the
/// direct path.
fn spool(
    mut loader: LoaderCallback,
    capacity: usize,
    request_rx: Receiver<u64>,
    reply_tx: Sender<Packet>,
    shutdown: Arc<AtomicBool>,
) -> LoaderCallback {
    let mut ring = CacheRing::new(capacity);
    let mut next_expected: u64 = 0;
    let mut next_precache: u64 = 0;
    let mut last_served: Option<Packet> = None;

    // Best-effort warm-up from index 0; bounded by time, ring space and
    // the first empty packet.
    let prefill_start = Instant::now();
    while prefill_start.elapsed() < PREFILL_TIMEOUT && !shutdown.load(Ordering::Relaxed) {
        let packet = loader(next_precache);
        if packet.is_empty() || !ring.try_push(next_precache, &packet) {
            break;
        }
        next_precache += 1;
    }
    tracing::debug!(
        cached = next_precache,
        used_bytes = ring.used_bytes(),
        "prefill complete"
    );

    while !shutdown.load(Ordering::Relaxed) {
        match request_rx.recv_timeout(QUERY_TIMEOUT) {
            Ok(req) => {
                let reply = match &last_served {
                    Some(packet) if req + 1 == next_expected => packet.clone(),
                    _ if !ring.is_empty() && req >= next_expected && req < next_precache => {
                        while ring.front_index() != Some(req) {
                            ring.discard_front();
                        }
                        next_expected = req + 1;
                        match ring.take_front() {
                            Some(packet) => packet,
                            // Unreachable: the range check guarantees a slot.
                            None => loader(req),
                        }
                    }
                    _ => {
                        tracing::trace!(
                            req,
                            next_expected,
                            next_precache,
                            "out-of-order request, flushing cache"
                        );
                        ring.flush();
                        next_expected = req + 1;
                        next_precache = req + 1;
                        loader(req)
                    }
                };
                last_served = Some(reply.clone());
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if ring.used_bytes() < ring.capacity() / 4 {
                    let mut filled = 0;
                    while ring.used_bytes() < ring.capacity() && filled < FILL_BATCH {
                        let packet = loader(next_precache);
                        if packet.is_empty() || !ring.try_push(next_precache, &packet) {
                            break;
                        }
                        next_precache += 1;
                        filled += 1;
                    }
                    if filled > 0 {
                        tracing::trace!(
                            filled,
                            used_bytes = ring.used_bytes(),
                            "opportunistic fill"
                        );
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    loader
}
