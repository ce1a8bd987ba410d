//! Multi-worker packet writer.
//!
//! A [`DataWriter`] accepts out-of-order output packets from the algorithm
//! and drains them to a user-supplied sink on a pool of worker threads,
//! bounding in-flight memory in bytes. Overflow is handled by either
//! backpressure (the pushing thread waits for space) or dropping, per
//! configuration.
//!
//! # Architecture
//! Pending packets live in a `BTreeMap` keyed by index so workers always
//! drain the smallest key first; with one worker, sink invocations are in
//! strictly ascending index order. The map, the byte counter and the
//! active flag share one mutex with two conditions: *non-empty* wakes
//! drain workers, *has-space* wakes pushers blocked on backpressure. The
//! sink itself is always called outside the mutex, so it must only
//! tolerate concurrent calls for distinct indices.
//!
//! Pushing while the writer is inactive runs the sink synchronously on
//! the calling thread.

use crate::packet::Packet;
use crate::CACHE_MAX_BYTES;
use anyhow::{anyhow, ensure, Context, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type SinkFn = dyn Fn(&Packet, u64) -> u64 + Send + Sync;

/// Outcome of [`DataWriter::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushResult {
    /// The writer was inactive; the sink ran synchronously and returned
    /// this value.
    Direct(u64),
    /// The packet was queued; the value is its position in the pending
    /// map at insertion time.
    Queued(usize),
    /// The queue was full and the drop policy discarded the packet.
    Dropped,
}

/// Configuration for [`DataWriter::start`].
#[derive(Clone, Copy, Debug)]
pub struct WriterConfig {
    /// Ceiling on the summed byte length of pending packets.
    pub queue_bytes: usize,
    /// Drop packets when the queue is full instead of blocking the pusher.
    pub drop_on_full: bool,
    /// Number of drain worker threads.
    pub workers: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_bytes: 256 * 1024 * 1024,
            drop_on_full: false,
            workers: 1,
        }
    }
}

impl WriterConfig {
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }
}

/// Builder for [`WriterConfig`] with method chaining.
#[derive(Default)]
pub struct WriterConfigBuilder {
    config: WriterConfig,
}

impl WriterConfigBuilder {
    /// Set the pending-byte ceiling (must be > 0).
    pub fn queue_bytes(mut self, bytes: usize) -> Self {
        self.config.queue_bytes = bytes;
        self
    }

    /// Set the overflow policy.
    pub fn drop_on_full(mut self, drop: bool) -> Self {
        self.config.drop_on_full = drop;
        self
    }

    /// Set the drain worker count (must be >= 1).
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn build(self) -> WriterConfig {
        self.config
    }
}

#[derive(Default)]
struct WriterState {
    pending: BTreeMap<u64, Packet>,
    queued_bytes: usize,
    active: bool,
}

struct WriterShared {
    state: Mutex<WriterState>,
    not_empty: Condvar,
    has_space: Condvar,
}

struct WriterRuntime {
    shared: Arc<WriterShared>,
    workers: Vec<JoinHandle<()>>,
    queue_bytes: usize,
    drop_on_full: bool,
}

/// Asynchronous packet writer over a user-supplied sink callback.
///
/// The sink's return value is opaque to the writer; it is only forwarded
/// on the synchronous path.
pub struct DataWriter {
    sink: Arc<SinkFn>,
    runtime: Option<WriterRuntime>,
}

impl DataWriter {
    pub fn new(sink: impl Fn(&Packet, u64) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
            runtime: None,
        }
    }

    /// Spawns the drain pool. An already started writer is stopped (and
    /// fully drained) first.
    pub fn start(&mut self, config: WriterConfig) -> Result<()> {
        ensure!(config.queue_bytes > 0, "writer queue size must be > 0");
        ensure!(config.workers >= 1, "writer needs at least one drain worker");
        if self.runtime.is_some() {
            self.stop()?;
        }
        let queue_bytes = config.queue_bytes.min(CACHE_MAX_BYTES);
        tracing::debug!(
            queue_mb = queue_bytes / (1024 * 1024),
            workers = config.workers,
            drop_on_full = config.drop_on_full,
            "starting writer drain pool"
        );
        let shared = Arc::new(WriterShared {
            state: Mutex::new(WriterState {
                pending: BTreeMap::new(),
                queued_bytes: 0,
                active: true,
            }),
            not_empty: Condvar::new(),
            has_space: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let shared = shared.clone();
            let sink = self.sink.clone();
            let handle = thread::Builder::new()
                .name(format!("archive-worker-{}", worker_id))
                .spawn(move || drain(shared, sink))
                .with_context(|| format!("failed to spawn archive worker {}", worker_id))?;
            workers.push(handle);
        }
        self.runtime = Some(WriterRuntime {
            shared,
            workers,
            queue_bytes,
            drop_on_full: config.drop_on_full,
        });
        Ok(())
    }

    /// Signals shutdown and joins the drain pool. Every pending packet is
    /// sunk before the workers exit.
    pub fn stop(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };
        {
            let mut state = runtime
                .shared
                .state
                .lock()
                .expect("writer state mutex poisoned");
            state.active = false;
        }
        runtime.shared.not_empty.notify_all();
        for worker in runtime.workers {
            worker
                .join()
                .map_err(|_| anyhow!("archive worker panicked"))?;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.runtime.is_some()
    }

    /// Bytes currently held by pending packets.
    pub fn queued_bytes(&self) -> usize {
        self.runtime.as_ref().map_or(0, |rt| {
            rt.shared
                .state
                .lock()
                .expect("writer state mutex poisoned")
                .queued_bytes
        })
    }

    /// Number of pending packets awaiting a drain worker.
    pub fn pending_count(&self) -> usize {
        self.runtime.as_ref().map_or(0, |rt| {
            rt.shared
                .state
                .lock()
                .expect("writer state mutex poisoned")
                .pending
                .len()
        })
    }

    /// Hands a packet to the writer.
    ///
    /// Inactive: the sink runs synchronously and its value is returned.
    /// Active with room: the packet is queued (replacing any pending
    /// packet with the same index) and its map position returned. Active
    /// and full: waits for space, or drops, per the configured policy.
    ///
    /// # Panics
    /// Panics if the packet alone exceeds the queue ceiling under the
    /// no-drop policy, which could never complete.
    pub fn push(&self, packet: &Packet, idx: u64) -> PushResult {
        let Some(rt) = &self.runtime else {
            return PushResult::Direct((self.sink)(packet, idx));
        };
        let len = packet.len();
        assert!(
            rt.drop_on_full || len <= rt.queue_bytes,
            "packet of {} bytes cannot fit a {}-byte writer queue",
            len,
            rt.queue_bytes
        );
        let mut state = rt
            .shared
            .state
            .lock()
            .expect("writer state mutex poisoned");
        if !rt.drop_on_full {
            while state.queued_bytes + len > rt.queue_bytes {
                state = rt
                    .shared
                    .has_space
                    .wait(state)
                    .expect("writer state mutex poisoned");
            }
        }
        if state.queued_bytes + len <= rt.queue_bytes {
            if let Some(replaced) = state.pending.insert(idx, packet.clone()) {
                // Last-write-wins for idempotent retries; the byte count
                // tracks the replacement.
                state.queued_bytes -= replaced.len();
            }
            state.queued_bytes += len;
            let position = state.pending.range(..idx).count();
            drop(state);
            rt.shared.not_empty.notify_one();
            PushResult::Queued(position)
        } else {
            drop(state);
            tracing::debug!(idx, len, "queue full, dropping packet");
            PushResult::Dropped
        }
    }
}

impl Drop for DataWriter {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn drain(shared: Arc<WriterShared>, sink: Arc<SinkFn>) {
    let mut state = shared.state.lock().expect("writer state mutex poisoned");
    loop {
        if state.pending.is_empty() {
            if !state.active {
                break;
            }
            state = shared
                .not_empty
                .wait(state)
                .expect("writer state mutex poisoned");
            continue;
        }
        let (idx, packet) = state
            .pending
            .pop_first()
            .expect("pending map checked non-empty");
        assert!(
            packet.len() <= state.queued_bytes,
            "pending packet length exceeds queued byte count"
        );
        state.queued_bytes -= packet.len();
        drop(state);
        sink(&packet, idx);
        shared.has_space.notify_all();
        state = shared.state.lock().expect("writer state mutex poisoned");
    }
}
