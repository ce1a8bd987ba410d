#![allow(dead_code)] // each test binary uses a subset of these helpers

use data_spool::Packet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Instant;

/// Installs a test-writer subscriber so the engines' `debug!`/`trace!`
/// events show up under `cargo test -- --nocapture`. Safe to call from
/// every test; repeated installs are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// The canonical synthetic stream: packet `i` is `len` copies of `i % 256`.
pub fn patterned_packet(idx: u64, len: usize) -> Packet {
    Packet::from_vec(vec![(idx % 256) as u8; len])
}

/// Loader over the patterned stream, cut off at `total` packets, counting
/// invocations per index.
pub struct CountingLoader {
    pub calls: Arc<Mutex<HashMap<u64, usize>>>,
    pub total_calls: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            total_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn loader(
        &self,
        total: u64,
        packet_len: usize,
    ) -> impl FnMut(u64) -> Packet + Send + 'static {
        let calls = self.calls.clone();
        let total_calls = self.total_calls.clone();
        move |idx| {
            *calls.lock().unwrap().entry(idx).or_insert(0) += 1;
            total_calls.fetch_add(1, Ordering::SeqCst);
            if idx >= total {
                Packet::empty()
            } else {
                patterned_packet(idx, packet_len)
            }
        }
    }

    pub fn calls_for(&self, idx: u64) -> usize {
        self.calls.lock().unwrap().get(&idx).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

/// One sink invocation as observed by a [`RecordingSink`].
#[derive(Clone, Debug)]
pub struct SinkRecord {
    pub thread: ThreadId,
    pub idx: u64,
    pub bytes: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

/// Sink that records every invocation, optionally sleeping to simulate a
/// slow archive backend.
#[derive(Clone)]
pub struct RecordingSink {
    pub records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(
        &self,
        delay: std::time::Duration,
    ) -> impl Fn(&Packet, u64) -> u64 + Send + Sync + 'static {
        let records = self.records.clone();
        move |packet, idx| {
            let started = Instant::now();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            records.lock().unwrap().push(SinkRecord {
                thread: std::thread::current().id(),
                idx,
                bytes: packet.bytes().to_vec(),
                started,
                finished: Instant::now(),
            });
            idx
        }
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap().clone()
    }
}
