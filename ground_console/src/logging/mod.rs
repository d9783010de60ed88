pub mod csv;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// Process-wide telemetry counters; mirrored into the state snapshot the
// operator sees.
static CODEC_CALLS: AtomicU64 = AtomicU64::new(0);
static CODEC_FAILURES: AtomicU64 = AtomicU64::new(0);
static STALE_DROPPED: AtomicU64 = AtomicU64::new(0);

pub fn codec_call() {
    CODEC_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn codec_failure() {
    CODEC_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn stale_drop() {
    STALE_DROPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Telemetry {
    pub codec_calls: u64,
    pub codec_failures: u64,
    pub stale_dropped: u64,
}

pub fn telemetry_snapshot() -> Telemetry {
    Telemetry {
        codec_calls: CODEC_CALLS.load(Ordering::Relaxed),
        codec_failures: CODEC_FAILURES.load(Ordering::Relaxed),
        stale_dropped: STALE_DROPPED.load(Ordering::Relaxed),
    }
}
