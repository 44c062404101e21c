//! Endpoint counters: plain per-endpoint tallies an embedder can snapshot
//! and export however it likes (`Serialize` derived, no Prometheus surface
//! bundled in — that belongs to a layer above this transport).
//!
//! Kept deliberately small. The teacher crate's sibling bonding layer tracks
//! per-link RTT/cwnd/loss-rate telemetry for congestion control; none of
//! that applies here since congestion control is a named Non-goal
//! (`spec.md` §1) — these counters only describe what the FEC pipeline and
//! ring buffer actually did.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters updated from the worker thread(s) and read from any
/// thread for a snapshot. One instance per open direction.
#[derive(Debug, Default)]
pub struct EndpointCounters {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub groups_encoded: AtomicU64,
    pub originals_published: AtomicU64,
    pub buffer_full_count: AtomicU64,
    pub buffer_overrun_count: AtomicU64,
    pub malformed_header_count: AtomicU64,
    pub codec_error_count: AtomicU64,
}

impl EndpointCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_groups_encoded(&self) {
        self.groups_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_originals_published(&self, n: u64) {
        self.originals_published.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_buffer_full(&self) {
        self.buffer_full_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_buffer_overrun(&self) {
        self.buffer_overrun_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed_header(&self) {
        self.malformed_header_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_codec_error(&self) {
        self.codec_error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough (not transactional) point-in-time snapshot for
    /// logging or export.
    pub fn snapshot(&self) -> EndpointStatsSnapshot {
        EndpointStatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            groups_encoded: self.groups_encoded.load(Ordering::Relaxed),
            originals_published: self.originals_published.load(Ordering::Relaxed),
            buffer_full_count: self.buffer_full_count.load(Ordering::Relaxed),
            buffer_overrun_count: self.buffer_overrun_count.load(Ordering::Relaxed),
            malformed_header_count: self.malformed_header_count.load(Ordering::Relaxed),
            codec_error_count: self.codec_error_count.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value snapshot of [`EndpointCounters`], serializable for whatever
/// export format an embedder wants (JSON, a log line, a custom metrics sink).
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointStatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub groups_encoded: u64,
    pub originals_published: u64,
    pub buffer_full_count: u64,
    pub buffer_overrun_count: u64,
    pub malformed_header_count: u64,
    pub codec_error_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let c = EndpointCounters::new();
        let s = c.snapshot();
        assert_eq!(s.bytes_sent, 0);
        assert_eq!(s.groups_encoded, 0);
    }

    #[test]
    fn increments_are_reflected_in_snapshot() {
        let c = EndpointCounters::new();
        c.add_bytes_sent(1472);
        c.inc_groups_encoded();
        c.inc_buffer_overrun();
        let s = c.snapshot();
        assert_eq!(s.bytes_sent, 1472);
        assert_eq!(s.groups_encoded, 1);
        assert_eq!(s.buffer_overrun_count, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let c = EndpointCounters::new();
        c.add_bytes_received(64);
        let json = serde_json::to_string(&c.snapshot()).unwrap();
        assert!(json.contains("\"bytes_received\":64"));
    }
}
