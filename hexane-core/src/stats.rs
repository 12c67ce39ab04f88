//! Server statistics
//!
//! All counters are monotonic atomics bumped with relaxed ordering; a
//! snapshot is taken for the control channel and the optional statistics
//! sink. The latency histogram uses fixed bucket bounds so recording stays
//! a single atomic increment.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Highest message type code tracked per-type (Solicit..LeasequeryData)
const MAX_MESSAGE_TYPE: usize = 17;

/// Latency bucket upper bounds in microseconds; the last bucket is open
const LATENCY_BOUNDS_US: [u64; 8] = [50, 100, 250, 500, 1_000, 5_000, 50_000, 1_000_000];

/// Fixed-bucket latency histogram with lock-free recording
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BOUNDS_US.len() + 1],
    total_us: AtomicU64,
    count: AtomicU64,
}

impl LatencyHistogram {
    /// Record one pipeline run
    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let idx = LATENCY_BOUNDS_US
            .iter()
            .position(|bound| us <= *bound)
            .unwrap_or(LATENCY_BOUNDS_US.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of recorded runs
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean latency in microseconds, zero when nothing was recorded
    pub fn mean_us(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.total_us.load(Ordering::Relaxed) / count
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            let label = if i < LATENCY_BOUNDS_US.len() {
                format!("le_{}us", LATENCY_BOUNDS_US[i])
            } else {
                "overflow".to_string()
            };
            out.push((label, bucket.load(Ordering::Relaxed)));
        }
        out
    }
}

/// Thread-safe server counters
#[derive(Debug)]
pub struct ServerStats {
    started_at: SystemTime,

    /// Datagrams received, total and per message type
    rx_total: AtomicU64,
    rx_by_type: [AtomicU64; MAX_MESSAGE_TYPE + 1],

    /// Receive-path failures
    decode_errors: AtomicU64,
    client_only: AtomicU64,
    queue_full: AtomicU64,

    /// Pipeline outcomes
    emitted: AtomicU64,
    dropped: AtomicU64,
    deferred: AtomicU64,
    drop_reasons: BTreeMap<&'static str, AtomicU64>,

    /// Failure counters with dedicated spec semantics
    handler_errors: AtomicU64,
    encode_errors: AtomicU64,
    send_errors: AtomicU64,

    /// Control channel activity
    reloads: AtomicU64,

    /// Pipeline latency
    pub latency: LatencyHistogram,
}

impl ServerStats {
    pub fn new() -> Self {
        let drop_reasons = [
            "decode_error",
            "handler_error",
            "timeout",
            "policy",
            "queue_full",
            "send_error",
            "client_only",
            "encode_error",
        ]
        .into_iter()
        .map(|label| (label, AtomicU64::new(0)))
        .collect();

        Self {
            started_at: SystemTime::now(),
            rx_total: AtomicU64::new(0),
            rx_by_type: Default::default(),
            decode_errors: AtomicU64::new(0),
            client_only: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            drop_reasons,
            handler_errors: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            latency: LatencyHistogram::default(),
        }
    }

    /// When this stats block was created (server start)
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn record_rx(&self, msg_type: u8) {
        self.rx_total.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.rx_by_type.get(msg_type as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_only(&self) {
        self.client_only.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: crate::types::DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.drop_reasons.get(reason.label()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error_count(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut values = BTreeMap::new();

        values.insert("rx.total".to_string(), self.rx_total.load(Ordering::Relaxed));
        for (code, counter) in self.rx_by_type.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                values.insert(format!("rx.type.{}", code), count);
            }
        }

        values.insert(
            "rx.decode_errors".to_string(),
            self.decode_errors.load(Ordering::Relaxed),
        );
        values.insert(
            "rx.client_only".to_string(),
            self.client_only.load(Ordering::Relaxed),
        );
        values.insert(
            "rx.queue_full".to_string(),
            self.queue_full.load(Ordering::Relaxed),
        );

        values.insert("tx.emitted".to_string(), self.emitted.load(Ordering::Relaxed));
        values.insert(
            "pipeline.dropped".to_string(),
            self.dropped.load(Ordering::Relaxed),
        );
        values.insert(
            "pipeline.deferred".to_string(),
            self.deferred.load(Ordering::Relaxed),
        );
        for (label, counter) in &self.drop_reasons {
            values.insert(
                format!("pipeline.drop.{}", label),
                counter.load(Ordering::Relaxed),
            );
        }
        values.insert(
            "pipeline.handler_errors".to_string(),
            self.handler_errors.load(Ordering::Relaxed),
        );
        values.insert(
            "tx.encode_errors".to_string(),
            self.encode_errors.load(Ordering::Relaxed),
        );
        values.insert(
            "tx.send_errors".to_string(),
            self.send_errors.load(Ordering::Relaxed),
        );
        values.insert(
            "control.reloads".to_string(),
            self.reloads.load(Ordering::Relaxed),
        );

        for (label, count) in self.latency.snapshot() {
            values.insert(format!("pipeline.latency.{}", label), count);
        }
        values.insert(
            "pipeline.latency.mean_us".to_string(),
            self.latency.mean_us(),
        );

        StatsSnapshot {
            started_at: self.started_at,
            values,
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub started_at: SystemTime,
    pub values: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    /// Render as the `key=value` dump the control channel serves
    pub fn format(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(key);
            out.push('=');
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DropReason;

    #[test]
    fn test_rx_counters() {
        let stats = ServerStats::new();
        stats.record_rx(1);
        stats.record_rx(1);
        stats.record_rx(3);
        stats.record_rx(200); // out of tracked range, total still counts

        let snap = stats.snapshot();
        assert_eq!(snap.values["rx.total"], 4);
        assert_eq!(snap.values["rx.type.1"], 2);
        assert_eq!(snap.values["rx.type.3"], 1);
        assert!(!snap.values.contains_key("rx.type.200"));
    }

    #[test]
    fn test_drop_reasons() {
        let stats = ServerStats::new();
        stats.record_dropped(DropReason::Timeout);
        stats.record_dropped(DropReason::Timeout);
        stats.record_dropped(DropReason::HandlerError);

        let snap = stats.snapshot();
        assert_eq!(snap.values["pipeline.dropped"], 3);
        assert_eq!(snap.values["pipeline.drop.timeout"], 2);
        assert_eq!(snap.values["pipeline.drop.handler_error"], 1);
        assert_eq!(snap.values["pipeline.drop.policy"], 0);
    }

    #[test]
    fn test_latency_histogram() {
        let hist = LatencyHistogram::default();
        hist.record(Duration::from_micros(40));
        hist.record(Duration::from_micros(90));
        hist.record(Duration::from_secs(5));

        assert_eq!(hist.count(), 3);
        let snap = hist.snapshot();
        assert_eq!(snap[0], ("le_50us".to_string(), 1));
        assert_eq!(snap[1], ("le_100us".to_string(), 1));
        assert_eq!(snap.last().unwrap(), &("overflow".to_string(), 1));
    }

    #[test]
    fn test_format_is_key_value_lines() {
        let stats = ServerStats::new();
        stats.record_rx(1);
        let dump = stats.snapshot().format();
        assert!(dump.lines().any(|line| line == "rx.total=1"));
        assert!(dump.lines().all(|line| line.contains('=')));
    }
}
