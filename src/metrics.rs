//! Queue-set counters and queue-wait statistics.
//!
//! Counters are plain atomics bumped on the scheduling path. Wait times go into a bounded
//! window; percentiles are only computed when a snapshot is taken.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of most recent queue-wait samples retained for percentiles.
pub const WAIT_WINDOW: usize = 10_000;

#[derive(Debug)]
pub struct QueueSetMetrics {
    arrived: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    cancelled: AtomicU64,
    completed: AtomicU64,
    waits: Mutex<VecDeque<Duration>>,
}

impl QueueSetMetrics {
    pub fn new() -> Self {
        Self {
            arrived: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            waits: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }

    pub fn record_arrival(&self) {
        self.arrived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispatch and remember how long the request waited in its queue.
    pub fn record_dispatch(&self, waited: Duration) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let mut waits = self.waits.lock();
        if waits.len() == WAIT_WINDOW {
            waits.pop_front();
        }
        waits.push_back(waited);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<Duration> = self.waits.lock().iter().copied().collect();
        sorted.sort_unstable();
        MetricsSnapshot {
            arrived: self.arrived.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            wait_p50: percentile(&sorted, 0.50),
            wait_p99: percentile(&sorted, 0.99),
            wait_max: sorted.last().copied(),
        }
    }
}

impl Default for QueueSetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[Duration], quantile: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub arrived: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub cancelled: u64,
    pub completed: u64,
    #[serde(with = "duration_micros_option")]
    pub wait_p50: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub wait_p99: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub wait_max: Option<Duration>,
}

mod duration_micros_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1_000_000.0)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros: Option<f64> = Option::deserialize(deserializer)?;
        Ok(micros.map(|m| Duration::from_secs_f64(m.max(0.0) / 1_000_000.0)))
    }
}
