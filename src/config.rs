//! Queue-set configuration.
//!
//! One [`QueueSetConfig`] describes the queue pool and limits of a single priority level. Values
//! come from the priority-level configuration (handled elsewhere); this module only provides
//! defaults, JSON loading and validation.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on hash bits consumed when dealing a hand of queues.
pub const MAX_HASH_BITS: u32 = 60;

/// Tunables for one queue set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSetConfig {
    /// Name used in logs, dumps and errors (normally the priority level name).
    pub name: String,
    /// Number of queues in the pool. Zero disables queuing: requests either execute
    /// immediately or are rejected.
    pub queues: usize,
    /// Number of queues each flow may be dealt (shuffle sharding).
    pub hand_size: usize,
    /// Maximum number of waiting requests per queue.
    pub queue_length_limit: usize,
    /// Maximum number of requests executing at once across the whole set.
    pub concurrency_limit: usize,
    /// Optional cap on requests executing at once from a single queue.
    pub queue_concurrency_limit: Option<usize>,
    /// Service quantum `G` charged per dispatched request.
    #[serde(rename = "estimated_service_time_ms", with = "duration_millis")]
    pub estimated_service_time: Duration,
}

impl Default for QueueSetConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            queues: 64,
            hand_size: 8,
            queue_length_limit: 50,
            concurrency_limit: 30,
            queue_concurrency_limit: None,
            estimated_service_time: Duration::from_secs(60),
        }
    }
}

impl QueueSetConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_queues(mut self, queues: usize, hand_size: usize) -> Self {
        self.queues = queues;
        self.hand_size = hand_size;
        self
    }

    pub fn with_queue_length_limit(mut self, limit: usize) -> Self {
        self.queue_length_limit = limit;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_queue_concurrency_limit(mut self, limit: usize) -> Self {
        self.queue_concurrency_limit = Some(limit);
        self
    }

    pub fn with_estimated_service_time(mut self, service_time: Duration) -> Self {
        self.estimated_service_time = service_time;
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: QueueSetConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Whether requests go through queues at all.
    pub fn is_queuing(&self) -> bool {
        self.queues > 0
    }

    /// Check internal consistency.
    ///
    /// The shuffle-sharding dealer consumes `ceil(log2(queues) * hand_size)` bits of a 64-bit
    /// hash; configurations needing more than [`MAX_HASH_BITS`] are refused.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.estimated_service_time.is_zero() {
            return Err(ConfigError::ZeroServiceTime);
        }
        if self.queue_concurrency_limit == Some(0) {
            return Err(ConfigError::ZeroQueueConcurrency);
        }
        if !self.is_queuing() {
            return Ok(());
        }
        if self.hand_size == 0 || self.hand_size > self.queues {
            return Err(ConfigError::InvalidHandSize {
                hand_size: self.hand_size,
                queues: self.queues,
            });
        }
        if required_entropy_bits(self.queues, self.hand_size) > MAX_HASH_BITS {
            return Err(ConfigError::InsufficientEntropy {
                hand_size: self.hand_size,
                queues: self.queues,
                max_bits: MAX_HASH_BITS,
            });
        }
        if self.queue_length_limit == 0 {
            return Err(ConfigError::ZeroQueueLength);
        }
        Ok(())
    }
}

pub(crate) fn required_entropy_bits(deck_size: usize, hand_size: usize) -> u32 {
    ((deck_size as f64).log2() * hand_size as f64).ceil() as u32
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    // Milliseconds as f64 so sub-millisecond quanta survive a round trip
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64() * 1_000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        if !millis.is_finite() || millis < 0.0 {
            return Err(serde::de::Error::custom(
                "duration must be a non-negative number of milliseconds",
            ));
        }
        Ok(Duration::from_secs_f64(millis / 1_000.0))
    }
}
