//! Read-only snapshots of queue-set state for operational introspection.
//!
//! Times are offsets from the queue set's creation so the snapshot serializes without a wall
//! clock. Producing a dump never mutates scheduler state.

use crate::identity::RequestInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One waiting request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDump {
    pub request_id: u64,
    pub matched_flow_schema: String,
    pub flow_distinguisher: String,
    pub arrive_time: Duration,
    /// Unset while the request is still waiting.
    pub start_time: Option<Duration>,
    /// Only populated for detailed dumps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_info: Option<RequestInfo>,
}

/// One queue of the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDump {
    pub index: usize,
    pub virtual_start: f64,
    pub requests: Vec<RequestDump>,
    pub executing_requests: usize,
}

/// The whole queue set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSetDump {
    pub name: String,
    pub virtual_time: f64,
    pub concurrency_limit: usize,
    #[serde(
        rename = "estimated_service_time_ms",
        with = "crate::config::duration_millis"
    )]
    pub estimated_service_time: Duration,
    pub waiting: usize,
    pub executing: usize,
    pub queues: Vec<QueueDump>,
}
