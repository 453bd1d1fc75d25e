//! Virtual-time fair-queuing admission scheduler.
//!
//! A [`QueueSet`] decides, for every request assigned to one priority level, whether it
//! executes now, waits, or is rejected. Flows are shuffle-sharded onto a fixed pool of queues
//! and queued requests are dispatched in order of virtual finish time, so no flow can starve
//! the others sharing the level's concurrency budget.
//!
//! ```no_run
//! use apf_queueset::{CancelToken, Decision, FlowId, QueueSet, QueueSetConfig, RequestContext};
//!
//! let queue_set = QueueSet::new(QueueSetConfig::named("workload-low")).unwrap();
//! let admission = queue_set.enqueue(
//!     FlowId::new("service-accounts", "kube-system"),
//!     RequestContext::default(),
//!     CancelToken::new(),
//! );
//! if let Some(handle) = admission.into_handle() {
//!     if handle.wait() == Decision::Execute {
//!         // serve the request
//!         handle.finish();
//!     }
//! }
//! ```

pub mod cancel;
pub mod clock;
pub mod config;
pub mod debug;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod promise;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod shuffle;

pub use cancel::CancelToken;
pub use clock::{Clock, FakeClock, RealClock};
pub use config::QueueSetConfig;
pub use debug::{QueueDump, QueueSetDump, RequestDump};
pub use error::{AdmissionError, ConfigError};
pub use identity::{RequestContext, RequestInfo, UserInfo};
pub use metrics::MetricsSnapshot;
pub use request::{Admission, Decision, FlowId, Request, RequestHandle};
pub use scheduler::QueueSet;
