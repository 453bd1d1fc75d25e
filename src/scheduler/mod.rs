//! Fair-queuing scheduler.
//!
//! [`QueueSet`] owns the queue pool and the shared virtual clock of one priority level;
//! `dispatch` holds the selection algorithm that runs under the queue-set lock.

mod dispatch;
mod queue_set;

pub use queue_set::QueueSet;
