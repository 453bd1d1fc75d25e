//! Scheduling record for one admission request and the caller-side handle.

use crate::cancel::CancelToken;
use crate::identity::RequestContext;
use crate::promise::WriteOnce;
use crate::scheduler::QueueSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Final outcome for a request that entered the queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Execute,
    Reject,
    Cancel,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Execute => "execute",
            Decision::Reject => "reject",
            Decision::Cancel => "cancel",
        };
        write!(f, "{label}")
    }
}

/// Which flow a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId {
    /// Name of the flow schema that matched the request.
    pub schema: String,
    /// Distinguisher within the schema, e.g. user or namespace.
    pub distinguisher: String,
}

impl FlowId {
    pub fn new(schema: impl Into<String>, distinguisher: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            distinguisher: distinguisher.into(),
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.schema, self.distinguisher)
    }
}

/// A request as the queue set tracks it.
///
/// The queue set owns the scheduling fields while the request waits; the caller shares the
/// decision through a [`RequestHandle`] once it has been written.
#[derive(Debug)]
pub struct Request {
    pub(crate) id: u64,
    /// Identifies the queue set that admitted this request.
    pub(crate) owner: u64,
    pub(crate) flow: FlowId,
    pub(crate) context: RequestContext,
    /// `None` when the queue set runs without queues.
    pub(crate) queue: Option<usize>,
    pub(crate) arrival_time: Instant,
    pub(crate) start_time: Mutex<Option<Instant>>,
    /// Virtual seconds charged to the queue at dispatch; completion corrects against this.
    pub(crate) charged: Mutex<f64>,
    pub(crate) decision: WriteOnce<Decision>,
    pub(crate) cancel: CancelToken,
    /// Key of the queue set's hook on `cancel` while the request is undecided.
    cancel_hook: Mutex<Option<u64>>,
    wait_started: AtomicBool,
    pub(crate) finished: AtomicBool,
}

impl Request {
    pub(crate) fn new(
        owner: u64,
        flow: FlowId,
        context: RequestContext,
        queue: Option<usize>,
        arrival_time: Instant,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id: REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            owner,
            flow,
            context,
            queue,
            arrival_time,
            start_time: Mutex::new(None),
            charged: Mutex::new(0.0),
            decision: WriteOnce::new(),
            cancel,
            cancel_hook: Mutex::new(None),
            wait_started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flow(&self) -> &FlowId {
        &self.flow
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn queue(&self) -> Option<usize> {
        self.queue
    }

    pub fn arrival_time(&self) -> Instant {
        self.arrival_time
    }

    pub fn start_time(&self) -> Option<Instant> {
        *self.start_time.lock()
    }

    /// Stamp the start time, remember the quantum charged and publish `Execute`. Called with the
    /// queue-set lock held.
    pub(crate) fn execute(&self, now: Instant, charged: f64) {
        *self.start_time.lock() = Some(now.max(self.arrival_time));
        *self.charged.lock() = charged;
        self.decide(Decision::Execute);
    }

    /// Publish the decision and detach the cancellation hook, which has nothing left to do.
    pub(crate) fn decide(&self, decision: Decision) {
        self.decision.set(decision);
        self.detach_cancel_hook();
    }

    /// Record the hook registered on the token. If the decision was written in the meantime the
    /// hook is dropped right away.
    pub(crate) fn attach_cancel_hook(&self, key: u64) {
        *self.cancel_hook.lock() = Some(key);
        if self.decision.is_set() {
            self.detach_cancel_hook();
        }
    }

    fn detach_cancel_hook(&self) {
        let key = self.cancel_hook.lock().take();
        if let Some(key) = key {
            self.cancel.deregister(key);
        }
    }

    fn begin_wait(&self) {
        assert!(
            !self.wait_started.swap(true, Ordering::AcqRel),
            "wait called twice on request {}",
            self.id
        );
    }
}

/// Result of [`QueueSet::enqueue`].
#[derive(Debug)]
pub enum Admission {
    /// Fast rejection: limits were exceeded, nothing was queued.
    Rejected,
    /// The request entered the queue set; wait on the handle for the decision.
    Queued(RequestHandle),
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Rejected)
    }

    /// Borrow the handle of a queued request.
    pub fn handle(&self) -> Option<&RequestHandle> {
        match self {
            Admission::Rejected => None,
            Admission::Queued(handle) => Some(handle),
        }
    }

    pub fn into_handle(self) -> Option<RequestHandle> {
        match self {
            Admission::Rejected => None,
            Admission::Queued(handle) => Some(handle),
        }
    }
}

/// Caller-side view of an enqueued request.
#[derive(Debug)]
pub struct RequestHandle {
    pub(crate) request: Arc<Request>,
    pub(crate) queue_set: QueueSet,
}

impl RequestHandle {
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Decision if one has been made, without blocking.
    pub fn try_decision(&self) -> Option<Decision> {
        self.request.decision.get()
    }

    /// Block until the request leaves its queue.
    ///
    /// # Panics
    /// Panics if any wait method was already called on this request.
    pub fn wait(&self) -> Decision {
        self.request.begin_wait();
        self.request.decision.wait()
    }

    /// Async flavour of [`RequestHandle::wait`].
    pub async fn wait_async(&self) -> Decision {
        self.request.begin_wait();
        self.request.decision.wait_async().await
    }

    /// Wait until `deadline`, then fire the cancellation token and return whatever decision
    /// results. Dispatch may still win the race, in which case this returns `Execute`.
    pub fn wait_until(&self, deadline: Instant) -> Decision {
        self.request.begin_wait();
        let timeout = deadline.saturating_duration_since(Instant::now());
        if let Some(decision) = self.request.decision.wait_timeout(timeout) {
            return decision;
        }
        self.request.cancel.cancel();
        self.request.decision.wait()
    }

    /// Report completion, measuring service time from the start stamp with the queue set's
    /// clock.
    pub fn finish(&self) {
        self.queue_set.finish_measured(&self.request);
    }

    /// Report completion with an explicit service time.
    pub fn finish_with(&self, actual: Duration) {
        self.queue_set.on_execution_finished(&self.request, actual);
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.queue_set.release(&self.request);
    }
}
