//! The fair-queuing queue set of one priority level.

// Import cancellation signal watched for every queued request
use crate::cancel::CancelToken;
// Import time sources (real or fake)
use crate::clock::{Clock, RealClock};
// Import queue-set tunables
use crate::config::QueueSetConfig;
// Import introspection snapshot
use crate::debug::QueueSetDump;
// Import error types for configuration and the convenience path
use crate::error::{AdmissionError, ConfigError, ConfigResult};
// Import caller identity carried with each request
use crate::identity::RequestContext;
// Import counters and wait statistics
use crate::metrics::{MetricsSnapshot, QueueSetMetrics};
// Import the per-queue FIFO
use crate::queue::Queue;
// Import request record, caller handle and decision values
use crate::request::{Admission, Decision, FlowId, Request, RequestHandle};
// Import lock-guarded scheduler state and selection logic
use crate::scheduler::dispatch::State;
// Import shuffle-sharding dealer and flow hash
use crate::shuffle::{hash_flow, Dealer};
// Import mutex guarding the scheduler state
use parking_lot::Mutex;
// Import formatting for the manual Debug impl
use std::fmt;
// Import atomics for queue-set ids and completion flags
use std::sync::atomic::{AtomicU64, Ordering};
// Import shared and weak ownership for cancellation hooks
use std::sync::{Arc, Weak};
// Import time types for service times and stamps
use std::time::{Duration, Instant};
// Import structured logging macros
use tracing::{debug, info};

static QUEUE_SET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

struct Inner {
    id: u64,
    name: String,
    clock: Arc<dyn Clock>,
    /// Creation instant; dump timestamps are offsets from here.
    epoch: Instant,
    /// `None` when the set runs without queues.
    dealer: Option<Dealer>,
    state: Mutex<State>,
    metrics: QueueSetMetrics,
}

/// Fair-queuing admission scheduler for one priority level.
///
/// Cloning is cheap and yields another handle to the same queue set. All queue selection,
/// virtual-time updates and decision writes happen under one internal mutex; callers wait for
/// their decision outside it.
#[derive(Clone)]
pub struct QueueSet {
    inner: Arc<Inner>,
}

impl QueueSet {
    /// Build a queue set on the real clock.
    pub fn new(config: QueueSetConfig) -> ConfigResult<Self> {
        Self::with_clock(config, Arc::new(RealClock))
    }

    /// Build a queue set on the given clock.
    pub fn with_clock(config: QueueSetConfig, clock: Arc<dyn Clock>) -> ConfigResult<Self> {
        config.validate()?;
        let dealer = if config.is_queuing() {
            Some(Dealer::new(config.queues, config.hand_size)?)
        } else {
            None
        };
        let now = clock.now();
        let state = State {
            queues: (0..config.queues).map(Queue::new).collect(),
            virtual_time: 0.0,
            last_real_time: now,
            waiting: 0,
            executing: 0,
            concurrency_limit: config.concurrency_limit,
            queue_length_limit: config.queue_length_limit,
            queue_concurrency_limit: config.queue_concurrency_limit,
            estimated_service_time: config.estimated_service_time.as_secs_f64(),
        };
        info!(
            queue_set = %config.name,
            queues = config.queues,
            hand_size = config.hand_size,
            concurrency_limit = config.concurrency_limit,
            queue_length_limit = config.queue_length_limit,
            "created queue set"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                id: QUEUE_SET_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                name: config.name,
                clock,
                epoch: now,
                dealer,
                state: Mutex::new(state),
                metrics: QueueSetMetrics::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn queue_count(&self) -> usize {
        self.inner.state.lock().queues.len()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.state.lock().concurrency_limit
    }

    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting
    }

    pub fn executing(&self) -> usize {
        self.inner.state.lock().executing
    }

    /// Current value of the shared virtual clock, in virtual seconds.
    pub fn virtual_time(&self) -> f64 {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.sync_time(now);
        state.virtual_time
    }

    /// Queues a flow may be placed in, in dealing order. Empty without queuing.
    pub fn hand(&self, flow: &FlowId) -> Vec<usize> {
        match &self.inner.dealer {
            Some(dealer) => dealer.deal_into_hand(hash_flow(&flow.schema, &flow.distinguisher)),
            None => Vec::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Submit a request for admission.
    ///
    /// Returns [`Admission::Rejected`] without touching any queue when the concurrency limit is
    /// zero or the chosen queue is full. Otherwise the request is queued and a dispatch runs
    /// before returning, so the handle may already carry `Execute`.
    pub fn enqueue(&self, flow: FlowId, context: RequestContext, cancel: CancelToken) -> Admission {
        let inner = &self.inner;
        let now = inner.clock.now();
        inner.metrics.record_arrival();

        let request = {
            let mut state = inner.state.lock();
            state.sync_time(now);

            let Some(dealer) = &inner.dealer else {
                return self.admit_unqueued(&mut state, flow, context, cancel, now);
            };

            if state.concurrency_limit == 0 {
                return self.reject(&flow, None, "concurrency limit is zero");
            }
            let index = state.choose_queue(dealer, &flow);
            if state.queues[index].len() >= state.queue_length_limit {
                return self.reject(&flow, Some(index), "queue full");
            }

            let request = Arc::new(Request::new(
                inner.id,
                flow,
                context,
                Some(index),
                now,
                cancel,
            ));
            let virtual_time = state.virtual_time;
            let queue = &mut state.queues[index];
            if queue.is_idle() {
                queue.virtual_start = virtual_time;
            }
            queue.enqueue(request.clone());
            state.waiting += 1;
            debug!(
                queue_set = %inner.name,
                queue = index,
                request_id = request.id,
                flow = %request.flow,
                waiting = state.waiting,
                "enqueued request"
            );

            state.dispatch_as_much_as_possible(now, &inner.name, &inner.metrics);
            request
        };

        self.watch_cancellation(&request);
        Admission::Queued(RequestHandle {
            request,
            queue_set: self.clone(),
        })
    }

    /// Without queues a request runs now or not at all.
    fn admit_unqueued(
        &self,
        state: &mut State,
        flow: FlowId,
        context: RequestContext,
        cancel: CancelToken,
        now: Instant,
    ) -> Admission {
        if state.executing >= state.concurrency_limit {
            return self.reject(&flow, None, "concurrency limit reached");
        }
        let request = Arc::new(Request::new(self.inner.id, flow, context, None, now, cancel));
        state.executing += 1;
        request.execute(now, 0.0);
        self.inner.metrics.record_dispatch(Duration::ZERO);
        debug!(
            queue_set = %self.inner.name,
            request_id = request.id,
            flow = %request.flow,
            executing = state.executing,
            "admitted unqueued request"
        );
        Admission::Queued(RequestHandle {
            request,
            queue_set: self.clone(),
        })
    }

    fn reject(&self, flow: &FlowId, queue: Option<usize>, reason: &str) -> Admission {
        self.inner.metrics.record_rejection();
        debug!(queue_set = %self.inner.name, queue, flow = %flow, reason, "rejected request");
        Admission::Rejected
    }

    /// Arrange for the request to leave its queue when its token fires.
    fn watch_cancellation(&self, request: &Arc<Request>) {
        if request.decision.is_set() {
            return;
        }
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let weak_request = Arc::downgrade(request);
        let registered = request.cancel.on_cancel(move || {
            if let (Some(inner), Some(request)) = (inner.upgrade(), weak_request.upgrade()) {
                inner.cancel_waiting(&request);
            }
        });
        match registered {
            Some(key) => request.attach_cancel_hook(key),
            None => self.inner.cancel_waiting(request),
        }
    }

    /// Report that an admitted request finished after `actual` service time.
    ///
    /// Releases its concurrency slot, corrects its queue's virtual start by `actual` minus the
    /// quantum charged at dispatch, and dispatches into the freed capacity.
    ///
    /// # Panics
    /// Panics if the request was not admitted by this queue set, was not decided `Execute`, or
    /// was already reported finished.
    pub fn on_execution_finished(&self, request: &Request, actual: Duration) {
        let inner = &self.inner;
        assert_eq!(
            request.owner, inner.id,
            "request {} was not admitted by queue set {}",
            request.id, inner.name
        );
        assert_eq!(
            request.decision.get(),
            Some(Decision::Execute),
            "completion reported for request {} that was never admitted",
            request.id
        );
        assert!(
            !request.finished.swap(true, Ordering::AcqRel),
            "completion reported twice for request {}",
            request.id
        );

        let now = inner.clock.now();
        let mut state = inner.state.lock();
        state.sync_time(now);
        state.executing -= 1;
        if let Some(index) = request.queue {
            let charged = *request.charged.lock();
            let queue = &mut state.queues[index];
            queue.requests_executing -= 1;
            queue.virtual_start += actual.as_secs_f64() - charged;
        }
        inner.metrics.record_completion();
        debug!(
            queue_set = %inner.name,
            queue = request.queue,
            request_id = request.id,
            actual_ms = actual.as_secs_f64() * 1_000.0,
            executing = state.executing,
            "request finished"
        );
        state.dispatch_as_much_as_possible(now, &inner.name, &inner.metrics);
    }

    /// Finish using the elapsed time since the request's start stamp.
    pub(crate) fn finish_measured(&self, request: &Request) {
        let actual = request
            .start_time()
            .map(|start| self.inner.clock.now().saturating_duration_since(start))
            .unwrap_or_default();
        self.on_execution_finished(request, actual);
    }

    /// Settle a request whose handle is going away: a waiting request leaves its queue, an
    /// executing one that was never reported finished gives back its slot.
    pub(crate) fn release(&self, request: &Request) {
        match request.decision.get() {
            None => self.inner.cancel_waiting(request),
            Some(Decision::Execute) if !request.finished.load(Ordering::Acquire) => {
                self.finish_measured(request)
            }
            Some(_) => {}
        }
    }

    /// Change the concurrency budget. Raising it dispatches waiting requests immediately;
    /// lowering it never preempts running ones.
    pub fn set_concurrency_limit(&self, limit: usize) {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.sync_time(now);
        let previous = state.concurrency_limit;
        state.concurrency_limit = limit;
        info!(queue_set = %self.inner.name, previous, limit, "concurrency limit changed");
        state.dispatch_as_much_as_possible(now, &self.inner.name, &self.inner.metrics);
    }

    /// Change the service quantum `G` charged from now on.
    pub fn set_estimated_service_time(&self, service_time: Duration) -> ConfigResult<()> {
        if service_time.is_zero() {
            return Err(ConfigError::ZeroServiceTime);
        }
        let mut state = self.inner.state.lock();
        state.estimated_service_time = service_time.as_secs_f64();
        info!(
            queue_set = %self.inner.name,
            service_time_ms = service_time.as_secs_f64() * 1_000.0,
            "estimated service time changed"
        );
        Ok(())
    }

    /// Snapshot every queue. `include_details` adds user names and request descriptors.
    pub fn dump(&self, include_details: bool) -> QueueSetDump {
        let state = self.inner.state.lock();
        QueueSetDump {
            name: self.inner.name.clone(),
            virtual_time: state.virtual_time,
            concurrency_limit: state.concurrency_limit,
            estimated_service_time: Duration::from_secs_f64(state.estimated_service_time),
            waiting: state.waiting,
            executing: state.executing,
            queues: state
                .queues
                .iter()
                .map(|q| q.dump(include_details, self.inner.epoch))
                .collect(),
        }
    }

    /// Enqueue, wait, run `work` if admitted and report completion.
    ///
    /// If `work` panics the handle's drop still releases the slot. Rejection and cancellation
    /// come back as distinct [`AdmissionError`] variants.
    pub fn execute<T>(
        &self,
        flow: FlowId,
        context: RequestContext,
        cancel: CancelToken,
        work: impl FnOnce() -> T,
    ) -> Result<T, AdmissionError> {
        let handle = match self.enqueue(flow, context, cancel) {
            Admission::Rejected => return Err(self.rejected()),
            Admission::Queued(handle) => handle,
        };
        match handle.wait() {
            Decision::Execute => {
                let output = work();
                handle.finish();
                Ok(output)
            }
            Decision::Reject => Err(self.rejected()),
            Decision::Cancel => Err(AdmissionError::Cancelled {
                queue_set: self.inner.name.clone(),
            }),
        }
    }

    fn rejected(&self) -> AdmissionError {
        AdmissionError::Rejected {
            queue_set: self.inner.name.clone(),
        }
    }
}

impl Inner {
    /// Cancel path: remove a still-waiting request and decide `Cancel`. No-op once decided.
    fn cancel_waiting(&self, request: &Request) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if request.decision.is_set() {
            return;
        }
        state.sync_time(now);
        if let Some(index) = request.queue {
            if state.queues[index].remove(request.id) {
                state.waiting -= 1;
            }
        }
        request.decide(Decision::Cancel);
        self.metrics.record_cancellation();
        debug!(
            queue_set = %self.name,
            queue = request.queue,
            request_id = request.id,
            flow = %request.flow,
            "cancelled waiting request"
        );
    }
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
