//! Virtual-time bookkeeping and queue selection.
//!
//! Everything here runs with the queue-set lock held, so selection always sees a consistent view
//! of every queue's virtual finish time.
//!
//! Algorithm (start-time fair queuing):
//! 1. The shared virtual clock advances with real time at rate
//!    `min(executing, concurrency_limit) / active_queues`.
//! 2. A queue going from idle to busy restarts at the current virtual time.
//! 3. Among non-empty queues with headroom, the head with the smallest virtual finish
//!    `virtual_start + G` is dispatched; ties go to the lowest queue index.
//! 4. Dispatch charges the queue one quantum `G`; completion corrects by `actual - G`.

// Import counters bumped on every dispatch
use crate::metrics::QueueSetMetrics;
// Import the per-queue FIFO and its virtual start
use crate::queue::Queue;
// Import decision values and flow identity
use crate::request::{Decision, FlowId};
// Import shuffle-sharding dealer and flow hash for queue choice
use crate::shuffle::{hash_flow, Dealer};
// Import time type for virtual clock sync
use std::time::Instant;
// Import structured logging macros
use tracing::{debug, trace};

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchStep {
    /// A request was admitted for execution.
    Executed,
    /// The selected head had already been cancelled; it was decided `Cancel` and selection
    /// should run again.
    TryAnother,
    /// No queue is eligible or the concurrency budget is exhausted.
    Idle,
}

/// Mutable scheduler state guarded by the queue-set mutex.
#[derive(Debug)]
pub(crate) struct State {
    pub(crate) queues: Vec<Queue>,
    /// Virtual seconds since the queue set was created.
    pub(crate) virtual_time: f64,
    pub(crate) last_real_time: Instant,
    /// Requests waiting across all queues.
    pub(crate) waiting: usize,
    /// Requests executing across the whole set, queued or not.
    pub(crate) executing: usize,
    pub(crate) concurrency_limit: usize,
    pub(crate) queue_length_limit: usize,
    pub(crate) queue_concurrency_limit: Option<usize>,
    /// Service quantum `G` in seconds.
    pub(crate) estimated_service_time: f64,
}

impl State {
    /// Advance the virtual clock to `now`.
    pub(crate) fn sync_time(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_real_time);
        self.last_real_time = self.last_real_time.max(now);
        let ratio = self.virtual_time_ratio();
        self.virtual_time += elapsed.as_secs_f64() * ratio;
        trace!(
            virtual_time = self.virtual_time,
            ratio,
            elapsed_us = elapsed.as_micros() as u64,
            "synced virtual clock"
        );
    }

    /// Rate at which virtual time passes relative to real time.
    ///
    /// Each active queue (waiting or executing requests) receives an equal share of the
    /// concurrency actually in use. With no active queue the clock stands still.
    pub(crate) fn virtual_time_ratio(&self) -> f64 {
        let mut active_queues = 0usize;
        let mut executing = 0usize;
        for queue in &self.queues {
            executing += queue.requests_executing;
            if !queue.is_idle() {
                active_queues += 1;
            }
        }
        if active_queues == 0 {
            return 0.0;
        }
        executing.min(self.concurrency_limit) as f64 / active_queues as f64
    }

    /// Pick the queue for a flow: the least loaded member of its shuffle-sharded hand.
    pub(crate) fn choose_queue(&self, dealer: &Dealer, flow: &FlowId) -> usize {
        let mut best: Option<(usize, usize)> = None;
        dealer.deal(hash_flow(&flow.schema, &flow.distinguisher), |index| {
            let queue = &self.queues[index];
            let load = queue.len() + queue.requests_executing();
            let better = match best {
                None => true,
                Some((best_index, best_load)) => {
                    load < best_load || (load == best_load && index < best_index)
                }
            };
            if better {
                best = Some((index, load));
            }
        });
        // A dealer always deals at least one card
        best.map(|(index, _)| index).unwrap_or(0)
    }

    fn has_capacity(&self) -> bool {
        self.executing < self.concurrency_limit
    }

    fn is_eligible(&self, queue: &Queue) -> bool {
        if queue.is_empty() {
            return false;
        }
        match self.queue_concurrency_limit {
            Some(limit) => queue.requests_executing() < limit,
            None => true,
        }
    }

    /// Index of the eligible queue whose head has the earliest virtual finish time.
    pub(crate) fn select_queue(&self) -> Option<usize> {
        let service_time = self.estimated_service_time;
        let mut best: Option<(usize, f64)> = None;
        for queue in self.queues.iter().filter(|q| self.is_eligible(q)) {
            let finish = queue.virtual_finish(0, service_time);
            // Strictly smaller only: queues are scanned by ascending index
            if best.map_or(true, |(_, best_finish)| finish < best_finish) {
                best = Some((queue.index(), finish));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Try to move one request from a queue into execution.
    pub(crate) fn dispatch_one(
        &mut self,
        now: Instant,
        queue_set: &str,
        metrics: &QueueSetMetrics,
    ) -> DispatchStep {
        if !self.has_capacity() {
            return DispatchStep::Idle;
        }
        let Some(index) = self.select_queue() else {
            return DispatchStep::Idle;
        };

        let service_time = self.estimated_service_time;
        let queue = &mut self.queues[index];
        let finish = queue.virtual_finish(0, service_time);
        let Some(request) = queue.dequeue() else {
            return DispatchStep::Idle;
        };
        self.waiting -= 1;

        if request.cancel.is_cancelled() {
            request.decide(Decision::Cancel);
            metrics.record_cancellation();
            debug!(
                queue_set,
                queue = index,
                request_id = request.id,
                flow = %request.flow,
                "dropped cancelled request at dispatch"
            );
            return DispatchStep::TryAnother;
        }

        queue.requests_executing += 1;
        queue.virtual_start += service_time;
        self.executing += 1;
        request.execute(now, service_time);
        metrics.record_dispatch(now.saturating_duration_since(request.arrival_time));
        debug!(
            queue_set,
            queue = index,
            request_id = request.id,
            flow = %request.flow,
            virtual_finish = finish,
            virtual_start = queue.virtual_start,
            executing = self.executing,
            "dispatched request"
        );
        DispatchStep::Executed
    }

    /// Dispatch until capacity or eligible queues run out. Returns the number admitted.
    pub(crate) fn dispatch_as_much_as_possible(
        &mut self,
        now: Instant,
        queue_set: &str,
        metrics: &QueueSetMetrics,
    ) -> usize {
        let mut admitted = 0;
        loop {
            match self.dispatch_one(now, queue_set, metrics) {
                DispatchStep::Executed => admitted += 1,
                DispatchStep::TryAnother => continue,
                DispatchStep::Idle => return admitted,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::identity::RequestContext;
    use crate::request::Request;
    use std::sync::Arc;

    fn state(queues: usize, concurrency_limit: usize) -> State {
        State {
            queues: (0..queues).map(Queue::new).collect(),
            virtual_time: 0.0,
            last_real_time: Instant::now(),
            waiting: 0,
            executing: 0,
            concurrency_limit,
            queue_length_limit: 10,
            queue_concurrency_limit: None,
            estimated_service_time: 1.0,
        }
    }

    fn push(state: &mut State, index: usize) -> Arc<Request> {
        let request = Arc::new(Request::new(
            0,
            FlowId::new("s", format!("q{index}")),
            RequestContext::default(),
            Some(index),
            state.last_real_time,
            CancelToken::new(),
        ));
        state.queues[index].enqueue(request.clone());
        state.waiting += 1;
        request
    }

    #[test]
    fn selection_prefers_earliest_finish_then_lowest_index() {
        let mut s = state(3, 1);
        assert_eq!(s.select_queue(), None);
        push(&mut s, 2);
        push(&mut s, 1);
        assert_eq!(s.select_queue(), Some(1));
        s.queues[1].virtual_start = 0.5;
        assert_eq!(s.select_queue(), Some(2));
    }

    #[test]
    fn per_queue_limit_excludes_busy_queue() {
        let mut s = state(2, 4);
        s.queue_concurrency_limit = Some(1);
        push(&mut s, 0);
        push(&mut s, 1);
        s.queues[0].requests_executing = 1;
        assert_eq!(s.select_queue(), Some(1));
    }

    #[test]
    fn cancelled_head_yields_try_another() {
        let metrics = QueueSetMetrics::new();
        let mut s = state(2, 1);
        let cancelled = push(&mut s, 0);
        cancelled.cancel.cancel();
        let live = push(&mut s, 1);

        let now = s.last_real_time;
        assert_eq!(s.dispatch_one(now, "t", &metrics), DispatchStep::TryAnother);
        assert_eq!(cancelled.decision.get(), Some(Decision::Cancel));
        assert_eq!(s.dispatch_one(now, "t", &metrics), DispatchStep::Executed);
        assert_eq!(live.decision.get(), Some(Decision::Execute));
        assert_eq!(s.dispatch_one(now, "t", &metrics), DispatchStep::Idle);
        assert_eq!((s.waiting, s.executing), (0, 1));
    }

    #[test]
    fn ratio_shares_used_concurrency_among_active_queues() {
        let mut s = state(4, 3);
        assert_eq!(s.virtual_time_ratio(), 0.0);
        s.queues[0].requests_executing = 2;
        s.queues[1].requests_executing = 2;
        // min(4, 3) / 2
        assert_eq!(s.virtual_time_ratio(), 1.5);
        push(&mut s, 2);
        assert_eq!(s.virtual_time_ratio(), 1.0);
    }
}
