//! FIFO of waiting requests for one slot of the queue pool, plus its virtual-time bookkeeping.

use crate::debug::{QueueDump, RequestDump};
use crate::request::Request;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// One queue of a queue set.
///
/// `virtual_start` is the virtual time at which the oldest waiting request (if any) virtually
/// starts executing. It advances by one service quantum per dispatch and is corrected by
/// `actual - estimate` when a request from this queue finishes.
#[derive(Debug)]
pub struct Queue {
    requests: VecDeque<Arc<Request>>,
    pub(crate) virtual_start: f64,
    pub(crate) requests_executing: usize,
    index: usize,
}

impl Queue {
    pub fn new(index: usize) -> Self {
        Self {
            requests: VecDeque::new(),
            virtual_start: 0.0,
            requests_executing: 0,
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn virtual_start(&self) -> f64 {
        self.virtual_start
    }

    pub fn requests_executing(&self) -> usize {
        self.requests_executing
    }

    /// Number of waiting requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Nothing waiting and nothing executing.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.requests_executing == 0
    }

    pub fn enqueue(&mut self, request: Arc<Request>) {
        self.requests.push_back(request);
    }

    pub fn dequeue(&mut self) -> Option<Arc<Request>> {
        self.requests.pop_front()
    }

    pub fn head(&self) -> Option<&Arc<Request>> {
        self.requests.front()
    }

    /// Remove a waiting request by id, keeping the order of the others.
    pub fn remove(&mut self, request_id: u64) -> bool {
        match self.requests.iter().position(|r| r.id == request_id) {
            Some(pos) => {
                self.requests.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Virtual finish time of the request at zero-based `position` when each request costs
    /// `service_time` virtual seconds.
    pub fn virtual_finish(&self, position: usize, service_time: f64) -> f64 {
        (position + 1) as f64 * service_time + self.virtual_start
    }

    pub fn dump(&self, include_details: bool, epoch: Instant) -> QueueDump {
        let requests = self
            .requests
            .iter()
            .map(|r| RequestDump {
                request_id: r.id,
                matched_flow_schema: r.flow.schema.clone(),
                flow_distinguisher: r.flow.distinguisher.clone(),
                arrive_time: r.arrival_time.saturating_duration_since(epoch),
                start_time: r.start_time().map(|t| t.saturating_duration_since(epoch)),
                user_name: include_details.then(|| r.context.user_name().to_string()),
                request_info: if include_details {
                    r.context.request_info.clone()
                } else {
                    None
                },
            })
            .collect();

        QueueDump {
            index: self.index,
            virtual_start: self.virtual_start,
            requests,
            executing_requests: self.requests_executing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::identity::{RequestContext, RequestInfo, UserInfo};
    use crate::request::FlowId;

    fn request(distinguisher: &str, arrival: Instant) -> Arc<Request> {
        Arc::new(Request::new(
            0,
            FlowId::new("schema", distinguisher),
            RequestContext::new(
                UserInfo::new(distinguisher),
                RequestInfo {
                    verb: "list".into(),
                    resource: "pods".into(),
                    ..RequestInfo::default()
                },
            ),
            Some(3),
            arrival,
            CancelToken::new(),
        ))
    }

    #[test]
    fn queue_is_fifo() {
        let now = Instant::now();
        let mut queue = Queue::new(3);
        assert!(queue.is_idle());
        assert!(queue.dequeue().is_none());

        let a = request("a", now);
        let b = request("b", now);
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head().map(|r| r.id), Some(a.id));
        assert_eq!(queue.dequeue().map(|r| r.id), Some(a.id));
        assert_eq!(queue.dequeue().map(|r| r.id), Some(b.id));
        assert!(queue.is_empty());
    }

    #[test]
    fn virtual_finish_counts_from_head() {
        let mut queue = Queue::new(0);
        queue.virtual_start = 2.0;
        assert_eq!(queue.virtual_finish(0, 0.5), 2.5);
        assert_eq!(queue.virtual_finish(3, 0.5), 4.0);
    }

    #[test]
    fn remove_keeps_order() {
        let now = Instant::now();
        let mut queue = Queue::new(0);
        let reqs: Vec<_> = ["a", "b", "c"].iter().map(|d| request(d, now)).collect();
        for r in &reqs {
            queue.enqueue(r.clone());
        }
        assert!(queue.remove(reqs[1].id));
        assert!(!queue.remove(reqs[1].id));
        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue()).map(|r| r.id).collect();
        assert_eq!(order, vec![reqs[0].id, reqs[2].id]);
    }

    #[test]
    fn dump_hides_details_unless_asked() {
        let epoch = Instant::now();
        let mut queue = Queue::new(3);
        queue.requests_executing = 2;
        queue.enqueue(request("bob", epoch));

        let brief = queue.dump(false, epoch);
        assert_eq!(brief.index, 3);
        assert_eq!(brief.executing_requests, 2);
        assert_eq!(brief.requests.len(), 1);
        assert_eq!(brief.requests[0].flow_distinguisher, "bob");
        assert_eq!(brief.requests[0].start_time, None);
        assert_eq!(brief.requests[0].user_name, None);

        let detailed = queue.dump(true, epoch);
        assert_eq!(detailed.requests[0].user_name.as_deref(), Some("bob"));
        assert_eq!(
            detailed.requests[0].request_info.as_ref().map(|i| i.verb.as_str()),
            Some("list")
        );
        // Dumping is read-only
        assert_eq!(queue.len(), 1);
    }
}
