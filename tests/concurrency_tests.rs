// Queue set shared between threads and async tasks on the real clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use apf_queueset::{
    Admission, CancelToken, Decision, FlowId, QueueSet, QueueSetConfig, RequestContext,
};

fn shared_queue_set(concurrency: usize) -> QueueSet {
    QueueSet::new(
        QueueSetConfig::named("shared")
            .with_queues(8, 2)
            .with_queue_length_limit(1_000)
            .with_concurrency_limit(concurrency)
            .with_estimated_service_time(Duration::from_millis(1)),
    )
    .expect("valid config")
}

#[test]
fn every_request_gets_exactly_one_decision_under_cancellation_races() {
    let qs = shared_queue_set(2);
    let executed = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let qs = qs.clone();
            let (executed, cancelled, rejected) =
                (executed.clone(), cancelled.clone(), rejected.clone());
            thread::spawn(move || {
                for i in 0..50 {
                    let flow = FlowId::new("race", format!("worker-{worker}"));
                    let token = CancelToken::new();
                    let handle = match qs.enqueue(flow, RequestContext::default(), token.clone()) {
                        Admission::Rejected => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Admission::Queued(handle) => handle,
                    };
                    // Every third request is abandoned from another thread
                    let canceller = (i % 3 == 0).then(|| thread::spawn(move || token.cancel()));
                    match handle.wait() {
                        Decision::Execute => {
                            executed.fetch_add(1, Ordering::Relaxed);
                            thread::sleep(Duration::from_micros(200));
                            handle.finish();
                        }
                        Decision::Cancel => {
                            cancelled.fetch_add(1, Ordering::Relaxed);
                        }
                        Decision::Reject => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    if let Some(canceller) = canceller {
                        canceller.join().expect("canceller thread");
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let (executed, cancelled, rejected) = (
        executed.load(Ordering::Relaxed) as u64,
        cancelled.load(Ordering::Relaxed) as u64,
        rejected.load(Ordering::Relaxed) as u64,
    );
    assert_eq!(executed + cancelled + rejected, 400);
    assert_eq!(qs.waiting(), 0);
    assert_eq!(qs.executing(), 0);

    let metrics = qs.metrics();
    assert_eq!(metrics.arrived, 400);
    assert_eq!(metrics.dispatched, executed);
    assert_eq!(metrics.completed, executed);
    assert_eq!(metrics.cancelled, cancelled);
    assert_eq!(metrics.rejected, rejected);
}

#[test]
fn concurrency_limit_is_never_exceeded() {
    let limit = 3;
    let qs = shared_queue_set(limit);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let qs = qs.clone();
            let (running, peak) = (running.clone(), peak.clone());
            thread::spawn(move || {
                for _ in 0..20 {
                    let flow = FlowId::new("limit", format!("worker-{worker}"));
                    let result = qs.execute(flow, RequestContext::default(), CancelToken::new(), || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(300));
                        running.fetch_sub(1, Ordering::SeqCst);
                    });
                    assert!(result.is_ok());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    assert!(peak.load(Ordering::SeqCst) <= limit);
    assert_eq!(qs.metrics().completed, 120);
}

#[test]
fn wait_until_cancels_after_deadline() {
    let qs = shared_queue_set(1);
    let flow = FlowId::new("deadline", "alice");
    let running = qs
        .enqueue(flow.clone(), RequestContext::default(), CancelToken::new())
        .into_handle()
        .expect("queued");
    let waiting = qs
        .enqueue(flow, RequestContext::default(), CancelToken::new())
        .into_handle()
        .expect("queued");

    let started = Instant::now();
    assert_eq!(
        waiting.wait_until(started + Duration::from_millis(20)),
        Decision::Cancel
    );
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(qs.waiting(), 0);
    running.finish();
    assert_eq!(qs.executing(), 0);
}

#[tokio::test]
async fn async_waiter_is_woken_by_completion() {
    let qs = shared_queue_set(1);
    let flow = FlowId::new("async", "alice");
    let running = qs
        .enqueue(flow.clone(), RequestContext::default(), CancelToken::new())
        .into_handle()
        .expect("queued");
    let waiting = qs
        .enqueue(flow, RequestContext::default(), CancelToken::new())
        .into_handle()
        .expect("queued");

    let waiter = tokio::spawn(async move {
        let decision = waiting.wait_async().await;
        if decision == Decision::Execute {
            waiting.finish();
        }
        decision
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    running.finish();
    assert_eq!(waiter.await.expect("waiter task"), Decision::Execute);
    assert_eq!(qs.executing(), 0);
}
