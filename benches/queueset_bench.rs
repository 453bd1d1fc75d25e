use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use apf_queueset::shuffle::{hash_flow, Dealer};
use apf_queueset::{CancelToken, FlowId, QueueSet, QueueSetConfig, RequestContext};

fn bench_dealer(c: &mut Criterion) {
    let mut group = c.benchmark_group("shuffle");

    group.bench_function("hash_flow", |b| {
        b.iter(|| black_box(hash_flow(black_box("workload-low"), black_box("kube-system"))));
    });

    group.bench_function("deal_into_hand", |b| {
        let dealer = Dealer::new(64, 8).unwrap();
        let hash = hash_flow("workload-low", "kube-system");
        b.iter(|| black_box(dealer.deal_into_hand(black_box(hash))));
    });
}

fn bench_queue_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_set");

    group.bench_function("enqueue_finish", |b| {
        let qs = QueueSet::new(QueueSetConfig::named("bench")).unwrap();
        let flow = FlowId::new("workload-low", "kube-system");

        b.iter(|| {
            let handle = qs
                .enqueue(flow.clone(), RequestContext::default(), CancelToken::new())
                .into_handle()
                .unwrap();
            handle.finish_with(black_box(Duration::from_millis(5)));
        });
    });

    group.bench_function("dispatch_backlog", |b| {
        // Keep every slot busy so each completion dispatches from a full pool of queues
        let config = QueueSetConfig::named("bench")
            .with_concurrency_limit(1)
            .with_queue_length_limit(1_000);
        let qs = QueueSet::new(config).unwrap();
        let flows: Vec<FlowId> = (0..64)
            .map(|n| FlowId::new("workload-low", format!("user-{n}")))
            .collect();
        let mut handles: std::collections::VecDeque<_> = flows
            .iter()
            .cycle()
            .take(512)
            .filter_map(|flow| {
                qs.enqueue(flow.clone(), RequestContext::default(), CancelToken::new())
                    .into_handle()
            })
            .collect();
        let mut next = 0usize;

        b.iter(|| {
            // The oldest handle is not necessarily the running one; finish whichever is
            while let Some(handle) = handles.pop_front() {
                if handle.try_decision().is_some() {
                    handle.finish_with(Duration::from_millis(5));
                    break;
                }
                handles.push_back(handle);
            }
            let flow = &flows[next % flows.len()];
            next += 1;
            if let Some(handle) = qs
                .enqueue(flow.clone(), RequestContext::default(), CancelToken::new())
                .into_handle()
            {
                handles.push_back(handle);
            }
        });
    });
}

criterion_group!(benches, bench_dealer, bench_queue_set);
criterion_main!(benches);
