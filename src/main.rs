// Load simulator for a single queue set.
//
// Several flows hammer one queue set from their own threads. One flow ("heavy") sends more and
// slower requests than the rest. Each outcome is reported over a channel, tallied per flow,
// and the final metrics and queue dump are printed as JSON.

use apf_queueset::{
    Admission, CancelToken, Decision, FlowId, QueueSet, QueueSetConfig, RequestContext,
    RequestInfo, UserInfo,
};
use crossbeam_channel::unbounded;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// Optional JSON queue-set configuration; defaults are used when absent
    config: Option<String>,
    /// Number of light flows in addition to the heavy one
    flows: usize,
    /// Requests sent by each light flow (the heavy flow sends four times as many)
    requests: usize,
    /// Real service time of a light request
    service: Duration,
    /// Give up waiting after this long
    patience: Duration,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            config: None,
            flows: 4,
            requests: 50,
            service: Duration::from_millis(5),
            patience: Duration::from_millis(500),
        }
    }
}

/// Parse `--key=value` / `--key value` arguments. Unknown keys are ignored.
fn parse_cli_options() -> CliOptions {
    let mut options = CliOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg.clone(), args.next()),
        };
        let Some(value) = value else { continue };
        match key.as_str() {
            "--config" => options.config = Some(value),
            "--flows" => options.flows = value.parse().unwrap_or(options.flows),
            "--requests" => options.requests = value.parse().unwrap_or(options.requests),
            "--service-ms" => {
                if let Ok(ms) = value.parse::<u64>() {
                    options.service = Duration::from_millis(ms);
                }
            }
            "--patience-ms" => {
                if let Ok(ms) = value.parse::<u64>() {
                    options.patience = Duration::from_millis(ms);
                }
            }
            _ => {}
        }
    }
    options
}

/// Outcome of one simulated request.
struct Report {
    flow: String,
    decision: Option<Decision>,
    waited: Duration,
}

#[derive(Debug, Default)]
struct Tally {
    executed: usize,
    rejected: usize,
    cancelled: usize,
    total_wait: Duration,
}

fn run_flow(
    queue_set: QueueSet,
    flow: FlowId,
    requests: usize,
    service: Duration,
    patience: Duration,
    reports: crossbeam_channel::Sender<Report>,
) {
    for i in 0..requests {
        let context = RequestContext::new(
            UserInfo::new(flow.distinguisher.clone()),
            RequestInfo {
                is_resource_request: true,
                verb: "get".into(),
                resource: "configmaps".into(),
                name: format!("cm-{i}"),
                ..RequestInfo::default()
            },
        );
        let started = Instant::now();
        let decision = match queue_set.enqueue(flow.clone(), context, CancelToken::new()) {
            Admission::Rejected => None,
            Admission::Queued(handle) => {
                let decision = handle.wait_until(started + patience);
                if decision == Decision::Execute {
                    thread::sleep(service);
                    handle.finish();
                }
                Some(decision)
            }
        };
        let report = Report {
            flow: flow.distinguisher.clone(),
            decision,
            waited: started.elapsed(),
        };
        if reports.send(report).is_err() {
            return;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_cli_options();
    let config = match &options.config {
        Some(path) => QueueSetConfig::load(path)?,
        None => QueueSetConfig::named("simulated")
            .with_queues(16, 4)
            .with_queue_length_limit(20)
            .with_concurrency_limit(4)
            .with_estimated_service_time(options.service),
    };
    let queue_set = QueueSet::new(config)?;
    info!(
        queue_set = queue_set.name(),
        flows = options.flows + 1,
        requests = options.requests,
        "starting simulation"
    );

    let (tx, rx) = unbounded();
    let mut workers = Vec::new();
    let heavy = FlowId::new("simulation", "heavy");
    workers.push({
        let (qs, tx) = (queue_set.clone(), tx.clone());
        let (requests, service, patience) =
            (options.requests * 4, options.service * 3, options.patience);
        thread::Builder::new()
            .name("flow-heavy".to_string())
            .spawn(move || run_flow(qs, heavy, requests, service, patience, tx))?
    });
    for n in 0..options.flows {
        let flow = FlowId::new("simulation", format!("light-{n}"));
        let (qs, tx) = (queue_set.clone(), tx.clone());
        let (requests, service, patience) = (options.requests, options.service, options.patience);
        workers.push(
            thread::Builder::new()
                .name(format!("flow-light-{n}"))
                .spawn(move || run_flow(qs, flow, requests, service, patience, tx))?,
        );
    }
    drop(tx);

    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for report in rx.iter() {
        let tally = tallies.entry(report.flow).or_default();
        tally.total_wait += report.waited;
        match report.decision {
            Some(Decision::Execute) => tally.executed += 1,
            Some(Decision::Cancel) => tally.cancelled += 1,
            Some(Decision::Reject) | None => tally.rejected += 1,
        }
    }
    for worker in workers {
        if worker.join().is_err() {
            warn!("flow thread panicked");
        }
    }

    for (flow, tally) in &tallies {
        let served = tally.executed + tally.rejected + tally.cancelled;
        let mean_ms = if served == 0 {
            0.0
        } else {
            tally.total_wait.as_secs_f64() * 1_000.0 / served as f64
        };
        info!(
            flow = flow.as_str(),
            executed = tally.executed,
            rejected = tally.rejected,
            cancelled = tally.cancelled,
            mean_latency_ms = mean_ms,
            "flow summary"
        );
    }

    println!("{}", serde_json::to_string_pretty(&queue_set.metrics())?);
    println!("{}", serde_json::to_string_pretty(&queue_set.dump(false))?);
    Ok(())
}
