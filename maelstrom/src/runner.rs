use crate::checker::{
    check_all, CheckCtx, Checker, ExceptionTrack, ExceptionsChecker, NetChecker, PerfChecker,
    StatsChecker, TimelineChecker, Validity,
};
use crate::client::Client;
use crate::config::Config;
use crate::history::History;
use crate::journal::Journal;
use crate::message::NodeId;
use crate::nemesis::PartitionNemesis;
use crate::net::Net;
use crate::process::{start_node, NodeHandle};
use crate::rpc::Registry;
use crate::services::start_standard_services;
use crate::time::{RunTime, SysTime};
use crate::workload::{GenOp, Generator, Workload};
use crate::{info, warn};
use color_eyre::eyre::{Report, WrapErr};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub type RunResult<T> = Result<T, Report>;

/// Everything needed to run one test.
#[derive(Debug, Clone)]
pub struct TestSpec {
    /// test name; also the store subdirectory
    pub name: String,
    /// node binary; empty when the workload only talks to services
    pub bin: String,
    pub args: Vec<String>,
    /// root of the artifact store
    pub store_root: PathBuf,
    pub config: Config,
}

/// The composed verdict plus where the artifacts went.
#[derive(Debug)]
pub struct TestOutcome {
    pub valid: Validity,
    pub results: Map<String, Value>,
    pub store: PathBuf,
}

/// Runs one test end to end: services and nodes up, client threads driving
/// the workload generator at the configured rate, nemesis ticking, then
/// shutdown, checkers, artifacts.
pub fn run_test(spec: &TestSpec, workload: Arc<dyn Workload>) -> RunResult<TestOutcome> {
    let store = store_dir(&spec.store_root, &spec.name)?;
    if let Err(e) = crate::logging::set_run_log(&store.join("harness.log")) {
        warn!("cannot open harness.log: {}", e);
    }
    info!("test {}: starting, store {:?}", spec.name, store);

    let config = &spec.config;
    let mut registry = Registry::standard();
    workload.register(&mut registry);
    let registry = Arc::new(registry);

    let time: Arc<dyn SysTime> = Arc::new(RunTime::new());
    let journal = Journal::new();
    let net = Net::new(config, journal.clone(), time.clone());
    let history = History::new(time.clone());
    let exceptions = ExceptionTrack::new();
    let shutdown = Arc::new(AtomicBool::new(false));

    let services = start_standard_services(&net, config, &shutdown);

    // spawn the user nodes
    let nodes: Vec<NodeId> = (1..=config.node_count()).map(|i| format!("n{}", i)).collect();
    let mut node_handles: Vec<NodeHandle> = Vec::new();
    if !spec.bin.is_empty() {
        let log_dir = store.join("log");
        std::fs::create_dir_all(&log_dir).wrap_err("creating node log dir")?;
        for id in &nodes {
            let started = start_node(
                &net,
                &registry,
                id,
                &nodes,
                &spec.bin,
                &spec.args,
                &log_dir.join(format!("{}.log", id)),
                &exceptions,
            );
            match started {
                Ok(handle) => node_handles.push(handle),
                Err(e) => {
                    teardown(&shutdown, node_handles, services);
                    crate::logging::clear_run_log();
                    return Err(e.wrap_err(format!("starting node {}", id)));
                }
            }
        }
    }

    // workload setup (e.g. topology) through a throwaway client
    {
        let setup_client = Client::open(&net, registry.clone());
        let setup = workload.setup(&setup_client, &nodes);
        setup_client.close();
        if let Err(e) = setup {
            teardown(&shutdown, node_handles, services);
            crate::logging::clear_run_log();
            return Err(e.wrap_err("workload setup"));
        }
    }

    // nemesis; partitioning needs at least two nodes. It gets its own stop
    // flag so it can be wound down before the final reads while services
    // keep serving.
    let nemesis_stop = Arc::new(AtomicBool::new(false));
    let nemesis_thread = config
        .nemesis_interval()
        .filter(|_| nodes.len() > 1)
        .map(|interval| {
            PartitionNemesis::new(
                net.clone(),
                history.clone(),
                nodes.clone(),
                interval,
                config.seed().wrapping_add(101),
            )
            .spawn(nemesis_stop.clone())
        });

    // client threads pulling from the shared generator
    let generator: Arc<Mutex<Box<dyn Generator>>> = Arc::new(Mutex::new(workload.generator(config)));
    let main_done = Arc::new(AtomicBool::new(false));
    let pace = Duration::from_secs_f64(config.concurrency() as f64 / config.rate());
    let mut client_threads = Vec::with_capacity(config.concurrency());
    for process in 0..config.concurrency() {
        let net = net.clone();
        let registry = registry.clone();
        let workload = workload.clone();
        let generator = generator.clone();
        let history = history.clone();
        let exceptions = exceptions.clone();
        let main_done = main_done.clone();
        let nodes = nodes.clone();
        let seed = config.seed().wrapping_add(200 + process as u64);
        let idempotent = workload.idempotent_fs();
        client_threads.push(std::thread::spawn(move || {
            let client = Client::open(&net, registry);
            let mut rng = StdRng::seed_from_u64(seed);
            while !main_done.load(Ordering::SeqCst) {
                let op = match generator.lock().next_op(&mut rng) {
                    Some(op) => op,
                    None => break,
                };
                drive_op(
                    &client, &workload, &history, &exceptions, &nodes, process as i64, &op,
                    idempotent,
                );
                std::thread::sleep(pace);
            }
            client.close();
        }));
    }

    // main phase
    let deadline = Instant::now() + config.time_limit();
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50).min(config.time_limit()));
        if client_threads.iter().all(|t| t.is_finished()) {
            break;
        }
    }
    main_done.store(true, Ordering::SeqCst);
    for thread in client_threads {
        if thread.join().is_err() {
            exceptions.record("client thread panicked outside an operation");
        }
    }

    // stop the nemesis (it heals on the way out) and let things settle
    // before sampling final state
    nemesis_stop.store(true, Ordering::SeqCst);
    if let Some(thread) = nemesis_thread {
        let _ = thread.join();
    }
    net.heal();

    if let Some(mut final_gen) = workload.final_generator(config) {
        std::thread::sleep(config.settle());
        let client = Client::open(&net, registry.clone());
        let mut rng = StdRng::seed_from_u64(config.seed().wrapping_add(999));
        let process = config.concurrency() as i64;
        while let Some(op) = final_gen.next_op(&mut rng) {
            drive_op(
                &client,
                &workload,
                &history,
                &exceptions,
                &nodes,
                process,
                &op,
                workload.idempotent_fs(),
            );
        }
        client.close();
    }

    teardown(&shutdown, node_handles, services);

    // run the checkers over the observed history
    let history_snapshot = history.snapshot();
    let journal_snapshot = journal.snapshot();
    let exception_list = exceptions.snapshot();
    let checkers: Vec<Box<dyn Checker>> = vec![
        Box::new(StatsChecker::new()),
        Box::new(PerfChecker::new()),
        Box::new(TimelineChecker::new()),
        Box::new(ExceptionsChecker::new()),
        Box::new(NetChecker::new(false)),
        workload.checker(),
    ];
    let ctx = CheckCtx {
        history: &history_snapshot,
        journal: &journal_snapshot,
        config,
        store: &store,
        exceptions: &exception_list,
    };
    let (valid, results) = check_all(&checkers, &ctx);

    write_artifacts(&store, spec, &history_snapshot, valid, &results)?;
    info!("test {}: {:?}", spec.name, valid);
    crate::logging::clear_run_log();

    Ok(TestOutcome {
        valid,
        results,
        store,
    })
}

/// Invokes one abstract operation through the client adapter, recording the
/// invocation and its outcome. Panics inside the adapter are recorded as
/// exceptions and an `info` completion (the op may or may not have
/// happened).
#[allow(clippy::too_many_arguments)]
fn drive_op(
    client: &Client,
    workload: &Arc<dyn Workload>,
    history: &History,
    exceptions: &ExceptionTrack,
    nodes: &[NodeId],
    process: i64,
    op: &GenOp,
    idempotent: &[&str],
) {
    let dest = op
        .node
        .and_then(|i| nodes.get(i))
        .or_else(|| {
            if nodes.is_empty() {
                None
            } else {
                Some(&nodes[process.unsigned_abs() as usize % nodes.len()])
            }
        })
        .cloned()
        .unwrap_or_default();

    history.invoke(process, &op.f, op.value.clone());
    let applied =
        std::panic::catch_unwind(AssertUnwindSafe(|| workload.apply(client, &dest, op)));
    match applied {
        Ok(outcome) => history.complete(process, &op.f, op.value.clone(), &outcome, idempotent),
        Err(panic) => {
            let what = panic_message(panic);
            exceptions.record(format!("client {}: {}", client.id(), what));
            history.info(
                process,
                &op.f,
                op.value.clone(),
                Some(json!({"panic": what})),
            );
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic".to_string()
    }
}

/// Stops the user processes and services, in that order. The shared
/// shutdown flag must be set first so the service loops wind down.
fn teardown(
    shutdown: &Arc<AtomicBool>,
    node_handles: Vec<NodeHandle>,
    services: Vec<crate::services::ServiceHandle>,
) {
    shutdown.store(true, Ordering::SeqCst);
    for mut handle in node_handles {
        handle.stop();
    }
    for service in services {
        service.join();
    }
}

fn store_dir(root: &Path, name: &str) -> RunResult<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let dir = root
        .join(name)
        .join(format!("{}-{:03}", stamp.as_secs(), stamp.subsec_millis()));
    std::fs::create_dir_all(&dir).wrap_err_with(|| format!("creating store dir {:?}", dir))?;
    Ok(dir)
}

/// Machine-readable snapshot written alongside the human artifacts.
#[derive(Serialize)]
struct Snapshot<'a> {
    name: &'a str,
    config: &'a Config,
    /// JSON text: the history and result map carry arbitrary JSON, which
    /// has no stable bincode form
    history_json: String,
    results_json: String,
}

fn write_artifacts(
    store: &Path,
    spec: &TestSpec,
    history: &[crate::history::Op],
    valid: Validity,
    results: &Map<String, Value>,
) -> RunResult<()> {
    let mut result_map = Map::new();
    result_map.insert("valid".to_string(), serde_json::to_value(valid)?);
    result_map.insert("results".to_string(), Value::Object(results.clone()));
    let results_json = serde_json::to_string_pretty(&result_map)?;
    std::fs::write(store.join("results.json"), &results_json)
        .wrap_err("writing results.json")?;

    let history_json = serde_json::to_string_pretty(history)?;
    std::fs::write(store.join("history.json"), &history_json)
        .wrap_err("writing history.json")?;
    std::fs::write(
        store.join("history.txt"),
        crate::history::render_text(history),
    )
    .wrap_err("writing history.txt")?;

    let snapshot = Snapshot {
        name: &spec.name,
        config: &spec.config,
        history_json,
        results_json,
    };
    let encoded = bincode::serialize(&snapshot).wrap_err("encoding snapshot")?;
    std::fs::write(store.join("test.bin"), encoded).wrap_err("writing test.bin")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckResult;
    use crate::error::RpcError;
    use crate::workload::FnGenerator;

    // a minimal service-only workload: blind writes and reads against
    // lin-kv
    struct KvSmoke;

    impl Workload for KvSmoke {
        fn name(&self) -> &'static str {
            "kv-smoke"
        }

        fn generator(&self, _config: &Config) -> Box<dyn Generator> {
            let mut i = 0;
            Box::new(FnGenerator::take(10, move |_| {
                i += 1;
                if i % 2 == 1 {
                    GenOp::new("write", json!(i))
                } else {
                    GenOp::new("read", Value::Null)
                }
            }))
        }

        fn apply(&self, client: &Client, _dest: &str, op: &GenOp) -> Result<Value, RpcError> {
            match op.f.as_str() {
                "write" => {
                    client.rpc(
                        "lin-kv",
                        json!({"type": "write", "key": "k", "value": op.value}),
                    )?;
                    Ok(op.value.clone())
                }
                "read" => {
                    let resp = client.rpc("lin-kv", json!({"type": "read", "key": "k"}))?;
                    Ok(resp["value"].clone())
                }
                other => panic!("unexpected op {}", other),
            }
        }

        fn checker(&self) -> Box<dyn Checker> {
            struct AlwaysValid;
            impl Checker for AlwaysValid {
                fn name(&self) -> &'static str {
                    "workload"
                }
                fn check(&self, _ctx: &CheckCtx<'_>) -> CheckResult {
                    CheckResult::new(Validity::True)
                }
            }
            Box::new(AlwaysValid)
        }
    }

    #[test]
    fn service_only_run() {
        let mut config = Config::new(1);
        config.set_latency(Duration::from_millis(1));
        config.set_time_limit(Duration::from_secs(5));
        config.set_rate(100.0);
        config.set_settle(Duration::from_millis(0));
        config.set_seed(3);

        let store_root =
            std::env::temp_dir().join(format!("maelstrom-runner-{}", std::process::id()));
        let spec = TestSpec {
            name: "kv-smoke".to_string(),
            bin: String::new(),
            args: Vec::new(),
            store_root,
            config,
        };

        let outcome = run_test(&spec, Arc::new(KvSmoke)).expect("run completes");
        assert_eq!(outcome.valid, Validity::True);
        for artifact in &[
            "results.json",
            "history.json",
            "history.txt",
            "timeline.html",
            "latency.csv",
            "rate.csv",
            "test.bin",
        ] {
            assert!(
                outcome.store.join(artifact).exists(),
                "{} missing",
                artifact
            );
        }

        // the history holds ten invocations, all completed ok
        let ops: Vec<crate::history::Op> = serde_json::from_str(
            &std::fs::read_to_string(outcome.store.join("history.json")).unwrap(),
        )
        .unwrap();
        let invokes = ops
            .iter()
            .filter(|op| op.ty == crate::history::OpType::Invoke)
            .count();
        assert_eq!(invokes, 10);
    }
}
