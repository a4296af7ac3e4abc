use maelstrom::checker::Validity;
use maelstrom::config::Config;
use maelstrom::runner::{run_test, TestSpec};
use maelstrom_workloads::workload;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

fn store_root(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("maelstrom-e2e-{}-{}", name, std::process::id()))
}

fn results(outcome: &maelstrom::runner::TestOutcome, checker: &str) -> Value {
    outcome.results[checker].clone()
}

#[test]
fn echo_one_node_no_faults() {
    let mut config = Config::new(1);
    config.set_time_limit(Duration::from_secs(3));
    config.set_rate(2.0);
    config.set_latency(Duration::from_millis(5));
    config.set_seed(42);

    let spec = TestSpec {
        name: "echo".to_string(),
        bin: env!("CARGO_BIN_EXE_demo_echo").to_string(),
        args: Vec::new(),
        store_root: store_root("echo"),
        config,
    };
    let outcome = run_test(&spec, workload("echo").unwrap()).expect("echo run completes");

    assert_eq!(outcome.valid, Validity::True);
    assert_eq!(results(&outcome, "workload")["valid"], "true");
    assert_eq!(results(&outcome, "exceptions")["valid"], "true");
    // every echo came back
    assert!(results(&outcome, "stats")["ok-count"].as_u64().unwrap() > 0);
}

#[test]
fn broadcast_five_nodes_grid_no_faults() {
    let mut config = Config::new(5);
    config.set_time_limit(Duration::from_secs(4));
    config.set_rate(10.0);
    config.set_latency(Duration::from_millis(5));
    config.set_settle(Duration::from_millis(1500));
    config.set_seed(7);

    let spec = TestSpec {
        name: "broadcast".to_string(),
        bin: env!("CARGO_BIN_EXE_demo_broadcast").to_string(),
        args: Vec::new(),
        store_root: store_root("broadcast"),
        config,
    };
    let outcome = run_test(&spec, workload("broadcast").unwrap()).expect("broadcast run completes");

    assert_eq!(outcome.valid, Validity::True);
    let workload_result = results(&outcome, "workload");
    assert_eq!(workload_result["lost-count"], 0);
    assert_eq!(workload_result["final-read-count"], 5);

    // gossip means inter-server chatter on top of client traffic
    let net = results(&outcome, "net");
    assert!(
        net["servers"]["msgs-per-op"].as_f64().unwrap() >= 1.0,
        "expected inter-server gossip, got {}",
        net["servers"]["msgs-per-op"]
    );
}

#[test]
fn broadcast_survives_partitions() {
    let mut config = Config::new(5);
    config.set_time_limit(Duration::from_secs(6));
    config.set_rate(10.0);
    config.set_latency(Duration::from_millis(5));
    config.set_nemesis_interval(Some(Duration::from_secs(1)));
    config.set_settle(Duration::from_millis(2500));
    config.set_seed(13);

    let spec = TestSpec {
        name: "broadcast-partition".to_string(),
        bin: env!("CARGO_BIN_EXE_demo_broadcast").to_string(),
        args: Vec::new(),
        store_root: store_root("broadcast-partition"),
        config,
    };
    let outcome =
        run_test(&spec, workload("broadcast").unwrap()).expect("partitioned run completes");

    // at least one partition happened...
    let history: Vec<maelstrom::history::Op> = serde_json::from_str(
        &std::fs::read_to_string(outcome.store.join("history.json")).unwrap(),
    )
    .unwrap();
    assert!(history.iter().any(|op| op.f == "start-partition"));

    // ...and a gossip-retry node still loses nothing
    assert_eq!(outcome.valid, Validity::True);
    assert_eq!(results(&outcome, "workload")["lost-count"], 0);
}

#[test]
fn unique_ids_against_stateless_node_fails() {
    // demo_echo does not implement generate, so every op errors out and
    // the stats checker reports an unknown outcome
    let mut config = Config::new(1);
    config.set_time_limit(Duration::from_secs(2));
    config.set_rate(2.0);
    config.set_latency(Duration::from_millis(1));

    let spec = TestSpec {
        name: "unique-ids-miss".to_string(),
        bin: env!("CARGO_BIN_EXE_demo_echo").to_string(),
        args: Vec::new(),
        store_root: store_root("unique-ids-miss"),
        config,
    };
    let outcome = run_test(&spec, workload("unique-ids").unwrap()).expect("run completes");
    assert_ne!(outcome.valid, Validity::True);
}
