use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default mean latency of the simulated network.
const DEFAULT_LATENCY_MS: u64 = 10;

/// Default RPC rate, in operations per second, across all clients.
const DEFAULT_RATE: f64 = 1.0;

/// Default quiesce window between the main phase and the final reads.
const DEFAULT_SETTLE_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// number of user nodes spawned for the test
    node_count: usize,
    /// number of concurrent client threads
    concurrency: usize,
    /// main-phase duration
    time_limit: Duration,
    /// target operation rate across all clients (ops per second)
    rate: f64,
    /// mean of the uniform message latency distribution
    latency: Duration,
    /// probability that a sent message is dropped
    p_loss: f64,
    /// interval between nemesis transitions; `None` disables the nemesis
    nemesis_interval: Option<Duration>,
    /// quiesce window after healing, before final reads
    settle: Duration,
    /// seed for every random choice made by the harness
    seed: u64,
    /// whether to log each send at the net level
    log_net_send: bool,
    /// whether to log each receive at the net level
    log_net_recv: bool,
}

impl Config {
    pub fn new(node_count: usize) -> Self {
        assert!(node_count > 0, "config: node count must be positive");
        Self {
            node_count,
            concurrency: node_count,
            time_limit: Duration::from_secs(10),
            rate: DEFAULT_RATE,
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
            p_loss: 0.0,
            nemesis_interval: None,
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            seed: 0,
            log_net_send: false,
            log_net_recv: false,
        }
    }

    /// Returns the number of user nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Returns the number of client threads.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        assert!(concurrency > 0, "config: concurrency must be positive");
        self.concurrency = concurrency;
    }

    /// Returns the main-phase duration.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn set_time_limit(&mut self, time_limit: Duration) {
        self.time_limit = time_limit;
    }

    /// Returns the target rate in operations per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        assert!(rate > 0.0, "config: rate must be positive");
        self.rate = rate;
    }

    /// Returns the mean of the uniform latency distribution.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Returns the message loss probability.
    pub fn p_loss(&self) -> f64 {
        self.p_loss
    }

    pub fn set_p_loss(&mut self, p_loss: f64) {
        assert!(
            (0.0..=1.0).contains(&p_loss),
            "config: loss probability must be within [0, 1]"
        );
        self.p_loss = p_loss;
    }

    /// Returns the nemesis interval, if the nemesis is enabled.
    pub fn nemesis_interval(&self) -> Option<Duration> {
        self.nemesis_interval
    }

    pub fn set_nemesis_interval(&mut self, interval: Option<Duration>) {
        self.nemesis_interval = interval;
    }

    /// Returns the quiesce window applied before final reads.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// Returns the test seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Returns whether the test runs with any fault injection at all.
    pub fn has_faults(&self) -> bool {
        self.p_loss > 0.0 || self.nemesis_interval.is_some()
    }

    pub fn log_net_send(&self) -> bool {
        self.log_net_send
    }

    pub fn set_log_net_send(&mut self, log: bool) {
        self.log_net_send = log;
    }

    pub fn log_net_recv(&self) -> bool {
        self.log_net_recv
    }

    pub fn set_log_net_recv(&mut self, log: bool) {
        self.log_net_recv = log;
    }
}
