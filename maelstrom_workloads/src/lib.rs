// This module contains the per-workload analyzers shared across workloads.
pub mod checker;

// This module contains the ten workloads.
pub mod workload;

// Re-exports.
pub use workload::{
    Broadcast, Counter, Echo, GSet, Kafka, LinKv, TxnListAppend, TxnRwRegister, UniqueIds,
};

use maelstrom::workload::Workload;
use std::sync::Arc;

/// Every workload this crate ships, in reference order.
pub fn workloads() -> Vec<Arc<dyn Workload>> {
    vec![
        Arc::new(Echo::new()),
        Arc::new(Broadcast::default()),
        Arc::new(GSet::new()),
        Arc::new(Counter::grow_only()),
        Arc::new(Counter::pn()),
        Arc::new(LinKv::default()),
        Arc::new(UniqueIds::new()),
        Arc::new(Kafka::default()),
        Arc::new(TxnListAppend::default()),
        Arc::new(TxnRwRegister::default()),
    ]
}

/// Looks a workload up by its reference name.
pub fn workload(name: &str) -> Option<Arc<dyn Workload>> {
    workloads().into_iter().find(|w| w.name() == name)
}
