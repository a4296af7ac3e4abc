// This module contains the echo workload.
pub mod echo;

// This module contains the broadcast workload.
pub mod broadcast;

// This module contains the grow-only set workload.
pub mod g_set;

// This module contains the g-counter and pn-counter workloads.
pub mod counter;

// This module contains the linearizable key-value workload.
pub mod lin_kv;

// This module contains the unique-ids workload.
pub mod unique_ids;

// This module contains the kafka-style log workload.
pub mod kafka;

// This module contains the txn-list-append workload.
pub mod txn_list_append;

// This module contains the txn-rw-register workload.
pub mod txn_rw_register;

// Re-exports.
pub use broadcast::Broadcast;
pub use counter::Counter;
pub use echo::Echo;
pub use g_set::GSet;
pub use kafka::Kafka;
pub use lin_kv::LinKv;
pub use txn_list_append::TxnListAppend;
pub use txn_rw_register::TxnRwRegister;
pub use unique_ids::UniqueIds;

use maelstrom::schema::{obj, ObjectSchema, Schema};

/// A request schema skeleton: the discriminator plus `msg_id`.
pub fn request(name: &'static str) -> ObjectSchema {
    obj()
        .req("type", Schema::Const(name))
        .req("msg_id", Schema::Int)
}

/// A response schema skeleton: the discriminator plus `in_reply_to`.
pub fn response(name: &'static str) -> ObjectSchema {
    obj()
        .req("type", Schema::Const(name))
        .req("in_reply_to", Schema::Int)
}
