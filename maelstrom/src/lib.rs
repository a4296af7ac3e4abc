// This module contains the definition of `Config`.
pub mod config;

// This module contains the definition of `SysTime`, `RunTime` and `SimTime`.
pub mod time;

// This module contains the definition of `Message` and `Envelope`.
pub mod message;

// This module contains the error taxonomy and `RpcError`.
pub mod error;

// This module contains the schema combinators used to validate RPC bodies.
pub mod schema;

// This module contains the definition of `RpcDef` and `Registry`.
pub mod rpc;

// This module contains the definition of `Journal`.
pub mod journal;

// This module contains the simulated network.
pub mod net;

// This module contains the node process supervisor.
pub mod process;

// This module contains the definition of `Client`.
pub mod client;

// This module contains the definition of `Op` and `History`.
pub mod history;

// This module contains the in-harness services and consistency wrappers.
pub mod services;

// This module contains the partition nemesis.
pub mod nemesis;

// This module contains the checker framework and the generic checkers.
pub mod checker;

// This module contains the definition of `RangeSet`.
pub mod ranges;

// This module contains the definition of `Workload` and `Generator`.
pub mod workload;

// This module contains the test runner.
pub mod runner;

// This module contains the tracing setup shared by the binaries.
pub mod logging;

// Re-exports.
pub use hashbrown::{HashMap, HashSet};

// Re-exported so that the logging macros below resolve from dependent
// crates.
#[doc(hidden)]
pub use tracing;

#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "max_level_debug")]
        $crate::tracing::debug!($($arg)*);
    }};
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "max_level_trace")]
        $crate::tracing::trace!($($arg)*);
    }};
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::tracing::info!($($arg)*);
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        $crate::tracing::warn!($($arg)*);
    }};
}
