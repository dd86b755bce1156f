pub mod action;
pub mod checksums;
pub mod config;
mod deletion;
pub mod executor;
pub mod metrics;

pub use action::{ActionKind, ActionOutcome, Removal, ServerVersion, SyncAction};
pub use checksums::{ChecksumInput, ChecksumStore, FileChecksum, IndexError};
pub use config::ExecutorConfig;
pub use executor::{ActionExecutor, ExecuteError};
pub use metrics::SyncMetrics;
