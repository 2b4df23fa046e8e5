//! Backup engine: git mirrors, metadata documents, atomic transactions,
//! snapshots, and restore.
//!
//! [`engine::BackupEngine`] is the entry point; the other modules are
//! its building blocks and are exported for direct use and testing.

pub mod engine;
pub mod error;
pub mod fsutil;
pub mod layout;
pub mod lock;
pub mod metadata;
pub mod mirror;
pub mod snapshot;
pub mod transaction;

pub use engine::{
    AggregateOutcome, AggregateReport, BackupEngine, RepoResult, RestoreReport, RunReport,
};
pub use error::BackupError;
pub use layout::RepoLayout;
pub use lock::{LockGuard, RepoLock};
pub use metadata::{CategoryOutcome, GhClient, MetadataBundle, MetadataFetcher};
pub use mirror::{MirrorManager, MirrorSummary};
pub use snapshot::{PruneStats, SnapshotInfo, SnapshotManager};
pub use transaction::Transaction;
