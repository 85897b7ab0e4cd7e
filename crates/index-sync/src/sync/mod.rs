//! The synchronization engine.
//!
//! - [`SyncCoordinator`] reacts to record mutations and explicit calls
//! - [`SettingsSynchronizer`] diffs and pushes index settings
//! - [`BatchIndexer`] performs bulk reindexing
//! - [`without_auto_index`] suppresses automatic dispatch for a scope

mod batch;
mod coordinator;
mod settings;
mod suppress;

pub use batch::{BatchIndexer, ReindexProgress, ReindexRequest, ReindexStatus};
pub use coordinator::{SkipReason, SyncCoordinator, TargetAction, TargetOutcome};
pub use settings::{SettingsOutcome, SettingsSynchronizer};
pub use suppress::{is_suppressed, without_auto_index, without_auto_index_sync};
