pub mod cache;
pub mod config;
pub mod migrate;
pub mod queue;
pub mod remote;
pub mod stats;
pub mod sync;

pub use cache::LocalStore;
pub use migrate::{MigrationEngine, MigrationOutcome};
pub use queue::{FlushReport, SyncQueue};
pub use remote::{RemoteStore, Subscription};
pub use stats::StatsUpdater;
pub use sync::{SyncManager, SyncPhase};
