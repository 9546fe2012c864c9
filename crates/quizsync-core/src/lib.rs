pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod stats;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::RemoteError;
pub use merge::{merge, MergeDecision, MergeResult};
pub use models::{
    AggregateStats, QuestionId, SessionContext, SessionSummary, UserIdentity, UserRecord,
};
