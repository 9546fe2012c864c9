pub mod record;
pub mod stats;

pub use record::{
    now_ms, DeviceSessionId, LegacyRecord, LegacySource, QuestionId, SyncQueueEntry, UserIdentity,
    UserRecord,
};
pub use stats::{AggregateStats, SessionSummary, TopicCount};

use serde::{Deserialize, Serialize};

/// Everything a component needs to know about the current session.
///
/// Passed explicitly to each component constructor; there is no ambient
/// application-state singleton.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Application instance identifier; namespaces all local storage keys
    /// and tags remote analytics entries.
    pub app_id: String,

    /// Durable cross-device identity, when one has been established.
    /// Without it the engine runs in local-only mode.
    pub identity: Option<UserIdentity>,

    /// Ephemeral identifier for this connection.
    pub device: Option<DeviceSessionId>,

    /// Display name used for leaderboard entries.
    pub user_name: Option<String>,
}
