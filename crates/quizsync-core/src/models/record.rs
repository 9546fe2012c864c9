use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a single quiz question.
pub type QuestionId = u32;

/// Current millisecond epoch timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Durable cross-device identifier for a person (externally issued).
///
/// Once available, every durable remote address is derived from this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(pub i64);

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral identifier assigned per authenticated connection.
///
/// Only a transient capability token; never used as a storage address once
/// a [`UserIdentity`] is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSessionId(pub String);

impl fmt::Display for DeviceSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of synchronization: one person's progress record.
///
/// Serialized field names match the wire format of already-deployed records
/// (`fav`, `telegram_id`, `last_updated`, ...), so they must stay stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Questions answered incorrectly at least once. Append-only.
    #[serde(default)]
    pub mistakes: BTreeSet<QuestionId>,

    /// Questions the user archived. Append-only.
    #[serde(default)]
    pub archive: BTreeSet<QuestionId>,

    /// Questions the user marked as favorites. Append-only.
    #[serde(default)]
    pub fav: BTreeSet<QuestionId>,

    /// Per-device preferences. Last writer wins, never merged across devices.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, serde_json::Value>,

    /// Owner of this record. A record is only authoritative for the path
    /// `users/{id}` when this matches `id`.
    #[serde(default, rename = "telegram_id", skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserIdentity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    /// Millisecond timestamp assigned by the remote store on write,
    /// monotonically non-decreasing per path.
    #[serde(default)]
    pub last_updated: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,

    /// Set when the record was seeded from local cache with no legacy data.
    #[serde(default, skip_serializing_if = "is_false")]
    pub created_fresh: bool,

    /// Set when the record was consolidated from legacy addresses.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_migrated: bool,

    /// Addresses of every legacy record that contributed to this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrated_from: Vec<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub migration_count: u32,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl UserRecord {
    /// Whether this record may be treated as authoritative for `identity`'s
    /// storage path.
    pub fn is_authoritative_for(&self, identity: UserIdentity) -> bool {
        self.owner == Some(identity)
    }
}

/// Addressing scheme a pre-migration document was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacySource {
    /// Flat root key written under a per-connection session id
    /// (opaque string, length >= 20).
    FlatSessionKey(String),

    /// The interim `user_data/{id}` scheme.
    UserData(String),
}

impl LegacySource {
    /// Remote path of the legacy document.
    pub fn path(&self) -> String {
        match self {
            LegacySource::FlatSessionKey(key) => key.clone(),
            LegacySource::UserData(id) => format!("user_data/{}", id),
        }
    }
}

/// A record discovered at a legacy address during migration.
///
/// Only ever constructed for documents whose owner field matches the
/// migrating identity; anything else stays invisible to the pass.
#[derive(Debug, Clone)]
pub struct LegacyRecord {
    pub source: LegacySource,
    pub record: UserRecord,
}

/// One deferred remote write, persisted so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Partial record payload, applied with a top-level field merge.
    pub payload: serde_json::Value,

    pub enqueued_at: i64,

    /// Delivery attempts so far. Entries past the retry ceiling are dropped.
    #[serde(default)]
    pub attempts: u32,
}

impl SyncQueueEntry {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            enqueued_at: now_ms(),
            attempts: 0,
        }
    }
}
