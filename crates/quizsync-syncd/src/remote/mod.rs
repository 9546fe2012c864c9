pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

use quizsync_core::error::RemoteError;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::AbortHandle;

/// Typed boundary to the remote record store.
///
/// The store is an opaque path-addressed document tree. Implementations
/// must assign a monotonically non-decreasing millisecond timestamp per
/// path on every plain write; merge correctness depends on it.
#[allow(async_fn_in_trait)]
pub trait RemoteStore: Send + Sync {
    /// Read the document at `path` once. `Value::Null` means absent.
    async fn get_once(&self, path: &str) -> Result<Value, RemoteError>;

    /// Full overwrite. Object values get a store-assigned `last_updated`.
    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError>;

    /// Merge `partial` into the document at the top level only (not deep).
    /// Stamps `last_updated` like `set`.
    async fn update_fields(&self, path: &str, partial: Value) -> Result<(), RemoteError>;

    /// Remove the document at `path`.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Atomic read-modify-write. `apply` sees a consistent current value
    /// (`None` when absent) and its result is committed only if no
    /// intervening write occurred; the store retries `apply` on conflicting
    /// concurrent writers, so it must be a pure function of its input.
    /// The committed value is written exactly as returned, unstamped.
    async fn transact(
        &self,
        path: &str,
        apply: &(dyn Fn(Option<Value>) -> Value + Send + Sync),
    ) -> Result<Value, RemoteError>;

    /// Realtime push for `path`: fires once immediately with the current
    /// state, then on every remote change, until the handle is cancelled.
    async fn subscribe(&self, path: &str) -> Result<Subscription, RemoteError>;

    /// Register a value the store commits on behalf of the client if the
    /// connection drops without an explicit unset. Presence only.
    async fn on_disconnect_set(&self, path: &str, value: Value) -> Result<(), RemoteError>;
}

/// Handle to a realtime subscription.
///
/// Cancellation is idempotent and happens automatically on drop, so the
/// underlying resource is released deterministically on scope exit.
pub struct Subscription {
    rx: UnboundedReceiver<Value>,
    worker: Option<AbortHandle>,
}

impl Subscription {
    pub fn new(rx: UnboundedReceiver<Value>, worker: Option<AbortHandle>) -> Self {
        Self { rx, worker }
    }

    /// Next snapshot of the subscribed document (`Value::Null` when the
    /// document is absent). `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Stop receiving snapshots. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Remote address scheme. Must remain stable: already-deployed legacy data
/// interoperates with these exact paths.
pub mod paths {
    use quizsync_core::models::{DeviceSessionId, UserIdentity};

    /// Top-level namespaces owned by the current schema. Anything else at
    /// the root is potentially pre-migration data.
    pub const RESERVED_NAMESPACES: [&str; 8] = [
        "users",
        "user_data",
        "user_stats",
        "auth_links",
        "admins",
        "analytics",
        "leaderboards",
        "presence",
    ];

    /// Flat legacy keys are opaque connection ids of at least this length.
    pub const LEGACY_KEY_MIN_LEN: usize = 20;

    pub fn user_record(id: UserIdentity) -> String {
        format!("users/{}", id)
    }

    pub fn user_stats(id: UserIdentity) -> String {
        format!("user_stats/{}", id)
    }

    pub fn leaderboard(topic: &str, id: UserIdentity) -> String {
        format!("leaderboards/{}/{}", topic, id)
    }

    pub fn analytics_session(app_id: &str, key: &str) -> String {
        format!("analytics/{}/sessions/{}", app_id, key)
    }

    pub fn presence(id: UserIdentity) -> String {
        format!("presence/{}", id)
    }

    pub fn auth_link(device: &DeviceSessionId) -> String {
        format!("auth_links/{}", device)
    }
}
