use super::{RemoteStore, Subscription};
use quizsync_core::error::RemoteError;
use quizsync_core::models::now_ms;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

const MAX_TRANSACT_ATTEMPTS: u32 = 25;

/// In-memory implementation of the remote record store contract.
///
/// Backs local-only mode and the test suite: path-addressed JSON tree,
/// per-path logical clock, versioned compare-and-set for transactions and
/// snapshot push to subscribers.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    root: Map<String, Value>,
    // Per-path write clocks; assigned timestamps never decrease.
    clocks: HashMap<String, i64>,
    versions: HashMap<String, u64>,
    watchers: Vec<(String, UnboundedSender<Value>)>,
    disconnect_values: Vec<(String, Value)>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b
        || a.is_empty()
        || b.is_empty()
        || a.starts_with(&format!("{}/", b))
        || b.starts_with(&format!("{}/", a))
}

impl Inner {
    fn value_at(&self, path: &str) -> Value {
        let mut current = Value::Object(self.root.clone());
        for segment in segments(path) {
            match current.get(segment) {
                Some(next) => current = next.clone(),
                None => return Value::Null,
            }
        }
        current
    }

    fn write(&mut self, path: &str, value: Value) {
        let segs = segments(path);
        if segs.is_empty() {
            self.root = match value {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            return;
        }

        let mut current = &mut self.root;
        for segment in &segs[..segs.len() - 1] {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry.as_object_mut().expect("just ensured object");
        }

        let leaf = segs[segs.len() - 1];
        if value.is_null() {
            // a null write removes the document
            current.remove(leaf);
        } else {
            current.insert(leaf.to_string(), value);
        }
    }

    fn next_timestamp(&mut self, path: &str) -> i64 {
        let clock = self.clocks.entry(path.to_string()).or_insert(0);
        let assigned = now_ms().max(*clock + 1);
        *clock = assigned;
        assigned
    }

    fn version(&self, path: &str) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }

    fn bump(&mut self, path: &str) {
        *self.versions.entry(path.to_string()).or_insert(0) += 1;
    }

    fn notify(&mut self, changed: &str) {
        let mut live = Vec::with_capacity(self.watchers.len());
        for (watched, tx) in std::mem::take(&mut self.watchers) {
            if paths_overlap(&watched, changed) {
                let snapshot = self.value_at(&watched);
                if tx.send(snapshot).is_err() {
                    continue; // receiver gone, drop the watcher
                }
            }
            live.push((watched, tx));
        }
        self.watchers = live;
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit every registered disconnect value, as the real store would
    /// when a client connection drops without an explicit unset.
    pub async fn simulate_disconnect(&self) {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        for (path, mut value) in std::mem::take(&mut inner.disconnect_values) {
            let ts = inner.next_timestamp(&path);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("last_updated".to_string(), ts.into());
            }
            inner.write(&path, value);
            inner.bump(&path);
            inner.notify(&path);
        }
    }
}

impl RemoteStore for MemoryStore {
    async fn get_once(&self, path: &str) -> Result<Value, RemoteError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.value_at(path))
    }

    async fn set(&self, path: &str, mut value: Value) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let ts = inner.next_timestamp(path);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("last_updated".to_string(), ts.into());
        }
        inner.write(path, value);
        inner.bump(path);
        inner.notify(path);
        Ok(())
    }

    async fn update_fields(&self, path: &str, partial: Value) -> Result<(), RemoteError> {
        let fields = match partial {
            Value::Object(map) => map,
            other => {
                return Err(RemoteError::Decode {
                    path: path.to_string(),
                    reason: format!("field merge requires an object, got {}", other),
                })
            }
        };

        let mut inner = self.inner.lock().expect("store lock poisoned");
        let mut current = match inner.value_at(path) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in fields {
            if value.is_null() {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }
        let ts = inner.next_timestamp(path);
        current.insert("last_updated".to_string(), ts.into());
        inner.write(path, Value::Object(current));
        inner.bump(path);
        inner.notify(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.write(path, Value::Null);
        inner.bump(path);
        inner.notify(path);
        Ok(())
    }

    async fn transact(
        &self,
        path: &str,
        apply: &(dyn Fn(Option<Value>) -> Value + Send + Sync),
    ) -> Result<Value, RemoteError> {
        let mut attempts = 0;
        loop {
            let (current, version) = {
                let inner = self.inner.lock().expect("store lock poisoned");
                let value = inner.value_at(path);
                let current = if value.is_null() { None } else { Some(value) };
                (current, inner.version(path))
            };

            let next = apply(current);

            // Suspension point between read and commit; concurrent writers
            // interleave here and force the retry path, as they would
            // against the real store.
            tokio::task::yield_now().await;

            {
                let mut inner = self.inner.lock().expect("store lock poisoned");
                if inner.version(path) == version {
                    inner.write(path, next.clone());
                    inner.bump(path);
                    inner.notify(path);
                    return Ok(next);
                }
            }

            attempts += 1;
            if attempts >= MAX_TRANSACT_ATTEMPTS {
                return Err(RemoteError::Contention {
                    path: path.to_string(),
                    attempts,
                });
            }
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, RemoteError> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        // fires once immediately with the current state
        let _ = tx.send(inner.value_at(path));
        inner.watchers.push((path.to_string(), tx));
        Ok(Subscription::new(rx, None))
    }

    async fn on_disconnect_set(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.disconnect_values.push((path.to_string(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn assigned_timestamps_are_monotonic_per_path() {
        let store = MemoryStore::new();
        let mut previous = 0;
        for n in 0..5u32 {
            store
                .set("users/1", json!({ "mistakes": [n] }))
                .await
                .unwrap();
            let doc = store.get_once("users/1").await.unwrap();
            let ts = doc["last_updated"].as_i64().unwrap();
            assert!(ts > previous, "timestamp went backwards: {} -> {}", previous, ts);
            previous = ts;
        }
    }

    #[tokio::test]
    async fn update_fields_merges_top_level_only() {
        let store = MemoryStore::new();
        store
            .set("users/1", json!({ "fav": [1], "settings": {"theme": "dark"} }))
            .await
            .unwrap();
        store
            .update_fields("users/1", json!({ "settings": {"anim": false} }))
            .await
            .unwrap();

        let doc = store.get_once("users/1").await.unwrap();
        assert_eq!(doc["fav"], json!([1]));
        // top-level replacement, not a deep merge
        assert_eq!(doc["settings"], json!({"anim": false}));
    }

    #[tokio::test]
    async fn subscription_fires_immediately_then_on_change() {
        let store = MemoryStore::new();
        store.set("users/1", json!({ "fav": [1] })).await.unwrap();

        let mut sub = store.subscribe("users/1").await.unwrap();
        let first = sub.next().await.unwrap();
        assert_eq!(first["fav"], json!([1]));

        store
            .update_fields("users/1", json!({ "fav": [1, 2] }))
            .await
            .unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(second["fav"], json!([1, 2]));

        sub.cancel();
        sub.cancel(); // idempotent
    }

    #[tokio::test]
    async fn subscribing_to_an_absent_document_yields_null() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("users/404").await.unwrap();
        assert!(sub.next().await.unwrap().is_null());
    }

    #[tokio::test]
    async fn transact_survives_interleaved_writers() {
        let store = MemoryStore::new();

        let increments = |store: MemoryStore, rounds: u32| async move {
            for _ in 0..rounds {
                store
                    .transact("counters/shared", &|current| {
                        let n = current
                            .and_then(|v| v.get("n").and_then(Value::as_i64))
                            .unwrap_or(0);
                        json!({ "n": n + 1 })
                    })
                    .await
                    .unwrap();
            }
        };

        let a = tokio::spawn(increments(store.clone(), 20));
        let b = tokio::spawn(increments(store.clone(), 20));
        a.await.unwrap();
        b.await.unwrap();

        let doc = store.get_once("counters/shared").await.unwrap();
        assert_eq!(doc["n"], json!(40));
    }

    #[tokio::test]
    async fn disconnect_values_apply_on_simulated_drop() {
        let store = MemoryStore::new();
        store
            .set("presence/7", json!({ "online": true }))
            .await
            .unwrap();
        store
            .on_disconnect_set("presence/7", json!({ "online": false }))
            .await
            .unwrap();

        store.simulate_disconnect().await;
        let doc = store.get_once("presence/7").await.unwrap();
        assert_eq!(doc["online"], json!(false));
    }

    #[tokio::test]
    async fn null_set_removes_the_document() {
        let store = MemoryStore::new();
        store.set("users/1", json!({ "fav": [1] })).await.unwrap();
        store.delete("users/1").await.unwrap();
        assert!(store.get_once("users/1").await.unwrap().is_null());
    }
}
