use super::{RemoteStore, Subscription};
use futures_util::StreamExt;
use quizsync_core::error::RemoteError;
use reqwest::header::{ACCEPT, ETAG, IF_MATCH};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;

const MAX_TRANSACT_ATTEMPTS: u32 = 25;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Remote record store adapter over a path-addressed REST document store.
///
/// Documents live at `{base}/{path}.json`; transactional updates use the
/// store's ETag compare-and-set; realtime push arrives as a
/// `text/event-stream` the adapter folds into whole-document snapshots.
///
/// Server-side disconnect hooks are not reachable over plain REST, so
/// registered disconnect values are committed by `teardown()` on graceful
/// shutdown instead; an abrupt kill loses them.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    disconnect_values: Arc<Mutex<Vec<(String, Value)>>>,
}

impl HttpStore {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            disconnect_values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn url(&self, path: &str) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(token);
        }
        url
    }

    fn check_status(path: &str, status: StatusCode) -> Result<(), RemoteError> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::transient(format!(
                "remote store returned {} for {}",
                status, path
            )));
        }
        Ok(())
    }

    async fn read_body(path: &str, response: reqwest::Response) -> Result<Value, RemoteError> {
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        if text.is_empty() || text == "null" {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Ask the store to assign its own timestamp for `last_updated`.
    fn stamp(value: &mut Value) {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("last_updated".to_string(), json!({ ".sv": "timestamp" }));
        }
    }

    /// Commit registered disconnect values. Called on graceful shutdown in
    /// place of a server-side disconnect hook.
    pub async fn teardown(&self) {
        let pending = {
            let mut values = self.disconnect_values.lock().expect("lock poisoned");
            std::mem::take(&mut *values)
        };
        for (path, value) in pending {
            if let Err(e) = self.set(&path, value).await {
                eprintln!("WARNING: Failed to commit disconnect value for {}: {}", path, e);
            }
        }
    }
}

impl RemoteStore for HttpStore {
    async fn get_once(&self, path: &str) -> Result<Value, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        Self::check_status(path, response.status())?;
        Self::read_body(path, response).await
    }

    async fn set(&self, path: &str, mut value: Value) -> Result<(), RemoteError> {
        Self::stamp(&mut value);
        let response = self
            .client
            .put(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        Self::check_status(path, response.status())
    }

    async fn update_fields(&self, path: &str, mut partial: Value) -> Result<(), RemoteError> {
        if !partial.is_object() {
            return Err(RemoteError::Decode {
                path: path.to_string(),
                reason: "field merge requires an object".to_string(),
            });
        }
        Self::stamp(&mut partial);
        let response = self
            .client
            .patch(self.url(path))
            .json(&partial)
            .send()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        Self::check_status(path, response.status())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| RemoteError::transient(e.to_string()))?;
        Self::check_status(path, response.status())
    }

    async fn transact(
        &self,
        path: &str,
        apply: &(dyn Fn(Option<Value>) -> Value + Send + Sync),
    ) -> Result<Value, RemoteError> {
        let mut attempts = 0;
        loop {
            // read with an ETag so the commit can be conditional
            let response = self
                .client
                .get(self.url(path))
                .header("X-Firebase-ETag", "true")
                .send()
                .await
                .map_err(|e| RemoteError::transient(e.to_string()))?;
            Self::check_status(path, response.status())?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("null_etag")
                .to_string();
            let current = match Self::read_body(path, response).await? {
                Value::Null => None,
                value => Some(value),
            };

            let next = apply(current);

            let commit = self
                .client
                .put(self.url(path))
                .header(IF_MATCH, &etag)
                .json(&next)
                .send()
                .await
                .map_err(|e| RemoteError::transient(e.to_string()))?;

            if commit.status() == StatusCode::PRECONDITION_FAILED {
                attempts += 1;
                if attempts >= MAX_TRANSACT_ATTEMPTS {
                    return Err(RemoteError::Contention {
                        path: path.to_string(),
                        attempts,
                    });
                }
                continue; // an intervening write landed, re-read and retry
            }
            Self::check_status(path, commit.status())?;
            return Ok(next);
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, RemoteError> {
        let (tx, rx) = unbounded_channel();
        let store = self.clone();
        let watched = path.to_string();

        let worker = tokio::spawn(async move {
            // fires once immediately with the current state
            match store.get_once(&watched).await {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        return;
                    }
                }
                Err(e) => eprintln!("WARNING: Initial snapshot fetch failed for {}: {}", watched, e),
            }

            loop {
                if let Err(e) = stream_changes(&store, &watched, &tx).await {
                    eprintln!("Change stream error for {}: {}", watched, e);
                }
                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        Ok(Subscription::new(rx, Some(worker.abort_handle())))
    }

    async fn on_disconnect_set(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let mut values = self.disconnect_values.lock().expect("lock poisoned");
        values.push((path.to_string(), value));
        Ok(())
    }
}

/// Follow the store's event stream for `path`, re-reading the document on
/// every change event and forwarding the snapshot.
async fn stream_changes(
    store: &HttpStore,
    path: &str,
    tx: &tokio::sync::mpsc::UnboundedSender<Value>,
) -> Result<(), RemoteError> {
    let response = store
        .client
        .get(store.url(path))
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| RemoteError::transient(e.to_string()))?;
    HttpStore::check_status(path, response.status())?;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut last_event = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RemoteError::transient(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            if let Some(event) = line.strip_prefix("event:") {
                last_event = event.trim().to_string();
            } else if line.starts_with("data:") && (last_event == "put" || last_event == "patch") {
                // the event carries a sub-path delta; refetch the whole
                // document so subscribers always see full snapshots
                let snapshot = store.get_once(path).await?;
                if tx.send(snapshot).is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}
