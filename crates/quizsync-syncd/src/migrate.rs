use crate::remote::{paths, RemoteStore};
use anyhow::{bail, Result};
use quizsync_core::models::{
    now_ms, DeviceSessionId, LegacyRecord, LegacySource, UserIdentity, UserRecord,
};
use serde_json::{json, Value};

/// What a migration pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// The pass already ran this session; nothing was touched.
    AlreadyRan,
    /// The current-schema record exists; only the device link was refreshed.
    AlreadyCurrent,
    /// No legacy data found; a record seeded from local cache was written.
    CreatedFresh(UserRecord),
    /// Legacy records were consolidated into the current per-user path.
    Migrated {
        record: UserRecord,
        sources: Vec<String>,
    },
}

/// Discovers records written under legacy addressing schemes and
/// consolidates them into `users/{identity}`.
///
/// Runs at most once per session. Legacy source documents are left in
/// place; only the separate, explicitly triggered [`cleanup_legacy`]
/// pass deletes them, so a misclassified record is never lost silently.
///
/// [`cleanup_legacy`]: MigrationEngine::cleanup_legacy
pub struct MigrationEngine {
    identity: UserIdentity,
    app_id: String,
    done: bool,
}

impl MigrationEngine {
    pub fn new(identity: UserIdentity, app_id: &str) -> Self {
        Self {
            identity,
            app_id: app_id.to_string(),
            done: false,
        }
    }

    /// Allow the next [`run`](MigrationEngine::run) to execute again.
    pub fn force(&mut self) {
        self.done = false;
    }

    pub async fn run<S: RemoteStore>(
        &mut self,
        store: &S,
        local: &UserRecord,
        device: Option<&DeviceSessionId>,
    ) -> Result<MigrationOutcome> {
        if self.done {
            return Ok(MigrationOutcome::AlreadyRan);
        }

        let current_path = paths::user_record(self.identity);
        let current = store.get_once(&current_path).await?;
        if !current.is_null() {
            println!(
                "DEBUG: Current-schema record exists for {}, skipping migration",
                self.identity
            );
            self.register_device_link(store, device).await;
            self.done = true;
            return Ok(MigrationOutcome::AlreadyCurrent);
        }

        let root = store.get_once("").await?;
        let legacy = collect_legacy(&root, self.identity);

        let outcome = if legacy.is_empty() {
            println!(
                "DEBUG: No legacy data for {}, creating fresh record",
                self.identity
            );
            let mut fresh = local.clone();
            fresh.owner = Some(self.identity);
            fresh.app_id = self.app_id.clone();
            fresh.created_fresh = true;
            store.set(&current_path, remote_payload(&fresh)?).await?;
            MigrationOutcome::CreatedFresh(fresh)
        } else {
            let sources: Vec<String> = legacy.iter().map(|l| l.source.path()).collect();
            println!(
                "DEBUG: Migrating {} legacy records for {}: {:?}",
                sources.len(),
                self.identity,
                sources
            );

            let mut merged = local.clone();
            merged.owner = Some(self.identity);
            merged.app_id = self.app_id.clone();
            for item in &legacy {
                merged.mistakes.extend(item.record.mistakes.iter().copied());
                merged.archive.extend(item.record.archive.iter().copied());
                merged.fav.extend(item.record.fav.iter().copied());
                // legacy settings only fill gaps; this device's values win
                for (key, value) in &item.record.settings {
                    merged
                        .settings
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
            merged.auto_migrated = true;
            merged.migrated_from = sources.clone();
            merged.migration_count = sources.len() as u32;

            store.set(&current_path, remote_payload(&merged)?).await?;
            MigrationOutcome::Migrated {
                record: merged,
                sources,
            }
        };

        self.register_device_link(store, device).await;
        self.done = true;
        Ok(outcome)
    }

    /// Delete legacy source documents attributed to this identity.
    ///
    /// Refuses to run until the consolidated record is confirmed present,
    /// and is never invoked implicitly by the migration pass itself.
    pub async fn cleanup_legacy<S: RemoteStore>(&self, store: &S) -> Result<usize> {
        let current = store.get_once(&paths::user_record(self.identity)).await?;
        if current.is_null() {
            bail!(
                "refusing legacy cleanup: no migrated record at users/{}",
                self.identity
            );
        }

        let root = store.get_once("").await?;
        let legacy = collect_legacy(&root, self.identity);
        let count = legacy.len();
        for item in &legacy {
            store.delete(&item.source.path()).await?;
        }
        if count > 0 {
            println!("DEBUG: Cleaned up {} legacy records", count);
        }
        Ok(count)
    }

    /// Link this connection's ephemeral id to the durable identity.
    /// Best-effort; a failure never blocks startup.
    async fn register_device_link<S: RemoteStore>(
        &self,
        store: &S,
        device: Option<&DeviceSessionId>,
    ) {
        let Some(device) = device else { return };
        let link = json!({
            "telegram_id": self.identity,
            "linked_at": now_ms(),
        });
        if let Err(e) = store.set(&paths::auth_link(device), link).await {
            eprintln!("WARNING: Failed to register device link: {}", e);
        }
    }
}

/// Collect every legacy document attributable to `identity`.
///
/// Covered schemes: flat root keys written under a connection id (opaque,
/// length >= 20, outside the reserved namespaces) and the interim
/// `user_data/{id}` layout. A document with a missing or mismatched owner
/// field is invisible to this identity's pass.
fn collect_legacy(root: &Value, identity: UserIdentity) -> Vec<LegacyRecord> {
    let Some(map) = root.as_object() else {
        return Vec::new();
    };

    let mut found = Vec::new();

    for (key, value) in map {
        if paths::RESERVED_NAMESPACES.contains(&key.as_str()) {
            continue;
        }
        if key.len() < paths::LEGACY_KEY_MIN_LEN {
            continue;
        }
        if let Some(record) = attribute(value, identity) {
            found.push(LegacyRecord {
                source: LegacySource::FlatSessionKey(key.clone()),
                record,
            });
        }
    }

    if let Some(user_data) = map.get("user_data").and_then(Value::as_object) {
        for (id, value) in user_data {
            if let Some(record) = attribute(value, identity) {
                found.push(LegacyRecord {
                    source: LegacySource::UserData(id.clone()),
                    record,
                });
            }
        }
    }

    found
}

fn attribute(value: &Value, identity: UserIdentity) -> Option<UserRecord> {
    let record: UserRecord = serde_json::from_value(value.clone()).ok()?;
    record.is_authoritative_for(identity).then_some(record)
}

// Settings are per-device preferences and never leave this device.
fn remote_payload(record: &UserRecord) -> anyhow::Result<Value> {
    let mut shared = record.clone();
    shared.settings.clear();
    Ok(serde_json::to_value(&shared)?)
}
