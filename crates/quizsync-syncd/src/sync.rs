use crate::cache::LocalStore;
use crate::migrate::{MigrationEngine, MigrationOutcome};
use crate::queue::{FlushReport, SyncQueue};
use crate::remote::{paths, RemoteStore, Subscription};
use anyhow::Result;
use quizsync_core::merge::{merge, MergeDecision};
use quizsync_core::models::{
    now_ms, QuestionId, SessionContext, SessionSummary, UserIdentity, UserRecord,
};
use serde_json::{json, Value};

/// Lifecycle phase of the sync engine. Driven forward once at session
/// start; `Steady` persists until teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncPhase {
    Uninitialized,
    LocalLoaded,
    Migrated,
    Subscribed,
    Steady,
}

/// Drives the sync lifecycle: load local, migrate, subscribe, then route
/// remote pushes through the merge engine and local mutations to cache,
/// remote store and offline queue.
pub struct SyncManager<S: RemoteStore> {
    cache: LocalStore,
    store: S,
    context: SessionContext,
    record: UserRecord,
    queue: SyncQueue,
    migration: Option<MigrationEngine>,
    subscription: Option<Subscription>,
    phase: SyncPhase,
    online: bool,
}

impl<S: RemoteStore> SyncManager<S> {
    pub fn new(cache: LocalStore, store: S, context: SessionContext) -> Result<Self> {
        let queue = SyncQueue::load(&cache)?;
        let migration = context
            .identity
            .map(|identity| MigrationEngine::new(identity, &context.app_id));
        Ok(Self {
            cache,
            store,
            context,
            record: UserRecord::default(),
            queue,
            migration,
            subscription: None,
            phase: SyncPhase::Uninitialized,
            online: true,
        })
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drive the startup lifecycle:
    /// `Uninitialized -> LocalLoaded -> Migrated -> Subscribed -> Steady`.
    ///
    /// Without a durable identity the remote steps are skipped and the
    /// engine ends up steady in local-only mode.
    pub async fn init(&mut self) -> Result<()> {
        self.record = self.cache.load()?;
        self.phase = SyncPhase::LocalLoaded;

        if let Some(engine) = self.migration.as_mut() {
            match engine
                .run(&self.store, &self.record, self.context.device.as_ref())
                .await
            {
                Ok(MigrationOutcome::Migrated { record, sources }) => {
                    println!(
                        "DEBUG: Migration consolidated {} legacy records: {:?}",
                        sources.len(),
                        sources
                    );
                    self.record = record;
                    self.cache.persist(&mut self.record)?;
                }
                Ok(MigrationOutcome::CreatedFresh(record)) => {
                    self.record = record;
                    self.cache.persist(&mut self.record)?;
                }
                Ok(MigrationOutcome::AlreadyCurrent) | Ok(MigrationOutcome::AlreadyRan) => {}
                Err(e) => {
                    // never blocks startup; the app keeps working locally
                    eprintln!("WARNING: Auto-migration failed: {e:#}");
                }
            }
        }
        self.phase = SyncPhase::Migrated;

        if let Some(identity) = self.context.identity {
            let subscription = self.store.subscribe(&paths::user_record(identity)).await?;
            self.subscription = Some(subscription);
            self.register_presence(identity).await;
        } else {
            println!("No durable identity - running in local-only mode");
        }
        self.phase = SyncPhase::Subscribed;

        self.phase = SyncPhase::Steady;
        if !self.queue.is_empty() {
            let report = self.flush_queue().await?;
            if report.delivered > 0 {
                println!("DEBUG: Flushed {} queued writes from last run", report.delivered);
            }
        }
        Ok(())
    }

    async fn register_presence(&self, identity: UserIdentity) {
        let path = paths::presence(identity);
        let now = now_ms();
        if let Err(e) = self
            .store
            .set(&path, json!({ "online": true, "last_seen": now }))
            .await
        {
            eprintln!("WARNING: Presence write failed: {}", e);
        }
        // the store commits this on our behalf if the connection drops
        if let Err(e) = self
            .store
            .on_disconnect_set(&path, json!({ "online": false, "last_seen": now }))
            .await
        {
            eprintln!("WARNING: Disconnect hook registration failed: {}", e);
        }
    }

    /// Await the next snapshot pushed by the realtime subscription.
    ///
    /// Pends forever in local-only mode so it can sit in a `select!` arm;
    /// returns `None` once the subscription is closed.
    pub async fn next_remote_snapshot(&mut self) -> Option<Value> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.next().await,
            None => std::future::pending().await,
        }
    }

    /// Route one remote snapshot through the merge engine.
    pub async fn handle_remote_snapshot(&mut self, snapshot: Value) -> Result<()> {
        let Some(identity) = self.context.identity else {
            return Ok(());
        };
        if snapshot.is_null() {
            println!("DEBUG: No remote data yet");
            return Ok(());
        }

        let remote: UserRecord = match serde_json::from_value(snapshot) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("WARNING: Ignoring undecodable remote snapshot: {}", e);
                return Ok(());
            }
        };
        // a record whose owner does not match its storage path is never
        // authoritative for that path
        if !remote.is_authoritative_for(identity) {
            eprintln!(
                "WARNING: Record at users/{} owned by {:?}, ignoring",
                identity, remote.owner
            );
            return Ok(());
        }

        let result = merge(&self.record, &remote);
        match result.decision {
            MergeDecision::Noop => {
                self.record = result.record;
            }
            MergeDecision::WriteLocal => {
                println!("DEBUG: Remote ahead, updating local cache");
                self.record = result.record;
                self.cache.persist(&mut self.record)?;
            }
            MergeDecision::PushRemote => {
                println!("DEBUG: Local ahead, pushing merged record");
                self.record = result.record;
                self.cache.persist(&mut self.record)?;
                self.push_record(identity).await?;
            }
        }
        Ok(())
    }

    pub async fn add_mistake(&mut self, question: QuestionId) -> Result<()> {
        if self.record.mistakes.insert(question) {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn add_archive(&mut self, question: QuestionId) -> Result<()> {
        if self.record.archive.insert(question) {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn add_favorite(&mut self, question: QuestionId) -> Result<()> {
        if self.record.fav.insert(question) {
            self.save().await?;
        }
        Ok(())
    }

    /// Settings are per-device preferences: persisted locally, never sent
    /// to the remote store.
    pub fn set_setting(&mut self, key: &str, value: Value) -> Result<()> {
        self.record.settings.insert(key.to_string(), value);
        self.cache.persist(&mut self.record)
    }

    /// Append to the device-local session history (never synchronized).
    pub fn record_local_session(&mut self, summary: &SessionSummary) -> Result<()> {
        self.cache.append_session(summary)
    }

    /// Persist locally (always, synchronously), then attempt the remote
    /// write; failures and offline periods divert the payload to the queue.
    async fn save(&mut self) -> Result<()> {
        self.cache.persist(&mut self.record)?;
        let Some(identity) = self.context.identity else {
            return Ok(()); // local-only mode
        };
        self.push_record(identity).await
    }

    async fn push_record(&mut self, identity: UserIdentity) -> Result<()> {
        let payload = self.save_payload(identity);
        if !self.online {
            self.queue.enqueue(&self.cache, payload)?;
            return Ok(());
        }
        if let Err(e) = self
            .store
            .update_fields(&paths::user_record(identity), payload.clone())
            .await
        {
            eprintln!("WARNING: Remote save failed, queuing: {}", e);
            self.queue.enqueue(&self.cache, payload)?;
        }
        Ok(())
    }

    // settings excluded: they stay on this device
    fn save_payload(&self, identity: UserIdentity) -> Value {
        json!({
            "mistakes": self.record.mistakes,
            "archive": self.record.archive,
            "fav": self.record.fav,
            "telegram_id": identity,
            "user_name": self.context.user_name,
            "app_id": self.context.app_id,
        })
    }

    /// Connectivity transition. Going online triggers a queue flush; it
    /// does not trigger a fresh merge, the re-established subscription
    /// supplies the authoritative remote state.
    pub async fn set_online(&mut self, online: bool) -> Result<()> {
        let was_online = self.online;
        self.online = online;
        if online && !was_online {
            let report = self.flush_queue().await?;
            if report.delivered > 0 {
                println!("DEBUG: Reconnect flushed {} queued writes", report.delivered);
            }
        }
        Ok(())
    }

    pub async fn flush_queue(&mut self) -> Result<FlushReport> {
        let Some(identity) = self.context.identity else {
            return Ok(FlushReport::default());
        };
        if !self.online {
            return Ok(FlushReport::default());
        }
        self.queue
            .flush(&self.cache, &self.store, &paths::user_record(identity))
            .await
    }

    /// Re-run migration despite the once-per-session guard.
    pub async fn force_migrate(&mut self) -> Result<()> {
        if let Some(engine) = self.migration.as_mut() {
            engine.force();
            if let MigrationOutcome::Migrated { record, .. } | MigrationOutcome::CreatedFresh(record) =
                engine
                    .run(&self.store, &self.record, self.context.device.as_ref())
                    .await?
            {
                self.record = record;
                self.cache.persist(&mut self.record)?;
            }
        }
        Ok(())
    }

    /// Explicit cleanup of migrated legacy documents.
    pub async fn cleanup_legacy(&mut self) -> Result<usize> {
        match self.migration.as_ref() {
            Some(engine) => engine.cleanup_legacy(&self.store).await,
            None => Ok(0),
        }
    }

    /// Release the subscription and mark this device offline. Idempotent.
    pub async fn teardown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if let Some(identity) = self.context.identity {
            let presence = json!({ "online": false, "last_seen": now_ms() });
            if let Err(e) = self.store.set(&paths::presence(identity), presence).await {
                eprintln!("WARNING: Presence teardown write failed: {}", e);
            }
        }
    }
}
