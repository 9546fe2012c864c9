use crate::remote::{paths, RemoteStore};
use anyhow::Result;
use quizsync_core::models::{now_ms, AggregateStats, SessionContext, SessionSummary, UserIdentity};
use quizsync_core::stats::apply_session;
use rand::distributions::{Alphanumeric, DistString};
use serde_json::{json, Value};

/// Folds finished sessions into the shared per-user accumulator and writes
/// the denormalized leaderboard and analytics views.
///
/// Independent of the main record sync path; invoked once per completed
/// session.
pub struct StatsUpdater<S: RemoteStore> {
    store: S,
    identity: UserIdentity,
    app_id: String,
    user_name: Option<String>,
}

impl<S: RemoteStore> StatsUpdater<S> {
    pub fn new(store: S, identity: UserIdentity, context: &SessionContext) -> Self {
        Self {
            store,
            identity,
            app_id: context.app_id.clone(),
            user_name: context.user_name.clone(),
        }
    }

    pub async fn record_session(&self, summary: &SessionSummary) -> Result<()> {
        let now = now_ms();

        // The accumulator is only ever touched through the transactional
        // path: two devices finishing sessions concurrently must both land.
        // The store retries this function on conflicting commits, so it
        // derives its result purely from its argument and the captured
        // session summary.
        let session = summary.clone();
        let apply = move |current: Option<Value>| -> Value {
            let stats = current.and_then(|value| serde_json::from_value::<AggregateStats>(value).ok());
            let mut next = apply_session(stats, &session);
            next.last_updated = now;
            serde_json::to_value(next).unwrap_or(Value::Null)
        };

        let stats_path = paths::user_stats(self.identity);
        if let Err(e) = self.store.transact(&stats_path, &apply).await {
            // retries exhausted: this session's totals are lost
            eprintln!("WARNING: Statistics update lost for {}: {}", stats_path, e);
            return Ok(());
        }

        // plain overwrite: only this user ever writes this exact key
        for (topic, count) in &summary.topics {
            let entry = json!({
                "score": count.correct,
                "accuracy": count.accuracy(),
                "total": count.total,
                "name": self.user_name,
                "timestamp": now,
            });
            let path = paths::leaderboard(topic, self.identity);
            if let Err(e) = self.store.set(&path, entry).await {
                eprintln!("WARNING: Leaderboard write failed for {}: {}", path, e);
            }
        }

        // append-only log entry at a unique key, never overwritten
        let key = generate_session_key();
        let path = paths::analytics_session(&self.app_id, &key);
        if let Err(e) = self.store.set(&path, serde_json::to_value(summary)?).await {
            eprintln!("WARNING: Analytics write failed for {}: {}", path, e);
        }

        Ok(())
    }
}

fn generate_session_key() -> String {
    format!(
        "{}-{}",
        now_ms(),
        Alphanumeric.sample_string(&mut rand::thread_rng(), 8)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use quizsync_core::models::TopicCount;
    use serde_json::json;
    use std::collections::BTreeMap;

    const ME: UserIdentity = UserIdentity(42);

    fn context() -> SessionContext {
        SessionContext {
            app_id: "quizsync_v1".into(),
            identity: Some(ME),
            device: None,
            user_name: Some("Sam".into()),
        }
    }

    fn session(topic: &str, total: u32, correct: u32) -> SessionSummary {
        SessionSummary {
            questions: total,
            correct,
            topics: BTreeMap::from([(topic.to_string(), TopicCount::new(total, correct))]),
            finished_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn records_accumulator_leaderboard_and_analytics() {
        let store = MemoryStore::new();
        let updater = StatsUpdater::new(store.clone(), ME, &context());

        updater.record_session(&session("anatomy", 5, 3)).await.unwrap();

        let stats = store.get_once("user_stats/42").await.unwrap();
        assert_eq!(stats["session_count"], json!(1));
        assert_eq!(stats["question_count"], json!(5));
        assert_eq!(stats["correct_count"], json!(3));

        let board = store.get_once("leaderboards/anatomy/42").await.unwrap();
        assert_eq!(board["score"], json!(3));
        assert_eq!(board["total"], json!(5));
        assert_eq!(board["name"], json!("Sam"));

        let log = store.get_once("analytics/quizsync_v1/sessions").await.unwrap();
        assert_eq!(log.as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn analytics_entries_never_collide() {
        let store = MemoryStore::new();
        let updater = StatsUpdater::new(store.clone(), ME, &context());

        updater.record_session(&session("anatomy", 5, 3)).await.unwrap();
        updater.record_session(&session("anatomy", 5, 4)).await.unwrap();

        let log = store.get_once("analytics/quizsync_v1/sessions").await.unwrap();
        assert_eq!(log.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_sessions_both_land() {
        // two devices finish sessions at the same time, each 3/5 correct
        // in disjoint topics; the accumulator must count all 10 questions
        let store = MemoryStore::new();

        let first = StatsUpdater::new(store.clone(), ME, &context());
        let second = StatsUpdater::new(store.clone(), ME, &context());

        let a = tokio::spawn(async move {
            first.record_session(&session("anatomy", 5, 3)).await.unwrap();
        });
        let b = tokio::spawn(async move {
            second.record_session(&session("pharma", 5, 3)).await.unwrap();
        });
        a.await.unwrap();
        b.await.unwrap();

        let stats = store.get_once("user_stats/42").await.unwrap();
        assert_eq!(stats["question_count"], json!(10), "a concurrent session update was lost");
        assert_eq!(stats["session_count"], json!(2));
        assert_eq!(stats["correct_count"], json!(6));
        assert_eq!(stats["topics"].as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn weak_and_strong_areas_follow_thresholds() {
        let store = MemoryStore::new();
        let updater = StatsUpdater::new(store.clone(), ME, &context());

        updater.record_session(&session("histology", 6, 1)).await.unwrap();
        updater.record_session(&session("biochem", 12, 11)).await.unwrap();

        let stats = store.get_once("user_stats/42").await.unwrap();
        assert_eq!(stats["weak_areas"], json!(["histology"]));
        assert_eq!(stats["strong_areas"], json!(["biochem"]));
    }
}
