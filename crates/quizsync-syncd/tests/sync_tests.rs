use quizsync_core::models::{now_ms, DeviceSessionId, SessionContext, UserIdentity};
use quizsync_syncd::remote::{paths, MemoryStore, RemoteStore};
use quizsync_syncd::{LocalStore, SyncManager, SyncPhase};
use serde_json::{json, Value};
use tempfile::TempDir;

const ME: i64 = 2004826495;

fn context(identity: Option<i64>) -> SessionContext {
    SessionContext {
        app_id: "quizsync_v1".to_string(),
        identity: identity.map(UserIdentity),
        device: Some(DeviceSessionId(uuid::Uuid::new_v4().to_string())),
        user_name: Some("Sam".to_string()),
    }
}

fn open_cache(dir: &TempDir) -> LocalStore {
    LocalStore::open(&dir.path().join("cache.db"), "quizsync_v1").unwrap()
}

/// Write a document verbatim, without the store stamping `last_updated`.
async fn seed(store: &MemoryStore, path: &str, doc: Value) {
    store.transact(path, &|_| doc.clone()).await.unwrap();
}

#[tokio::test]
async fn newer_remote_snapshot_updates_local_without_echo() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);

    let mut local = quizsync_core::models::UserRecord::default();
    local.mistakes.extend([1, 2]);
    cache.persist(&mut local).unwrap();

    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));
    seed(
        &store,
        &path,
        json!({
            "mistakes": [2, 3],
            "telegram_id": ME,
            "last_updated": now_ms() + 60_000,
        }),
    )
    .await;

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();
    assert_eq!(manager.phase(), SyncPhase::Steady);

    // the subscription delivers the current document immediately
    let snapshot = manager.next_remote_snapshot().await.unwrap();
    manager.handle_remote_snapshot(snapshot).await.unwrap();

    let merged: Vec<u32> = manager.record().mistakes.iter().copied().collect();
    assert_eq!(merged, vec![1, 2, 3]);

    // remote was ahead, so nothing was pushed back at it
    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([2, 3]));
}

#[tokio::test]
async fn stale_remote_snapshot_gets_the_merged_record_pushed() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);

    let mut local = quizsync_core::models::UserRecord::default();
    local.mistakes.extend([1, 2]);
    cache.persist(&mut local).unwrap();

    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));
    seed(
        &store,
        &path,
        json!({
            "mistakes": [2, 3],
            "telegram_id": ME,
            "last_updated": 1_000,
        }),
    )
    .await;

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();

    let snapshot = manager.next_remote_snapshot().await.unwrap();
    manager.handle_remote_snapshot(snapshot).await.unwrap();

    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([1, 2, 3]));
    assert_eq!(remote["telegram_id"], json!(ME));
    assert_eq!(remote["user_name"], json!("Sam"));
}

#[tokio::test]
async fn foreign_owned_snapshot_is_ignored() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);

    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));
    seed(
        &store,
        &path,
        json!({
            "mistakes": [9],
            "telegram_id": 999,
            "last_updated": now_ms() + 60_000,
        }),
    )
    .await;

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();

    let snapshot = manager.next_remote_snapshot().await.unwrap();
    manager.handle_remote_snapshot(snapshot).await.unwrap();

    assert!(manager.record().mistakes.is_empty());
}

#[tokio::test]
async fn offline_mutations_queue_and_flush_on_reconnect() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();

    // no prior state anywhere: startup registers a fresh record
    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["created_fresh"], json!(true));

    manager.set_online(false).await.unwrap();
    manager.add_mistake(7).await.unwrap();
    assert_eq!(manager.queue_len(), 1);
    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([]));

    manager.set_online(true).await.unwrap();
    assert_eq!(manager.queue_len(), 0);
    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([7]));
}

#[tokio::test]
async fn queued_writes_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));

    {
        let cache = open_cache(&dir);
        let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
        manager.init().await.unwrap();
        manager.set_online(false).await.unwrap();
        manager.add_mistake(7).await.unwrap();
        assert_eq!(manager.queue_len(), 1);
    }

    // next session starts online and drains the queue during init
    let cache = open_cache(&dir);
    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();
    assert_eq!(manager.queue_len(), 0);
    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([7]));
}

#[tokio::test]
async fn startup_consolidates_legacy_records_with_local_state() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);

    let mut local = quizsync_core::models::UserRecord::default();
    local.mistakes.insert(1);
    cache.persist(&mut local).unwrap();

    let store = MemoryStore::new();
    seed(
        &store,
        "AbCdEfGhIjKlMnOpQrSt",
        json!({ "mistakes": [5], "telegram_id": ME, "last_updated": 100 }),
    )
    .await;
    seed(
        &store,
        "user_data/session_one",
        json!({ "mistakes": [5, 6], "telegram_id": ME, "last_updated": 200 }),
    )
    .await;

    let ctx = context(Some(ME));
    let device = ctx.device.clone().unwrap();
    let mut manager = SyncManager::new(cache, store.clone(), ctx).unwrap();
    manager.init().await.unwrap();

    let merged: Vec<u32> = manager.record().mistakes.iter().copied().collect();
    assert_eq!(merged, vec![1, 5, 6]);
    assert!(manager.record().auto_migrated);
    assert_eq!(manager.record().migration_count, 2);

    let remote = store
        .get_once(&paths::user_record(UserIdentity(ME)))
        .await
        .unwrap();
    assert_eq!(remote["mistakes"], json!([1, 5, 6]));

    let link = store.get_once(&paths::auth_link(&device)).await.unwrap();
    assert_eq!(link["telegram_id"], json!(ME));
}

#[tokio::test]
async fn presence_flips_offline_on_disconnect_and_teardown() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let store = MemoryStore::new();
    let presence_path = paths::presence(UserIdentity(ME));

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();

    let presence = store.get_once(&presence_path).await.unwrap();
    assert_eq!(presence["online"], json!(true));

    store.simulate_disconnect().await;
    let presence = store.get_once(&presence_path).await.unwrap();
    assert_eq!(presence["online"], json!(false));

    // teardown is safe to call repeatedly
    manager.teardown().await;
    manager.teardown().await;
    let presence = store.get_once(&presence_path).await.unwrap();
    assert_eq!(presence["online"], json!(false));
}

#[tokio::test]
async fn without_identity_everything_stays_local() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let store = MemoryStore::new();

    let mut manager = SyncManager::new(cache, store.clone(), context(None)).unwrap();
    manager.init().await.unwrap();
    assert_eq!(manager.phase(), SyncPhase::Steady);

    manager.add_mistake(3).await.unwrap();
    manager
        .set_setting("dark_mode", json!(true))
        .unwrap();

    assert!(manager.record().mistakes.contains(&3));
    assert_eq!(manager.queue_len(), 0);

    // the remote tree never saw any of it
    let root = store.get_once("").await.unwrap();
    assert_eq!(root, json!({}));
}

#[tokio::test]
async fn settings_never_reach_the_remote_record() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let store = MemoryStore::new();
    let path = paths::user_record(UserIdentity(ME));

    let mut manager = SyncManager::new(cache, store.clone(), context(Some(ME))).unwrap();
    manager.init().await.unwrap();

    manager.set_setting("dark_mode", json!(true)).unwrap();
    manager.add_mistake(4).await.unwrap();

    let remote = store.get_once(&path).await.unwrap();
    assert_eq!(remote["mistakes"], json!([4]));
    assert!(remote.get("settings").is_none());
    assert!(remote.get("dark_mode").is_none());
}
