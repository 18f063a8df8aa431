//! Cross-process reconciliation of the flag file

mod common;

use common::{eventually, fast_retry, test_config};
use modular_host::flags::{
    ChangeOrigin, FlagFile, FlagType, JsonFileBackend, ObserverBus, Topic,
};
use modular_host::modules::{alerts, builtin_modules};
use modular_host::utils::current_timestamp_millis;
use modular_host::{FeatureFlag, FeatureFlagStore, FlagError, FlagPermission, FlagValue, ModuleHost};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Rewrite the flag file the way another process would (temp file + rename)
fn rewrite<F: FnOnce(&mut FlagFile)>(path: &Path, edit: F) {
    let content = std::fs::read_to_string(path).unwrap();
    let mut file = FlagFile::parse(&content).unwrap();
    edit(&mut file);
    file.version += 1;
    let tmp = path.with_extension("external.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&file).unwrap()).unwrap();
    std::fs::rename(&tmp, path).unwrap();
}

fn set_external(file: &mut FlagFile, name: &str, value: FlagValue, by: &str) {
    let flag = file.flags.get_mut(name).unwrap();
    flag.value = value;
    flag.modified_by = Some(by.to_string());
    flag.updated_at = current_timestamp_millis();
}

async fn watching_host(dir: &Path) -> ModuleHost {
    let mut config = test_config(dir);
    config.flags.watch = true;
    ModuleHost::builder(config)
        .with_modules(builtin_modules())
        .init()
        .await
        .unwrap()
}

async fn value_becomes(store: &Arc<FeatureFlagStore>, name: &str, expected: FlagValue) -> bool {
    let store = Arc::clone(store);
    let name = name.to_string();
    eventually(Duration::from_secs(3), move || {
        let store = Arc::clone(&store);
        let name = name.clone();
        let expected = expected.clone();
        async move { store.get_value(&name, "alerts").await.ok() == Some(expected) }
    })
    .await
}

#[tokio::test]
async fn test_external_rewrite_converges_and_notifies_changed_keys_only() {
    let dir = TempDir::new().unwrap();
    let host = watching_host(dir.path()).await;
    assert!(host.is_watching());
    let path = host.config().flags_path();

    let (_id, mut changes) = host.flags().bus().subscribe_channel(Topic::All).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    rewrite(&path, |file| {
        set_external(file, alerts::ALERT_VOLUME, FlagValue::Int(80), "dashboard")
    });

    assert!(value_becomes(host.flags(), alerts::ALERT_VOLUME, FlagValue::Int(80)).await);
    // Let any trailing events settle
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut received = Vec::new();
    while let Ok(change) = changes.try_recv() {
        received.push(change);
    }
    assert_eq!(received.len(), 1, "unexpected notifications: {:?}", received);
    let change = &received[0];
    assert_eq!(change.name, alerts::ALERT_VOLUME);
    assert_eq!(change.old_value, FlagValue::Int(50));
    assert_eq!(change.new_value, FlagValue::Int(80));
    assert_eq!(change.origin, ChangeOrigin::External);
    assert_eq!(change.modified_by, "dashboard");

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_file_keeps_last_good_state() {
    let dir = TempDir::new().unwrap();
    let host = watching_host(dir.path()).await;
    let path = host.config().flags_path();

    host.flags()
        .set_value(alerts::SUB_ALERT_ENABLED, FlagValue::Bool(true), "alerts")
        .await
        .unwrap();
    let good = std::fs::read_to_string(&path).unwrap();
    let (_id, mut changes) = host.flags().bus().subscribe_channel(Topic::All).await;

    std::fs::write(&path, "{ \"flags\": [ not json").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        host.flags()
            .get_value(alerts::SUB_ALERT_ENABLED, "alerts")
            .await
            .unwrap(),
        FlagValue::Bool(true)
    );
    assert!(changes.try_recv().is_err());

    // The watcher keeps running after corruption
    std::fs::write(&path, &good).unwrap();
    rewrite(&path, |file| {
        set_external(file, alerts::ALERT_VOLUME, FlagValue::Int(10), "dashboard")
    });
    assert!(value_becomes(host.flags(), alerts::ALERT_VOLUME, FlagValue::Int(10)).await);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_burst_of_writes_ends_on_last_value() {
    let dir = TempDir::new().unwrap();
    let host = watching_host(dir.path()).await;
    let path = host.config().flags_path();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for volume in [60, 70, 80, 90] {
        rewrite(&path, |file| {
            set_external(file, alerts::ALERT_VOLUME, FlagValue::Int(volume), "dashboard")
        });
    }

    assert!(value_becomes(host.flags(), alerts::ALERT_VOLUME, FlagValue::Int(90)).await);
    host.shutdown().await.unwrap();
}

fn open_store(path: &Path) -> Arc<FeatureFlagStore> {
    Arc::new(
        FeatureFlagStore::open(
            Arc::new(JsonFileBackend::new(path)),
            Arc::new(ObserverBus::new()),
            fast_retry(),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_reload_applies_write_from_second_process() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feature_flags.json");

    let host_store = open_store(&path);
    host_store
        .register_flag(
            FeatureFlag::bool("chat_enabled", "", true),
            FlagPermission::ReadWrite,
            "chat",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A second process loads the shared file and writes through it
    let dashboard = open_store(&path);
    dashboard
        .register_flag(
            FeatureFlag::string("motd", "", "hello"),
            FlagPermission::ReadWrite,
            "dashboard",
        )
        .await
        .unwrap();
    dashboard
        .set_value("chat_enabled", FlagValue::Bool(false), "dashboard")
        .await
        .unwrap();

    let changes = host_store.reload_from_backend().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].name, "chat_enabled");
    assert_eq!(changes[0].origin, ChangeOrigin::External);
    assert_eq!(
        host_store.get_value("chat_enabled", "chat").await.unwrap(),
        FlagValue::Bool(false)
    );

    // Flags only the other process declared arrive undeclared
    let snapshot = host_store.snapshot().await;
    assert!(!snapshot["motd"].declared);
    assert_eq!(snapshot["motd"].owner, "dashboard");

    // Nothing changed since: reconciling again is quiet
    assert!(host_store.reload_from_backend().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reload_rejects_value_of_wrong_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feature_flags.json");
    let store = open_store(&path);
    store
        .register_flag(
            FeatureFlag::bool("chat_enabled", "", true),
            FlagPermission::ReadWrite,
            "chat",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    rewrite(&path, |file| {
        let flag = file.flags.get_mut("chat_enabled").unwrap();
        flag.value_type = None;
        flag.value = FlagValue::Int(5);
        flag.updated_at = current_timestamp_millis();
    });

    assert!(store.reload_from_backend().await.unwrap().is_empty());
    assert_eq!(
        store.get_value("chat_enabled", "chat").await.unwrap(),
        FlagValue::Bool(true)
    );

    // The rejected value is overwritten with the local one
    let file = FlagFile::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(file.flags["chat_enabled"].value, FlagValue::Bool(true));
    assert_eq!(file.flags["chat_enabled"].value_type, Some(FlagType::Bool));
}

#[tokio::test]
async fn test_reload_reports_corruption_without_changing_memory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feature_flags.json");
    let store = open_store(&path);
    store
        .register_flag(
            FeatureFlag::int("slow_mode_secs", "", 0),
            FlagPermission::ReadWrite,
            "chat",
        )
        .await
        .unwrap();
    let version = store.version().await;

    std::fs::write(&path, "not json at all").unwrap();
    let err = store.reload_from_backend().await.unwrap_err();
    assert!(matches!(err, FlagError::ConfigCorruption(_)));
    assert_eq!(store.version().await, version);
    assert_eq!(
        store.get_value("slow_mode_secs", "chat").await.unwrap(),
        FlagValue::Int(0)
    );
}

#[tokio::test]
async fn test_corrupt_file_fails_host_init() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.flags_path(), "{ broken").unwrap();

    let result = ModuleHost::builder(config)
        .with_modules(builtin_modules())
        .init()
        .await;
    assert!(result.is_err());
}
