//! Feature flag store: permissions, typing, ordering, persistence failures
//! and observer isolation

mod common;

use common::{fast_retry, memory_store, store_over, test_config, FailingBackend};
use modular_host::flags::{
    FlagDeclaration, FlagFile, FlagType, MemoryFlagBackend, ObserverBus, PersistedFlag, Topic,
};
use modular_host::modules::{alerts, builtin_modules};
use modular_host::{
    FeatureFlag, FeatureFlagStore, FlagClient, FlagError, FlagPermission, FlagValue, ModuleHost,
    ModuleState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

async fn store_with_alert_flags() -> Arc<FeatureFlagStore> {
    let store = memory_store();
    store
        .register_flags(
            "alerts",
            &[
                FlagDeclaration::new(
                    FeatureFlag::bool("sub_alert_enabled", "", false),
                    FlagPermission::ReadWrite,
                ),
                FlagDeclaration::new(FeatureFlag::int("alert_volume", "", 50), FlagPermission::ReadOnly),
                FlagDeclaration::new(
                    FeatureFlag::enumeration("alert_style", "", &["chime", "siren"], "chime"),
                    FlagPermission::OwnerOnly,
                ),
            ],
        )
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_shared_flag_written_by_other_module_notifies_owner() {
    let store = store_with_alert_flags().await;
    let alerts = FlagClient::new(Arc::clone(&store), "alerts");
    let announcements = FlagClient::new(Arc::clone(&store), "announcements");

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    alerts
        .subscribe("sub_alert_enabled", move |change| {
            assert_eq!(change.old_value, FlagValue::Bool(false));
            assert_eq!(change.new_value, FlagValue::Bool(true));
            assert_eq!(change.modified_by, "announcements");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert!(!announcements.get_bool("sub_alert_enabled").await.unwrap());
    announcements.set("sub_alert_enabled", true).await.unwrap();

    assert!(alerts.get_bool("sub_alert_enabled").await.unwrap());
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let entry = store.get_entry("sub_alert_enabled", "alerts").await.unwrap();
    assert_eq!(entry.owner, "alerts");
    assert_eq!(entry.last_modified_by, "announcements");
}

#[tokio::test]
async fn test_owner_only_denied_without_side_effects() {
    let store = store_with_alert_flags().await;
    let (_id, mut changes) = store.bus().subscribe_channel(Topic::All).await;
    let version = store.version().await;

    let err = store
        .set_value("alert_style", FlagValue::Enum("siren".into()), "chat")
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::PermissionDenied { ref flag, ref requester, .. }
        if flag == "alert_style" && requester == "chat"));

    let err = store.get_value("alert_style", "chat").await.unwrap_err();
    assert!(matches!(err, FlagError::PermissionDenied { .. }));

    assert_eq!(
        store.get_value("alert_style", "alerts").await.unwrap(),
        FlagValue::Enum("chime".into())
    );
    assert_eq!(store.version().await, version);
    assert!(changes.try_recv().is_err());

    // Subscribing needs read access too
    let chat = FlagClient::new(Arc::clone(&store), "chat");
    assert!(chat.subscribe("alert_style", |_| Ok(())).await.is_err());
}

#[tokio::test]
async fn test_read_only_flag_writable_by_owner_only() {
    let store = store_with_alert_flags().await;

    assert_eq!(
        store.get_value("alert_volume", "chat").await.unwrap(),
        FlagValue::Int(50)
    );
    let err = store
        .set_value("alert_volume", FlagValue::Int(90), "chat")
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::PermissionDenied { .. }));

    store
        .set_value("alert_volume", FlagValue::Int(90), "alerts")
        .await
        .unwrap();
    assert_eq!(
        store.get_value("alert_volume", "chat").await.unwrap(),
        FlagValue::Int(90)
    );
}

#[tokio::test]
async fn test_type_mismatch_rejected() {
    let store = store_with_alert_flags().await;

    let err = store
        .set_value("sub_alert_enabled", FlagValue::Int(1), "alerts")
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::TypeMismatch { ref expected, ref actual, .. }
        if expected == "bool" && actual == "int"));

    let err = store
        .set_value("alert_style", FlagValue::Enum("kazoo".into()), "alerts")
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::TypeMismatch { .. }));

    assert_eq!(
        store.get_value("sub_alert_enabled", "alerts").await.unwrap(),
        FlagValue::Bool(false)
    );
}

#[tokio::test]
async fn test_unknown_flag() {
    let store = memory_store();
    let err = store.get_value("nope", "chat").await.unwrap_err();
    assert_eq!(err, FlagError::FlagNotFound("nope".to_string()));
    let err = store
        .set_value("nope", FlagValue::Bool(true), "chat")
        .await
        .unwrap_err();
    assert_eq!(err, FlagError::FlagNotFound("nope".to_string()));
}

#[tokio::test]
async fn test_duplicate_registration_is_atomic() {
    let store = store_with_alert_flags().await;
    let err = store
        .register_flags(
            "rival",
            &[
                FlagDeclaration::new(FeatureFlag::bool("rival_flag", "", true), FlagPermission::ReadWrite),
                FlagDeclaration::new(
                    FeatureFlag::bool("sub_alert_enabled", "", true),
                    FlagPermission::ReadWrite,
                ),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::DuplicateFlag { ref name, ref owner }
        if name == "sub_alert_enabled" && owner == "alerts"));

    let snapshot = store.snapshot().await;
    assert!(!snapshot.contains_key("rival_flag"));
    assert_eq!(snapshot["sub_alert_enabled"].owner, "alerts");
}

#[tokio::test]
async fn test_concurrent_writers_have_one_total_order() {
    const WRITERS: i64 = 16;
    let store = memory_store();
    store
        .register_flag(
            FeatureFlag::int("counter", "", 0),
            FlagPermission::ReadWrite,
            "owner",
        )
        .await
        .unwrap();
    let (_id, mut changes) = store.bus().subscribe_channel(Topic::flag("counter")).await;
    let start_version = store.version().await;

    let mut handles = Vec::new();
    for i in 1..=WRITERS {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .set_value("counter", FlagValue::Int(i), &format!("writer{}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut observed = Vec::new();
    while let Ok(change) = changes.try_recv() {
        observed.push(change);
    }
    assert_eq!(observed.len(), WRITERS as usize);

    // Every notification continues from the previous committed value
    assert_eq!(observed[0].old_value, FlagValue::Int(0));
    for pair in observed.windows(2) {
        assert_eq!(pair[1].old_value, pair[0].new_value);
    }
    let last = observed.last().unwrap().new_value.clone();
    assert_eq!(store.get_value("counter", "anyone").await.unwrap(), last);
    assert_eq!(store.version().await, start_version + WRITERS as u64);
}

#[tokio::test]
async fn test_failed_persist_leaves_value_unchanged() {
    let backend = Arc::new(FailingBackend::new());
    let store = store_over(backend.clone());
    store
        .register_flag(
            FeatureFlag::bool("chat_enabled", "", true),
            FlagPermission::ReadWrite,
            "chat",
        )
        .await
        .unwrap();
    let (_id, mut changes) = store.bus().subscribe_channel(Topic::All).await;

    backend.set_failing(true);
    let before = backend.attempts();
    let err = store
        .set_value("chat_enabled", FlagValue::Bool(false), "chat")
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::Persistence(_)));
    assert_eq!(backend.attempts() - before, fast_retry().max_attempts as usize);
    assert_eq!(
        store.get_value("chat_enabled", "chat").await.unwrap(),
        FlagValue::Bool(true)
    );
    assert!(changes.try_recv().is_err());

    backend.set_failing(false);
    store
        .set_value("chat_enabled", FlagValue::Bool(false), "chat")
        .await
        .unwrap();
    let saved = backend.saved().unwrap();
    assert_eq!(saved.flags["chat_enabled"].value, FlagValue::Bool(false));
    assert_eq!(changes.try_recv().unwrap().new_value, FlagValue::Bool(false));
}

#[tokio::test]
async fn test_failing_and_panicking_observers_are_isolated() {
    let store = store_with_alert_flags().await;
    let bus = store.bus();
    let healthy = Arc::new(AtomicUsize::new(0));

    bus.subscribe(Topic::All, |_| Err(anyhow::anyhow!("observer failed")))
        .await;
    bus.subscribe(Topic::flag("sub_alert_enabled"), |_| -> anyhow::Result<()> {
        panic!("observer panicked")
    })
    .await;
    let counter = Arc::clone(&healthy);
    bus.subscribe(Topic::All, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .await;

    store
        .set_value("sub_alert_enabled", FlagValue::Bool(true), "alerts")
        .await
        .unwrap();
    store
        .set_value("sub_alert_enabled", FlagValue::Bool(false), "alerts")
        .await
        .unwrap();

    assert_eq!(healthy.load(Ordering::SeqCst), 2);
    assert_eq!(
        store.get_value("sub_alert_enabled", "alerts").await.unwrap(),
        FlagValue::Bool(false)
    );
}

#[tokio::test]
async fn test_registration_adopts_persisted_value() {
    let mut file = FlagFile::default();
    file.version = 7;
    file.flags.insert(
        "sub_alert_enabled".to_string(),
        PersistedFlag {
            value: FlagValue::Bool(true),
            value_type: Some(FlagType::Bool),
            permission: FlagPermission::ReadWrite,
            owner: "alerts".to_string(),
            updated_at: 1,
            modified_by: Some("dashboard".to_string()),
            description: None,
        },
    );
    let store = Arc::new(
        FeatureFlagStore::open(
            Arc::new(MemoryFlagBackend::with_file(file)),
            Arc::new(ObserverBus::new()),
            fast_retry(),
        )
        .unwrap(),
    );
    assert_eq!(store.version().await, 7);
    assert_eq!(store.count_owned("alerts").await, 0);

    store
        .register_flag(
            FeatureFlag::bool("sub_alert_enabled", "", false),
            FlagPermission::ReadWrite,
            "alerts",
        )
        .await
        .unwrap();
    assert_eq!(store.count_owned("alerts").await, 1);
    assert_eq!(
        store.get_value("sub_alert_enabled", "alerts").await.unwrap(),
        FlagValue::Bool(true)
    );
}

#[tokio::test]
async fn test_builtin_modules_share_flags_through_host() {
    let dir = TempDir::new().unwrap();
    let host = ModuleHost::builder(test_config(dir.path()))
        .with_modules(builtin_modules())
        .init()
        .await
        .unwrap();

    host.manager().start("announcements").await.unwrap();
    assert_eq!(
        host.manager().state_of(alerts::NAME).await,
        Some(ModuleState::Active)
    );

    host.flags()
        .set_value(alerts::SUB_ALERT_ENABLED, FlagValue::Bool(true), "announcements")
        .await
        .unwrap();

    let content = std::fs::read_to_string(host.config().flags_path()).unwrap();
    let file = FlagFile::parse(&content).unwrap();
    let persisted = &file.flags[alerts::SUB_ALERT_ENABLED];
    assert_eq!(persisted.value, FlagValue::Bool(true));
    assert_eq!(persisted.owner, alerts::NAME);
    assert_eq!(persisted.modified_by.as_deref(), Some("announcements"));

    host.shutdown().await.unwrap();
}
