//! Subscription alerts
//!
//! Owns the alert flags other modules consult before firing anything
//! subscriber-facing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::flags::{FeatureFlag, FlagDeclaration, FlagPermission, SubscriptionId};
use crate::module::{
    CommandDefinition, Module, ModuleContext, ModuleSchema, TableDefinition,
};

pub const NAME: &str = "alerts";
pub const SUB_ALERT_ENABLED: &str = "sub_alert_enabled";
pub const ALERT_VOLUME: &str = "alert_volume";
pub const ALERT_STYLE: &str = "alert_style";

#[derive(Default)]
pub struct AlertsModule {
    running: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl AlertsModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Module for AlertsModule {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Subscriber alerts with configurable volume and style"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn declare_flags(&self) -> Vec<FlagDeclaration> {
        vec![
            FlagDeclaration::new(
                FeatureFlag::bool(SUB_ALERT_ENABLED, "Fire alerts for new subscriptions", false),
                FlagPermission::ReadWrite,
            ),
            FlagDeclaration::new(
                FeatureFlag::int(ALERT_VOLUME, "Alert volume (0-100)", 50),
                FlagPermission::ReadOnly,
            ),
            FlagDeclaration::new(
                FeatureFlag::enumeration(ALERT_STYLE, "Alert sound", &["chime", "siren", "none"], "chime"),
                FlagPermission::OwnerOnly,
            ),
        ]
    }

    fn declare_schema(&self) -> Option<ModuleSchema> {
        Some(ModuleSchema {
            tables: vec![TableDefinition::new(
                "alert_log",
                &["id INTEGER PRIMARY KEY", "user TEXT NOT NULL", "fired_at INTEGER NOT NULL"],
            )],
            indexes: vec!["CREATE INDEX alert_log_user ON alert_log(user)".to_string()],
        })
    }

    fn declare_commands(&self) -> Vec<CommandDefinition> {
        let running = Arc::clone(&self.running);
        let fired = Arc::clone(&self.fired);
        vec![CommandDefinition::new("alert", "Fire a test alert", move |invocation| {
            if !running.load(Ordering::SeqCst) {
                anyhow::bail!("alerts module is not running");
            }
            let count = fired.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(format!("Alert #{} fired by {}", count, invocation.invoker)))
        })
        .with_aliases(&["testalert"])
        .with_permission("moderator")
        .with_cooldown(std::time::Duration::from_secs(5))]
    }

    async fn start(&self, context: ModuleContext) -> anyhow::Result<()> {
        let enabled = context.flags.get_bool(SUB_ALERT_ENABLED).await?;
        let volume = context.flags.get_int(ALERT_VOLUME).await?;
        let style = context.flags.get_string(ALERT_STYLE).await?;

        let id = context
            .flags
            .subscribe(SUB_ALERT_ENABLED, |change| {
                debug!("Sub alerts toggled {} -> {}", change.old_value, change.new_value);
                Ok(())
            })
            .await?;
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(id);
        }

        self.running.store(true, Ordering::SeqCst);
        info!(
            "Alerts running (sub alerts: {}, volume: {}, style: {})",
            enabled, volume, style
        );
        Ok(())
    }

    async fn stop(&self, context: ModuleContext) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let id = self.subscription.lock().ok().and_then(|mut slot| slot.take());
        if let Some(id) = id {
            context.flags.unsubscribe(id).await;
        }
        Ok(())
    }
}
