//! Periodic channel announcements, gated on the alerts module

use async_trait::async_trait;
use tracing::info;

use super::alerts;
use crate::flags::{FeatureFlag, FlagDeclaration, FlagPermission};
use crate::module::{CommandDefinition, Module, ModuleContext, ModuleDefaults};

pub const NAME: &str = "announcements";
pub const INTERVAL_SECS: &str = "announcement_interval_secs";
pub const MESSAGE: &str = "announcement_message";

pub struct AnnouncementsModule;

#[async_trait]
impl Module for AnnouncementsModule {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Repeats a configured message on an interval"
    }

    fn dependencies(&self) -> Vec<String> {
        vec![alerts::NAME.to_string()]
    }

    fn defaults(&self) -> ModuleDefaults {
        ModuleDefaults {
            enabled_by_default: true,
            auto_start: false,
        }
    }

    fn declare_flags(&self) -> Vec<FlagDeclaration> {
        vec![
            FlagDeclaration::new(
                FeatureFlag::int(INTERVAL_SECS, "Seconds between announcements", 300),
                FlagPermission::ReadWrite,
            ),
            FlagDeclaration::new(
                FeatureFlag::string(MESSAGE, "Announcement text", "Thanks for watching!"),
                FlagPermission::ReadWrite,
            ),
        ]
    }

    fn declare_commands(&self) -> Vec<CommandDefinition> {
        vec![CommandDefinition::new("announce", "Show the current announcement", |_| {
            Ok(Some("Announcement queued".to_string()))
        })]
    }

    async fn start(&self, context: ModuleContext) -> anyhow::Result<()> {
        let interval = context.flags.get_int(INTERVAL_SECS).await?;
        if interval <= 0 {
            anyhow::bail!("{} must be positive, got {}", INTERVAL_SECS, interval);
        }
        let message = context.flags.get_string(MESSAGE).await?;
        // Cross-module read; alerts shares this flag read-write
        let subs = context.flags.get_bool(alerts::SUB_ALERT_ENABLED).await?;
        let channel = context.get_config_or("channel", "default");

        info!(
            "Announcing {:?} to {} every {}s (sub alerts: {})",
            message, channel, interval, subs
        );
        Ok(())
    }

    async fn stop(&self, _context: ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}
