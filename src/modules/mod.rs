//! Built-in modules

pub mod alerts;
pub mod announcements;

use std::sync::Arc;

use crate::module::Module;

pub use alerts::AlertsModule;
pub use announcements::AnnouncementsModule;

/// Built-in modules in registration order
pub fn builtin_modules() -> Vec<Arc<dyn Module>> {
    vec![Arc::new(AlertsModule::new()), Arc::new(AnnouncementsModule)]
}
