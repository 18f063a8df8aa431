//! Requester-scoped handle over the flag store
//!
//! Each module receives a `FlagClient` bound to its own name, so every read
//! and write it makes is permission-checked as that module.

use std::sync::Arc;

use super::error::{FlagError, FlagResult};
use super::observer::{SubscriptionId, Topic};
use super::store::FeatureFlagStore;
use super::types::{FlagChange, FlagValue};

#[derive(Clone)]
pub struct FlagClient {
    store: Arc<FeatureFlagStore>,
    requester: String,
}

impl FlagClient {
    pub fn new(store: Arc<FeatureFlagStore>, requester: impl Into<String>) -> Self {
        Self {
            store,
            requester: requester.into(),
        }
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub async fn get(&self, name: &str) -> FlagResult<FlagValue> {
        self.store.get_value(name, &self.requester).await
    }

    pub async fn set(&self, name: &str, value: impl Into<FlagValue>) -> FlagResult<FlagChange> {
        self.store
            .set_value(name, value.into(), &self.requester)
            .await
    }

    pub async fn get_bool(&self, name: &str) -> FlagResult<bool> {
        let value = self.get(name).await?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", &value))
    }

    pub async fn get_int(&self, name: &str) -> FlagResult<i64> {
        let value = self.get(name).await?;
        value.as_int().ok_or_else(|| mismatch(name, "int", &value))
    }

    /// String or enum value
    pub async fn get_string(&self, name: &str) -> FlagResult<String> {
        let value = self.get(name).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(name, "string", &value))
    }

    /// Subscribe to changes of one flag
    ///
    /// Requires read access to the flag.
    pub async fn subscribe<F>(&self, name: &str, callback: F) -> FlagResult<SubscriptionId>
    where
        F: Fn(&FlagChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.store.get_entry(name, &self.requester).await?;
        Ok(self.store.bus().subscribe(Topic::flag(name), callback).await)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.bus().unsubscribe(id).await
    }
}

impl std::fmt::Debug for FlagClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagClient")
            .field("requester", &self.requester)
            .finish_non_exhaustive()
    }
}

fn mismatch(name: &str, expected: &str, value: &FlagValue) -> FlagError {
    FlagError::TypeMismatch {
        flag: name.to_string(),
        expected: expected.to_string(),
        actual: value.kind().to_string(),
    }
}
