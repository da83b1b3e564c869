//! Permissions version tracking
//!
//! Sessions embed the permissions version they were issued under; bumping
//! it invalidates them. The version lives in the user's custom data and is
//! mirrored into a fast cache under `permissions:version:<user>`.

use crate::directory::UserDirectory;
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const VERSION_FIELD: &str = "sessionVersion";

/// Cache key for a user's version
pub fn version_key(user_id: &str) -> String {
    format!("permissions:version:{}", user_id)
}

/// Key/value store mirroring permission versions
#[async_trait]
pub trait VersionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local version cache
#[derive(Debug, Default)]
pub struct InMemoryVersionCache {
    entries: DashMap<String, String>,
}

impl InMemoryVersionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionCache for InMemoryVersionCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Bumps and clears per-user permission versions
pub struct PermissionsVersions {
    users: Arc<dyn UserDirectory>,
    cache: Option<Arc<dyn VersionCache>>,
}

impl PermissionsVersions {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn VersionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Increment the version of a user, returning the new value
    pub async fn increment(&self, user_id: &str) -> Result<u64> {
        let mut data = self.users.custom_data(user_id).await?;
        let version = data.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0) + 1;
        data.insert(VERSION_FIELD.to_string(), Value::from(version));
        self.users.set_custom_data(user_id, data).await?;

        if let Some(cache) = &self.cache {
            cache.set(&version_key(user_id), &version.to_string()).await?;
        }

        debug!(user_id, version, "bumped permissions version");
        Ok(version)
    }

    /// Drop the cached version of a user
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| AuthzError::Config("version cache not configured".to_string()))?;
        cache.delete(&version_key(user_id)).await
    }
}
