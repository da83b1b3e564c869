//! Identity provider access
//!
//! The rule compiler only needs the role list and the scopes granted to each
//! role; [`RoleDirectory`] is that seam. [`UserDirectory`] covers the user
//! custom data used by permission versioning.

mod logto;
mod memory;

pub use logto::{LogtoConfig, LogtoDirectory};
pub use memory::InMemoryDirectory;

use crate::error::Result;
use crate::types::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role as listed by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRole {
    pub id: String,
    pub name: String,
}

/// Scope (`<action>:<entity>`) granted to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryScope {
    pub name: String,
}

impl DirectoryScope {
    /// Split into `(action, entity)`; `None` when there is no `:`
    pub fn split(&self) -> Option<(&str, &str)> {
        self.name.split_once(':')
    }
}

/// Read access to roles and their scopes
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// User roles
    async fn list_roles(&self) -> Result<Vec<DirectoryRole>>;

    /// Scopes granted to a role
    async fn list_scopes(&self, role_id: &str) -> Result<Vec<DirectoryScope>>;
}

/// Per-user custom data storage
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Custom data of a user (empty when none)
    async fn custom_data(&self, user_id: &str) -> Result<Record>;

    /// Replace the custom data of a user
    async fn set_custom_data(&self, user_id: &str, data: Record) -> Result<()>;
}
