//! In-memory role directory

use super::{DirectoryRole, DirectoryScope, RoleDirectory, UserDirectory};
use crate::error::Result;
use crate::types::Record;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Role directory held in memory, for tests and offline setups
#[derive(Default)]
pub struct InMemoryDirectory {
    roles: RwLock<Vec<(DirectoryRole, Vec<DirectoryScope>)>>,
    users: RwLock<HashMap<String, Record>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role with its scopes (`"<action>:<entity>"`)
    pub fn with_role<I, S>(mut self, name: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = self.roles.get_mut();
        let role = DirectoryRole {
            id: format!("role-{}", roles.len() + 1),
            name: name.into(),
        };
        let scopes = scopes
            .into_iter()
            .map(|name| DirectoryScope { name: name.into() })
            .collect();
        roles.push((role, scopes));
        self
    }
}

#[async_trait]
impl RoleDirectory for InMemoryDirectory {
    async fn list_roles(&self) -> Result<Vec<DirectoryRole>> {
        let roles = self.roles.read().await;
        Ok(roles.iter().map(|(role, _)| role.clone()).collect())
    }

    async fn list_scopes(&self, role_id: &str) -> Result<Vec<DirectoryScope>> {
        let roles = self.roles.read().await;
        Ok(roles
            .iter()
            .find(|(role, _)| role.id == role_id)
            .map(|(_, scopes)| scopes.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn custom_data(&self, user_id: &str) -> Result<Record> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned().unwrap_or_default())
    }

    async fn set_custom_data(&self, user_id: &str, data: Record) -> Result<()> {
        let mut users = self.users.write().await;
        users.insert(user_id.to_string(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_roles_and_scopes() {
        let directory = InMemoryDirectory::new()
            .with_role("user", ["read:pages"])
            .with_role("Supercow", ["read:pages", "create:pages"]);

        let roles = directory.list_roles().await.unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1].name, "Supercow");

        let scopes = directory.list_scopes(&roles[1].id).await.unwrap();
        assert_eq!(scopes.len(), 2);
        assert!(directory.list_scopes("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_data_roundtrip() {
        let directory = InMemoryDirectory::new();
        assert!(directory.custom_data("u1").await.unwrap().is_empty());

        let data = json!({ "sessionVersion": 2 }).as_object().cloned().unwrap();
        directory.set_custom_data("u1", data.clone()).await.unwrap();
        assert_eq!(directory.custom_data("u1").await.unwrap(), data);
    }
}
