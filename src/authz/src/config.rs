//! Configuration loading

use crate::compiler::CompilerOptions;
use crate::directory::LogtoConfig;
use crate::identity::IdentityConfig;
use crate::rule::Rule;
use crate::types::{EntityMeta, EntityRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub directory: LogtoConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub rules: RulesSection,

    #[serde(default)]
    pub server: ServerSection,

    /// Entities served by the bundled in-memory store
    #[serde(default)]
    pub entities: Vec<EntityMeta>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesSection {
    #[serde(default)]
    pub allow_anonymous: bool,
    #[serde(default)]
    pub checks: bool,
    #[serde(default)]
    pub defaults: bool,
    #[serde(default = "default_owner_column")]
    pub owner_column: String,

    /// Rules appended after the directory rules
    #[serde(default, rename = "static")]
    pub static_rules: Vec<Rule>,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            checks: false,
            defaults: false,
            owner_column: default_owner_column(),
            static_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

fn default_owner_column() -> String { "userId".to_string() }
fn default_listen() -> String { "0.0.0.0:3042".to_string() }

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read configuration file {}", path.as_ref().display()))?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)
            .context("Failed to parse configuration file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.identity.admin_secret.as_deref() == Some("") {
            anyhow::bail!("identity.admin_secret must not be empty when set");
        }

        // Trusted headers are flat, a nested role path would never match.
        if self.identity.trust_headers && self.identity.role_path.is_some() {
            anyhow::bail!("identity.role_path cannot be combined with identity.trust_headers");
        }

        for entity in &self.entities {
            if entity.fields.is_empty() {
                anyhow::bail!("entity '{}' declares no fields", entity.name);
            }
        }

        Ok(())
    }

    /// Compiler settings derived from the rules and identity sections
    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            allow_anonymous: self.rules.allow_anonymous,
            checks: self.rules.checks,
            defaults: self.rules.defaults,
            anonymous_role: self.identity.anonymous_role.clone(),
            user_key: self.identity.user_key.clone(),
            owner_column: self.rules.owner_column.clone(),
        }
    }

    /// Registry of the configured entities
    pub fn registry(&self) -> EntityRegistry {
        EntityRegistry::new(self.entities.clone())
    }
}
