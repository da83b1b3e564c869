//! Caller identity resolution and the admin-secret bootstrap

use crate::error::Result;
use crate::types::{lookup_ignore_case, Identity, Record, RequestContext};
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed role granted by the admin secret
pub const ADMIN_ROLE: &str = "rowgate-admin";

/// Extracts the caller's attributes from a request (tokens, sessions).
///
/// Returning `Ok(None)` means the request carries no user at all.
#[async_trait]
pub trait UserExtractor: Send + Sync {
    async fn extract_user(&self, ctx: &RequestContext) -> Result<Option<Record>>;
}

/// Extractor for deployments without token-based authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUser;

#[async_trait]
impl UserExtractor for NoUser {
    async fn extract_user(&self, _ctx: &RequestContext) -> Result<Option<Record>> {
        Ok(None)
    }
}

/// Reads the role and user-id headers as set by an authenticating proxy
#[derive(Debug, Clone)]
pub struct TrustedHeaders {
    role_key: String,
    user_key: String,
}

impl TrustedHeaders {
    pub fn new(role_key: impl Into<String>, user_key: impl Into<String>) -> Self {
        Self {
            role_key: role_key.into(),
            user_key: user_key.into(),
        }
    }
}

#[async_trait]
impl UserExtractor for TrustedHeaders {
    async fn extract_user(&self, ctx: &RequestContext) -> Result<Option<Record>> {
        let mut user = Record::new();
        for key in [&self.role_key, &self.user_key] {
            if let Some(value) = ctx.header(key) {
                user.insert(key.clone(), Value::String(value.to_string()));
            }
        }
        Ok((!user.is_empty()).then_some(user))
    }
}

/// Identity resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Attribute (or header) holding the caller roles
    pub role_key: String,

    /// Dotted path to the roles inside nested attributes, overrides `role_key`
    pub role_path: Option<String>,

    /// Attribute (or header) holding the caller user id
    pub user_key: String,

    /// Role assigned to callers without roles
    pub anonymous_role: String,

    /// Shared secret granting the administrator role
    pub admin_secret: Option<String>,

    /// Header carrying the admin secret
    pub admin_secret_header: String,

    /// Whether callers authenticate with tokens
    pub require_token: bool,

    /// Whether role/user headers are trusted as identity (server only)
    pub trust_headers: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            role_key: "X-ROWGATE-ROLE".to_string(),
            role_path: None,
            user_key: "X-ROWGATE-USER-ID".to_string(),
            anonymous_role: "anonymous".to_string(),
            admin_secret: None,
            admin_secret_header: "x-rowgate-admin-secret".to_string(),
            require_token: false,
            trust_headers: false,
        }
    }
}

impl IdentityConfig {
    /// Key (or dotted path) the roles are read from
    pub fn role_attribute(&self) -> &str {
        self.role_path.as_deref().unwrap_or(&self.role_key)
    }
}

/// Resolves the caller identity once per request
pub struct IdentityResolver {
    config: IdentityConfig,
    extractor: Arc<dyn UserExtractor>,
}

impl IdentityResolver {
    pub fn new(config: IdentityConfig, extractor: Arc<dyn UserExtractor>) -> Self {
        Self { config, extractor }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Resolve the caller; repeated calls for one request reuse the first result
    pub async fn resolve<'c>(&self, ctx: &'c RequestContext) -> Result<&'c Identity> {
        ctx.identity_cell()
            .get_or_try_init(|| self.resolve_uncached(ctx))
            .await
    }

    async fn resolve_uncached(&self, ctx: &RequestContext) -> Result<Identity> {
        let user = self.extractor.extract_user(ctx).await?;

        let attributes = if self.admin_secret_matches(ctx) {
            if self.config.require_token {
                // Only the role is replaced, the administrator role wins over any role claim.
                let mut attributes = user.unwrap_or_default();
                set_path(&mut attributes, self.config.role_attribute(), Value::String(ADMIN_ROLE.to_string()));
                attributes
            } else {
                info!("admin secret is valid");
                self.admin_header_view(ctx.headers())
            }
        } else {
            user.unwrap_or_default()
        };

        let identity = Identity::new(self.roles(&attributes), attributes);
        debug!(roles = ?identity.roles, "resolved caller identity");
        Ok(identity)
    }

    fn admin_secret_matches(&self, ctx: &RequestContext) -> bool {
        match &self.config.admin_secret {
            Some(secret) => ctx.header(&self.config.admin_secret_header) == Some(secret.as_str()),
            None => false,
        }
    }

    fn admin_header_view(&self, headers: &HeaderMap) -> Record {
        let mut attributes = header_attributes(headers);
        let role_key = self.config.role_attribute();
        let has_role = matches!(get_path(&attributes, role_key), Some(Value::String(s)) if !s.is_empty());
        if !has_role {
            set_path(
                &mut attributes,
                &role_key.to_ascii_lowercase(),
                Value::String(ADMIN_ROLE.to_string()),
            );
        }
        attributes
    }

    /// Caller roles from resolved attributes.
    ///
    /// A string is split on `,`, an array is taken element-wise; no roles
    /// at all means the anonymous role.
    pub fn roles(&self, attributes: &Record) -> Vec<String> {
        let roles: Vec<String> = match get_path(attributes, self.config.role_attribute()) {
            Some(Value::String(raw)) => raw
                .split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        if roles.is_empty() {
            vec![self.config.anonymous_role.clone()]
        } else {
            roles
        }
    }
}

/// Request headers as attributes, names lower-cased
pub fn header_attributes(headers: &HeaderMap) -> Record {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), Value::String(v.to_string())))
        })
        .collect()
}

fn get_path<'a>(attributes: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(value) = lookup_ignore_case(attributes, path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = lookup_ignore_case(attributes, segments.next()?)?;
    for segment in segments {
        current = lookup_ignore_case(current.as_object()?, segment)?;
    }
    Some(current)
}

fn set_path(attributes: &mut Record, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = attributes;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Record::new()));
        if !entry.is_object() {
            *entry = Value::Object(Record::new());
        }
        current = match entry.as_object_mut() {
            Some(object) => object,
            None => return,
        };
    }

    // Drop differently-cased spellings so lookups cannot find a stale role.
    let stale: Vec<String> = current
        .keys()
        .filter(|k| k.eq_ignore_ascii_case(last) && k.as_str() != *last)
        .cloned()
        .collect();
    for key in stale {
        current.remove(&key);
    }
    current.insert(last.to_string(), value);
}
