//! Rule definitions
//!
//! A [`Rule`] binds one role to one entity. Each data action carries an
//! [`ActionRule`] that either forbids it, allows it outright, allows it
//! under a field allowlist and ownership checks, or delegates the row
//! filter to caller-supplied code.

use crate::error::Result;
use crate::types::{Identity, Record, RequestContext, Where};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Data action governed by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read rows
    Find,
    /// Create or update single rows, batch inserts
    Save,
    /// Delete rows matching a filter
    Delete,
    /// Update rows matching a filter
    UpdateMany,
}

impl Action {
    /// All actions in rule order
    pub const ALL: [Action; 4] = [Action::Find, Action::Save, Action::Delete, Action::UpdateMany];

    /// Map an identity-provider scope action onto an action.
    ///
    /// `create`, `read` and `update` are the provider vocabulary; the
    /// internal names are accepted as-is.
    pub fn from_scope(token: &str) -> Option<Self> {
        match token {
            "create" | "save" => Some(Self::Save),
            "read" | "find" => Some(Self::Find),
            "update" | "updateMany" => Some(Self::UpdateMany),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Internal action name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Save => "save",
            Self::Delete => "delete",
            Self::UpdateMany => "updateMany",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership check for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckSpec {
    /// `column = caller[attribute]`
    Attribute(String),
    /// `column <op> caller[attribute]` for every operator
    Operators(BTreeMap<String, String>),
}

/// Field allowlist and ownership checks for an allowed action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    /// Allowed fields; `None` allows every field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,

    /// Column -> caller attribute predicates injected into filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<BTreeMap<String, CheckSpec>>,
}

impl ActionPolicy {
    /// Policy with a single equality check
    pub fn owned_by(column: impl Into<String>, attribute: impl Into<String>) -> Self {
        let mut checks = BTreeMap::new();
        checks.insert(column.into(), CheckSpec::Attribute(attribute.into()));
        Self {
            fields: None,
            checks: Some(checks),
        }
    }

    /// Restrict the policy to a field allowlist
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Caller-supplied row filter derivation
#[async_trait]
pub trait CustomFilter: Send + Sync {
    /// Produce the filter to use instead of `existing`
    async fn filter(&self, identity: &Identity, ctx: &RequestContext, existing: Where) -> Result<Where>;
}

#[async_trait]
impl<F> CustomFilter for F
where
    F: Fn(&Identity, &RequestContext, Where) -> Result<Where> + Send + Sync,
{
    async fn filter(&self, identity: &Identity, ctx: &RequestContext, existing: Where) -> Result<Where> {
        (self)(identity, ctx, existing)
    }
}

/// Permission for one action
#[derive(Clone, Default)]
pub enum ActionRule {
    /// Action not allowed
    #[default]
    Forbidden,
    /// Action allowed without restrictions
    AllowAll,
    /// Action allowed under a field allowlist and/or ownership checks
    Policy(ActionPolicy),
    /// Action allowed, row filter derived by custom code
    Custom(Arc<dyn CustomFilter>),
}

impl ActionRule {
    /// `AllowAll` for `true`, `Forbidden` for `false`
    pub fn flag(allowed: bool) -> Self {
        if allowed {
            Self::AllowAll
        } else {
            Self::Forbidden
        }
    }

    /// Wrap a closure as a custom filter
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Identity, &RequestContext, Where) -> Result<Where> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Whether the action is allowed in some form
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Forbidden)
    }

    /// Field allowlist, when the action has one
    pub fn fields(&self) -> Option<&[String]> {
        match self {
            Self::Policy(policy) => policy.fields.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Debug for ActionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden => f.write_str("Forbidden"),
            Self::AllowAll => f.write_str("AllowAll"),
            Self::Policy(policy) => f.debug_tuple("Policy").field(policy).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for ActionRule {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Forbidden, Self::Forbidden) | (Self::AllowAll, Self::AllowAll) => true,
            (Self::Policy(a), Self::Policy(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for ActionRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Forbidden => serializer.serialize_bool(false),
            Self::AllowAll => serializer.serialize_bool(true),
            Self::Policy(policy) => policy.serialize(serializer),
            Self::Custom(_) => serializer.serialize_str("<custom>"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawActionRule {
    Flag(bool),
    Policy(ActionPolicy),
}

impl<'de> Deserialize<'de> for ActionRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match RawActionRule::deserialize(deserializer)? {
            RawActionRule::Flag(allowed) => Self::flag(allowed),
            RawActionRule::Policy(policy) => Self::Policy(policy),
        })
    }
}

/// Arguments handed to a default value provider
pub struct DefaultContext<'a> {
    pub identity: &'a Identity,
    pub ctx: &'a RequestContext,
    pub input: &'a Record,
}

/// Caller-supplied default value for a write payload field
#[async_trait]
pub trait DefaultProvider: Send + Sync {
    async fn default_value(&self, args: DefaultContext<'_>) -> Result<Value>;
}

#[async_trait]
impl<F> DefaultProvider for F
where
    F: for<'a> Fn(&DefaultContext<'a>) -> Result<Value> + Send + Sync,
{
    async fn default_value(&self, args: DefaultContext<'_>) -> Result<Value> {
        (self)(&args)
    }
}

/// Source of an auto-populated payload field
#[derive(Clone)]
pub enum DefaultValue {
    /// Copy the caller attribute with this key
    Attribute(String),
    /// Compute the value
    Custom(Arc<dyn DefaultProvider>),
}

impl DefaultValue {
    /// Wrap a closure as a default provider
    pub fn custom<F>(f: F) -> Self
    where
        F: for<'a> Fn(&DefaultContext<'a>) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(key) => f.debug_tuple("Attribute").field(key).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for DefaultValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Attribute(a), Self::Attribute(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for DefaultValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Attribute(key) => serializer.serialize_str(key),
            Self::Custom(_) => serializer.serialize_str("<custom>"),
        }
    }
}

impl<'de> Deserialize<'de> for DefaultValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::Attribute)
    }
}

/// Authorization rule for one role on one (or, before expansion, several) entities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Role name, matched exactly
    pub role: String,

    /// Governed entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    /// Shorthand for several entities, expanded when the table is built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,

    #[serde(default)]
    pub find: ActionRule,

    #[serde(default)]
    pub save: ActionRule,

    #[serde(default)]
    pub delete: ActionRule,

    #[serde(default, rename = "updateMany", alias = "update_many")]
    pub update_many: ActionRule,

    /// Field -> value source stamped into write payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<BTreeMap<String, DefaultValue>>,
}

impl Rule {
    /// Rule for a single entity with every action forbidden
    pub fn new(role: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            entity: Some(entity.into()),
            ..Default::default()
        }
    }

    /// Rule covering several entities with every action forbidden
    pub fn for_entities<I, S>(role: impl Into<String>, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            entities: Some(entities.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Permission for an action
    pub fn action(&self, action: Action) -> &ActionRule {
        match action {
            Action::Find => &self.find,
            Action::Save => &self.save,
            Action::Delete => &self.delete,
            Action::UpdateMany => &self.update_many,
        }
    }

    /// Replace the permission for an action
    pub fn set_action(&mut self, action: Action, value: ActionRule) {
        match action {
            Action::Find => self.find = value,
            Action::Save => self.save = value,
            Action::Delete => self.delete = value,
            Action::UpdateMany => self.update_many = value,
        }
    }

    /// Builder form of [`Rule::set_action`]
    pub fn with(mut self, action: Action, value: ActionRule) -> Self {
        self.set_action(action, value);
        self
    }

    /// Builder for a single default field
    pub fn with_default(mut self, field: impl Into<String>, value: DefaultValue) -> Self {
        self.defaults
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), value);
        self
    }

    /// Copy of this rule bound to a single entity
    pub fn bound_to(&self, entity: &str) -> Self {
        Self {
            entity: Some(entity.to_string()),
            entities: None,
            ..self.clone()
        }
    }

    /// Entities named by the rule, `entity` taking precedence
    pub fn target_entities(&self) -> Option<Vec<String>> {
        match (&self.entity, &self.entities) {
            (Some(entity), _) => Some(vec![entity.clone()]),
            (None, Some(entities)) => Some(entities.clone()),
            (None, None) => None,
        }
    }

    /// One-line JSON summary of the permissions, for logs
    pub fn summary(&self) -> String {
        let mut summary = serde_json::Map::new();
        for action in Action::ALL {
            let value = self.action(action);
            if value.is_allowed() {
                summary.insert(
                    action.as_str().to_string(),
                    serde_json::to_value(value).unwrap_or(Value::Null),
                );
            }
        }
        if let Some(defaults) = &self.defaults {
            summary.insert(
                "defaults".to_string(),
                serde_json::to_value(defaults).unwrap_or(Value::Null),
            );
        }
        Value::Object(summary).to_string()
    }
}
