//! Core types shared by the authorization pipeline

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;

/// A row as seen by the data-mapping layer (column name -> value)
pub type Record = serde_json::Map<String, Value>;

/// Operator -> operand for one column (e.g. `{"eq": 42}`)
pub type Condition = BTreeMap<String, Value>;

/// Data-access filter: column -> condition, all columns AND-ed
pub type Where = BTreeMap<String, Condition>;

/// Build a single-operator condition
pub fn condition(op: impl Into<String>, value: Value) -> Condition {
    let mut condition = Condition::new();
    condition.insert(op.into(), value);
    condition
}

/// Resolved caller identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Caller roles in priority order
    pub roles: Vec<String>,

    /// Opaque attributes (user id, claims, headers)
    #[serde(default)]
    pub attributes: Record,
}

impl Identity {
    /// Create an identity from its parts
    pub fn new(roles: Vec<String>, attributes: Record) -> Self {
        Self { roles, attributes }
    }

    /// Look up an attribute, falling back to an ASCII case-insensitive match
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        lookup_ignore_case(&self.attributes, key)
    }

    /// Attribute value or `null` when the caller does not carry it
    pub fn attribute_or_null(&self, key: &str) -> Value {
        self.attribute(key).cloned().unwrap_or(Value::Null)
    }
}

pub(crate) fn lookup_ignore_case<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    record.get(key).or_else(|| {
        record
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Per-request context threaded through every intercepted operation.
///
/// Internal calls pass no context at all and bypass authorization.
#[derive(Debug, Default)]
pub struct RequestContext {
    headers: HeaderMap,
    identity: OnceCell<Identity>,
}

impl RequestContext {
    /// Create a context from the incoming request headers
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            identity: OnceCell::new(),
        }
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as UTF-8, names are matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Identity, if it has already been resolved for this request
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub(crate) fn identity_cell(&self) -> &OnceCell<Identity> {
        &self.identity
    }
}

/// Field metadata exposed by the data-mapping layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Field name as used in filters and payloads
    pub name: String,

    /// Whether the column accepts null
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Whether the column is the primary key
    #[serde(default, rename = "primaryKey", alias = "primary_key")]
    pub primary_key: bool,
}

fn default_true() -> bool {
    true
}

impl FieldMeta {
    /// Nullable, non-key field
    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            primary_key: false,
        }
    }

    /// Non-nullable, non-key field
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            primary_key: false,
        }
    }

    /// Primary key field
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            primary_key: true,
        }
    }
}

/// Entity metadata (read-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Entity name
    pub name: String,

    /// Fields in declaration order
    pub fields: Vec<FieldMeta>,
}

impl EntityMeta {
    /// Create entity metadata
    pub fn new(name: impl Into<String>, fields: Vec<FieldMeta>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Name of the primary key field (`id` when none is flagged)
    pub fn primary_key(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .unwrap_or("id")
    }

    /// All field names in declaration order
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Non-nullable, non-primary-key fields
    pub fn mandatory_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| !f.nullable && !f.primary_key)
            .map(|f| f.name.as_str())
    }
}

/// Ordered set of entity metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRegistry {
    entities: Vec<EntityMeta>,
}

impl EntityRegistry {
    /// Create a registry preserving the given order
    pub fn new(entities: Vec<EntityMeta>) -> Self {
        Self { entities }
    }

    /// Metadata for an entity
    pub fn get(&self, name: &str) -> Option<&EntityMeta> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Whether the entity exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entity names in registry order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    /// Iterate over entity metadata
    pub fn iter(&self) -> impl Iterator<Item = &EntityMeta> {
        self.entities.iter()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
