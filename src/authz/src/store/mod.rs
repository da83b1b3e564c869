//! Data-mapping layer interface
//!
//! Entities expose find/save/insert/delete/updateMany. A [`HookRegistry`]
//! lets callers replace an entity's operations with a decorator that wraps
//! the original ones.

mod memory;

pub use memory::{InMemoryDatabase, MemoryTable};

use crate::error::Result;
use crate::types::{EntityMeta, EntityRegistry, Record, RequestContext, Where};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<Where>,
    pub fields: Option<Vec<String>>,
    pub ctx: Option<Arc<RequestContext>>,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub input: Record,
    pub fields: Option<Vec<String>>,
    pub ctx: Option<Arc<RequestContext>>,
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub inputs: Vec<Record>,
    pub fields: Option<Vec<String>>,
    pub ctx: Option<Arc<RequestContext>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub filter: Option<Where>,
    pub fields: Option<Vec<String>>,
    pub ctx: Option<Arc<RequestContext>>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateManyOptions {
    pub filter: Option<Where>,
    pub input: Record,
    pub fields: Option<Vec<String>>,
    pub ctx: Option<Arc<RequestContext>>,
}

/// Operations of one entity.
///
/// A `None` context marks a trusted internal call.
#[async_trait]
pub trait EntityOperations: Send + Sync {
    /// Entity metadata
    fn meta(&self) -> &EntityMeta;

    /// Rows matching the filter
    async fn find(&self, opts: FindOptions) -> Result<Vec<Record>>;

    /// Update the row identified by the primary key in `input`, or create one
    async fn save(&self, opts: SaveOptions) -> Result<Record>;

    /// Create several rows
    async fn insert(&self, opts: InsertOptions) -> Result<Vec<Record>>;

    /// Delete matching rows, returning them
    async fn delete(&self, opts: DeleteOptions) -> Result<Vec<Record>>;

    /// Apply `input` to matching rows, returning the updated rows
    async fn update_many(&self, opts: UpdateManyOptions) -> Result<Vec<Record>>;
}

/// Wraps the original operations of an entity
pub type EntityHook = Box<dyn FnOnce(Arc<dyn EntityOperations>) -> Arc<dyn EntityOperations> + Send>;

/// Registration point for entity decorators
pub trait HookRegistry {
    /// Entities known to the layer
    fn registry(&self) -> &EntityRegistry;

    /// Replace the operations of `entity` with `hook(original)`
    fn add_entity_hooks(&mut self, entity: &str, hook: EntityHook) -> Result<()>;
}
