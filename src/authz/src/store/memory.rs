//! In-memory data-mapping layer

use super::{
    DeleteOptions, EntityHook, EntityOperations, FindOptions, HookRegistry, InsertOptions,
    SaveOptions, UpdateManyOptions,
};
use crate::error::{AuthzError, Result};
use crate::types::{EntityMeta, EntityRegistry, Record, Where};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<Record>,
    next_id: i64,
}

impl TableState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// One entity's rows, primary keys assigned from an integer sequence
pub struct MemoryTable {
    meta: EntityMeta,
    state: RwLock<TableState>,
}

impl MemoryTable {
    pub fn new(meta: EntityMeta) -> Self {
        Self {
            meta,
            state: RwLock::new(TableState::default()),
        }
    }

    fn insert_row(&self, state: &mut TableState, mut input: Record) -> Record {
        let pk = self.meta.primary_key();
        match input.get(pk).and_then(Value::as_i64) {
            Some(id) => state.next_id = state.next_id.max(id),
            None => {
                let id = state.allocate_id();
                input.insert(pk.to_string(), Value::from(id));
            }
        }
        state.rows.push(input.clone());
        input
    }
}

#[async_trait]
impl EntityOperations for MemoryTable {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    async fn find(&self, opts: FindOptions) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        let mut found = Vec::new();
        for row in &state.rows {
            if matches(row, opts.filter.as_ref())? {
                found.push(project(row, opts.fields.as_deref()));
            }
        }
        trace!(entity = %self.meta.name, rows = found.len(), "find");
        Ok(found)
    }

    async fn save(&self, opts: SaveOptions) -> Result<Record> {
        let pk = self.meta.primary_key();
        let mut state = self.state.write().await;

        let key = opts.input.get(pk).filter(|v| !v.is_null()).cloned();
        let saved = match key {
            Some(key) => {
                let row = state
                    .rows
                    .iter_mut()
                    .find(|row| row.get(pk).is_some_and(|v| loose_eq(v, &key)))
                    .ok_or_else(|| AuthzError::EntityNotFound(format!("{} {}", self.meta.name, key)))?;
                row.extend(opts.input);
                row.clone()
            }
            None => self.insert_row(&mut state, opts.input),
        };

        Ok(project(&saved, opts.fields.as_deref()))
    }

    async fn insert(&self, opts: InsertOptions) -> Result<Vec<Record>> {
        let mut state = self.state.write().await;
        Ok(opts
            .inputs
            .into_iter()
            .map(|input| {
                let row = self.insert_row(&mut state, input);
                project(&row, opts.fields.as_deref())
            })
            .collect())
    }

    async fn delete(&self, opts: DeleteOptions) -> Result<Vec<Record>> {
        let mut state = self.state.write().await;
        let hits = state
            .rows
            .iter()
            .map(|row| matches(row, opts.filter.as_ref()))
            .collect::<Result<Vec<bool>>>()?;

        let mut deleted = Vec::new();
        let mut hits = hits.into_iter();
        state.rows.retain(|row| {
            let hit = hits.next().unwrap_or(false);
            if hit {
                deleted.push(project(row, opts.fields.as_deref()));
            }
            !hit
        });
        Ok(deleted)
    }

    async fn update_many(&self, opts: UpdateManyOptions) -> Result<Vec<Record>> {
        let mut state = self.state.write().await;
        let hits = state
            .rows
            .iter()
            .map(|row| matches(row, opts.filter.as_ref()))
            .collect::<Result<Vec<bool>>>()?;

        let mut updated = Vec::new();
        for (row, hit) in state.rows.iter_mut().zip(hits) {
            if hit {
                row.extend(opts.input.clone());
                updated.push(project(row, opts.fields.as_deref()));
            }
        }
        Ok(updated)
    }
}

/// Entities held in memory, with hook registration
pub struct InMemoryDatabase {
    registry: EntityRegistry,
    entities: HashMap<String, Arc<dyn EntityOperations>>,
}

impl InMemoryDatabase {
    pub fn new(registry: EntityRegistry) -> Self {
        let entities = registry
            .iter()
            .map(|meta| {
                let table: Arc<dyn EntityOperations> = Arc::new(MemoryTable::new(meta.clone()));
                (meta.name.clone(), table)
            })
            .collect();
        Self { registry, entities }
    }

    /// Current (possibly decorated) operations of an entity
    pub fn entity(&self, name: &str) -> Option<Arc<dyn EntityOperations>> {
        self.entities.get(name).cloned()
    }
}

impl HookRegistry for InMemoryDatabase {
    fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    fn add_entity_hooks(&mut self, entity: &str, hook: EntityHook) -> Result<()> {
        let original = self
            .entities
            .remove(entity)
            .ok_or_else(|| AuthzError::EntityNotFound(entity.to_string()))?;
        self.entities.insert(entity.to_string(), hook(original));
        Ok(())
    }
}

fn project(row: &Record, fields: Option<&[String]>) -> Record {
    match fields {
        Some(fields) if !fields.is_empty() => row
            .iter()
            .filter(|(key, _)| fields.iter().any(|f| f == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => row.clone(),
    }
}

fn matches(row: &Record, filter: Option<&Where>) -> Result<bool> {
    let Some(filter) = filter else {
        return Ok(true);
    };
    for (column, condition) in filter {
        let actual = row.get(column).unwrap_or(&Value::Null);
        for (op, expected) in condition {
            if !evaluate(op, actual, expected)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn evaluate(op: &str, actual: &Value, expected: &Value) -> Result<bool> {
    Ok(match op {
        "eq" => loose_eq(actual, expected),
        "neq" => !loose_eq(actual, expected),
        "gt" => compare(actual, expected) == Some(Ordering::Greater),
        "gte" => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        "lt" => compare(actual, expected) == Some(Ordering::Less),
        "lte" => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        "in" => as_list(op, expected)?.iter().any(|v| loose_eq(actual, v)),
        "nin" => !as_list(op, expected)?.iter().any(|v| loose_eq(actual, v)),
        other => return Err(AuthzError::InvalidInput(format!("unsupported operator '{}'", other))),
    })
}

fn as_list<'a>(op: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| AuthzError::InvalidInput(format!("operator '{}' expects a list", op)))
}

// Header-derived ids arrive as strings, stored keys are numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}
