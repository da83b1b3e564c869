//! Rule table: expansion, validation and per-entity grouping

use super::suggest::nearest;
use super::types::{Action, ActionRule, Rule};
use crate::error::{AuthzError, Result};
use crate::types::EntityRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Immutable, per-entity view of the compiled rules.
///
/// Built once during startup; rules inside each group keep compilation
/// order, which is the order the matcher scans them in.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    by_entity: HashMap<String, Arc<[Rule]>>,
}

impl RuleTable {
    /// Expand, validate and group compiled rules.
    ///
    /// When `admin_role` is set, a full-access rule for it is appended to
    /// every entity group after the compiled rules.
    pub fn build(rules: &[Rule], registry: &EntityRegistry, admin_role: Option<&str>) -> Result<Self> {
        let mut grouped: HashMap<String, Vec<Rule>> = HashMap::new();

        for (index, rule) in rules.iter().enumerate() {
            let entities = rule
                .target_entities()
                .ok_or(AuthzError::MissingEntity { index })?;

            for entity in entities {
                if !registry.contains(&entity) {
                    return Err(AuthzError::UnknownEntity {
                        suggestion: nearest(&entity, registry.names()).map(str::to_string),
                        entity,
                        index,
                    });
                }
                grouped
                    .entry(entity.clone())
                    .or_default()
                    .push(rule.bound_to(&entity));
            }
        }

        let mut by_entity = HashMap::new();
        for meta in registry.iter() {
            let mut group = grouped.remove(&meta.name).unwrap_or_default();

            if let Some(admin_role) = admin_role {
                group.push(admin_rule(admin_role, &meta.name));
            }

            let mandatory: Vec<&str> = meta.mandatory_fields().collect();
            for rule in &group {
                if let Some(fields) = rule.save.fields() {
                    if let Some(missing) = mandatory.iter().find(|m| !fields.iter().any(|f| f == *m)) {
                        return Err(AuthzError::MissingNotNullable {
                            field: missing.to_string(),
                            entity: meta.name.clone(),
                        });
                    }
                }
            }

            warn_duplicate_roles(&meta.name, &group);
            debug!(entity = %meta.name, rules = group.len(), "rule group ready");
            by_entity.insert(meta.name.clone(), Arc::from(group));
        }

        Ok(Self { by_entity })
    }

    /// Rules for an entity, in match order
    pub fn rules_for(&self, entity: &str) -> Arc<[Rule]> {
        self.by_entity
            .get(entity)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Number of rules across all entities
    pub fn len(&self) -> usize {
        self.by_entity.values().map(|rules| rules.len()).sum()
    }

    /// Whether the table holds no rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn admin_rule(role: &str, entity: &str) -> Rule {
    let mut rule = Rule::new(role, entity);
    for action in Action::ALL {
        rule.set_action(action, ActionRule::AllowAll);
    }
    rule
}

fn warn_duplicate_roles(entity: &str, rules: &[Rule]) {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.role.as_str()) {
            warn!(entity, role = %rule.role, "more than one rule for role, the first one applies");
        }
    }
}
