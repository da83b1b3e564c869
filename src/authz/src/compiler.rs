//! Rule compilation from identity-provider roles and scopes
//!
//! Every role of the directory contributes one rule per entity it has a
//! scope on (`"<action>:<entity>"`). Repeated grants for the same
//! (role, entity) pair land on the same rule. An anonymous rule covering
//! every entity is always seeded first.

use crate::directory::RoleDirectory;
use crate::error::Result;
use crate::rule::suggest::nearest;
use crate::rule::{Action, ActionPolicy, ActionRule, DefaultValue, Rule};
use crate::types::EntityRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Shape of the compiled rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Allow find/save/delete for the anonymous role
    pub allow_anonymous: bool,

    /// Restrict granted actions to rows owned by the caller
    pub checks: bool,

    /// Stamp the owner column into write payloads
    pub defaults: bool,

    /// Role of callers without roles
    pub anonymous_role: String,

    /// Caller attribute holding the user id
    pub user_key: String,

    /// Column holding the row owner
    pub owner_column: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            allow_anonymous: false,
            checks: false,
            defaults: false,
            anonymous_role: "anonymous".to_string(),
            user_key: "X-ROWGATE-USER-ID".to_string(),
            owner_column: "userId".to_string(),
        }
    }
}

/// Turns directory roles into rules
pub struct RuleCompiler<'a> {
    directory: &'a dyn RoleDirectory,
    registry: &'a EntityRegistry,
    options: &'a CompilerOptions,
}

/// Detach `entity` from a multi-entity rule of `role` (the seeded anonymous
/// rule), so the role keeps a single rule per entity.
fn take_shared(rules: &mut [Rule], role: &str, entity: &str) -> Option<Rule> {
    let shared = rules.iter_mut().find(|r| {
        r.role == role && r.entity.is_none() && r.entities.iter().flatten().any(|e| e == entity)
    })?;
    if let Some(entities) = shared.entities.as_mut() {
        entities.retain(|e| e != entity);
    }
    Some(shared.bound_to(entity))
}

impl<'a> RuleCompiler<'a> {
    pub fn new(
        directory: &'a dyn RoleDirectory,
        registry: &'a EntityRegistry,
        options: &'a CompilerOptions,
    ) -> Self {
        Self {
            directory,
            registry,
            options,
        }
    }

    /// Compile the flat rule list (before entity expansion).
    ///
    /// Roles and scopes are fetched one call at a time, in directory order.
    /// The first directory failure aborts compilation.
    pub async fn compile(&self) -> Result<Vec<Rule>> {
        let mut rules = vec![self.anonymous_rule()];

        for role in self.directory.list_roles().await? {
            let scopes = self.directory.list_scopes(&role.id).await?;

            for scope in scopes {
                let Some((token, entity)) = scope.split() else {
                    warn!(role = %role.name, scope = %scope.name, "malformed scope, skipping");
                    continue;
                };

                if !self.registry.contains(entity) {
                    warn!(
                        role = %role.name,
                        entity,
                        suggestion = nearest(entity, self.registry.names()).unwrap_or("-"),
                        "unknown entity in scope, skipping"
                    );
                    continue;
                }

                let Some(action) = Action::from_scope(token) else {
                    warn!(role = %role.name, scope = %scope.name, "unknown scope action, skipping");
                    continue;
                };

                let value = self.granted();
                let existing = rules
                    .iter_mut()
                    .find(|r| r.role == role.name && r.entity.as_deref() == Some(entity));

                match existing {
                    Some(rule) => rule.set_action(action, value),
                    None => {
                        let mut rule = take_shared(&mut rules, &role.name, entity)
                            .unwrap_or_else(|| Rule::new(role.name.clone(), entity))
                            .with(action, value);
                        if self.options.defaults {
                            rule = rule.with_default(
                                self.options.owner_column.clone(),
                                DefaultValue::Attribute(self.options.user_key.clone()),
                            );
                        }
                        rules.push(rule);
                    }
                }
            }
        }

        self.log_rules(&rules);
        Ok(rules)
    }

    fn anonymous_rule(&self) -> Rule {
        let allowed = self.options.allow_anonymous;
        Rule::for_entities(self.options.anonymous_role.clone(), self.registry.names())
            .with(Action::Find, ActionRule::flag(allowed))
            .with(Action::Save, ActionRule::flag(allowed))
            .with(Action::Delete, ActionRule::flag(allowed))
    }

    fn granted(&self) -> ActionRule {
        if self.options.checks {
            ActionRule::Policy(ActionPolicy::owned_by(
                self.options.owner_column.clone(),
                self.options.user_key.clone(),
            ))
        } else {
            ActionRule::AllowAll
        }
    }

    fn log_rules(&self, rules: &[Rule]) {
        let mut by_role: BTreeMap<&str, Vec<&Rule>> = BTreeMap::new();
        let mut order = Vec::new();
        for rule in rules {
            let group = by_role.entry(rule.role.as_str()).or_default();
            if group.is_empty() {
                order.push(rule.role.as_str());
            }
            group.push(rule);
        }

        for role in order {
            info!("rules set for role {}", role);
            for rule in &by_role[role] {
                let target = rule.target_entities().unwrap_or_default().join(",");
                info!("\t{}: {}", target, rule.summary());
            }
        }

        let missing: Vec<&str> = self
            .registry
            .names()
            .filter(|name| !rules.iter().any(|r| r.entity.as_deref() == Some(*name)))
            .collect();
        if !missing.is_empty() {
            warn!("missing rules for entities: {}", missing.join(", "));
        }

        debug!(rules = rules.len(), "compiled directory rules");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryRole, DirectoryScope, InMemoryDirectory};
    use crate::error::AuthzError;
    use crate::rule::CheckSpec;
    use crate::types::{EntityMeta, FieldMeta};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Directory whose scope listings are slow, recording overlapping calls
    #[derive(Default)]
    struct SlowDirectory {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RoleDirectory for SlowDirectory {
        async fn list_roles(&self) -> Result<Vec<DirectoryRole>> {
            Ok((1..=5)
                .map(|i| DirectoryRole {
                    id: format!("r{}", i),
                    name: format!("role{}", i),
                })
                .collect())
        }

        async fn list_scopes(&self, role_id: &str) -> Result<Vec<DirectoryScope>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            // Later roles answer faster.
            let delay = if role_id == "r1" { 20 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(AuthzError::Config(format!("listing {} failed", role_id)));
            }
            Ok(vec![DirectoryScope {
                name: "read:pages".to_string(),
            }])
        }
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            EntityMeta::new("pages", vec![FieldMeta::primary_key("id"), FieldMeta::nullable("title")]),
            EntityMeta::new("categories", vec![FieldMeta::primary_key("id")]),
        ])
    }

    #[tokio::test]
    async fn test_anonymous_rule_is_seeded_first() {
        let directory = InMemoryDirectory::new();
        let registry = registry();
        let options = CompilerOptions {
            allow_anonymous: true,
            ..Default::default()
        };

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].role, "anonymous");
        assert_eq!(rules[0].entities.as_ref().unwrap().len(), 2);
        assert_eq!(rules[0].find, ActionRule::AllowAll);
        assert_eq!(rules[0].update_many, ActionRule::Forbidden);
    }

    #[tokio::test]
    async fn test_grants_merge_per_role_and_entity() {
        let directory = InMemoryDirectory::new().with_role(
            "editor",
            ["read:pages", "create:pages", "update:pages", "delete:categories"],
        );
        let registry = registry();
        let options = CompilerOptions::default();

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        assert_eq!(rules.len(), 3);

        let pages = &rules[1];
        assert_eq!(pages.entity.as_deref(), Some("pages"));
        assert_eq!(pages.find, ActionRule::AllowAll);
        assert_eq!(pages.save, ActionRule::AllowAll);
        assert_eq!(pages.update_many, ActionRule::AllowAll);
        assert_eq!(pages.delete, ActionRule::Forbidden);

        assert_eq!(rules[2].entity.as_deref(), Some("categories"));
        assert_eq!(rules[2].delete, ActionRule::AllowAll);
    }

    #[tokio::test]
    async fn test_scope_listings_are_fetched_one_at_a_time() {
        let directory = SlowDirectory::default();
        let registry = registry();
        let options = CompilerOptions::default();

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        assert_eq!(directory.peak.load(Ordering::SeqCst), 1);

        let roles: Vec<&str> = rules[1..].iter().map(|r| r.role.as_str()).collect();
        assert_eq!(roles, vec!["role1", "role2", "role3", "role4", "role5"]);
    }

    #[tokio::test]
    async fn test_first_failing_role_in_directory_order_aborts() {
        let directory = SlowDirectory {
            fail: true,
            ..Default::default()
        };
        let registry = registry();
        let options = CompilerOptions::default();

        let err = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: listing r1 failed");
    }

    #[tokio::test]
    async fn test_bad_scopes_are_skipped() {
        let directory = InMemoryDirectory::new().with_role(
            "editor",
            ["read:pagez", "readpages", "publish:pages", "read:pages"],
        );
        let registry = registry();
        let options = CompilerOptions::default();

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        assert_eq!(rules.len(), 2);

        let editor = &rules[1];
        assert_eq!(editor.role, "editor");
        assert_eq!(editor.entity.as_deref(), Some("pages"));
        assert_eq!(editor.find, ActionRule::AllowAll);
        assert_eq!(editor.save, ActionRule::Forbidden);
        assert_eq!(editor.delete, ActionRule::Forbidden);
        assert_eq!(editor.update_many, ActionRule::Forbidden);
        assert!(!rules.iter().any(|r| r.entity.as_deref() == Some("pagez")));
    }

    #[tokio::test]
    async fn test_checks_and_defaults_shapes() {
        let directory = InMemoryDirectory::new().with_role("user", ["read:pages", "delete:pages"]);
        let registry = registry();
        let options = CompilerOptions {
            checks: true,
            defaults: true,
            ..Default::default()
        };

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        let rule = &rules[1];

        let mut checks = BTreeMap::new();
        checks.insert(
            "userId".to_string(),
            CheckSpec::Attribute("X-ROWGATE-USER-ID".to_string()),
        );
        let owned = ActionRule::Policy(ActionPolicy {
            fields: None,
            checks: Some(checks),
        });
        assert_eq!(rule.find, owned);
        assert_eq!(rule.delete, owned);
        assert_eq!(rule.save, ActionRule::Forbidden);

        let mut defaults = BTreeMap::new();
        defaults.insert(
            "userId".to_string(),
            DefaultValue::Attribute("X-ROWGATE-USER-ID".to_string()),
        );
        assert_eq!(rule.defaults, Some(defaults));
    }

    #[tokio::test]
    async fn test_directory_role_named_like_anonymous_keeps_one_rule_per_entity() {
        let directory = InMemoryDirectory::new().with_role("anonymous", ["read:pages"]);
        let registry = registry();
        let options = CompilerOptions::default();

        let rules = RuleCompiler::new(&directory, &registry, &options).compile().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].entities, Some(vec!["categories".to_string()]));

        let pages = &rules[1];
        assert_eq!(pages.role, "anonymous");
        assert_eq!(pages.entity.as_deref(), Some("pages"));
        assert_eq!(pages.find, ActionRule::AllowAll);
        assert_eq!(pages.save, ActionRule::Forbidden);

        let table = crate::rule::RuleTable::build(&rules, &registry, None).unwrap();
        assert_eq!(table.rules_for("pages").len(), 1);
        assert_eq!(table.rules_for("categories").len(), 1);
    }
}
