//! Startup wiring: compile rules, build the table, decorate entities

use crate::compiler::{CompilerOptions, RuleCompiler};
use crate::directory::RoleDirectory;
use crate::error::Result;
use crate::identity::{IdentityConfig, IdentityResolver, UserExtractor, ADMIN_ROLE};
use crate::interceptor::AuthorizedEntity;
use crate::rule::{Rule, RuleTable};
use crate::store::{EntityOperations, HookRegistry};
use crate::types::EntityRegistry;
use std::sync::Arc;
use tracing::info;

/// Compiled, immutable authorization state shared by every request
pub struct Authorizer {
    rules: Vec<Rule>,
    table: RuleTable,
    resolver: Arc<IdentityResolver>,
}

impl Authorizer {
    /// Compile directory rules, append `extra_rules` and build the table.
    ///
    /// Any directory or validation failure is returned and must abort startup.
    pub async fn bootstrap(
        directory: &dyn RoleDirectory,
        registry: &EntityRegistry,
        options: &CompilerOptions,
        extra_rules: Vec<Rule>,
        identity: IdentityConfig,
        extractor: Arc<dyn UserExtractor>,
    ) -> Result<Self> {
        let mut rules = RuleCompiler::new(directory, registry, options).compile().await?;
        rules.extend(extra_rules);
        Self::from_rules(rules, registry, identity, extractor)
    }

    /// Build from an already compiled rule list
    pub fn from_rules(
        rules: Vec<Rule>,
        registry: &EntityRegistry,
        identity: IdentityConfig,
        extractor: Arc<dyn UserExtractor>,
    ) -> Result<Self> {
        let admin_role = identity.admin_secret.as_ref().map(|_| ADMIN_ROLE);
        let table = RuleTable::build(&rules, registry, admin_role)?;
        info!(rules = rules.len(), entities = table.len(), "authorization rules ready");

        Ok(Self {
            rules,
            table,
            resolver: Arc::new(IdentityResolver::new(identity, extractor)),
        })
    }

    /// Rules as compiled, before expansion
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Decorate a single entity
    pub fn authorize_entity(&self, entity: Arc<dyn EntityOperations>) -> Arc<dyn EntityOperations> {
        let rules = self.table.rules_for(&entity.meta().name);
        Arc::new(AuthorizedEntity::new(entity, rules, self.resolver.clone()))
    }

    /// Decorate every entity of the data-mapping layer
    pub fn install<H: HookRegistry + ?Sized>(&self, db: &mut H) -> Result<()> {
        let names: Vec<String> = db.registry().names().map(str::to_string).collect();
        for name in names {
            let rules = self.table.rules_for(&name);
            let resolver = self.resolver.clone();
            db.add_entity_hooks(
                &name,
                Box::new(move |original: Arc<dyn EntityOperations>| -> Arc<dyn EntityOperations> {
                    Arc::new(AuthorizedEntity::new(original, rules, resolver))
                }),
            )?;
        }
        Ok(())
    }
}
