//! Authorization decorator over entity operations

use crate::error::{AuthzError, Result};
use crate::filter::rewrite;
use crate::guard::{check_fields, check_inputs};
use crate::identity::IdentityResolver;
use crate::rule::{find_rule, DefaultContext, DefaultValue, Rule};
use crate::store::{
    DeleteOptions, EntityOperations, FindOptions, InsertOptions, SaveOptions, UpdateManyOptions,
};
use crate::types::{condition, EntityMeta, Identity, Record, RequestContext, Where};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Wraps an entity so every call carrying a request context is matched
/// against the entity's rules before it reaches the original operations.
///
/// Calls without a context are trusted and pass through untouched.
pub struct AuthorizedEntity {
    inner: Arc<dyn EntityOperations>,
    rules: Arc<[Rule]>,
    resolver: Arc<IdentityResolver>,
}

impl AuthorizedEntity {
    pub fn new(inner: Arc<dyn EntityOperations>, rules: Arc<[Rule]>, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            inner,
            rules,
            resolver,
        }
    }

    async fn authorize<'c>(&self, ctx: &'c RequestContext) -> Result<(&'c Identity, &Rule)> {
        let identity = self.resolver.resolve(ctx).await?;
        match find_rule(&self.rules, &identity.roles) {
            Some(rule) => {
                trace!(roles = ?identity.roles, role = %rule.role, entity = %self.meta().name, "found rule");
                Ok((identity, rule))
            }
            None => {
                warn!(roles = ?identity.roles, entity = %self.meta().name, "no rule for roles");
                Err(AuthzError::Unauthorized)
            }
        }
    }
}

async fn apply_defaults(rule: &Rule, identity: &Identity, ctx: &RequestContext, input: &mut Record) -> Result<()> {
    let Some(defaults) = &rule.defaults else {
        return Ok(());
    };

    for (field, source) in defaults {
        let value = match source {
            DefaultValue::Attribute(key) => identity.attribute_or_null(key),
            DefaultValue::Custom(provider) => {
                provider
                    .default_value(DefaultContext { identity, ctx, input: &*input })
                    .await?
            }
        };
        input.insert(field.clone(), value);
    }
    Ok(())
}

#[async_trait]
impl EntityOperations for AuthorizedEntity {
    fn meta(&self) -> &EntityMeta {
        self.inner.meta()
    }

    async fn find(&self, mut opts: FindOptions) -> Result<Vec<Record>> {
        let Some(ctx) = opts.ctx.clone() else {
            return self.inner.find(opts).await;
        };
        let (identity, rule) = self.authorize(&ctx).await?;

        match &opts.fields {
            Some(fields) if !fields.is_empty() => check_fields(&rule.find, fields.as_slice())?,
            _ => check_fields(&rule.find, self.meta().field_names().as_slice())?,
        }
        opts.filter = Some(rewrite(&rule.find, opts.filter.take(), identity, &ctx).await?);

        self.inner.find(opts).await
    }

    async fn save(&self, mut opts: SaveOptions) -> Result<Record> {
        let Some(ctx) = opts.ctx.clone() else {
            return self.inner.save(opts).await;
        };
        let (identity, rule) = self.authorize(&ctx).await?;

        if !rule.save.is_allowed() {
            return Err(AuthzError::Unauthorized);
        }
        if let Some(fields) = &opts.fields {
            check_fields(&rule.save, fields.as_slice())?;
        }
        check_inputs(&rule.save, [&opts.input])?;
        apply_defaults(rule, identity, &ctx, &mut opts.input).await?;

        let pk = self.meta().primary_key();
        if let Some(key) = opts.input.get(pk).filter(|v| !v.is_null()) {
            let mut lookup = Where::new();
            lookup.insert(pk.to_string(), condition("eq", key.clone()));
            let filter = rewrite(&rule.save, Some(lookup), identity, &ctx).await?;

            let visible = self
                .find(FindOptions {
                    filter: Some(filter),
                    fields: opts.fields.clone(),
                    ctx: Some(ctx.clone()),
                })
                .await?;
            if visible.is_empty() {
                debug!(entity = %self.meta().name, "row to update is not visible to caller");
                return Err(AuthzError::Unauthorized);
            }
        }

        self.inner.save(opts).await
    }

    async fn insert(&self, mut opts: InsertOptions) -> Result<Vec<Record>> {
        let Some(ctx) = opts.ctx.clone() else {
            return self.inner.insert(opts).await;
        };
        let (identity, rule) = self.authorize(&ctx).await?;

        if !rule.save.is_allowed() {
            return Err(AuthzError::Unauthorized);
        }
        if let Some(fields) = &opts.fields {
            check_fields(&rule.save, fields.as_slice())?;
        }
        check_inputs(&rule.save, &opts.inputs)?;
        for input in opts.inputs.iter_mut() {
            apply_defaults(rule, identity, &ctx, input).await?;
        }

        self.inner.insert(opts).await
    }

    async fn delete(&self, mut opts: DeleteOptions) -> Result<Vec<Record>> {
        let Some(ctx) = opts.ctx.clone() else {
            return self.inner.delete(opts).await;
        };
        let (identity, rule) = self.authorize(&ctx).await?;
        opts.filter = Some(rewrite(&rule.delete, opts.filter.take(), identity, &ctx).await?);

        self.inner.delete(opts).await
    }

    async fn update_many(&self, mut opts: UpdateManyOptions) -> Result<Vec<Record>> {
        let Some(ctx) = opts.ctx.clone() else {
            return self.inner.update_many(opts).await;
        };
        let (identity, rule) = self.authorize(&ctx).await?;
        opts.filter = Some(rewrite(&rule.update_many, opts.filter.take(), identity, &ctx).await?);

        self.inner.update_many(opts).await
    }
}
