//! Filter rewriting: ownership predicates derived from the caller identity

use crate::error::{AuthzError, Result};
use crate::rule::{ActionRule, CheckSpec};
use crate::types::{condition, Condition, Identity, RequestContext, Where};
use tracing::trace;

/// Merge the action's row restrictions into `existing`.
///
/// Checks assign the whole condition of their column, so a pre-existing
/// condition on a checked column is replaced rather than combined, and
/// rewriting an already rewritten filter for the same caller is a no-op.
/// Custom filters are trusted verbatim.
pub async fn rewrite(
    action: &ActionRule,
    existing: Option<Where>,
    identity: &Identity,
    ctx: &RequestContext,
) -> Result<Where> {
    let mut filter = existing.unwrap_or_default();

    match action {
        ActionRule::Forbidden => return Err(AuthzError::Unauthorized),
        ActionRule::AllowAll => {}
        ActionRule::Policy(policy) => {
            for (column, spec) in policy.checks.iter().flatten() {
                filter.insert(column.clone(), check_condition(spec, identity));
            }
        }
        ActionRule::Custom(custom) => {
            filter = custom.filter(identity, ctx, filter).await?;
        }
    }

    trace!(?filter, "rewrote filter");
    Ok(filter)
}

fn check_condition(spec: &CheckSpec, identity: &Identity) -> Condition {
    match spec {
        CheckSpec::Attribute(attribute) => condition("eq", identity.attribute_or_null(attribute)),
        CheckSpec::Operators(operators) => operators
            .iter()
            .map(|(op, attribute)| (op.clone(), identity.attribute_or_null(attribute)))
            .collect(),
    }
}
