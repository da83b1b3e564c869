//! Field allowlist enforcement for read projections and write payloads

use crate::error::{AuthzError, Result};
use crate::rule::ActionRule;
use crate::types::Record;

/// Check a read (or returned) projection against the action's allowlist.
///
/// A forbidden action is rejected before any field is inspected; an action
/// without allowlist permits every field.
pub fn check_fields<S: AsRef<str>>(action: &ActionRule, fields: &[S]) -> Result<()> {
    if !action.is_allowed() {
        return Err(AuthzError::Unauthorized);
    }
    let Some(allowed) = action.fields() else {
        return Ok(());
    };
    for field in fields {
        let field = field.as_ref();
        if !allowed.iter().any(|a| a == field) {
            return Err(AuthzError::UnauthorizedField(field.to_string()));
        }
    }
    Ok(())
}

/// Check every key of every payload against the action's allowlist
pub fn check_inputs<'a, I>(action: &ActionRule, inputs: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Record>,
{
    let Some(allowed) = action.fields() else {
        return Ok(());
    };
    for input in inputs {
        if let Some(key) = input.keys().find(|key| !allowed.iter().any(|a| a == *key)) {
            return Err(AuthzError::UnauthorizedField(key.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ActionPolicy;
    use serde_json::json;

    fn restricted() -> ActionRule {
        ActionRule::Policy(ActionPolicy::default().with_fields(["id", "title"]))
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_forbidden_action_is_unauthorized() {
        let err = check_fields(&ActionRule::Forbidden, &["id"]).unwrap_err();
        assert!(matches!(err, AuthzError::Unauthorized));
    }

    #[test]
    fn test_projection_within_allowlist() {
        assert!(check_fields(&restricted(), &["id", "title"]).is_ok());
        assert!(check_fields(&restricted(), &[] as &[&str]).is_ok());
        assert!(check_fields(&ActionRule::AllowAll, &["anything"]).is_ok());
    }

    #[test]
    fn test_projection_outside_allowlist_names_field() {
        let err = check_fields(&restricted(), &["id", "userId"]).unwrap_err();
        match err {
            AuthzError::UnauthorizedField(field) => assert_eq!(field, "userId"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_and_batch_payloads() {
        let ok = record(json!({ "title": "page 1" }));
        let bad = record(json!({ "title": "page 2", "userId": 7 }));

        assert!(check_inputs(&restricted(), [&ok]).is_ok());
        let err = check_inputs(&restricted(), [&ok, &bad]).unwrap_err();
        assert!(matches!(err, AuthzError::UnauthorizedField(ref f) if f == "userId"));
    }

    #[test]
    fn test_payload_without_allowlist() {
        let payload = record(json!({ "title": "x", "userId": 1 }));
        assert!(check_inputs(&ActionRule::AllowAll, [&payload]).is_ok());
    }
}
