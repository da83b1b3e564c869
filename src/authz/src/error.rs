//! Error types for the authorization layer

use thiserror::Error;

/// Authorization layer errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// No rule for the caller's roles, or the rule forbids the action
    #[error("operation not allowed")]
    Unauthorized,

    /// Requested or supplied field outside the rule's allowlist
    #[error("field not allowed: {0}")]
    UnauthorizedField(String),

    /// A save allowlist omits a mandatory column
    #[error("missing not nullable field \"{field}\" in save rule for entity \"{entity}\"")]
    MissingNotNullable { field: String, entity: String },

    /// Rule references an entity that is not in the metadata
    #[error("unknown entity '{entity}' in authorization rule {index}{}", suggestion_hint(.suggestion))]
    UnknownEntity {
        entity: String,
        index: usize,
        suggestion: Option<String>,
    },

    /// Rule carries neither `entity` nor `entities`
    #[error("missing entity in authorization rule {index}")]
    MissingEntity { index: usize },

    /// Operation on an entity the data layer does not know
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// Identity provider answered with a non-2xx status
    #[error("identity provider call {path} failed with status {status}: {body}")]
    Directory {
        status: u16,
        path: String,
        body: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthzError {
    /// Whether the error is a per-request authorization rejection
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::UnauthorizedField(_))
    }
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(", did you mean '{}'?", name),
        None => String::new(),
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_entity_message_includes_suggestion() {
        let err = AuthzError::UnknownEntity {
            entity: "pagez".to_string(),
            index: 2,
            suggestion: Some("pages".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown entity 'pagez' in authorization rule 2, did you mean 'pages'?"
        );

        let err = AuthzError::UnknownEntity {
            entity: "zzz".to_string(),
            index: 0,
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown entity 'zzz' in authorization rule 0");
    }

    #[test]
    fn test_unauthorized_classification() {
        assert!(AuthzError::Unauthorized.is_unauthorized());
        assert!(AuthzError::UnauthorizedField("title".into()).is_unauthorized());
        assert!(!AuthzError::MissingEntity { index: 1 }.is_unauthorized());
    }
}
