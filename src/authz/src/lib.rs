//! # rowgate authorization layer
//!
//! Row-level authorization between an HTTP API and its data-mapping layer.
//!
//! ## Features
//!
//! - **Rule compilation** from Logto roles and `<action>:<entity>` scopes
//! - **Role precedence matching**: the caller's first role with a rule wins
//! - **Field allowlists** on read projections and write payloads
//! - **Ownership filters** injected into `where` clauses from caller attributes
//! - **Entity decorators** wrapping find/save/insert/delete/updateMany
//! - **Admin secret** bootstrap for trusted tooling
//!
//! ## Example
//!
//! ```rust,no_run
//! use rowgate_authz::{
//!     Authorizer, CompilerOptions, EntityMeta, EntityRegistry, FieldMeta,
//!     IdentityConfig, InMemoryDatabase, InMemoryDirectory, TrustedHeaders,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = EntityRegistry::new(vec![EntityMeta::new(
//!         "pages",
//!         vec![FieldMeta::primary_key("id"), FieldMeta::nullable("title"), FieldMeta::nullable("userId")],
//!     )]);
//!     let directory = InMemoryDirectory::new().with_role("user", ["read:pages", "create:pages"]);
//!     let identity = IdentityConfig::default();
//!     let options = CompilerOptions { checks: true, defaults: true, ..Default::default() };
//!
//!     let extractor = Arc::new(TrustedHeaders::new(&identity.role_key, &identity.user_key));
//!     let authorizer =
//!         Authorizer::bootstrap(&directory, &registry, &options, Vec::new(), identity, extractor).await?;
//!
//!     let mut db = InMemoryDatabase::new(registry);
//!     authorizer.install(&mut db)?;
//!     Ok(())
//! }
//! ```

pub mod authorizer;
pub mod compiler;
pub mod config;
pub mod directory;
pub mod error;
pub mod filter;
pub mod guard;
pub mod http;
pub mod identity;
pub mod interceptor;
pub mod rule;
pub mod store;
pub mod types;
pub mod versioning;

// Re-export commonly used types
pub use authorizer::Authorizer;
pub use compiler::{CompilerOptions, RuleCompiler};
pub use config::AppConfig;
pub use directory::{InMemoryDirectory, LogtoConfig, LogtoDirectory, RoleDirectory, UserDirectory};
pub use error::{AuthzError, Result};
pub use identity::{IdentityConfig, IdentityResolver, NoUser, TrustedHeaders, UserExtractor, ADMIN_ROLE};
pub use interceptor::AuthorizedEntity;
pub use rule::{Action, ActionPolicy, ActionRule, CheckSpec, DefaultValue, Rule, RuleTable};
pub use store::{EntityOperations, HookRegistry, InMemoryDatabase};
pub use types::{EntityMeta, EntityRegistry, FieldMeta, Identity, Record, RequestContext, Where};
pub use versioning::{InMemoryVersionCache, PermissionsVersions, VersionCache};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
