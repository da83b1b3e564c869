//! Authorization rules
//!
//! - [`types`]: rule model and action values
//! - [`matcher`]: caller-role precedence matching
//! - [`table`]: entity expansion, validation and grouping
//! - [`suggest`]: edit-distance suggestions for unknown entities

pub mod matcher;
pub mod suggest;
pub mod table;
pub mod types;

pub use matcher::find_rule;
pub use table::RuleTable;
pub use types::{
    Action, ActionPolicy, ActionRule, CheckSpec, CustomFilter, DefaultContext, DefaultProvider,
    DefaultValue, Rule,
};
