//! Rule matching by caller role priority

use super::types::Rule;

/// Return the rule governing a caller.
///
/// Caller roles are scanned in order and, for each role, the entity rules
/// in table order; the first rule whose role equals the current caller role
/// wins. The caller's role order expresses priority, not the rule order.
/// `None` must be treated as unauthorized.
pub fn find_rule<'a, S: AsRef<str>>(rules: &'a [Rule], roles: &[S]) -> Option<&'a Rule> {
    roles
        .iter()
        .find_map(|role| rules.iter().find(|rule| rule.role == role.as_ref()))
}
