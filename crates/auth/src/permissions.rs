use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier or pattern.
///
/// Concrete permissions have the shape `"<module>.<resource>.<ability>"`
/// (e.g. `"inventories.receipts.validate"`). Granted permissions may be
/// patterns: a `*` segment matches exactly one segment, a trailing `*` matches
/// everything that follows, and `"*"` alone matches every permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether this (possibly patterned) permission covers `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        let mut pattern = self.as_str().split('.').peekable();
        let mut target = required.as_str().split('.');

        while let Some(p) = pattern.next() {
            let last = pattern.peek().is_none();
            match target.next() {
                None => return false,
                Some(_) if p == "*" && last => return true,
                Some(t) if p == "*" || p == t => {}
                Some(_) => return false,
            }
        }

        target.next().is_none()
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &'static str) -> Permission {
        Permission::new(s)
    }

    #[test]
    fn exact_permission_grants_itself_only() {
        assert!(p("inventories.receipts.view").grants(&p("inventories.receipts.view")));
        assert!(!p("inventories.receipts.view").grants(&p("inventories.receipts.view_any")));
        assert!(!p("inventories.receipts").grants(&p("inventories.receipts.view")));
    }

    #[test]
    fn trailing_wildcard_covers_remaining_segments() {
        assert!(p("*").grants(&p("accounts.payments.create")));
        assert!(p("inventories.*").grants(&p("inventories.receipts.validate")));
        assert!(!p("inventories.*").grants(&p("purchases.orders.view")));
    }

    #[test]
    fn inner_wildcard_matches_one_segment() {
        assert!(p("*.*.view_any").grants(&p("sales.orders.view_any")));
        assert!(!p("*.*.view_any").grants(&p("sales.orders.create")));
        assert!(p("inventories.*.view").grants(&p("inventories.deliveries.view")));
    }
}
