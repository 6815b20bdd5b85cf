//! Permission names used at the HTTP boundary.
//!
//! Handlers check permissions before calling a use case, while domain
//! aggregates and infra stay auth-agnostic.

/// `"<module>.<resource>.<ability>"`.
pub fn permission(module: &str, resource: &str, ability: &str) -> String {
    format!("{module}.{resource}.{ability}")
}

/// A permission of one resource; `Gate::ability` names its abilities.
#[derive(Debug, Clone, Copy)]
pub struct Gate {
    pub module: &'static str,
    pub resource: &'static str,
}

impl Gate {
    pub const fn new(module: &'static str, resource: &'static str) -> Self {
        Self { module, resource }
    }

    pub fn ability(&self, ability: &str) -> String {
        permission(self.module, self.resource, ability)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_auth::{Permission, RESOURCES};

    use super::*;

    #[test]
    fn gates_name_permissions_of_the_policy_table() {
        let gate = Gate::new("inventories", "receipts");
        let wanted = Permission::new(gate.ability("check_availability"));
        assert!(RESOURCES.iter().flat_map(|r| r.permissions()).any(|p| p == wanted));
    }
}
