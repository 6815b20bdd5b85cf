//! Declarative permission table.
//!
//! Every resource exposed by the API is listed once with the abilities it
//! supports. Permissions are derived as `"<module>.<resource>.<ability>"`, and
//! the built-in roles grant patterns over that space.

use serde::Serialize;

use crate::{Permission, Role};

/// Abilities every resource supports.
const CRUD: &[&str] = &["view_any", "view", "create", "update", "delete"];

/// One resource of the permission table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourcePolicy {
    pub module: &'static str,
    pub resource: &'static str,
    /// Abilities beyond the CRUD set.
    pub actions: &'static [&'static str],
}

impl ResourcePolicy {
    pub fn abilities(&self) -> impl Iterator<Item = &'static str> + '_ {
        CRUD.iter().chain(self.actions.iter()).copied()
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.abilities()
            .map(|a| Permission::new(format!("{}.{}.{}", self.module, self.resource, a)))
            .collect()
    }
}

const OPERATION_ACTIONS: &[&str] = &["todo", "check_availability", "validate", "cancel", "return"];
const ORDER_ACTIONS: &[&str] = &["send", "confirm", "lock", "unlock", "cancel", "draft"];

pub const RESOURCES: &[ResourcePolicy] = &[
    ResourcePolicy { module: "partners", resource: "partners", actions: &["archive", "restore"] },
    ResourcePolicy { module: "products", resource: "products", actions: &["archive", "restore"] },
    ResourcePolicy { module: "inventories", resource: "locations", actions: &["archive"] },
    ResourcePolicy { module: "inventories", resource: "receipts", actions: OPERATION_ACTIONS },
    ResourcePolicy { module: "inventories", resource: "deliveries", actions: OPERATION_ACTIONS },
    ResourcePolicy { module: "inventories", resource: "internals", actions: OPERATION_ACTIONS },
    ResourcePolicy { module: "inventories", resource: "dropships", actions: OPERATION_ACTIONS },
    ResourcePolicy { module: "inventories", resource: "quantities", actions: &["count", "apply", "clear"] },
    ResourcePolicy { module: "purchases", resource: "orders", actions: ORDER_ACTIONS },
    ResourcePolicy { module: "purchases", resource: "agreements", actions: &["confirm", "close", "cancel"] },
    ResourcePolicy { module: "sales", resource: "orders", actions: ORDER_ACTIONS },
    ResourcePolicy {
        module: "accounts",
        resource: "payments",
        actions: &["confirm", "mark_paid", "cancel", "reset_to_draft"],
    },
    ResourcePolicy { module: "accounts", resource: "balances", actions: &[] },
    ResourcePolicy {
        module: "time_off",
        resource: "leaves",
        actions: &["approve", "refuse", "cancel", "reset"],
    },
    ResourcePolicy { module: "security", resource: "roles", actions: &[] },
];

/// Built-in role with its permission patterns.
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub grants: &'static [&'static str],
}

const ROLES: &[RoleDefinition] = &[
    RoleDefinition {
        name: "admin",
        description: "Full administrator of the company",
        grants: &["*"],
    },
    RoleDefinition {
        name: "inventory_manager",
        description: "Runs the warehouse: all stock operations, locations and counts",
        grants: &[
            "inventories.*",
            "products.products.view_any",
            "products.products.view",
            "partners.partners.view_any",
            "partners.partners.view",
        ],
    },
    RoleDefinition {
        name: "inventory_user",
        description: "Processes stock operations but cannot cancel or return them",
        grants: &[
            "inventories.*.view_any",
            "inventories.*.view",
            "inventories.*.create",
            "inventories.*.update",
            "inventories.*.todo",
            "inventories.*.check_availability",
            "inventories.*.validate",
            "inventories.quantities.count",
            "products.products.view_any",
            "products.products.view",
        ],
    },
    RoleDefinition {
        name: "purchase_manager",
        description: "Owns purchasing: orders, agreements and vendors",
        grants: &[
            "purchases.*",
            "partners.*",
            "products.products.view_any",
            "products.products.view",
            "inventories.receipts.view_any",
            "inventories.receipts.view",
        ],
    },
    RoleDefinition {
        name: "purchase_user",
        description: "Prepares requests for quotation",
        grants: &[
            "purchases.orders.view_any",
            "purchases.orders.view",
            "purchases.orders.create",
            "purchases.orders.update",
            "purchases.orders.send",
            "purchases.agreements.view_any",
            "purchases.agreements.view",
            "partners.partners.view_any",
            "partners.partners.view",
            "products.products.view_any",
            "products.products.view",
        ],
    },
    RoleDefinition {
        name: "sales_manager",
        description: "Owns sales: orders and customers",
        grants: &[
            "sales.*",
            "partners.*",
            "products.*",
            "inventories.deliveries.view_any",
            "inventories.deliveries.view",
        ],
    },
    RoleDefinition {
        name: "sales_user",
        description: "Prepares and sends quotations",
        grants: &[
            "sales.orders.view_any",
            "sales.orders.view",
            "sales.orders.create",
            "sales.orders.update",
            "sales.orders.send",
            "partners.partners.view_any",
            "partners.partners.view",
            "products.products.view_any",
            "products.products.view",
        ],
    },
    RoleDefinition {
        name: "accountant",
        description: "Registers payments and reads the ledger",
        grants: &["accounts.*", "partners.partners.view_any", "partners.partners.view"],
    },
    RoleDefinition {
        name: "hr_officer",
        description: "Approves and refuses time off",
        grants: &["time_off.*"],
    },
    RoleDefinition {
        name: "employee",
        description: "Requests and cancels own time off",
        grants: &[
            "time_off.leaves.view_any",
            "time_off.leaves.view",
            "time_off.leaves.create",
            "time_off.leaves.cancel",
        ],
    },
    RoleDefinition {
        name: "viewer",
        description: "Read-only access to every resource",
        grants: &["*.*.view_any", "*.*.view"],
    },
];

pub fn role_definitions() -> &'static [RoleDefinition] {
    ROLES
}

/// Permission patterns granted by a role (empty for unknown roles).
pub fn role_permissions(role: &Role) -> Vec<Permission> {
    ROLES
        .iter()
        .find(|r| r.name == role.as_str())
        .map(|r| r.grants.iter().map(|g| Permission::new(*g)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(role: &'static str, perm: &'static str) -> bool {
        role_permissions(&Role::new(role))
            .iter()
            .any(|p| p.grants(&Permission::new(perm)))
    }

    #[test]
    fn every_resource_exposes_crud_abilities() {
        for r in RESOURCES {
            let perms = r.permissions();
            assert!(perms.iter().any(|p| p.as_str().ends_with(".view_any")), "{}", r.resource);
            assert!(perms.len() >= CRUD.len());
        }
    }

    #[test]
    fn role_grants_are_scoped() {
        assert!(grants("admin", "accounts.payments.confirm"));
        assert!(grants("inventory_manager", "inventories.receipts.return"));
        assert!(grants("inventory_user", "inventories.deliveries.validate"));
        assert!(!grants("inventory_user", "inventories.deliveries.cancel"));
        assert!(!grants("purchase_user", "purchases.orders.confirm"));
        assert!(grants("viewer", "sales.orders.view_any"));
        assert!(!grants("viewer", "sales.orders.create"));
        assert!(!grants("unknown", "sales.orders.view"));
    }

    #[test]
    fn every_role_grant_matches_some_declared_permission() {
        let all: Vec<Permission> = RESOURCES.iter().flat_map(|r| r.permissions()).collect();
        for role in ROLES {
            for g in role.grants {
                let pattern = Permission::new(*g);
                assert!(
                    all.iter().any(|p| pattern.grants(p)),
                    "grant '{g}' of role '{}' matches nothing",
                    role.name
                );
            }
        }
    }
}
