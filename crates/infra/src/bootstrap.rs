//! Default records every company starts with.

use kestrel_core::{AggregateId, TenantId};
use kestrel_inventory::{LocationId, LocationRef, LocationUsage, OperationType};

/// A location created for every company on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLocation {
    pub name: &'static str,
    pub usage: LocationUsage,
}

pub const VENDORS: DefaultLocation = DefaultLocation {
    name: "Partners/Vendors",
    usage: LocationUsage::Supplier,
};

pub const CUSTOMERS: DefaultLocation = DefaultLocation {
    name: "Partners/Customers",
    usage: LocationUsage::Customer,
};

pub const STOCK: DefaultLocation = DefaultLocation {
    name: "WH/Stock",
    usage: LocationUsage::Internal,
};

pub const INVENTORY_ADJUSTMENT: DefaultLocation = DefaultLocation {
    name: "Virtual/Inventory adjustment",
    usage: LocationUsage::Inventory,
};

pub const DEFAULT_LOCATIONS: [DefaultLocation; 4] = [VENDORS, CUSTOMERS, STOCK, INVENTORY_ADJUSTMENT];

impl DefaultLocation {
    /// Stable per-company id, so bootstrapping twice addresses the same stream.
    pub fn id(&self, tenant_id: TenantId) -> LocationId {
        LocationId::new(AggregateId::derived(tenant_id, &format!("location:{}", self.name)))
    }

    pub fn location_ref(&self, tenant_id: TenantId) -> LocationRef {
        LocationRef::new(self.id(tenant_id), self.usage)
    }
}

/// Locations used when an operation is created without explicit ones.
pub fn default_route(operation_type: OperationType) -> (Option<DefaultLocation>, Option<DefaultLocation>) {
    match operation_type {
        OperationType::Receipt => (Some(VENDORS), Some(STOCK)),
        OperationType::Delivery => (Some(STOCK), Some(CUSTOMERS)),
        OperationType::Internal => (Some(STOCK), None),
        OperationType::Dropship => (Some(VENDORS), Some(CUSTOMERS)),
    }
}
