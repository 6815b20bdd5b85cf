//! Physical inventory counts.
//!
//! A `ProductQuantity` stream exists per product × internal location. On-hand
//! quantities themselves come from validated operations (see the stock
//! projection); this aggregate only records counts and their application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_products::ProductId;

use crate::location::{LocationId, LocationRef};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductQuantityId(pub AggregateId);

impl ProductQuantityId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic id of the quant for `product_id` at `location_id`.
    pub fn for_location(tenant_id: TenantId, product_id: ProductId, location_id: LocationId) -> Self {
        Self(AggregateId::derived(
            tenant_id,
            &format!("quant:{}:{}", product_id, location_id),
        ))
    }
}

impl core::fmt::Display for ProductQuantityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: ProductQuantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuantity {
    id: ProductQuantityId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    location_id: Option<LocationId>,
    counted: Option<i64>,
    version: u64,
    created: bool,
}

impl ProductQuantity {
    pub fn empty(id: ProductQuantityId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            location_id: None,
            counted: None,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn counted(&self) -> Option<i64> {
        self.counted
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }
}

impl AggregateRoot for ProductQuantity {
    type Id = ProductQuantityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CountQuantity (record a physical count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountQuantity {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub location: LocationRef,
    pub counted: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyCount. `on_hand` is the current on-hand quantity of the quant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCount {
    pub tenant_id: TenantId,
    pub on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCount {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductQuantityCommand {
    Count(CountQuantity),
    Apply(ApplyCount),
    Clear(ClearCount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityCounted {
    pub tenant_id: TenantId,
    pub quant_id: ProductQuantityId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub counted: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountApplied. `delta` moves on-hand from the previous value to `counted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountApplied {
    pub tenant_id: TenantId,
    pub quant_id: ProductQuantityId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub counted: i64,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountCleared {
    pub tenant_id: TenantId,
    pub quant_id: ProductQuantityId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductQuantityEvent {
    Counted(QuantityCounted),
    Applied(CountApplied),
    Cleared(CountCleared),
}

impl Event for ProductQuantityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductQuantityEvent::Counted(_) => "inventory.quantity.counted",
            ProductQuantityEvent::Applied(_) => "inventory.quantity.count_applied",
            ProductQuantityEvent::Cleared(_) => "inventory.quantity.count_cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductQuantityEvent::Counted(e) => e.occurred_at,
            ProductQuantityEvent::Applied(e) => e.occurred_at,
            ProductQuantityEvent::Cleared(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductQuantity {
    type Command = ProductQuantityCommand;
    type Event = ProductQuantityEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductQuantityEvent::Counted(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.location_id = Some(e.location_id);
                self.counted = Some(e.counted);
                self.created = true;
            }
            ProductQuantityEvent::Applied(_) | ProductQuantityEvent::Cleared(_) => {
                self.counted = None;
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductQuantityCommand::Count(cmd) => self.handle_count(cmd),
            ProductQuantityCommand::Apply(cmd) => self.handle_apply(cmd),
            ProductQuantityCommand::Clear(cmd) => self.handle_clear(cmd),
        }
    }
}

impl ProductQuantity {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.created && self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    /// Product and location of a quant with a pending count.
    fn pending(&self) -> Result<(ProductId, LocationId, i64), DomainError> {
        match (self.product_id, self.location_id, self.counted) {
            (Some(p), Some(l), Some(c)) => Ok((p, l, c)),
            _ => Err(DomainError::invariant("no counted quantity to apply")),
        }
    }

    fn handle_count(&self, cmd: &CountQuantity) -> Result<Vec<ProductQuantityEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        let expected = ProductQuantityId::for_location(cmd.tenant_id, cmd.product_id, cmd.location.id);
        if expected != self.id {
            return Err(DomainError::invariant("quant id does not match product and location"));
        }
        if !cmd.location.usage.is_internal() {
            return Err(DomainError::field(
                "location_id",
                "quantities can only be counted in internal locations",
            ));
        }
        if cmd.counted < 0 {
            return Err(DomainError::field("counted_quantity", "counted quantity cannot be negative"));
        }

        Ok(vec![ProductQuantityEvent::Counted(QuantityCounted {
            tenant_id: cmd.tenant_id,
            quant_id: self.id,
            product_id: cmd.product_id,
            location_id: cmd.location.id,
            counted: cmd.counted,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply(&self, cmd: &ApplyCount) -> Result<Vec<ProductQuantityEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        let (product_id, location_id, counted) = self.pending()?;

        Ok(vec![ProductQuantityEvent::Applied(CountApplied {
            tenant_id: cmd.tenant_id,
            quant_id: self.id,
            product_id,
            location_id,
            counted,
            delta: counted - cmd.on_hand,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearCount) -> Result<Vec<ProductQuantityEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.pending()?;

        Ok(vec![ProductQuantityEvent::Cleared(CountCleared {
            tenant_id: cmd.tenant_id,
            quant_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
