//! Stock levels per product × location.
//!
//! On-hand quantities move only when an operation is validated (or a count is
//! applied). Reservations are the move lines of open operations whose source
//! is an internal location; they are recomputed from a replica of each
//! operation after every event, so the reserved quantity of a quant always
//! equals the sum of the active reservations on it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use kestrel_core::{Aggregate, AggregateId, TenantId};
use kestrel_events::EventEnvelope;
use kestrel_inventory::{
    AvailableQuantity, LocationId, Operation, OperationEvent, OperationId, OperationState,
    ProductQuantity, ProductQuantityEvent,
};
use kestrel_products::ProductId;

use crate::aggregates::EventSourced;
use crate::projections::cursor_store::{check_sequence, CursorCheck, InMemoryCursorStore, ProjectionCursorStore};

const PROJECTION_NAME: &str = "inventory.stock";

/// Stock of one product at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub on_hand: i64,
    pub reserved: i64,
}

impl StockLevel {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    product_id: ProductId,
    location_id: LocationId,
    quantity: i64,
}

#[derive(Debug, Default)]
struct StockState {
    on_hand: HashMap<(TenantId, ProductId, LocationId), i64>,
    reservations: HashMap<(TenantId, OperationId), Vec<Reservation>>,
    operations: HashMap<(TenantId, AggregateId), Operation>,
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("stock projection state is unavailable")]
    Poisoned,
}

/// Projection: operations + counts → on-hand and reserved quantities.
pub struct StockProjection {
    state: RwLock<StockState>,
    cursors: Arc<dyn ProjectionCursorStore>,
}

impl Default for StockProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl StockProjection {
    pub fn new() -> Self {
        Self::with_cursors(Arc::new(InMemoryCursorStore::new()))
    }

    pub fn with_cursors(cursors: Arc<dyn ProjectionCursorStore>) -> Self {
        Self {
            state: RwLock::new(StockState::default()),
            cursors,
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StockProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        if aggregate_type != Operation::AGGREGATE_TYPE && aggregate_type != ProductQuantity::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let last = self
            .cursors
            .get_cursor(tenant_id, aggregate_id, PROJECTION_NAME)
            .unwrap_or(0);
        match check_sequence(last, envelope.sequence_number()) {
            CursorCheck::Skip => return Ok(()),
            CursorCheck::Gap { last, found } => {
                return Err(StockProjectionError::NonMonotonicSequence { last, found });
            }
            CursorCheck::Apply => {}
        }

        let mut state = self.state.write().map_err(|_| StockProjectionError::Poisoned)?;
        if aggregate_type == Operation::AGGREGATE_TYPE {
            let event: OperationEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;
            apply_operation_event(&mut state, tenant_id, aggregate_id, &event)?;
        } else {
            let event: ProductQuantityEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;
            apply_count_event(&mut state, tenant_id, &event)?;
        }
        drop(state);

        self.cursors
            .update_cursor(tenant_id, aggregate_id, PROJECTION_NAME, envelope.sequence_number());
        Ok(())
    }

    pub fn on_hand(&self, tenant_id: TenantId, product_id: ProductId, location_id: LocationId) -> i64 {
        self.state
            .read()
            .ok()
            .and_then(|s| s.on_hand.get(&(tenant_id, product_id, location_id)).copied())
            .unwrap_or(0)
    }

    /// Quantities an operation may reserve or consume: on-hand minus the
    /// reservations of every other operation, for the products it moves.
    pub fn available_for(&self, tenant_id: TenantId, operation_id: OperationId) -> Vec<AvailableQuantity> {
        let Ok(state) = self.state.read() else {
            return vec![];
        };
        let products: BTreeSet<ProductId> = state
            .operations
            .get(&(tenant_id, operation_id.0))
            .map(|op| op.moves().iter().map(|m| m.product_id).collect())
            .unwrap_or_default();

        let mut available: HashMap<(ProductId, LocationId), i64> = HashMap::new();
        for (&(t, product_id, location_id), &qty) in &state.on_hand {
            if t == tenant_id && products.contains(&product_id) {
                *available.entry((product_id, location_id)).or_insert(0) += qty;
            }
        }
        for (&(t, op), reservations) in &state.reservations {
            if t != tenant_id || op == operation_id {
                continue;
            }
            for r in reservations.iter().filter(|r| products.contains(&r.product_id)) {
                *available.entry((r.product_id, r.location_id)).or_insert(0) -= r.quantity;
            }
        }

        available
            .into_iter()
            .map(|((product_id, location_id), quantity)| AvailableQuantity {
                product_id,
                location_id,
                quantity: quantity.max(0),
            })
            .collect()
    }

    /// Every quant of a tenant that has stock or reservations.
    pub fn levels(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        let Ok(state) = self.state.read() else {
            return vec![];
        };

        let mut out: HashMap<(ProductId, LocationId), StockLevel> = HashMap::new();
        for (&(t, product_id, location_id), &qty) in &state.on_hand {
            if t == tenant_id {
                out.entry((product_id, location_id))
                    .or_insert(StockLevel {
                        product_id,
                        location_id,
                        on_hand: 0,
                        reserved: 0,
                    })
                    .on_hand += qty;
            }
        }
        for (&(t, _), reservations) in &state.reservations {
            if t != tenant_id {
                continue;
            }
            for r in reservations {
                out.entry((r.product_id, r.location_id))
                    .or_insert(StockLevel {
                        product_id: r.product_id,
                        location_id: r.location_id,
                        on_hand: 0,
                        reserved: 0,
                    })
                    .reserved += r.quantity;
            }
        }
        out.into_values().collect()
    }

    /// Drop a tenant's stock and replay its history.
    pub fn rebuild(
        &self,
        tenant_id: TenantId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), StockProjectionError> {
        {
            let mut state = self.state.write().map_err(|_| StockProjectionError::Poisoned)?;
            state.on_hand.retain(|(t, _, _), _| *t != tenant_id);
            state.reservations.retain(|(t, _), _| *t != tenant_id);
            state.operations.retain(|(t, _), _| *t != tenant_id);
        }
        self.cursors.clear_cursors(tenant_id, PROJECTION_NAME);
        for envelope in envelopes.iter().filter(|e| e.tenant_id() == tenant_id) {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}

fn apply_operation_event(
    state: &mut StockState,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    event: &OperationEvent,
) -> Result<(), StockProjectionError> {
    let operation = state
        .operations
        .entry((tenant_id, aggregate_id))
        .or_insert_with(|| Operation::empty_stream(aggregate_id));
    operation.apply(event);
    if operation.tenant_id() != Some(tenant_id) {
        return Err(StockProjectionError::TenantIsolation(format!(
            "operation {aggregate_id} does not belong to the envelope tenant"
        )));
    }

    let reservations = reservations_of(operation);
    let operation_id = operation.id_typed();

    if let OperationEvent::Validated(validated) = event {
        for done in &validated.done {
            for line in &done.lines {
                if validated.source.usage.is_internal() {
                    *state.on_hand.entry((tenant_id, done.product_id, line.source)).or_insert(0) -= line.quantity;
                }
                if validated.destination.usage.is_internal() {
                    *state
                        .on_hand
                        .entry((tenant_id, done.product_id, line.destination))
                        .or_insert(0) += line.quantity;
                }
            }
        }
    }

    if reservations.is_empty() {
        state.reservations.remove(&(tenant_id, operation_id));
    } else {
        state.reservations.insert((tenant_id, operation_id), reservations);
    }
    Ok(())
}

/// Active reservations held by an operation.
fn reservations_of(operation: &Operation) -> Vec<Reservation> {
    let reserving = matches!(operation.state(), OperationState::Confirmed | OperationState::Assigned);
    if !reserving || !operation.source().usage.is_internal() {
        return vec![];
    }
    operation
        .moves()
        .iter()
        .filter(|m| !m.state.is_closed())
        .flat_map(|m| {
            m.lines.iter().filter(|l| l.quantity > 0).map(move |l| Reservation {
                product_id: m.product_id,
                location_id: l.source,
                quantity: l.quantity,
            })
        })
        .collect()
}

fn apply_count_event(
    state: &mut StockState,
    tenant_id: TenantId,
    event: &ProductQuantityEvent,
) -> Result<(), StockProjectionError> {
    let event_tenant = match event {
        ProductQuantityEvent::Counted(e) => e.tenant_id,
        ProductQuantityEvent::Applied(e) => e.tenant_id,
        ProductQuantityEvent::Cleared(e) => e.tenant_id,
    };
    if event_tenant != tenant_id {
        return Err(StockProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }

    if let ProductQuantityEvent::Applied(e) = event {
        *state.on_hand.entry((tenant_id, e.product_id, e.location_id)).or_insert(0) += e.delta;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use kestrel_events::{execute, Event};
    use kestrel_inventory::{
        CheckAvailability, CreateOperation, LocationRef, LocationUsage, MarkAsTodo, NewMove,
        OperationCommand, OperationType, ShippingPolicy, ValidateOperation,
    };

    use super::*;

    struct Fixture {
        tenant: TenantId,
        product: ProductId,
        vendors: LocationRef,
        stock: LocationRef,
        customers: LocationRef,
        projection: StockProjection,
    }

    impl Fixture {
        fn new() -> Self {
            let location = |usage| LocationRef::new(LocationId::new(AggregateId::new()), usage);
            Self {
                tenant: TenantId::new(),
                product: ProductId::new(AggregateId::new()),
                vendors: location(LocationUsage::Supplier),
                stock: location(LocationUsage::Internal),
                customers: location(LocationUsage::Customer),
                projection: StockProjection::new(),
            }
        }

        fn create(&self, operation_type: OperationType, source: LocationRef, destination: LocationRef, demand: i64) -> Operation {
            let id = OperationId::new(AggregateId::new());
            let mut op = Operation::empty(id);
            let cmd = OperationCommand::Create(CreateOperation {
                tenant_id: self.tenant,
                operation_id: id,
                operation_type,
                reference: "WH/00001".to_string(),
                partner_id: None,
                source,
                destination,
                source_document: None,
                return_of: None,
                backorder_of: None,
                shipping_policy: ShippingPolicy::Direct,
                scheduled_at: None,
                moves: vec![NewMove { product_id: self.product, demand }],
                occurred_at: Utc::now(),
            });
            self.run(&mut op, cmd);
            op
        }

        fn run(&self, op: &mut Operation, cmd: OperationCommand) {
            let version = kestrel_core::AggregateRoot::version(op);
            let events = execute(op, &cmd).unwrap();
            for (i, event) in events.iter().enumerate() {
                let envelope = EventEnvelope::new(
                    Uuid::now_v7(),
                    self.tenant,
                    op.id_typed().0,
                    "inventory.operation",
                    version + i as u64 + 1,
                    event.event_type(),
                    event.occurred_at(),
                    serde_json::to_value(event).unwrap(),
                );
                self.projection.apply_envelope(&envelope).unwrap();
            }
        }

        fn todo(&self, op: &mut Operation) {
            let cmd = OperationCommand::MarkAsTodo(MarkAsTodo {
                tenant_id: self.tenant,
                operation_id: op.id_typed(),
                occurred_at: Utc::now(),
            });
            self.run(op, cmd);
        }

        fn reserve(&self, op: &mut Operation) {
            let cmd = OperationCommand::CheckAvailability(CheckAvailability {
                tenant_id: self.tenant,
                operation_id: op.id_typed(),
                available: self.projection.available_for(self.tenant, op.id_typed()),
                occurred_at: Utc::now(),
            });
            self.run(op, cmd);
        }

        fn validate(&self, op: &mut Operation) {
            let cmd = OperationCommand::Validate(ValidateOperation {
                tenant_id: self.tenant,
                operation_id: op.id_typed(),
                available: self.projection.available_for(self.tenant, op.id_typed()),
                backorder_id: None,
                occurred_at: Utc::now(),
            });
            self.run(op, cmd);
        }

        fn receive(&self, quantity: i64) {
            let mut receipt = self.create(OperationType::Receipt, self.vendors, self.stock, quantity);
            self.todo(&mut receipt);
            self.validate(&mut receipt);
        }
    }

    #[test]
    fn validated_receipts_increase_on_hand() {
        let f = Fixture::new();
        f.receive(10);

        assert_eq!(f.projection.on_hand(f.tenant, f.product, f.stock.id), 10);
        assert_eq!(f.projection.on_hand(f.tenant, f.product, f.vendors.id), 0);
    }

    #[test]
    fn reservations_reduce_what_other_operations_see() {
        let f = Fixture::new();
        f.receive(10);

        let mut first = f.create(OperationType::Delivery, f.stock, f.customers, 4);
        f.todo(&mut first);
        f.reserve(&mut first);

        let level = f
            .projection
            .levels(f.tenant)
            .into_iter()
            .find(|l| l.location_id == f.stock.id)
            .unwrap();
        assert_eq!((level.on_hand, level.reserved, level.available()), (10, 4, 6));

        let mut second = f.create(OperationType::Delivery, f.stock, f.customers, 8);
        f.todo(&mut second);
        let seen = f.projection.available_for(f.tenant, second.id_typed());
        assert_eq!(seen.iter().map(|a| a.quantity).sum::<i64>(), 6);
    }

    #[test]
    fn validated_deliveries_consume_stock_and_release_reservations() {
        let f = Fixture::new();
        f.receive(5);

        let mut delivery = f.create(OperationType::Delivery, f.stock, f.customers, 3);
        f.todo(&mut delivery);
        f.reserve(&mut delivery);
        f.validate(&mut delivery);

        let level = f
            .projection
            .levels(f.tenant)
            .into_iter()
            .find(|l| l.location_id == f.stock.id)
            .unwrap();
        assert_eq!((level.on_hand, level.reserved), (2, 0));
    }

    #[test]
    fn stock_is_tenant_scoped() {
        let f = Fixture::new();
        f.receive(7);
        assert!(f.projection.levels(TenantId::new()).is_empty());
    }
}
