use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{AggregateId, TenantId};
use kestrel_inventory::{
    AddMove, ApplyCount, ArchiveLocation, CancelOperation, CheckAvailability, ClearCount, CountQuantity,
    CreateLocation, CreateOperation, LineInput, Location, LocationCommand, LocationId, LocationRef,
    LocationUsage, MarkAsTodo, NewMove, Operation, OperationCommand, OperationId, OperationType,
    ProductQuantity, ProductQuantityCommand, ProductQuantityId, ProductQuantityLine, RemoveMove,
    RequestReturn, SetMoveLines, ShippingPolicy, UpdateMoveDemand, ValidateOperation,
};
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;

use super::{found, listed, required, HistoryEntry, ServiceResult, Services};
use crate::bootstrap::default_route;
use crate::command_dispatcher::DispatchError;
use crate::projections::Snapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub name: String,
    pub usage: LocationUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationInput {
    pub partner_id: Option<PartnerId>,
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    #[serde(default)]
    pub shipping_policy: ShippingPolicy,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub moves: Vec<NewMove>,
}

/// One detailed line of a move. Missing locations default to the operation's.
#[derive(Debug, Clone, Deserialize)]
pub struct LineRequest {
    pub quantity: i64,
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    pub lot: Option<String>,
}

/// Stock of one product at one internal location, with its pending count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuantityView {
    pub id: ProductQuantityId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub counted: Option<i64>,
}

impl Services {
    // ---- locations ----

    pub fn create_location(&self, tenant_id: TenantId, input: LocationInput) -> ServiceResult<Snapshot<Location>> {
        let location_id = LocationId::new(AggregateId::new());
        self.write(|s| {
            let name = required("name", &input.name)?;
            if s.views().locations.list(tenant_id).iter().any(|l| l.aggregate.name() == name) {
                return Err(DispatchError::field("name", "a location with this name already exists"));
            }
            s.execute::<Location>(
                tenant_id,
                location_id.0,
                LocationCommand::Create(CreateLocation {
                    tenant_id,
                    location_id,
                    name,
                    usage: input.usage,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.location(tenant_id, location_id)
    }

    pub fn archive_location(&self, tenant_id: TenantId, location_id: LocationId) -> ServiceResult<Snapshot<Location>> {
        self.write(|s| {
            s.execute::<Location>(
                tenant_id,
                location_id.0,
                LocationCommand::Archive(ArchiveLocation {
                    tenant_id,
                    location_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.location(tenant_id, location_id)
    }

    pub fn location(&self, tenant_id: TenantId, location_id: LocationId) -> ServiceResult<Snapshot<Location>> {
        found(&self.views().locations, tenant_id, location_id.0)
    }

    pub fn locations(&self, tenant_id: TenantId) -> Vec<Snapshot<Location>> {
        listed(&self.views().locations, tenant_id)
    }

    fn location_ref(&self, tenant_id: TenantId, location_id: LocationId, field: &'static str) -> ServiceResult<LocationRef> {
        let location = self
            .views()
            .locations
            .get(tenant_id, location_id.0)
            .ok_or_else(|| DispatchError::field(field, "the selected location does not exist"))?
            .aggregate;
        if location.is_archived() {
            return Err(DispatchError::field(field, "the selected location is archived"));
        }
        Ok(location.location_ref())
    }

    // ---- operations ----

    pub fn create_operation(
        &self,
        tenant_id: TenantId,
        operation_type: OperationType,
        input: OperationInput,
    ) -> ServiceResult<Snapshot<Operation>> {
        let operation_id = OperationId::new(AggregateId::new());
        self.write(|s| {
            let (default_source, default_destination) = default_route(operation_type);
            let source = match input.source_location_id {
                Some(id) => s.location_ref(tenant_id, id, "source_location_id")?,
                None => default_source
                    .map(|l| l.location_ref(tenant_id))
                    .ok_or_else(|| DispatchError::field("source_location_id", "source location is required"))?,
            };
            let destination = match input.destination_location_id {
                Some(id) => s.location_ref(tenant_id, id, "destination_location_id")?,
                None => default_destination.map(|l| l.location_ref(tenant_id)).ok_or_else(|| {
                    DispatchError::field("destination_location_id", "destination location is required")
                })?,
            };
            if let Some(partner_id) = input.partner_id {
                s.active_partner(tenant_id, partner_id, "partner_id")?;
            }
            for m in &input.moves {
                s.storable(tenant_id, m.product_id, "moves")?;
            }

            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::Create(CreateOperation {
                    tenant_id,
                    operation_id,
                    operation_type,
                    reference: s.next_reference(tenant_id, operation_type.sequence_prefix()),
                    partner_id: input.partner_id,
                    source,
                    destination,
                    source_document: None,
                    return_of: None,
                    backorder_of: None,
                    shipping_policy: input.shipping_policy,
                    scheduled_at: input.scheduled_at,
                    moves: input.moves.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    pub fn add_move(&self, tenant_id: TenantId, operation_id: OperationId, new_move: NewMove) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| {
            s.storable(tenant_id, new_move.product_id, "product_id")?;
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::AddMove(AddMove {
                    tenant_id,
                    operation_id,
                    product_id: new_move.product_id,
                    demand: new_move.demand,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    pub fn update_move_demand(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        move_no: u32,
        demand: i64,
    ) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| {
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::UpdateMoveDemand(UpdateMoveDemand {
                    tenant_id,
                    operation_id,
                    move_no,
                    demand,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    pub fn remove_move(&self, tenant_id: TenantId, operation_id: OperationId, move_no: u32) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| {
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::RemoveMove(RemoveMove {
                    tenant_id,
                    operation_id,
                    move_no,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    pub fn mark_as_todo(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| s.confirm_operation(tenant_id, operation_id))?;
        self.operation(tenant_id, operation_id)
    }

    pub fn check_availability(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| s.reserve_operation(tenant_id, operation_id))?;
        self.operation(tenant_id, operation_id)
    }

    /// Replace the detailed lines of one move.
    pub fn set_move_lines(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        move_no: u32,
        lines: Vec<LineRequest>,
    ) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| {
            let mut inputs = Vec::with_capacity(lines.len());
            for line in &lines {
                inputs.push(LineInput {
                    quantity: line.quantity,
                    source: line
                        .source_location_id
                        .map(|id| s.location_ref(tenant_id, id, "source_location_id"))
                        .transpose()?,
                    destination: line
                        .destination_location_id
                        .map(|id| s.location_ref(tenant_id, id, "destination_location_id"))
                        .transpose()?,
                    lot: line.lot.clone(),
                });
            }
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::SetMoveLines(SetMoveLines {
                    tenant_id,
                    operation_id,
                    move_no,
                    lines: inputs,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    /// Validate the processed quantities. With `create_backorder`, remaining
    /// demand moves to a new confirmed operation.
    pub fn validate_operation(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        create_backorder: bool,
    ) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| {
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::Validate(ValidateOperation {
                    tenant_id,
                    operation_id,
                    available: s.views().stock.available_for(tenant_id, operation_id),
                    backorder_id: create_backorder.then(|| OperationId::new(AggregateId::new())),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, operation_id)
    }

    pub fn cancel_operation(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<Snapshot<Operation>> {
        self.write(|s| s.cancel_operation_document(tenant_id, operation_id))?;
        self.operation(tenant_id, operation_id)
    }

    /// Return goods of a done operation; returns the new return operation.
    ///
    /// Without lines, everything still returnable is sent back.
    pub fn return_operation(
        &self,
        tenant_id: TenantId,
        operation_id: OperationId,
        lines: Vec<ProductQuantityLine>,
    ) -> ServiceResult<Snapshot<Operation>> {
        let return_operation_id = OperationId::new(AggregateId::new());
        self.write(|s| {
            let lines = if lines.is_empty() {
                let original = s.operation(tenant_id, operation_id)?.aggregate;
                returnable_lines(&original)
            } else {
                lines.clone()
            };
            s.execute::<Operation>(
                tenant_id,
                operation_id.0,
                OperationCommand::RequestReturn(RequestReturn {
                    tenant_id,
                    operation_id,
                    return_operation_id,
                    lines,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.operation(tenant_id, return_operation_id)
    }

    pub fn operation(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<Snapshot<Operation>> {
        found(&self.views().operations, tenant_id, operation_id.0)
    }

    pub fn operations(&self, tenant_id: TenantId, operation_type: Option<OperationType>) -> Vec<Snapshot<Operation>> {
        listed(&self.views().operations, tenant_id)
            .into_iter()
            .filter(|op| operation_type.map_or(true, |t| op.aggregate.operation_type() == t))
            .collect()
    }

    pub fn operation_history(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<Vec<HistoryEntry>> {
        self.history(tenant_id, operation_id.0)
    }

    pub(crate) fn confirm_operation(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<()> {
        self.execute::<Operation>(
            tenant_id,
            operation_id.0,
            OperationCommand::MarkAsTodo(MarkAsTodo {
                tenant_id,
                operation_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Reserve what the stock projection currently allows.
    pub(crate) fn reserve_operation(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<()> {
        self.execute::<Operation>(
            tenant_id,
            operation_id.0,
            OperationCommand::CheckAvailability(CheckAvailability {
                tenant_id,
                operation_id,
                available: self.views().stock.available_for(tenant_id, operation_id),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub(crate) fn cancel_operation_document(&self, tenant_id: TenantId, operation_id: OperationId) -> ServiceResult<()> {
        self.execute::<Operation>(
            tenant_id,
            operation_id.0,
            OperationCommand::Cancel(CancelOperation {
                tenant_id,
                operation_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Create an operation and mark it as to do (workflow-generated documents).
    pub(crate) fn open_operation(&self, command: CreateOperation) -> ServiceResult<()> {
        let (tenant_id, operation_id) = (command.tenant_id, command.operation_id);
        self.execute::<Operation>(tenant_id, operation_id.0, OperationCommand::Create(command))?;
        self.confirm_operation(tenant_id, operation_id)
    }

    // ---- quantities ----

    /// Record a physical count of a product at an internal location.
    pub fn count_quantity(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: LocationId,
        counted: i64,
    ) -> ServiceResult<QuantityView> {
        let quant_id = ProductQuantityId::for_location(tenant_id, product_id, location_id);
        self.write(|s| {
            s.storable(tenant_id, product_id, "product_id")?;
            let location = s.location_ref(tenant_id, location_id, "location_id")?;
            s.execute::<ProductQuantity>(
                tenant_id,
                quant_id.0,
                ProductQuantityCommand::Count(CountQuantity {
                    tenant_id,
                    product_id,
                    location,
                    counted,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.quantity(tenant_id, quant_id)
    }

    /// Move on-hand to the counted quantity.
    pub fn apply_count(&self, tenant_id: TenantId, quant_id: ProductQuantityId) -> ServiceResult<QuantityView> {
        self.write(|s| {
            let quant = found(&s.views().counts, tenant_id, quant_id.0)?.aggregate;
            let on_hand = match (quant.product_id(), quant.location_id()) {
                (Some(product_id), Some(location_id)) => s.views().stock.on_hand(tenant_id, product_id, location_id),
                _ => 0,
            };
            s.execute::<ProductQuantity>(
                tenant_id,
                quant_id.0,
                ProductQuantityCommand::Apply(ApplyCount {
                    tenant_id,
                    on_hand,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.quantity(tenant_id, quant_id)
    }

    pub fn clear_count(&self, tenant_id: TenantId, quant_id: ProductQuantityId) -> ServiceResult<QuantityView> {
        self.write(|s| {
            s.execute::<ProductQuantity>(
                tenant_id,
                quant_id.0,
                ProductQuantityCommand::Clear(ClearCount {
                    tenant_id,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.quantity(tenant_id, quant_id)
    }

    pub fn quantity(&self, tenant_id: TenantId, quant_id: ProductQuantityId) -> ServiceResult<QuantityView> {
        self.quantities(tenant_id)
            .into_iter()
            .find(|q| q.id == quant_id)
            .ok_or(DispatchError::NotFound)
    }

    /// Stock levels merged with pending counts, ordered by product then location.
    pub fn quantities(&self, tenant_id: TenantId) -> Vec<QuantityView> {
        let mut out: BTreeMap<(ProductId, LocationId), QuantityView> = BTreeMap::new();
        for level in self.views().stock.levels(tenant_id) {
            out.insert(
                (level.product_id, level.location_id),
                QuantityView {
                    id: ProductQuantityId::for_location(tenant_id, level.product_id, level.location_id),
                    product_id: level.product_id,
                    location_id: level.location_id,
                    on_hand: level.on_hand,
                    reserved: level.reserved,
                    available: level.available(),
                    counted: None,
                },
            );
        }
        for snapshot in self.views().counts.list(tenant_id) {
            let quant = snapshot.aggregate;
            let (Some(product_id), Some(location_id)) = (quant.product_id(), quant.location_id()) else {
                continue;
            };
            out.entry((product_id, location_id))
                .or_insert(QuantityView {
                    id: ProductQuantityId::for_location(tenant_id, product_id, location_id),
                    product_id,
                    location_id,
                    on_hand: 0,
                    reserved: 0,
                    available: 0,
                    counted: None,
                })
                .counted = quant.counted();
        }
        out.into_values().collect()
    }
}

/// Done minus already returned, for every product of the operation.
fn returnable_lines(operation: &Operation) -> Vec<ProductQuantityLine> {
    let products: BTreeSet<ProductId> = operation.moves().iter().map(|m| m.product_id).collect();
    products
        .into_iter()
        .map(|product_id| ProductQuantityLine {
            product_id,
            quantity: operation.done_quantity(product_id) - operation.returned_quantity(product_id),
        })
        .filter(|line| line.quantity > 0)
        .collect()
}
