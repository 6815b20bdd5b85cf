//! Stock operation (picking): receipts, deliveries, internal transfers and dropships.
//!
//! An operation groups stock moves between a source and a destination location.
//! Its state is never set directly: it is derived from the states of its moves
//! after every applied event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;

use crate::location::{LocationId, LocationRef, LocationUsage};

/// Largest demand or done quantity a single move may carry.
pub const MAX_MOVE_QUANTITY: i64 = 1_000_000_000_000;

/// Operation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub AggregateId);

impl OperationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Receipt,
    Delivery,
    Internal,
    Dropship,
}

impl OperationType {
    /// Prefix of the generated reference (`WH/IN/00001`, ...).
    pub fn sequence_prefix(self) -> &'static str {
        match self {
            OperationType::Receipt => "WH/IN/",
            OperationType::Delivery => "WH/OUT/",
            OperationType::Internal => "WH/INT/",
            OperationType::Dropship => "WH/DS/",
        }
    }

    /// Type of the operation that returns goods of this type.
    pub fn return_type(self) -> Self {
        match self {
            OperationType::Receipt => OperationType::Delivery,
            OperationType::Delivery => OperationType::Receipt,
            other => other,
        }
    }

    /// Check the location usages allowed for this type.
    pub fn check_locations(self, source: &LocationRef, destination: &LocationRef) -> Result<(), DomainError> {
        if source.id == destination.id {
            return Err(DomainError::field(
                "destination_location_id",
                "source and destination locations must differ",
            ));
        }
        if source.usage == LocationUsage::View {
            return Err(DomainError::field("source_location_id", "view locations cannot hold stock"));
        }
        if destination.usage == LocationUsage::View {
            return Err(DomainError::field(
                "destination_location_id",
                "view locations cannot hold stock",
            ));
        }

        let (src, dst) = (source.usage, destination.usage);
        let allowed = match self {
            OperationType::Receipt => !src.is_internal() && dst.is_internal(),
            OperationType::Delivery => src.is_internal() && !dst.is_internal(),
            OperationType::Internal => src.is_internal() && dst.is_internal(),
            OperationType::Dropship => {
                src == LocationUsage::Supplier && dst == LocationUsage::Customer
            }
        };
        if !allowed {
            return Err(DomainError::validation(format!(
                "a {self:?} cannot move stock from a {src:?} location to a {dst:?} location"
            )
            .to_lowercase()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Draft,
    Confirmed,
    Assigned,
    Done,
    Canceled,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Draft => "draft",
            OperationState::Confirmed => "confirmed",
            OperationState::Assigned => "assigned",
            OperationState::Done => "done",
            OperationState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    Draft,
    Confirmed,
    PartiallyAvailable,
    Assigned,
    Done,
    Canceled,
}

impl MoveState {
    pub fn is_closed(self) -> bool {
        matches!(self, MoveState::Done | MoveState::Canceled)
    }

    /// Reservation state of an open move holding `quantity` of `demand`.
    fn from_reservation(quantity: i64, demand: i64) -> Self {
        if quantity >= demand {
            MoveState::Assigned
        } else if quantity > 0 {
            MoveState::PartiallyAvailable
        } else {
            MoveState::Confirmed
        }
    }
}

/// When an operation counts as ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingPolicy {
    /// As soon as any product is reserved.
    #[default]
    Direct,
    /// When all products are reserved.
    One,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDocumentKind {
    PurchaseOrder,
    SalesOrder,
    Operation,
}

/// The business document an operation was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub kind: SourceDocumentKind,
    pub id: AggregateId,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveLine {
    pub line_no: u32,
    pub quantity: i64,
    pub source: LocationId,
    pub destination: LocationId,
    pub lot: Option<String>,
}

/// A product moved by an operation. `quantity` is always the sum of `lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMove {
    pub move_no: u32,
    pub product_id: ProductId,
    pub demand: i64,
    pub quantity: i64,
    pub state: MoveState,
    pub lines: Vec<MoveLine>,
}

impl StockMove {
    fn new(move_no: u32, product_id: ProductId, demand: i64) -> Self {
        Self {
            move_no,
            product_id,
            demand,
            quantity: 0,
            state: MoveState::Draft,
            lines: Vec::new(),
        }
    }

    fn set_lines(&mut self, lines: Vec<MoveLine>) {
        self.quantity = lines.iter().fold(0i64, |sum, l| sum.saturating_add(l.quantity));
        self.lines = lines;
    }

    fn next_line_no(&self) -> u32 {
        self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1
    }
}

/// Quantity available for reservation at a location (on hand minus the
/// reservations of other operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableQuantity {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

fn availability_map(available: &[AvailableQuantity]) -> BTreeMap<(ProductId, LocationId), i64> {
    let mut map = BTreeMap::new();
    for a in available {
        *map.entry((a.product_id, a.location_id)).or_insert(0) += a.quantity;
    }
    map
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMove {
    pub product_id: ProductId,
    pub demand: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuantityLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: Operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    id: OperationId,
    tenant_id: Option<TenantId>,
    operation_type: OperationType,
    reference: String,
    partner_id: Option<PartnerId>,
    source: LocationRef,
    destination: LocationRef,
    source_document: Option<SourceDocument>,
    return_of: Option<OperationId>,
    backorder_of: Option<OperationId>,
    shipping_policy: ShippingPolicy,
    scheduled_at: Option<DateTime<Utc>>,
    moves: Vec<StockMove>,
    returned: BTreeMap<ProductId, i64>,
    next_move_no: u32,
    canceled: bool,
    state: OperationState,
    version: u64,
    created: bool,
}

impl Operation {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OperationId) -> Self {
        let nowhere = LocationRef::new(LocationId::new(AggregateId::from_uuid(Default::default())), LocationUsage::View);
        Self {
            id,
            tenant_id: None,
            operation_type: OperationType::Internal,
            reference: String::new(),
            partner_id: None,
            source: nowhere,
            destination: nowhere,
            source_document: None,
            return_of: None,
            backorder_of: None,
            shipping_policy: ShippingPolicy::Direct,
            scheduled_at: None,
            moves: Vec::new(),
            returned: BTreeMap::new(),
            next_move_no: 1,
            canceled: false,
            state: OperationState::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OperationId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        self.partner_id
    }

    pub fn source(&self) -> LocationRef {
        self.source
    }

    pub fn destination(&self) -> LocationRef {
        self.destination
    }

    pub fn source_document(&self) -> Option<&SourceDocument> {
        self.source_document.as_ref()
    }

    pub fn return_of(&self) -> Option<OperationId> {
        self.return_of
    }

    pub fn backorder_of(&self) -> Option<OperationId> {
        self.backorder_of
    }

    pub fn shipping_policy(&self) -> ShippingPolicy {
        self.shipping_policy
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn moves(&self) -> &[StockMove] {
        &self.moves
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Quantity of `product_id` already sent back through returns.
    pub fn returned_quantity(&self, product_id: ProductId) -> i64 {
        self.returned.get(&product_id).copied().unwrap_or(0)
    }

    /// Done quantity of `product_id` on this operation.
    pub fn done_quantity(&self, product_id: ProductId) -> i64 {
        self.moves
            .iter()
            .filter(|m| m.product_id == product_id && m.state == MoveState::Done)
            .map(|m| m.quantity)
            .sum()
    }

    fn derive_state(&self) -> OperationState {
        if self.canceled {
            return OperationState::Canceled;
        }
        if self.moves.is_empty() {
            return OperationState::Draft;
        }
        if self.moves.iter().all(|m| m.state == MoveState::Canceled) {
            return OperationState::Canceled;
        }
        if self.moves.iter().all(|m| m.state.is_closed()) {
            return OperationState::Done;
        }
        if self.moves.iter().any(|m| m.state == MoveState::Draft) {
            return OperationState::Draft;
        }

        let mut open = self.moves.iter().filter(|m| !m.state.is_closed());
        let ready = match self.shipping_policy {
            ShippingPolicy::Direct => {
                open.any(|m| matches!(m.state, MoveState::Assigned | MoveState::PartiallyAvailable))
            }
            ShippingPolicy::One => open.all(|m| m.state == MoveState::Assigned),
        };
        if ready {
            OperationState::Assigned
        } else {
            OperationState::Confirmed
        }
    }

    fn move_mut(&mut self, move_no: u32) -> Option<&mut StockMove> {
        self.moves.iter_mut().find(|m| m.move_no == move_no)
    }

    fn find_move(&self, move_no: u32) -> Result<&StockMove, DomainError> {
        self.moves
            .iter()
            .find(|m| m.move_no == move_no)
            .ok_or_else(|| DomainError::field("move_no", format!("operation has no move {move_no}")))
    }

    fn default_line(&self, line_no: u32, quantity: i64) -> MoveLine {
        MoveLine {
            line_no,
            quantity,
            source: self.source.id,
            destination: self.destination.id,
            lot: None,
        }
    }
}

impl AggregateRoot for Operation {
    type Id = OperationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ---- commands ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub reference: String,
    pub partner_id: Option<PartnerId>,
    pub source: LocationRef,
    pub destination: LocationRef,
    pub source_document: Option<SourceDocument>,
    pub return_of: Option<OperationId>,
    pub backorder_of: Option<OperationId>,
    pub shipping_policy: ShippingPolicy,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub moves: Vec<NewMove>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMove {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub product_id: ProductId,
    pub demand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMoveDemand {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub demand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMove {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkAsTodo (confirm a draft operation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAsTodo {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckAvailability {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub available: Vec<AvailableQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// One line of a `SetMoveLines` command. Missing locations default to the
/// operation's source/destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub quantity: i64,
    pub source: Option<LocationRef>,
    pub destination: Option<LocationRef>,
    pub lot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMoveLines {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub lines: Vec<LineInput>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub available: Vec<AvailableQuantity>,
    /// When set, remaining demand is moved to a new operation with this id.
    pub backorder_id: Option<OperationId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOperation {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReturn {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub return_operation_id: OperationId,
    pub lines: Vec<ProductQuantityLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationCommand {
    Create(CreateOperation),
    AddMove(AddMove),
    UpdateMoveDemand(UpdateMoveDemand),
    RemoveMove(RemoveMove),
    MarkAsTodo(MarkAsTodo),
    CheckAvailability(CheckAvailability),
    SetMoveLines(SetMoveLines),
    Validate(ValidateOperation),
    Cancel(CancelOperation),
    RequestReturn(RequestReturn),
}

// ---- events ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMove {
    pub move_no: u32,
    pub product_id: ProductId,
    pub demand: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCreated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub reference: String,
    pub partner_id: Option<PartnerId>,
    pub source: LocationRef,
    pub destination: LocationRef,
    pub source_document: Option<SourceDocument>,
    pub return_of: Option<OperationId>,
    pub backorder_of: Option<OperationId>,
    pub shipping_policy: ShippingPolicy,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub moves: Vec<CreatedMove>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAdded {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub product_id: ProductId,
    pub demand: i64,
    pub state: MoveState,
    pub lines: Vec<MoveLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDemandUpdated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub demand: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRemoved {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub move_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// New line set of one move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveLinesAssigned {
    pub move_no: u32,
    pub product_id: ProductId,
    pub lines: Vec<MoveLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfirmed {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub moves: Vec<MoveLinesAssigned>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub moves: Vec<MoveLinesAssigned>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveLinesSet {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub assigned: MoveLinesAssigned,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneMove {
    pub move_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub lines: Vec<MoveLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderRequest {
    pub operation_id: OperationId,
    pub moves: Vec<NewMove>,
}

/// Event: OperationValidated.
///
/// Self-contained so that stock and order projections need no other state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationValidated {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub operation_type: OperationType,
    pub reference: String,
    pub partner_id: Option<PartnerId>,
    pub source: LocationRef,
    pub destination: LocationRef,
    pub source_document: Option<SourceDocument>,
    pub return_of: Option<OperationId>,
    pub shipping_policy: ShippingPolicy,
    pub done: Vec<DoneMove>,
    pub canceled_moves: Vec<u32>,
    pub backorder: Option<BackorderRequest>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCanceled {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequested {
    pub tenant_id: TenantId,
    pub operation_id: OperationId,
    pub reference: String,
    pub return_operation_id: OperationId,
    pub return_type: OperationType,
    pub partner_id: Option<PartnerId>,
    /// Source of the return (the original destination).
    pub source: LocationRef,
    /// Destination of the return (the original source).
    pub destination: LocationRef,
    pub source_document: Option<SourceDocument>,
    pub lines: Vec<ProductQuantityLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationEvent {
    Created(OperationCreated),
    MoveAdded(MoveAdded),
    MoveDemandUpdated(MoveDemandUpdated),
    MoveRemoved(MoveRemoved),
    Confirmed(OperationConfirmed),
    StockReserved(StockReserved),
    MoveLinesSet(MoveLinesSet),
    Validated(OperationValidated),
    Canceled(OperationCanceled),
    ReturnRequested(ReturnRequested),
}

impl Event for OperationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OperationEvent::Created(_) => "inventory.operation.created",
            OperationEvent::MoveAdded(_) => "inventory.operation.move_added",
            OperationEvent::MoveDemandUpdated(_) => "inventory.operation.move_demand_updated",
            OperationEvent::MoveRemoved(_) => "inventory.operation.move_removed",
            OperationEvent::Confirmed(_) => "inventory.operation.confirmed",
            OperationEvent::StockReserved(_) => "inventory.operation.stock_reserved",
            OperationEvent::MoveLinesSet(_) => "inventory.operation.move_lines_set",
            OperationEvent::Validated(_) => "inventory.operation.validated",
            OperationEvent::Canceled(_) => "inventory.operation.canceled",
            OperationEvent::ReturnRequested(_) => "inventory.operation.return_requested",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OperationEvent::Created(e) => e.occurred_at,
            OperationEvent::MoveAdded(e) => e.occurred_at,
            OperationEvent::MoveDemandUpdated(e) => e.occurred_at,
            OperationEvent::MoveRemoved(e) => e.occurred_at,
            OperationEvent::Confirmed(e) => e.occurred_at,
            OperationEvent::StockReserved(e) => e.occurred_at,
            OperationEvent::MoveLinesSet(e) => e.occurred_at,
            OperationEvent::Validated(e) => e.occurred_at,
            OperationEvent::Canceled(e) => e.occurred_at,
            OperationEvent::ReturnRequested(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Operation {
    type Command = OperationCommand;
    type Event = OperationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OperationEvent::Created(e) => {
                self.id = e.operation_id;
                self.tenant_id = Some(e.tenant_id);
                self.operation_type = e.operation_type;
                self.reference = e.reference.clone();
                self.partner_id = e.partner_id;
                self.source = e.source;
                self.destination = e.destination;
                self.source_document = e.source_document.clone();
                self.return_of = e.return_of;
                self.backorder_of = e.backorder_of;
                self.shipping_policy = e.shipping_policy;
                self.scheduled_at = e.scheduled_at;
                self.moves = e
                    .moves
                    .iter()
                    .map(|m| StockMove::new(m.move_no, m.product_id, m.demand))
                    .collect();
                self.next_move_no = e.moves.iter().map(|m| m.move_no).max().unwrap_or(0) + 1;
                self.created = true;
            }
            OperationEvent::MoveAdded(e) => {
                let mut mv = StockMove::new(e.move_no, e.product_id, e.demand);
                mv.set_lines(e.lines.clone());
                mv.state = e.state;
                self.moves.push(mv);
                self.next_move_no = self.next_move_no.max(e.move_no + 1);
            }
            OperationEvent::MoveDemandUpdated(e) => {
                if let Some(mv) = self.move_mut(e.move_no) {
                    mv.demand = e.demand;
                }
            }
            OperationEvent::MoveRemoved(e) => {
                self.moves.retain(|m| m.move_no != e.move_no);
            }
            OperationEvent::Confirmed(e) => {
                for assigned in &e.moves {
                    if let Some(mv) = self.move_mut(assigned.move_no) {
                        mv.set_lines(assigned.lines.clone());
                        mv.state = MoveState::from_reservation(mv.quantity, mv.demand);
                    }
                }
            }
            OperationEvent::StockReserved(e) => {
                for assigned in &e.moves {
                    if let Some(mv) = self.move_mut(assigned.move_no) {
                        mv.set_lines(assigned.lines.clone());
                        mv.state = MoveState::from_reservation(mv.quantity, mv.demand);
                    }
                }
            }
            OperationEvent::MoveLinesSet(e) => {
                if let Some(mv) = self.move_mut(e.assigned.move_no) {
                    mv.set_lines(e.assigned.lines.clone());
                    if mv.state != MoveState::Draft {
                        mv.state = MoveState::from_reservation(mv.quantity, mv.demand);
                    }
                }
            }
            OperationEvent::Validated(e) => {
                for done in &e.done {
                    if let Some(mv) = self.move_mut(done.move_no) {
                        mv.set_lines(done.lines.clone());
                        mv.state = MoveState::Done;
                    }
                }
                for move_no in &e.canceled_moves {
                    if let Some(mv) = self.move_mut(*move_no) {
                        mv.state = MoveState::Canceled;
                    }
                }
            }
            OperationEvent::Canceled(_) => {
                for mv in self.moves.iter_mut().filter(|m| !m.state.is_closed()) {
                    mv.state = MoveState::Canceled;
                }
                self.canceled = true;
            }
            OperationEvent::ReturnRequested(e) => {
                for line in &e.lines {
                    *self.returned.entry(line.product_id).or_insert(0) += line.quantity;
                }
            }
        }

        self.state = self.derive_state();
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OperationCommand::Create(cmd) => self.handle_create(cmd),
            OperationCommand::AddMove(cmd) => self.handle_add_move(cmd),
            OperationCommand::UpdateMoveDemand(cmd) => self.handle_update_demand(cmd),
            OperationCommand::RemoveMove(cmd) => self.handle_remove_move(cmd),
            OperationCommand::MarkAsTodo(cmd) => self.handle_todo(cmd),
            OperationCommand::CheckAvailability(cmd) => self.handle_check_availability(cmd),
            OperationCommand::SetMoveLines(cmd) => self.handle_set_lines(cmd),
            OperationCommand::Validate(cmd) => self.handle_validate(cmd),
            OperationCommand::Cancel(cmd) => self.handle_cancel(cmd),
            OperationCommand::RequestReturn(cmd) => self.handle_return(cmd),
        }
    }
}

fn ensure_positive_demand(demand: i64) -> Result<(), DomainError> {
    if demand <= 0 {
        return Err(DomainError::field("demand", "demand must be greater than zero"));
    }
    if demand > MAX_MOVE_QUANTITY {
        return Err(DomainError::field(
            "demand",
            format!("demand cannot exceed {MAX_MOVE_QUANTITY}"),
        ));
    }
    Ok(())
}

impl Operation {
    fn ensure_existing(&self, tenant_id: TenantId, operation_id: OperationId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != operation_id {
            return Err(DomainError::invariant("operation_id mismatch"));
        }
        Ok(())
    }

    fn ensure_state(&self, allowed: &[OperationState], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        Err(DomainError::invariant(format!(
            "only {} operations can be {action} (operation {} is {})",
            names.join(" or "),
            self.reference,
            self.state.as_str()
        )))
    }

    fn open_moves(&self) -> impl Iterator<Item = &StockMove> {
        self.moves.iter().filter(|m| !m.state.is_closed())
    }

    fn handle_create(&self, cmd: &CreateOperation) -> Result<Vec<OperationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("operation already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::field("reference", "reference cannot be empty"));
        }
        let route = cmd.operation_type.check_locations(&cmd.source, &cmd.destination);
        // A dropship return may send the goods back from the customer to the vendor.
        if route.is_err() && cmd.operation_type == OperationType::Dropship && cmd.return_of.is_some() {
            cmd.operation_type.check_locations(&cmd.destination, &cmd.source)?;
        } else {
            route?;
        }
        for m in &cmd.moves {
            ensure_positive_demand(m.demand)?;
        }

        let moves = cmd
            .moves
            .iter()
            .zip(1u32..)
            .map(|(m, move_no)| CreatedMove {
                move_no,
                product_id: m.product_id,
                demand: m.demand,
            })
            .collect();

        Ok(vec![OperationEvent::Created(OperationCreated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            operation_type: cmd.operation_type,
            reference: cmd.reference.trim().to_string(),
            partner_id: cmd.partner_id,
            source: cmd.source,
            destination: cmd.destination,
            source_document: cmd.source_document.clone(),
            return_of: cmd.return_of,
            backorder_of: cmd.backorder_of,
            shipping_policy: cmd.shipping_policy,
            scheduled_at: cmd.scheduled_at,
            moves,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_move(&self, cmd: &AddMove) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(
            &[OperationState::Draft, OperationState::Confirmed, OperationState::Assigned],
            "changed",
        )?;
        ensure_positive_demand(cmd.demand)?;

        // Moves added after confirmation are confirmed right away, like the rest.
        let (state, lines) = if self.state == OperationState::Draft {
            (MoveState::Draft, Vec::new())
        } else if self.source.usage.is_internal() {
            (MoveState::Confirmed, Vec::new())
        } else {
            (MoveState::Assigned, vec![self.default_line(1, cmd.demand)])
        };

        Ok(vec![OperationEvent::MoveAdded(MoveAdded {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            move_no: self.next_move_no,
            product_id: cmd.product_id,
            demand: cmd.demand,
            state,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_demand(&self, cmd: &UpdateMoveDemand) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(&[OperationState::Draft], "changed")?;
        self.find_move(cmd.move_no)?;
        ensure_positive_demand(cmd.demand)?;

        Ok(vec![OperationEvent::MoveDemandUpdated(MoveDemandUpdated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            move_no: cmd.move_no,
            demand: cmd.demand,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_move(&self, cmd: &RemoveMove) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(&[OperationState::Draft], "changed")?;
        self.find_move(cmd.move_no)?;

        Ok(vec![OperationEvent::MoveRemoved(MoveRemoved {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            move_no: cmd.move_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_todo(&self, cmd: &MarkAsTodo) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(&[OperationState::Draft], "marked as to do")?;
        if self.moves.is_empty() {
            return Err(DomainError::invariant("add some products to move before marking as to do"));
        }

        // Goods coming from outside the company are reserved in full.
        let reserve_all = !self.source.usage.is_internal();
        let moves = self
            .moves
            .iter()
            .map(|m| MoveLinesAssigned {
                move_no: m.move_no,
                product_id: m.product_id,
                lines: if reserve_all {
                    vec![self.default_line(1, m.demand)]
                } else {
                    m.lines.clone()
                },
            })
            .collect();

        Ok(vec![OperationEvent::Confirmed(OperationConfirmed {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            moves,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_check_availability(&self, cmd: &CheckAvailability) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(
            &[OperationState::Confirmed, OperationState::Assigned],
            "checked for availability",
        )?;
        if !self.source.usage.is_internal() {
            return Err(DomainError::invariant(
                "availability is only checked for operations taking stock from internal locations",
            ));
        }

        let mut free = availability_map(&cmd.available);
        for mv in self.open_moves() {
            for line in &mv.lines {
                *free.entry((mv.product_id, line.source)).or_insert(0) -= line.quantity;
            }
        }

        let mut reserved = Vec::new();
        for mv in self.open_moves() {
            let remaining = mv.demand - mv.quantity;
            if remaining <= 0 {
                continue;
            }
            let slot = free.entry((mv.product_id, self.source.id)).or_insert(0);
            let take = remaining.min((*slot).max(0));
            if take == 0 {
                continue;
            }
            *slot -= take;

            let mut lines = mv.lines.clone();
            match lines.iter_mut().find(|l| {
                l.lot.is_none() && l.source == self.source.id && l.destination == self.destination.id
            }) {
                Some(line) => line.quantity += take,
                None => lines.push(self.default_line(mv.next_line_no(), take)),
            }
            reserved.push(MoveLinesAssigned {
                move_no: mv.move_no,
                product_id: mv.product_id,
                lines,
            });
        }

        if reserved.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![OperationEvent::StockReserved(StockReserved {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            moves: reserved,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_lines(&self, cmd: &SetMoveLines) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(
            &[OperationState::Draft, OperationState::Confirmed, OperationState::Assigned],
            "changed",
        )?;
        let mv = self.find_move(cmd.move_no)?;
        if mv.state.is_closed() {
            return Err(DomainError::invariant(format!("move {} is already closed", mv.move_no)));
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut total: i64 = 0;
        for (input, line_no) in cmd.lines.iter().zip(1u32..) {
            if input.quantity < 0 {
                return Err(DomainError::field("lines", "line quantities cannot be negative"));
            }
            total = total
                .checked_add(input.quantity)
                .filter(|t| *t <= MAX_MOVE_QUANTITY)
                .ok_or_else(|| {
                    DomainError::field("lines", format!("move quantity cannot exceed {MAX_MOVE_QUANTITY}"))
                })?;
            let source = input.source.unwrap_or(self.source);
            let destination = input.destination.unwrap_or(self.destination);
            if source.usage != self.source.usage {
                return Err(DomainError::field(
                    "lines",
                    "line source must have the same usage as the operation source",
                ));
            }
            if destination.usage != self.destination.usage {
                return Err(DomainError::field(
                    "lines",
                    "line destination must have the same usage as the operation destination",
                ));
            }
            lines.push(MoveLine {
                line_no,
                quantity: input.quantity,
                source: source.id,
                destination: destination.id,
                lot: input.lot.clone().filter(|l| !l.trim().is_empty()),
            });
        }

        Ok(vec![OperationEvent::MoveLinesSet(MoveLinesSet {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            assigned: MoveLinesAssigned {
                move_no: mv.move_no,
                product_id: mv.product_id,
                lines,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_validate(&self, cmd: &ValidateOperation) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(&[OperationState::Confirmed, OperationState::Assigned], "validated")?;

        if self.open_moves().all(|m| m.quantity <= 0) {
            return Err(DomainError::invariant(
                "nothing to validate: set quantities on at least one move",
            ));
        }

        if self.source.usage.is_internal() {
            let available = availability_map(&cmd.available);
            let mut requested: BTreeMap<(ProductId, LocationId), i64> = BTreeMap::new();
            for mv in self.open_moves() {
                for line in &mv.lines {
                    *requested.entry((mv.product_id, line.source)).or_insert(0) += line.quantity;
                }
            }
            for ((product_id, location_id), quantity) in requested {
                let on_hand = available.get(&(product_id, location_id)).copied().unwrap_or(0);
                if quantity > on_hand {
                    return Err(DomainError::invariant(format!(
                        "not enough stock of product {product_id} at location {location_id}: \
                         {quantity} requested, {on_hand} available"
                    )));
                }
            }
        }

        let mut done = Vec::new();
        let mut canceled_moves = Vec::new();
        let mut remainders = Vec::new();
        for mv in self.open_moves() {
            if mv.quantity > 0 {
                done.push(DoneMove {
                    move_no: mv.move_no,
                    product_id: mv.product_id,
                    quantity: mv.quantity,
                    lines: mv.lines.iter().filter(|l| l.quantity > 0).cloned().collect(),
                });
            } else {
                canceled_moves.push(mv.move_no);
            }
            if mv.demand > mv.quantity {
                remainders.push(NewMove {
                    product_id: mv.product_id,
                    demand: mv.demand - mv.quantity,
                });
            }
        }

        let backorder = match cmd.backorder_id {
            Some(operation_id) if !remainders.is_empty() => Some(BackorderRequest {
                operation_id,
                moves: remainders,
            }),
            _ => None,
        };

        Ok(vec![OperationEvent::Validated(OperationValidated {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            operation_type: self.operation_type,
            reference: self.reference.clone(),
            partner_id: self.partner_id,
            source: self.source,
            destination: self.destination,
            source_document: self.source_document.clone(),
            return_of: self.return_of,
            shipping_policy: self.shipping_policy,
            done,
            canceled_moves,
            backorder,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOperation) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(
            &[OperationState::Draft, OperationState::Confirmed, OperationState::Assigned],
            "canceled",
        )?;

        Ok(vec![OperationEvent::Canceled(OperationCanceled {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &RequestReturn) -> Result<Vec<OperationEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.operation_id)?;
        self.ensure_state(&[OperationState::Done], "returned")?;
        if cmd.lines.is_empty() {
            return Err(DomainError::field("lines", "choose at least one product to return"));
        }

        let mut requested: BTreeMap<ProductId, i64> = BTreeMap::new();
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::field("lines", "return quantities must be greater than zero"));
            }
            *requested.entry(line.product_id).or_insert(0) += line.quantity;
        }
        for (product_id, quantity) in &requested {
            let returnable = self.done_quantity(*product_id) - self.returned_quantity(*product_id);
            if *quantity > returnable {
                return Err(DomainError::invariant(format!(
                    "cannot return {quantity} of product {product_id}: only {returnable} can still be returned"
                )));
            }
        }

        Ok(vec![OperationEvent::ReturnRequested(ReturnRequested {
            tenant_id: cmd.tenant_id,
            operation_id: cmd.operation_id,
            reference: self.reference.clone(),
            return_operation_id: cmd.return_operation_id,
            return_type: self.operation_type.return_type(),
            partner_id: self.partner_id,
            source: self.destination,
            destination: self.source,
            source_document: self.source_document.clone(),
            lines: requested
                .into_iter()
                .map(|(product_id, quantity)| ProductQuantityLine { product_id, quantity })
                .collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
