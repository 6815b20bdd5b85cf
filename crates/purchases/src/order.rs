use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;

use crate::requisition::RequisitionId;

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order lifecycle: RFQ (`draft`), RFQ sent, confirmed order
/// (`purchase`), locked (`done`), canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderState {
    Draft,
    Sent,
    Purchase,
    Done,
    Canceled,
}

impl PurchaseOrderState {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderState::Draft => "draft",
            PurchaseOrderState::Sent => "sent",
            PurchaseOrderState::Purchase => "purchase",
            PurchaseOrderState::Done => "done",
            PurchaseOrderState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Partial,
    Full,
}

/// Purchase order line. Prices are in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
    pub qty_received: i64,
}

impl PurchaseOrderLine {
    pub fn subtotal(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}

fn checked_total<'a>(lines: impl IntoIterator<Item = &'a PurchaseOrderLine>) -> Option<i64> {
    lines
        .into_iter()
        .try_fold(0i64, |total, l| total.checked_add(l.quantity.checked_mul(l.unit_price)?))
}

fn amount_overflow() -> DomainError {
    DomainError::field("lines", "order amount overflow")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
}

impl NewPurchaseLine {
    fn validate(&self) -> Result<(), DomainError> {
        if self.quantity <= 0 {
            return Err(DomainError::field("quantity", "quantity must be greater than zero"));
        }
        if self.unit_price < 0 {
            return Err(DomainError::field("unit_price", "unit price cannot be negative"));
        }
        Ok(())
    }
}

pub(crate) fn validate_currency(currency: &str) -> Result<(), DomainError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(DomainError::field("currency", "currency must be a 3-letter ISO code"));
    }
    Ok(())
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    reference: String,
    vendor_id: Option<PartnerId>,
    requisition_id: Option<RequisitionId>,
    currency: String,
    state: PurchaseOrderState,
    lines: Vec<PurchaseOrderLine>,
    next_line_no: u32,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            vendor_id: None,
            requisition_id: None,
            currency: String::new(),
            state: PurchaseOrderState::Draft,
            lines: Vec::new(),
            next_line_no: 1,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn vendor_id(&self) -> Option<PartnerId> {
        self.vendor_id
    }

    pub fn requisition_id(&self) -> Option<RequisitionId> {
        self.requisition_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn state(&self) -> PurchaseOrderState {
        self.state
    }

    pub fn lines(&self) -> &[PurchaseOrderLine] {
        &self.lines
    }

    pub fn amount_total(&self) -> i64 {
        checked_total(&self.lines).unwrap_or(i64::MAX)
    }

    pub fn receipt_status(&self) -> ReceiptStatus {
        receipt_status(&self.lines)
    }
}

/// Receipt status of a set of lines.
pub fn receipt_status(lines: &[PurchaseOrderLine]) -> ReceiptStatus {
    if lines.iter().all(|l| l.qty_received <= 0) {
        ReceiptStatus::Pending
    } else if lines.iter().all(|l| l.qty_received >= l.quantity) {
        ReceiptStatus::Full
    } else {
        ReceiptStatus::Partial
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reference: String,
    pub vendor_id: PartnerId,
    pub requisition_id: Option<RequisitionId>,
    pub currency: String,
    pub lines: Vec<NewPurchaseLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only allowed on RFQs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPurchaseLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line: NewPurchaseLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovePurchaseLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the state-only actions (send, confirm, lock, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderAction {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedQuantity {
    pub product_id: ProductId,
    /// Negative for returns.
    pub quantity: i64,
}

/// Command: RecordReceipt (a receipt for this order was validated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub operation_id: AggregateId,
    pub quantities: Vec<ReceivedQuantity>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    Create(CreatePurchaseOrder),
    AddLine(AddPurchaseLine),
    RemoveLine(RemovePurchaseLine),
    Send(PurchaseOrderAction),
    Confirm(PurchaseOrderAction),
    Lock(PurchaseOrderAction),
    Unlock(PurchaseOrderAction),
    Cancel(PurchaseOrderAction),
    ResetToDraft(PurchaseOrderAction),
    RecordReceipt(RecordReceipt),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reference: String,
    pub vendor_id: PartnerId,
    pub requisition_id: Option<RequisitionId>,
    pub currency: String,
    pub lines: Vec<PurchaseOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line: PurchaseOrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLineRemoved {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderConfirmed.
///
/// Carries what the receipt workflow needs to create the incoming operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reference: String,
    pub vendor_id: PartnerId,
    pub lines: Vec<PurchaseOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event of a state-only transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderTransitioned {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceived {
    pub line_no: u32,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecorded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub operation_id: AggregateId,
    pub lines: Vec<LineReceived>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    Created(PurchaseOrderCreated),
    LineAdded(PurchaseLineAdded),
    LineRemoved(PurchaseLineRemoved),
    Sent(PurchaseOrderTransitioned),
    Confirmed(PurchaseOrderConfirmed),
    Locked(PurchaseOrderTransitioned),
    Unlocked(PurchaseOrderTransitioned),
    Canceled(PurchaseOrderTransitioned),
    ResetToDraft(PurchaseOrderTransitioned),
    ReceiptRecorded(ReceiptRecorded),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::Created(_) => "purchases.order.created",
            PurchaseOrderEvent::LineAdded(_) => "purchases.order.line_added",
            PurchaseOrderEvent::LineRemoved(_) => "purchases.order.line_removed",
            PurchaseOrderEvent::Sent(_) => "purchases.order.sent",
            PurchaseOrderEvent::Confirmed(_) => "purchases.order.confirmed",
            PurchaseOrderEvent::Locked(_) => "purchases.order.locked",
            PurchaseOrderEvent::Unlocked(_) => "purchases.order.unlocked",
            PurchaseOrderEvent::Canceled(_) => "purchases.order.canceled",
            PurchaseOrderEvent::ResetToDraft(_) => "purchases.order.reset_to_draft",
            PurchaseOrderEvent::ReceiptRecorded(_) => "purchases.order.receipt_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::Created(e) => e.occurred_at,
            PurchaseOrderEvent::LineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::LineRemoved(e) => e.occurred_at,
            PurchaseOrderEvent::Confirmed(e) => e.occurred_at,
            PurchaseOrderEvent::ReceiptRecorded(e) => e.occurred_at,
            PurchaseOrderEvent::Sent(e)
            | PurchaseOrderEvent::Locked(e)
            | PurchaseOrderEvent::Unlocked(e)
            | PurchaseOrderEvent::Canceled(e)
            | PurchaseOrderEvent::ResetToDraft(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::Created(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.vendor_id = Some(e.vendor_id);
                self.requisition_id = e.requisition_id;
                self.currency = e.currency.clone();
                self.state = PurchaseOrderState::Draft;
                self.lines = e.lines.clone();
                self.next_line_no = e.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
                self.created = true;
            }
            PurchaseOrderEvent::LineAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.line.line_no + 1);
                self.lines.push(e.line.clone());
            }
            PurchaseOrderEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            PurchaseOrderEvent::Sent(_) => self.state = PurchaseOrderState::Sent,
            PurchaseOrderEvent::Confirmed(_) => self.state = PurchaseOrderState::Purchase,
            PurchaseOrderEvent::Locked(_) => self.state = PurchaseOrderState::Done,
            PurchaseOrderEvent::Unlocked(_) => self.state = PurchaseOrderState::Purchase,
            PurchaseOrderEvent::Canceled(_) => self.state = PurchaseOrderState::Canceled,
            PurchaseOrderEvent::ResetToDraft(_) => self.state = PurchaseOrderState::Draft,
            PurchaseOrderEvent::ReceiptRecorded(e) => {
                for received in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == received.line_no) {
                        line.qty_received += received.quantity;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::Create(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            PurchaseOrderCommand::Send(cmd) => {
                self.transition(cmd, &[PurchaseOrderState::Draft], "sent", PurchaseOrderEvent::Sent)
            }
            PurchaseOrderCommand::Confirm(cmd) => self.handle_confirm(cmd),
            PurchaseOrderCommand::Lock(cmd) => {
                self.transition(cmd, &[PurchaseOrderState::Purchase], "locked", PurchaseOrderEvent::Locked)
            }
            PurchaseOrderCommand::Unlock(cmd) => {
                self.transition(cmd, &[PurchaseOrderState::Done], "unlocked", PurchaseOrderEvent::Unlocked)
            }
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
            PurchaseOrderCommand::ResetToDraft(cmd) => self.transition(
                cmd,
                &[PurchaseOrderState::Canceled],
                "reset to draft",
                PurchaseOrderEvent::ResetToDraft,
            ),
            PurchaseOrderCommand::RecordReceipt(cmd) => self.handle_record_receipt(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_existing(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_state(&self, allowed: &[PurchaseOrderState], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        Err(DomainError::invariant(format!(
            "only {} orders can be {action}",
            names.join(" or ")
        )))
    }

    fn transition(
        &self,
        cmd: &PurchaseOrderAction,
        allowed: &[PurchaseOrderState],
        action: &str,
        event: fn(PurchaseOrderTransitioned) -> PurchaseOrderEvent,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(allowed, action)?;
        Ok(vec![event(PurchaseOrderTransitioned {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::field("reference", "reference cannot be empty"));
        }
        validate_currency(&cmd.currency)?;
        for line in &cmd.lines {
            line.validate()?;
        }

        let lines: Vec<PurchaseOrderLine> = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(l, line_no)| PurchaseOrderLine {
                line_no,
                product_id: l.product_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                qty_received: 0,
            })
            .collect();
        checked_total(&lines).ok_or_else(amount_overflow)?;

        Ok(vec![PurchaseOrderEvent::Created(PurchaseOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reference: cmd.reference.clone(),
            vendor_id: cmd.vendor_id,
            requisition_id: cmd.requisition_id,
            currency: cmd.currency.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddPurchaseLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[PurchaseOrderState::Draft, PurchaseOrderState::Sent], "changed")?;
        cmd.line.validate()?;

        let line = PurchaseOrderLine {
            line_no: self.next_line_no,
            product_id: cmd.line.product_id,
            quantity: cmd.line.quantity,
            unit_price: cmd.line.unit_price,
            qty_received: 0,
        };
        checked_total(self.lines.iter().chain([&line])).ok_or_else(amount_overflow)?;

        Ok(vec![PurchaseOrderEvent::LineAdded(PurchaseLineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemovePurchaseLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[PurchaseOrderState::Draft, PurchaseOrderState::Sent], "changed")?;
        if !self.lines.iter().any(|l| l.line_no == cmd.line_no) {
            return Err(DomainError::field("line_no", format!("order has no line {}", cmd.line_no)));
        }

        Ok(vec![PurchaseOrderEvent::LineRemoved(PurchaseLineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &PurchaseOrderAction) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[PurchaseOrderState::Draft, PurchaseOrderState::Sent], "confirmed")?;
        if self.lines.is_empty() {
            return Err(DomainError::invariant("cannot confirm a purchase order without lines"));
        }
        let vendor_id = self
            .vendor_id
            .ok_or_else(|| DomainError::invariant("vendor must be set"))?;

        Ok(vec![PurchaseOrderEvent::Confirmed(PurchaseOrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reference: self.reference.clone(),
            vendor_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &PurchaseOrderAction) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(
            &[PurchaseOrderState::Draft, PurchaseOrderState::Sent, PurchaseOrderState::Purchase],
            "canceled",
        )?;
        if self.lines.iter().any(|l| l.qty_received > 0) {
            return Err(DomainError::invariant(
                "cannot cancel a purchase order with received products; return them first",
            ));
        }

        Ok(vec![PurchaseOrderEvent::Canceled(PurchaseOrderTransitioned {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_receipt(&self, cmd: &RecordReceipt) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[PurchaseOrderState::Purchase, PurchaseOrderState::Done], "received")?;

        let mut lines = self.lines.clone();
        let mut received = Vec::new();
        for q in cmd.quantities.iter().filter(|q| q.quantity != 0) {
            let allocation = allocate(&mut lines, q.product_id, q.quantity)
                .ok_or_else(|| DomainError::invariant(format!("order has no line for product {}", q.product_id)))?;
            received.extend(allocation);
        }
        if received.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![PurchaseOrderEvent::ReceiptRecorded(ReceiptRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            operation_id: cmd.operation_id,
            lines: received,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Spread a received (or, if negative, returned) quantity over the lines of
/// `product_id`. Receipts fill lines in order and any surplus lands on the last
/// line; returns are taken back from the last line first.
fn allocate(lines: &mut [PurchaseOrderLine], product_id: ProductId, quantity: i64) -> Option<Vec<LineReceived>> {
    let idx: Vec<usize> = (0..lines.len()).filter(|i| lines[*i].product_id == product_id).collect();
    let last = *idx.last()?;
    let mut out = Vec::new();
    let mut left = quantity;

    if quantity > 0 {
        for &i in &idx {
            let open = (lines[i].quantity - lines[i].qty_received).max(0);
            let take = if i == last { left } else { left.min(open) };
            if take > 0 {
                lines[i].qty_received += take;
                out.push(LineReceived { line_no: lines[i].line_no, quantity: take });
                left -= take;
            }
        }
    } else {
        for &i in idx.iter().rev() {
            let take = (-left).min(lines[i].qty_received.max(0));
            if take > 0 {
                lines[i].qty_received -= take;
                out.push(LineReceived { line_no: lines[i].line_no, quantity: -take });
                left += take;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_events::execute;

    struct Ctx {
        tenant_id: TenantId,
        order: PurchaseOrder,
        chair: ProductId,
    }

    impl Ctx {
        fn new(lines: Vec<NewPurchaseLine>) -> Self {
            let tenant_id = TenantId::new();
            let order_id = PurchaseOrderId::new(AggregateId::new());
            let mut order = PurchaseOrder::empty(order_id);
            execute(
                &mut order,
                &PurchaseOrderCommand::Create(CreatePurchaseOrder {
                    tenant_id,
                    order_id,
                    reference: "P00001".to_string(),
                    vendor_id: PartnerId::new(AggregateId::new()),
                    requisition_id: None,
                    currency: "USD".to_string(),
                    lines,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            Self { tenant_id, order, chair: ProductId::new(AggregateId::new()) }
        }

        fn action(&self) -> PurchaseOrderAction {
            PurchaseOrderAction {
                tenant_id: self.tenant_id,
                order_id: self.order.id_typed(),
                occurred_at: Utc::now(),
            }
        }

        fn run(&mut self, cmd: PurchaseOrderCommand) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            execute(&mut self.order, &cmd)
        }

        fn add_chairs(&mut self, quantity: i64) {
            let line = NewPurchaseLine { product_id: self.chair, quantity, unit_price: 1250 };
            let cmd = PurchaseOrderCommand::AddLine(AddPurchaseLine {
                tenant_id: self.tenant_id,
                order_id: self.order.id_typed(),
                line,
                occurred_at: Utc::now(),
            });
            self.run(cmd).unwrap();
        }

        fn receive(&mut self, quantity: i64) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
            let cmd = PurchaseOrderCommand::RecordReceipt(RecordReceipt {
                tenant_id: self.tenant_id,
                order_id: self.order.id_typed(),
                operation_id: AggregateId::new(),
                quantities: vec![ReceivedQuantity { product_id: self.chair, quantity }],
                occurred_at: Utc::now(),
            });
            self.run(cmd)
        }
    }

    #[test]
    fn rfq_flow_to_confirmed_order() {
        let mut ctx = Ctx::new(vec![]);
        ctx.add_chairs(10);
        assert_eq!(ctx.order.amount_total(), 12_500);

        ctx.run(PurchaseOrderCommand::Send(ctx.action())).unwrap();
        assert_eq!(ctx.order.state(), PurchaseOrderState::Sent);

        let events = ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap();
        assert!(matches!(&events[0], PurchaseOrderEvent::Confirmed(e) if e.lines.len() == 1 && e.reference == "P00001"));
        assert_eq!(ctx.order.state(), PurchaseOrderState::Purchase);
    }

    #[test]
    fn lines_whose_amount_overflows_are_rejected() {
        let mut ctx = Ctx::new(vec![]);
        let huge = NewPurchaseLine { product_id: ctx.chair, quantity: 10_000_000_000, unit_price: 10_000_000_000 };
        let cmd = PurchaseOrderCommand::AddLine(AddPurchaseLine {
            tenant_id: ctx.tenant_id,
            order_id: ctx.order.id_typed(),
            line: huge,
            occurred_at: Utc::now(),
        });
        let err = ctx.run(cmd).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("lines"), .. }));
        assert!(ctx.order.lines().is_empty());

        // Each line fits, the total does not.
        ctx.add_chairs(i64::MAX / 1250);
        let line = NewPurchaseLine { product_id: ctx.chair, quantity: 1, unit_price: 1250 };
        let cmd = PurchaseOrderCommand::AddLine(AddPurchaseLine {
            tenant_id: ctx.tenant_id,
            order_id: ctx.order.id_typed(),
            line,
            occurred_at: Utc::now(),
        });
        assert!(ctx.run(cmd).is_err());
        assert_eq!(ctx.order.lines().len(), 1);
    }

    #[test]
    fn only_draft_or_sent_orders_can_be_confirmed() {
        let mut ctx = Ctx::new(vec![]);
        let err = ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap_err();
        assert!(err.to_string().contains("without lines"));

        ctx.add_chairs(1);
        ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap();
        let err = ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap_err();
        assert_eq!(err, DomainError::invariant("only draft or sent orders can be confirmed"));
    }

    #[test]
    fn lock_unlock_cancel_reset() {
        let mut ctx = Ctx::new(vec![]);
        ctx.add_chairs(2);
        ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap();
        ctx.run(PurchaseOrderCommand::Lock(ctx.action())).unwrap();
        assert_eq!(ctx.order.state(), PurchaseOrderState::Done);
        assert!(ctx.run(PurchaseOrderCommand::Cancel(ctx.action())).is_err());

        ctx.run(PurchaseOrderCommand::Unlock(ctx.action())).unwrap();
        ctx.run(PurchaseOrderCommand::Cancel(ctx.action())).unwrap();
        assert_eq!(ctx.order.state(), PurchaseOrderState::Canceled);

        ctx.run(PurchaseOrderCommand::ResetToDraft(ctx.action())).unwrap();
        assert_eq!(ctx.order.state(), PurchaseOrderState::Draft);
    }

    #[test]
    fn lines_are_frozen_after_confirmation() {
        let mut ctx = Ctx::new(vec![]);
        ctx.add_chairs(2);
        ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap();

        let err = ctx
            .run(PurchaseOrderCommand::RemoveLine(RemovePurchaseLine {
                tenant_id: ctx.tenant_id,
                order_id: ctx.order.id_typed(),
                line_no: 1,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn receipts_and_returns_track_received_quantity() {
        let mut ctx = Ctx::new(vec![]);
        ctx.add_chairs(4);
        ctx.add_chairs(6);
        assert!(ctx.receive(1).is_err());
        ctx.run(PurchaseOrderCommand::Confirm(ctx.action())).unwrap();
        assert_eq!(ctx.order.receipt_status(), ReceiptStatus::Pending);

        ctx.receive(5).unwrap();
        let received: Vec<i64> = ctx.order.lines().iter().map(|l| l.qty_received).collect();
        assert_eq!(received, vec![4, 1]);
        assert_eq!(ctx.order.receipt_status(), ReceiptStatus::Partial);

        ctx.receive(6).unwrap();
        assert_eq!(ctx.order.lines()[1].qty_received, 7);
        assert_eq!(ctx.order.receipt_status(), ReceiptStatus::Full);

        ctx.receive(-8).unwrap();
        let received: Vec<i64> = ctx.order.lines().iter().map(|l| l.qty_received).collect();
        assert_eq!(received, vec![3, 0]);

        assert!(ctx.run(PurchaseOrderCommand::Cancel(ctx.action())).is_err());
    }

    #[test]
    fn invalid_currency_and_quantity_are_field_errors() {
        let order = PurchaseOrder::empty(PurchaseOrderId::new(AggregateId::new()));
        let mut cmd = CreatePurchaseOrder {
            tenant_id: TenantId::new(),
            order_id: order.id_typed(),
            reference: "P00002".to_string(),
            vendor_id: PartnerId::new(AggregateId::new()),
            requisition_id: None,
            currency: "usd".to_string(),
            lines: vec![],
            occurred_at: Utc::now(),
        };
        let err = order.handle(&PurchaseOrderCommand::Create(cmd.clone())).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("currency"), .. }));

        cmd.currency = "EUR".to_string();
        cmd.lines = vec![NewPurchaseLine {
            product_id: ProductId::new(AggregateId::new()),
            quantity: 0,
            unit_price: 1,
        }];
        let err = order.handle(&PurchaseOrderCommand::Create(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("quantity"), .. }));
    }
}
