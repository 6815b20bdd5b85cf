use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order lifecycle: quotation (`draft`), quotation sent, sales order
/// (`sale`), locked (`done`), canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesOrderState {
    Draft,
    Sent,
    Sale,
    Done,
    Canceled,
}

impl SalesOrderState {
    pub fn as_str(self) -> &'static str {
        match self {
            SalesOrderState::Draft => "draft",
            SalesOrderState::Sent => "sent",
            SalesOrderState::Sale => "sale",
            SalesOrderState::Done => "done",
            SalesOrderState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Partial,
    Full,
}

/// Order line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: i64,
    pub qty_delivered: i64,
}

impl OrderLine {
    pub fn subtotal(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price)
    }
}

/// Order total, or `None` when it does not fit in an `i64`.
fn checked_total<'a>(lines: impl IntoIterator<Item = &'a OrderLine>) -> Option<i64> {
    lines
        .into_iter()
        .try_fold(0i64, |total, l| total.checked_add(l.quantity.checked_mul(l.unit_price)?))
}

fn amount_overflow() -> DomainError {
    DomainError::field("lines", "order amount overflow")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
}

fn validate_line(line: &NewOrderLine) -> Result<(), DomainError> {
    if line.quantity <= 0 {
        return Err(DomainError::field("quantity", "quantity must be greater than zero"));
    }
    if line.unit_price < 0 {
        return Err(DomainError::field("unit_price", "unit price cannot be negative"));
    }
    Ok(())
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    reference: String,
    customer_id: Option<PartnerId>,
    currency: String,
    state: SalesOrderState,
    lines: Vec<OrderLine>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            customer_id: None,
            currency: String::new(),
            state: SalesOrderState::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn customer_id(&self) -> Option<PartnerId> {
        self.customer_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn state(&self) -> SalesOrderState {
        self.state
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.state, SalesOrderState::Draft | SalesOrderState::Sent)
    }

    pub fn amount_total(&self) -> i64 {
        checked_total(&self.lines).unwrap_or(i64::MAX)
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        delivery_status(&self.lines)
    }
}

pub fn delivery_status(lines: &[OrderLine]) -> DeliveryStatus {
    if lines.iter().all(|l| l.qty_delivered <= 0) {
        DeliveryStatus::Pending
    } else if lines.iter().all(|l| l.qty_delivered >= l.quantity) {
        DeliveryStatus::Full
    } else {
        DeliveryStatus::Partial
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reference: String,
    pub customer_id: PartnerId,
    pub currency: String,
    pub lines: Vec<NewOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (quotations only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line: NewOrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderAction {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredQuantity {
    pub product_id: ProductId,
    /// Negative for customer returns.
    pub quantity: i64,
}

/// Command: RecordDelivery (a delivery for this order was validated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelivery {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub operation_id: AggregateId,
    pub quantities: Vec<DeliveredQuantity>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    Create(CreateSalesOrder),
    AddLine(AddLine),
    RemoveLine(RemoveLine),
    Send(SalesOrderAction),
    Confirm(SalesOrderAction),
    Lock(SalesOrderAction),
    Unlock(SalesOrderAction),
    Cancel(SalesOrderAction),
    ResetToDraft(SalesOrderAction),
    RecordDelivery(RecordDelivery),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reference: String,
    pub customer_id: PartnerId,
    pub currency: String,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line: OrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed. Carries what the delivery workflow needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reference: String,
    pub customer_id: PartnerId,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransitioned {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelivered {
    pub line_no: u32,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecorded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub operation_id: AggregateId,
    pub lines: Vec<LineDelivered>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    Created(SalesOrderCreated),
    LineAdded(LineAdded),
    LineRemoved(LineRemoved),
    Sent(OrderTransitioned),
    Confirmed(OrderConfirmed),
    Locked(OrderTransitioned),
    Unlocked(OrderTransitioned),
    Canceled(OrderTransitioned),
    ResetToDraft(OrderTransitioned),
    DeliveryRecorded(DeliveryRecorded),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::Created(_) => "sales.order.created",
            SalesOrderEvent::LineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::LineRemoved(_) => "sales.order.line_removed",
            SalesOrderEvent::Sent(_) => "sales.order.sent",
            SalesOrderEvent::Confirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::Locked(_) => "sales.order.locked",
            SalesOrderEvent::Unlocked(_) => "sales.order.unlocked",
            SalesOrderEvent::Canceled(_) => "sales.order.canceled",
            SalesOrderEvent::ResetToDraft(_) => "sales.order.reset_to_draft",
            SalesOrderEvent::DeliveryRecorded(_) => "sales.order.delivery_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::Created(e) => e.occurred_at,
            SalesOrderEvent::LineAdded(e) => e.occurred_at,
            SalesOrderEvent::LineRemoved(e) => e.occurred_at,
            SalesOrderEvent::Confirmed(e) => e.occurred_at,
            SalesOrderEvent::DeliveryRecorded(e) => e.occurred_at,
            SalesOrderEvent::Sent(e)
            | SalesOrderEvent::Locked(e)
            | SalesOrderEvent::Unlocked(e)
            | SalesOrderEvent::Canceled(e)
            | SalesOrderEvent::ResetToDraft(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::Created(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.customer_id = Some(e.customer_id);
                self.currency = e.currency.clone();
                self.state = SalesOrderState::Draft;
                self.lines = e.lines.clone();
                self.created = true;
            }
            SalesOrderEvent::LineAdded(e) => self.lines.push(e.line.clone()),
            SalesOrderEvent::LineRemoved(e) => self.lines.retain(|l| l.line_no != e.line_no),
            SalesOrderEvent::Sent(_) => self.state = SalesOrderState::Sent,
            SalesOrderEvent::Confirmed(_) => self.state = SalesOrderState::Sale,
            SalesOrderEvent::Locked(_) => self.state = SalesOrderState::Done,
            SalesOrderEvent::Unlocked(_) => self.state = SalesOrderState::Sale,
            SalesOrderEvent::Canceled(_) => self.state = SalesOrderState::Canceled,
            SalesOrderEvent::ResetToDraft(_) => self.state = SalesOrderState::Draft,
            SalesOrderEvent::DeliveryRecorded(e) => {
                for delivered in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == delivered.line_no) {
                        line.qty_delivered += delivered.quantity;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        use SalesOrderState::*;

        match command {
            SalesOrderCommand::Create(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            SalesOrderCommand::Send(cmd) => self.transition(cmd, &[Draft], "sent", SalesOrderEvent::Sent),
            SalesOrderCommand::Confirm(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::Lock(cmd) => self.transition(cmd, &[Sale], "locked", SalesOrderEvent::Locked),
            SalesOrderCommand::Unlock(cmd) => self.transition(cmd, &[Done], "unlocked", SalesOrderEvent::Unlocked),
            SalesOrderCommand::Cancel(cmd) => {
                if self.lines.iter().any(|l| l.qty_delivered > 0) {
                    self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
                    return Err(DomainError::invariant(
                        "cannot cancel a sales order with delivered products; return them first",
                    ));
                }
                self.transition(cmd, &[Draft, Sent, Sale], "canceled", SalesOrderEvent::Canceled)
            }
            SalesOrderCommand::ResetToDraft(cmd) => {
                self.transition(cmd, &[Canceled], "reset to draft", SalesOrderEvent::ResetToDraft)
            }
            SalesOrderCommand::RecordDelivery(cmd) => self.handle_record_delivery(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_existing(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DomainError> {
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

    fn ensure_state(&self, allowed: &[SalesOrderState], action: &str) -> Result<(), DomainError> {
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
        cmd: &SalesOrderAction,
        allowed: &[SalesOrderState],
        action: &str,
        event: fn(OrderTransitioned) -> SalesOrderEvent,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(allowed, action)?;
        Ok(vec![event(OrderTransitioned {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn next_line_no(&self) -> u32 {
        self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::field("reference", "reference cannot be empty"));
        }
        if cmd.currency.len() != 3 || !cmd.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::field("currency", "currency must be a 3-letter ISO code"));
        }
        cmd.lines.iter().try_for_each(validate_line)?;

        let lines: Vec<OrderLine> = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(l, line_no)| OrderLine {
                line_no,
                product_id: l.product_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                qty_delivered: 0,
            })
            .collect();
        checked_total(&lines).ok_or_else(amount_overflow)?;

        Ok(vec![SalesOrderEvent::Created(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reference: cmd.reference.clone(),
            customer_id: cmd.customer_id,
            currency: cmd.currency.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[SalesOrderState::Draft, SalesOrderState::Sent], "changed")?;
        validate_line(&cmd.line)?;

        let line = OrderLine {
            line_no: self.next_line_no(),
            product_id: cmd.line.product_id,
            quantity: cmd.line.quantity,
            unit_price: cmd.line.unit_price,
            qty_delivered: 0,
        };
        checked_total(self.lines.iter().chain([&line])).ok_or_else(amount_overflow)?;

        Ok(vec![SalesOrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[SalesOrderState::Draft, SalesOrderState::Sent], "changed")?;
        if !self.lines.iter().any(|l| l.line_no == cmd.line_no) {
            return Err(DomainError::field("line_no", format!("order has no line {}", cmd.line_no)));
        }

        Ok(vec![SalesOrderEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &SalesOrderAction) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[SalesOrderState::Draft, SalesOrderState::Sent], "confirmed")?;
        if self.lines.is_empty() {
            return Err(DomainError::invariant("cannot confirm a sales order without lines"));
        }
        let customer_id = self
            .customer_id
            .ok_or_else(|| DomainError::invariant("customer must be set"))?;

        Ok(vec![SalesOrderEvent::Confirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reference: self.reference.clone(),
            customer_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_delivery(&self, cmd: &RecordDelivery) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_state(&[SalesOrderState::Sale, SalesOrderState::Done], "delivered")?;

        let mut delivered = Vec::new();
        for q in cmd.quantities.iter().filter(|q| q.quantity != 0) {
            let mut candidates: Vec<&OrderLine> =
                self.lines.iter().filter(|l| l.product_id == q.product_id).collect();
            if candidates.is_empty() {
                return Err(DomainError::invariant(format!(
                    "order has no line for product {}",
                    q.product_id
                )));
            }

            let mut left = q.quantity;
            if left < 0 {
                candidates.reverse();
            }
            let count = candidates.len();
            for (i, line) in candidates.into_iter().enumerate() {
                let already = line.qty_delivered
                    + delivered
                        .iter()
                        .filter(|d: &&LineDelivered| d.line_no == line.line_no)
                        .map(|d| d.quantity)
                        .sum::<i64>();
                let take = if left > 0 {
                    if i + 1 == count { left } else { left.min((line.quantity - already).max(0)) }
                } else {
                    -((-left).min(already.max(0)))
                };
                if take != 0 {
                    delivered.push(LineDelivered { line_no: line.line_no, quantity: take });
                    left -= take;
                }
            }
        }
        if delivered.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![SalesOrderEvent::DeliveryRecorded(DeliveryRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            operation_id: cmd.operation_id,
            lines: delivered,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_events::execute;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> SalesOrderId {
        SalesOrderId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_order(tenant_id: TenantId, lines: Vec<NewOrderLine>) -> SalesOrder {
        let order_id = test_order_id();
        let mut order = SalesOrder::empty(order_id);
        execute(
            &mut order,
            &SalesOrderCommand::Create(CreateSalesOrder {
                tenant_id,
                order_id,
                reference: "S00001".to_string(),
                customer_id: PartnerId::new(AggregateId::new()),
                currency: "EUR".to_string(),
                lines,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        order
    }

    fn action(order: &SalesOrder) -> SalesOrderAction {
        SalesOrderAction {
            tenant_id: order.tenant_id().unwrap(),
            order_id: order.id_typed(),
            occurred_at: test_time(),
        }
    }

    fn deliver(order: &mut SalesOrder, product_id: ProductId, quantity: i64) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let cmd = SalesOrderCommand::RecordDelivery(RecordDelivery {
            tenant_id: order.tenant_id().unwrap(),
            order_id: order.id_typed(),
            operation_id: AggregateId::new(),
            quantities: vec![DeliveredQuantity { product_id, quantity }],
            occurred_at: test_time(),
        });
        execute(order, &cmd)
    }

    #[test]
    fn quotation_to_sales_order() {
        let product_id = test_product_id();
        let mut order = created_order(
            test_tenant_id(),
            vec![NewOrderLine { product_id, quantity: 3, unit_price: 4_000 }],
        );
        assert_eq!(order.amount_total(), 12_000);
        assert!(order.is_modifiable());

        let cmd = SalesOrderCommand::Send(action(&order));
        execute(&mut order, &cmd).unwrap();
        let cmd = SalesOrderCommand::Confirm(action(&order));
        let events = execute(&mut order, &cmd).unwrap();
        match &events[0] {
            SalesOrderEvent::Confirmed(e) => {
                assert_eq!(e.reference, "S00001");
                assert_eq!(e.lines[0].quantity, 3);
            }
            other => panic!("expected Confirmed, got {other:?}"),
        }
        assert_eq!(order.state(), SalesOrderState::Sale);
        assert!(!order.is_modifiable());
    }

    #[test]
    fn cannot_modify_confirmed_order() {
        let product_id = test_product_id();
        let mut order = created_order(
            test_tenant_id(),
            vec![NewOrderLine { product_id, quantity: 1, unit_price: 100 }],
        );
        let cmd = SalesOrderCommand::Confirm(action(&order));
        execute(&mut order, &cmd).unwrap();

        let add = SalesOrderCommand::AddLine(AddLine {
            tenant_id: order.tenant_id().unwrap(),
            order_id: order.id_typed(),
            line: NewOrderLine { product_id, quantity: 1, unit_price: 100 },
            occurred_at: test_time(),
        });
        let err = order.handle(&add).unwrap_err();
        assert_eq!(err, DomainError::invariant("only draft or sent orders can be changed"));

        let err = order.handle(&SalesOrderCommand::Confirm(action(&order))).unwrap_err();
        assert_eq!(err, DomainError::invariant("only draft or sent orders can be confirmed"));
    }

    #[test]
    fn order_amount_overflow_is_rejected() {
        let order_id = test_order_id();
        let order = SalesOrder::empty(order_id);
        let create = SalesOrderCommand::Create(CreateSalesOrder {
            tenant_id: test_tenant_id(),
            order_id,
            reference: "S00001".to_string(),
            customer_id: PartnerId::new(AggregateId::new()),
            currency: "EUR".to_string(),
            lines: vec![NewOrderLine {
                product_id: test_product_id(),
                quantity: 10_000_000_000,
                unit_price: 10_000_000_000,
            }],
            occurred_at: test_time(),
        });
        let err = order.handle(&create).unwrap_err();
        assert_eq!(err, DomainError::field("lines", "order amount overflow"));

        let product_id = test_product_id();
        let mut order = created_order(
            test_tenant_id(),
            vec![NewOrderLine { product_id, quantity: 1, unit_price: i64::MAX }],
        );
        let add = SalesOrderCommand::AddLine(AddLine {
            tenant_id: order.tenant_id().unwrap(),
            order_id: order.id_typed(),
            line: NewOrderLine { product_id, quantity: 1, unit_price: 1 },
            occurred_at: test_time(),
        });
        assert!(execute(&mut order, &add).is_err());
        assert_eq!(order.amount_total(), i64::MAX);
    }

    #[test]
    fn deliveries_and_returns_update_delivered_quantity() {
        let product_id = test_product_id();
        let mut order = created_order(
            test_tenant_id(),
            vec![NewOrderLine { product_id, quantity: 5, unit_price: 100 }],
        );
        let cmd = SalesOrderCommand::Confirm(action(&order));
        execute(&mut order, &cmd).unwrap();

        deliver(&mut order, product_id, 5).unwrap();
        assert_eq!(order.delivery_status(), DeliveryStatus::Full);
        assert!(order.handle(&SalesOrderCommand::Cancel(action(&order))).is_err());

        deliver(&mut order, product_id, -2).unwrap();
        assert_eq!(order.lines()[0].qty_delivered, 3);
        assert_eq!(order.delivery_status(), DeliveryStatus::Partial);

        let err = deliver(&mut order, test_product_id(), 1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancel_and_reset_to_draft() {
        let mut order = created_order(test_tenant_id(), vec![]);
        let err = order.handle(&SalesOrderCommand::ResetToDraft(action(&order))).unwrap_err();
        assert_eq!(err, DomainError::invariant("only canceled orders can be reset to draft"));

        let cmd = SalesOrderCommand::Cancel(action(&order));
        execute(&mut order, &cmd).unwrap();
        let cmd = SalesOrderCommand::ResetToDraft(action(&order));
        execute(&mut order, &cmd).unwrap();
        assert_eq!(order.state(), SalesOrderState::Draft);
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn unknown_order_is_not_found() {
        let order = SalesOrder::empty(test_order_id());
        let cmd = SalesOrderAction {
            tenant_id: test_tenant_id(),
            order_id: order.id_typed(),
            occurred_at: test_time(),
        };
        let err = order.handle(&SalesOrderCommand::Confirm(cmd)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = created_order(
            test_tenant_id(),
            vec![NewOrderLine { product_id: test_product_id(), quantity: 2, unit_price: 100 }],
        );
        let before = order.clone();

        let events1 = order.handle(&SalesOrderCommand::Confirm(action(&order))).unwrap();
        let events2 = order.handle(&SalesOrderCommand::Confirm(action(&order))).unwrap();

        assert_eq!(order, before);
        assert_eq!(events1.len(), events2.len());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Delivered quantities follow the net of deliveries and returns and
            /// never go negative.
            #[test]
            fn delivered_quantity_tracks_net_movements(
                demands in proptest::collection::vec(1i64..20, 1..4),
                moves in proptest::collection::vec(-15i64..30, 0..12),
            ) {
                let product_id = test_product_id();
                let lines = demands
                    .iter()
                    .map(|&quantity| NewOrderLine { product_id, quantity, unit_price: 10 })
                    .collect();
                let mut order = created_order(test_tenant_id(), lines);
                let cmd = SalesOrderCommand::Confirm(action(&order));
                execute(&mut order, &cmd).unwrap();

                let mut net = 0i64;
                for quantity in moves {
                    let applied = quantity.max(-net);
                    deliver(&mut order, product_id, applied).unwrap();
                    net += applied;

                    let total: i64 = order.lines().iter().map(|l| l.qty_delivered).sum();
                    prop_assert_eq!(total, net);
                    prop_assert!(order.lines().iter().all(|l| l.qty_delivered >= 0));
                }
            }
        }
    }
}
