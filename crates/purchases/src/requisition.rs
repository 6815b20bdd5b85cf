//! Purchase agreements: blanket orders negotiated with one vendor, and
//! templates that pre-fill requests for quotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;

use crate::order::validate_currency;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionId(pub AggregateId);

impl RequisitionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequisitionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionType {
    BlanketOrder,
    PurchaseTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequisitionState {
    Draft,
    Confirmed,
    Closed,
    Canceled,
}

impl RequisitionState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequisitionState::Draft => "draft",
            RequisitionState::Confirmed => "confirmed",
            RequisitionState::Closed => "closed",
            RequisitionState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
}

/// Aggregate root: Requisition (purchase agreement).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    id: RequisitionId,
    tenant_id: Option<TenantId>,
    reference: String,
    requisition_type: RequisitionType,
    vendor_id: Option<PartnerId>,
    currency: String,
    state: RequisitionState,
    lines: Vec<RequisitionLine>,
    version: u64,
    created: bool,
}

impl Requisition {
    pub fn empty(id: RequisitionId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            requisition_type: RequisitionType::BlanketOrder,
            vendor_id: None,
            currency: String::new(),
            state: RequisitionState::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn requisition_type(&self) -> RequisitionType {
        self.requisition_type
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn state(&self) -> RequisitionState {
        self.state
    }

    pub fn lines(&self) -> &[RequisitionLine] {
        &self.lines
    }

    pub fn vendor_id(&self) -> Option<PartnerId> {
        self.vendor_id
    }
}

impl AggregateRoot for Requisition {
    type Id = RequisitionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequisition {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub reference: String,
    pub requisition_type: RequisitionType,
    pub vendor_id: Option<PartnerId>,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequisitionLine {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionAction {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionCommand {
    Create(CreateRequisition),
    AddLine(AddRequisitionLine),
    Confirm(RequisitionAction),
    Close(RequisitionAction),
    Cancel(RequisitionAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionCreated {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub reference: String,
    pub requisition_type: RequisitionType,
    pub vendor_id: Option<PartnerId>,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionLineAdded {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub line: RequisitionLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionTransitioned {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionEvent {
    Created(RequisitionCreated),
    LineAdded(RequisitionLineAdded),
    Confirmed(RequisitionTransitioned),
    Closed(RequisitionTransitioned),
    Canceled(RequisitionTransitioned),
}

impl Event for RequisitionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequisitionEvent::Created(_) => "purchases.requisition.created",
            RequisitionEvent::LineAdded(_) => "purchases.requisition.line_added",
            RequisitionEvent::Confirmed(_) => "purchases.requisition.confirmed",
            RequisitionEvent::Closed(_) => "purchases.requisition.closed",
            RequisitionEvent::Canceled(_) => "purchases.requisition.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequisitionEvent::Created(e) => e.occurred_at,
            RequisitionEvent::LineAdded(e) => e.occurred_at,
            RequisitionEvent::Confirmed(e) | RequisitionEvent::Closed(e) | RequisitionEvent::Canceled(e) => {
                e.occurred_at
            }
        }
    }
}

impl Aggregate for Requisition {
    type Command = RequisitionCommand;
    type Event = RequisitionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequisitionEvent::Created(e) => {
                self.id = e.requisition_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.requisition_type = e.requisition_type;
                self.vendor_id = e.vendor_id;
                self.currency = e.currency.clone();
                self.created = true;
            }
            RequisitionEvent::LineAdded(e) => self.lines.push(e.line),
            RequisitionEvent::Confirmed(_) => self.state = RequisitionState::Confirmed,
            RequisitionEvent::Closed(_) => self.state = RequisitionState::Closed,
            RequisitionEvent::Canceled(_) => self.state = RequisitionState::Canceled,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequisitionCommand::Create(cmd) => self.handle_create(cmd),
            RequisitionCommand::AddLine(cmd) => self.handle_add_line(cmd),
            RequisitionCommand::Confirm(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[RequisitionState::Draft], "confirmed")?;
                if self.lines.is_empty() {
                    return Err(DomainError::invariant("cannot confirm an agreement without lines"));
                }
                Ok(vec![RequisitionEvent::Confirmed(transitioned(cmd))])
            }
            RequisitionCommand::Close(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[RequisitionState::Confirmed], "closed")?;
                Ok(vec![RequisitionEvent::Closed(transitioned(cmd))])
            }
            RequisitionCommand::Cancel(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[RequisitionState::Draft, RequisitionState::Confirmed], "canceled")?;
                Ok(vec![RequisitionEvent::Canceled(transitioned(cmd))])
            }
        }
    }
}

fn transitioned(cmd: &RequisitionAction) -> RequisitionTransitioned {
    RequisitionTransitioned {
        tenant_id: cmd.tenant_id,
        requisition_id: cmd.requisition_id,
        occurred_at: cmd.occurred_at,
    }
}

impl Requisition {
    fn check_existing(&self, tenant_id: TenantId, requisition_id: RequisitionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != requisition_id {
            return Err(DomainError::invariant("requisition_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, cmd: &RequisitionAction) -> Result<(), DomainError> {
        self.check_existing(cmd.tenant_id, cmd.requisition_id)
    }

    fn ensure_state(&self, allowed: &[RequisitionState], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        Err(DomainError::invariant(format!(
            "only {} agreements can be {action}",
            names.join(" or ")
        )))
    }

    fn handle_create(&self, cmd: &CreateRequisition) -> Result<Vec<RequisitionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("agreement already exists"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::field("reference", "reference cannot be empty"));
        }
        if cmd.requisition_type == RequisitionType::BlanketOrder && cmd.vendor_id.is_none() {
            return Err(DomainError::field("vendor_id", "a blanket order requires a vendor"));
        }
        validate_currency(&cmd.currency)?;

        Ok(vec![RequisitionEvent::Created(RequisitionCreated {
            tenant_id: cmd.tenant_id,
            requisition_id: cmd.requisition_id,
            reference: cmd.reference.clone(),
            requisition_type: cmd.requisition_type,
            vendor_id: cmd.vendor_id,
            currency: cmd.currency.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddRequisitionLine) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.check_existing(cmd.tenant_id, cmd.requisition_id)?;
        self.ensure_state(&[RequisitionState::Draft], "changed")?;
        if cmd.quantity <= 0 {
            return Err(DomainError::field("quantity", "quantity must be greater than zero"));
        }
        if cmd.unit_price < 0 {
            return Err(DomainError::field("unit_price", "unit price cannot be negative"));
        }

        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        Ok(vec![RequisitionEvent::LineAdded(RequisitionLineAdded {
            tenant_id: cmd.tenant_id,
            requisition_id: cmd.requisition_id,
            line: RequisitionLine {
                line_no,
                product_id: cmd.product_id,
                quantity: cmd.quantity,
                unit_price: cmd.unit_price,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_events::execute;

    fn created(requisition_type: RequisitionType, vendor_id: Option<PartnerId>) -> Result<Requisition, DomainError> {
        let requisition_id = RequisitionId::new(AggregateId::new());
        let mut requisition = Requisition::empty(requisition_id);
        execute(
            &mut requisition,
            &RequisitionCommand::Create(CreateRequisition {
                tenant_id: TenantId::new(),
                requisition_id,
                reference: "PA00001".to_string(),
                requisition_type,
                vendor_id,
                currency: "USD".to_string(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(requisition)
    }

    fn action(r: &Requisition) -> RequisitionAction {
        RequisitionAction {
            tenant_id: r.tenant_id().unwrap(),
            requisition_id: *r.id(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn blanket_order_requires_vendor() {
        let err = created(RequisitionType::BlanketOrder, None).unwrap_err();
        assert!(matches!(err, DomainError::Validation { field: Some("vendor_id"), .. }));
        assert!(created(RequisitionType::PurchaseTemplate, None).is_ok());
    }

    #[test]
    fn agreement_lifecycle() {
        let mut r = created(RequisitionType::BlanketOrder, Some(PartnerId::new(AggregateId::new()))).unwrap();
        let cmd = RequisitionCommand::Confirm(action(&r));
        assert!(execute(&mut r, &cmd).is_err());

        let add = RequisitionCommand::AddLine(AddRequisitionLine {
            tenant_id: r.tenant_id().unwrap(),
            requisition_id: *r.id(),
            product_id: ProductId::new(AggregateId::new()),
            quantity: 100,
            unit_price: 900,
            occurred_at: Utc::now(),
        });
        execute(&mut r, &add).unwrap();
        let cmd = RequisitionCommand::Confirm(action(&r));
        execute(&mut r, &cmd).unwrap();
        assert_eq!(r.state(), RequisitionState::Confirmed);
        assert!(execute(&mut r, &add).is_err());

        let cmd = RequisitionCommand::Close(action(&r));
        execute(&mut r, &cmd).unwrap();
        let cmd = RequisitionCommand::Cancel(action(&r));
        let err = execute(&mut r, &cmd).unwrap_err();
        assert_eq!(err, DomainError::invariant("only draft or confirmed agreements can be canceled"));
    }
}
