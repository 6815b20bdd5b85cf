//! Customer and vendor payments.
//!
//! Confirming a payment posts it to the company ledger; canceling or resetting
//! a posted payment reverses that entry. Posting itself happens in the
//! accounting workflow, this aggregate only decides which posting is due.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kestrel_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_partners::PartnerId;

use crate::ledger::{Account, JournalEntryLine};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// `inbound`: money received from a customer; `outbound`: paid to a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Draft,
    InProcess,
    Paid,
    Canceled,
}

impl PaymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentState::Draft => "draft",
            PaymentState::InProcess => "in process",
            PaymentState::Paid => "paid",
            PaymentState::Canceled => "canceled",
        }
    }
}

/// What a payment posts to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPosting {
    pub payment_id: PaymentId,
    pub reference: String,
    pub payment_type: PaymentType,
    pub amount: i64,
}

impl PaymentPosting {
    /// Journal lines of the posting. `reverse` swaps debit and credit.
    ///
    /// Inbound: debit Bank, credit Receivable. Outbound: debit Payable, credit Bank.
    pub fn journal_lines(&self, reverse: bool) -> Vec<JournalEntryLine> {
        let (debit, credit) = match self.payment_type {
            PaymentType::Inbound => (Account::bank(), Account::receivable()),
            PaymentType::Outbound => (Account::payable(), Account::bank()),
        };
        vec![
            JournalEntryLine { account: debit, amount: self.amount, is_debit: !reverse },
            JournalEntryLine { account: credit, amount: self.amount, is_debit: reverse },
        ]
    }
}

/// Aggregate root: Payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    tenant_id: Option<TenantId>,
    reference: String,
    payment_type: PaymentType,
    partner_id: Option<PartnerId>,
    amount: i64,
    currency: String,
    memo: Option<String>,
    state: PaymentState,
    version: u64,
    created: bool,
}

impl Payment {
    pub fn empty(id: PaymentId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            payment_type: PaymentType::Inbound,
            partner_id: None,
            amount: 0,
            currency: String::new(),
            memo: None,
            state: PaymentState::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PaymentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn partner_id(&self) -> Option<PartnerId> {
        self.partner_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn is_posted(&self) -> bool {
        matches!(self.state, PaymentState::InProcess | PaymentState::Paid)
    }

    fn posting(&self) -> PaymentPosting {
        PaymentPosting {
            payment_id: self.id,
            reference: self.reference.clone(),
            payment_type: self.payment_type,
            amount: self.amount,
        }
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub reference: String,
    pub payment_type: PaymentType,
    pub partner_id: PartnerId,
    pub amount: i64,
    pub currency: String,
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAction {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentCommand {
    Register(RegisterPayment),
    Confirm(PaymentAction),
    MarkPaid(PaymentAction),
    Cancel(PaymentAction),
    ResetToDraft(PaymentAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub reference: String,
    pub payment_type: PaymentType,
    pub partner_id: PartnerId,
    pub amount: i64,
    pub currency: String,
    pub memo: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub posting: PaymentPosting,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMarkedPaid {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Cancel or reset. `reversal` is set when a posted payment is unposted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUnposted {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub reversal: Option<PaymentPosting>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    Registered(PaymentRegistered),
    Confirmed(PaymentConfirmed),
    MarkedPaid(PaymentMarkedPaid),
    Canceled(PaymentUnposted),
    ResetToDraft(PaymentUnposted),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::Registered(_) => "accounting.payment.registered",
            PaymentEvent::Confirmed(_) => "accounting.payment.confirmed",
            PaymentEvent::MarkedPaid(_) => "accounting.payment.marked_paid",
            PaymentEvent::Canceled(_) => "accounting.payment.canceled",
            PaymentEvent::ResetToDraft(_) => "accounting.payment.reset_to_draft",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::Registered(e) => e.occurred_at,
            PaymentEvent::Confirmed(e) => e.occurred_at,
            PaymentEvent::MarkedPaid(e) => e.occurred_at,
            PaymentEvent::Canceled(e) | PaymentEvent::ResetToDraft(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Payment {
    type Command = PaymentCommand;
    type Event = PaymentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PaymentEvent::Registered(e) => {
                self.id = e.payment_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.payment_type = e.payment_type;
                self.partner_id = Some(e.partner_id);
                self.amount = e.amount;
                self.currency = e.currency.clone();
                self.memo = e.memo.clone();
                self.created = true;
            }
            PaymentEvent::Confirmed(_) => self.state = PaymentState::InProcess,
            PaymentEvent::MarkedPaid(_) => self.state = PaymentState::Paid,
            PaymentEvent::Canceled(_) => self.state = PaymentState::Canceled,
            PaymentEvent::ResetToDraft(_) => self.state = PaymentState::Draft,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        use PaymentState::*;

        match command {
            PaymentCommand::Register(cmd) => self.handle_register(cmd),
            PaymentCommand::Confirm(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[Draft], "confirmed")?;
                Ok(vec![PaymentEvent::Confirmed(PaymentConfirmed {
                    tenant_id: cmd.tenant_id,
                    payment_id: cmd.payment_id,
                    posting: self.posting(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            PaymentCommand::MarkPaid(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[InProcess], "marked as paid")?;
                Ok(vec![PaymentEvent::MarkedPaid(PaymentMarkedPaid {
                    tenant_id: cmd.tenant_id,
                    payment_id: cmd.payment_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PaymentCommand::Cancel(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[Draft, InProcess], "canceled")?;
                Ok(vec![PaymentEvent::Canceled(self.unposted(cmd))])
            }
            PaymentCommand::ResetToDraft(cmd) => {
                self.ensure_existing(cmd)?;
                self.ensure_state(&[InProcess, Canceled], "reset to draft")?;
                Ok(vec![PaymentEvent::ResetToDraft(self.unposted(cmd))])
            }
        }
    }
}

impl Payment {
    fn ensure_existing(&self, cmd: &PaymentAction) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(cmd.tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != cmd.payment_id {
            return Err(DomainError::invariant("payment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_state(&self, allowed: &[PaymentState], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        Err(DomainError::invariant(format!(
            "only {} payments can be {action}",
            names.join(" or ")
        )))
    }

    fn unposted(&self, cmd: &PaymentAction) -> PaymentUnposted {
        PaymentUnposted {
            tenant_id: cmd.tenant_id,
            payment_id: cmd.payment_id,
            reversal: self.is_posted().then(|| self.posting()),
            occurred_at: cmd.occurred_at,
        }
    }

    fn handle_register(&self, cmd: &RegisterPayment) -> Result<Vec<PaymentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("payment already exists"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::field("amount", "amount must be greater than zero"));
        }
        if cmd.currency.len() != 3 || !cmd.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::field("currency", "currency must be a 3-letter ISO code"));
        }

        Ok(vec![PaymentEvent::Registered(PaymentRegistered {
            tenant_id: cmd.tenant_id,
            payment_id: cmd.payment_id,
            reference: cmd.reference.clone(),
            payment_type: cmd.payment_type,
            partner_id: cmd.partner_id,
            amount: cmd.amount,
            currency: cmd.currency.clone(),
            memo: cmd.memo.clone().filter(|m| !m.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }
}
