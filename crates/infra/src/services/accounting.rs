use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kestrel_accounting::{
    JournalCommand, JournalEntryLine, Ledger, LedgerId, Payment, PaymentAction, PaymentCommand, PaymentId,
    PaymentType, PostJournalEntry, RegisterPayment,
};
use kestrel_core::{AggregateId, TenantId};
use kestrel_partners::PartnerId;

use super::purchases::DEFAULT_CURRENCY;
use super::{found, listed, ServiceResult, Services};
use crate::command_dispatcher::DispatchError;
use crate::projections::{AccountBalance, Snapshot};
use crate::sequencer::PAYMENT;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub payment_type: PaymentType,
    pub partner_id: PartnerId,
    pub amount: i64,
    pub currency: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTransition {
    Confirm,
    MarkPaid,
    Cancel,
    ResetToDraft,
}

impl Services {
    pub fn register_payment(&self, tenant_id: TenantId, input: PaymentInput) -> ServiceResult<Snapshot<Payment>> {
        let payment_id = PaymentId::new(AggregateId::new());
        self.write(|s| {
            let partner = s.active_partner(tenant_id, input.partner_id, "partner_id")?;
            let fits = match input.payment_type {
                PaymentType::Inbound => partner.kind().is_customer(),
                PaymentType::Outbound => partner.kind().is_vendor(),
            };
            if !fits {
                return Err(DispatchError::field(
                    "partner_id",
                    "inbound payments need a customer and outbound payments a vendor",
                ));
            }
            s.execute::<Payment>(
                tenant_id,
                payment_id.0,
                PaymentCommand::Register(RegisterPayment {
                    tenant_id,
                    payment_id,
                    reference: s.next_reference(tenant_id, PAYMENT),
                    payment_type: input.payment_type,
                    partner_id: input.partner_id,
                    amount: input.amount,
                    currency: input.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    memo: input.memo.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.payment(tenant_id, payment_id)
    }

    pub fn payment_action(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
        transition: PaymentTransition,
    ) -> ServiceResult<Snapshot<Payment>> {
        let action = PaymentAction {
            tenant_id,
            payment_id,
            occurred_at: Utc::now(),
        };
        let command = match transition {
            PaymentTransition::Confirm => PaymentCommand::Confirm(action),
            PaymentTransition::MarkPaid => PaymentCommand::MarkPaid(action),
            PaymentTransition::Cancel => PaymentCommand::Cancel(action),
            PaymentTransition::ResetToDraft => PaymentCommand::ResetToDraft(action),
        };
        self.write(|s| s.execute::<Payment>(tenant_id, payment_id.0, command))?;
        self.payment(tenant_id, payment_id)
    }

    pub fn payment(&self, tenant_id: TenantId, payment_id: PaymentId) -> ServiceResult<Snapshot<Payment>> {
        found(&self.views().payments, tenant_id, payment_id.0)
    }

    pub fn payments(&self, tenant_id: TenantId) -> Vec<Snapshot<Payment>> {
        listed(&self.views().payments, tenant_id)
    }

    pub fn balances(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        self.views().balances.list(tenant_id)
    }

    pub fn balance(&self, tenant_id: TenantId, account_code: &str) -> ServiceResult<AccountBalance> {
        self.views()
            .balances
            .get(tenant_id, account_code)
            .ok_or(DispatchError::NotFound)
    }

    /// Post on the company ledger. An `entry_id` already posted is a no-op.
    pub(crate) fn post_journal_entry(
        &self,
        tenant_id: TenantId,
        entry_id: Uuid,
        lines: Vec<JournalEntryLine>,
        description: String,
    ) -> ServiceResult<()> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let posted = self.execute::<Ledger>(
            tenant_id,
            ledger_id.0,
            JournalCommand::PostJournalEntry(PostJournalEntry {
                tenant_id,
                ledger_id,
                entry_id,
                lines,
                occurred_at: Utc::now(),
                description: Some(description),
            }),
        );
        match posted {
            Ok(_) => Ok(()),
            Err(DispatchError::Conflict(_)) => {
                tracing::debug!(tenant_id = %tenant_id, %entry_id, "journal entry already posted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
