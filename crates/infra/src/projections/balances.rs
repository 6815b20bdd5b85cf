use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use kestrel_accounting::{AccountKind, Ledger, LedgerEvent};
use kestrel_core::TenantId;
use kestrel_events::EventEnvelope;

use crate::aggregates::EventSourced;
use crate::projections::cursor_store::{check_sequence, CursorCheck, InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::{InMemoryTenantStore, TenantStore};

const PROJECTION_NAME: &str = "accounting.balances";

/// Read model: per-account totals for a tenant.
///
/// `balance` is debit-positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debit: i64,
    pub credit: i64,
    pub balance: i64,
}

#[derive(Debug, Error)]
pub enum BalancesProjectionError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("balance overflow on account {0}")]
    Overflow(String),
}

/// Projection: ledger → account balances per tenant.
pub struct AccountBalancesProjection<S = Arc<InMemoryTenantStore<String, AccountBalance>>>
where
    S: TenantStore<String, AccountBalance>,
{
    store: S,
    cursors: Arc<dyn ProjectionCursorStore>,
}

impl AccountBalancesProjection {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryTenantStore::new()), Arc::new(InMemoryCursorStore::new()))
    }
}

impl Default for AccountBalancesProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AccountBalancesProjection<S>
where
    S: TenantStore<String, AccountBalance>,
{
    pub fn with_store(store: S, cursors: Arc<dyn ProjectionCursorStore>) -> Self {
        Self { store, cursors }
    }

    pub fn get(&self, tenant_id: TenantId, code: &str) -> Option<AccountBalance> {
        self.store.get(tenant_id, &code.to_string())
    }

    /// All balances of a tenant, ordered by account code.
    pub fn list(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        let mut balances = self.store.list(tenant_id);
        balances.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        balances
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), BalancesProjectionError> {
        if envelope.aggregate_type() != Ledger::AGGREGATE_TYPE {
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
                return Err(BalancesProjectionError::NonMonotonicSequence { last, found });
            }
            CursorCheck::Apply => {}
        }

        let ev: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| BalancesProjectionError::Deserialize(e.to_string()))?;

        let LedgerEvent::JournalEntryPosted(posted) = ev;
        if posted.tenant_id != tenant_id {
            return Err(BalancesProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        // Nothing is written unless every line of the entry fits.
        let mut updated: Vec<AccountBalance> = Vec::with_capacity(posted.lines.len());
        for line in &posted.lines {
            let code = &line.account.code;
            let mut rm = match updated.iter().position(|b| &b.account_code == code) {
                Some(i) => updated.swap_remove(i),
                None => self.store.get(tenant_id, code).unwrap_or(AccountBalance {
                    account_code: code.clone(),
                    account_name: line.account.name.clone(),
                    kind: line.account.kind,
                    debit: 0,
                    credit: 0,
                    balance: 0,
                }),
            };

            let overflow = || BalancesProjectionError::Overflow(code.clone());
            if line.is_debit {
                rm.debit = rm.debit.checked_add(line.amount).ok_or_else(overflow)?;
            } else {
                rm.credit = rm.credit.checked_add(line.amount).ok_or_else(overflow)?;
            }
            rm.balance = rm.debit.checked_sub(rm.credit).ok_or_else(overflow)?;
            updated.push(rm);
        }
        for rm in updated {
            self.store.upsert(tenant_id, rm.account_code.clone(), rm);
        }

        self.cursors
            .update_cursor(tenant_id, aggregate_id, PROJECTION_NAME, envelope.sequence_number());
        Ok(())
    }

    pub fn rebuild(
        &self,
        tenant_id: TenantId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), BalancesProjectionError> {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_cursors(tenant_id, PROJECTION_NAME);
        for envelope in envelopes.iter().filter(|e| e.tenant_id() == tenant_id) {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}
