//! Per-company reference sequences (`P00001`, `WH/IN/00001`, `PAY/00001`, ...).

use std::collections::HashMap;
use std::sync::Mutex;

use kestrel_core::TenantId;

pub const PURCHASE_ORDER: &str = "P";
pub const REQUISITION: &str = "PA";
pub const SALES_ORDER: &str = "S";
pub const PAYMENT: &str = "PAY/";

const PADDING: usize = 5;

/// Hands out increasing references per tenant and prefix.
#[derive(Debug, Default)]
pub struct Sequencer {
    counters: Mutex<HashMap<(TenantId, String), u64>>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, tenant_id: TenantId, prefix: &str) -> String {
        let mut counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry((tenant_id, prefix.to_string())).or_insert(0);
        *counter += 1;
        format!("{prefix}{:0width$}", *counter, width = PADDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_per_tenant_and_prefix() {
        let seq = Sequencer::new();
        let (a, b) = (TenantId::new(), TenantId::new());

        assert_eq!(seq.next(a, PURCHASE_ORDER), "P00001");
        assert_eq!(seq.next(a, PURCHASE_ORDER), "P00002");
        assert_eq!(seq.next(a, "WH/IN/"), "WH/IN/00001");
        assert_eq!(seq.next(b, PURCHASE_ORDER), "P00001");
        assert_eq!(seq.next(b, PAYMENT), "PAY/00001");
    }
}
