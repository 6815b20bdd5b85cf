//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-side models.
//! All of them are:
//! - **Rebuildable** from the event store
//! - **Tenant-isolated**
//! - **Idempotent** under at-least-once delivery (per-stream cursors)

pub mod balances;
pub mod cursor_store;
pub mod snapshots;
pub mod stock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use kestrel_accounting::Payment;
use kestrel_core::TenantId;
use kestrel_events::EventEnvelope;
use kestrel_inventory::{Location, Operation, ProductQuantity};
use kestrel_partners::Partner;
use kestrel_products::Product;
use kestrel_purchases::{PurchaseOrder, Requisition};
use kestrel_sales::SalesOrder;
use kestrel_time_off::Leave;

use crate::event_store::EventStoreError;

pub use balances::{AccountBalance, AccountBalancesProjection, BalancesProjectionError};
pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
pub use snapshots::{Snapshot, SnapshotProjection, SnapshotProjectionError};
pub use stock::{StockLevel, StockProjection, StockProjectionError};

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotProjectionError),

    #[error(transparent)]
    Stock(#[from] StockProjectionError),

    #[error(transparent)]
    Balances(#[from] BalancesProjectionError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Every read model of the application.
#[derive(Default)]
pub struct ReadModels {
    pub partners: SnapshotProjection<Partner>,
    pub products: SnapshotProjection<Product>,
    pub locations: SnapshotProjection<Location>,
    pub operations: SnapshotProjection<Operation>,
    pub counts: SnapshotProjection<ProductQuantity>,
    pub purchase_orders: SnapshotProjection<PurchaseOrder>,
    pub requisitions: SnapshotProjection<Requisition>,
    pub sales_orders: SnapshotProjection<SalesOrder>,
    pub payments: SnapshotProjection<Payment>,
    pub leaves: SnapshotProjection<Leave>,
    pub stock: StockProjection,
    pub balances: AccountBalancesProjection,
}

impl ReadModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one envelope to every projection.
    ///
    /// A failing projection is logged and skipped; the others still apply.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) {
        let results = [
            ("partners", self.partners.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("products", self.products.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("locations", self.locations.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("operations", self.operations.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("counts", self.counts.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("purchase_orders", self.purchase_orders.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("requisitions", self.requisitions.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("sales_orders", self.sales_orders.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("payments", self.payments.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("leaves", self.leaves.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("stock", self.stock.apply_envelope(envelope).map_err(|e| e.to_string())),
            ("balances", self.balances.apply_envelope(envelope).map_err(|e| e.to_string())),
        ];

        for (projection, result) in results {
            if let Err(error) = result {
                tracing::warn!(
                    projection,
                    event_type = envelope.event_type(),
                    aggregate_id = %envelope.aggregate_id(),
                    sequence = envelope.sequence_number(),
                    %error,
                    "projection failed to apply event"
                );
            }
        }
    }

    /// Rebuild every read model of a tenant from its full history.
    pub fn rebuild(&self, tenant_id: TenantId, envelopes: &[EventEnvelope<JsonValue>]) -> Result<(), RebuildError> {
        self.partners.rebuild(tenant_id, envelopes)?;
        self.products.rebuild(tenant_id, envelopes)?;
        self.locations.rebuild(tenant_id, envelopes)?;
        self.operations.rebuild(tenant_id, envelopes)?;
        self.counts.rebuild(tenant_id, envelopes)?;
        self.purchase_orders.rebuild(tenant_id, envelopes)?;
        self.requisitions.rebuild(tenant_id, envelopes)?;
        self.sales_orders.rebuild(tenant_id, envelopes)?;
        self.payments.rebuild(tenant_id, envelopes)?;
        self.leaves.rebuild(tenant_id, envelopes)?;
        self.stock.rebuild(tenant_id, envelopes)?;
        self.balances.rebuild(tenant_id, envelopes)?;
        Ok(())
    }
}
