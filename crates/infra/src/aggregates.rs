//! Stream metadata of every event-sourced aggregate the application stores.

use serde::de::DeserializeOwned;
use serde::Serialize;

use kestrel_accounting::{Ledger, LedgerId, Payment, PaymentId};
use kestrel_core::{Aggregate, AggregateId, DomainError, TenantId};
use kestrel_events::Event;
use kestrel_inventory::{Location, LocationId, Operation, OperationId, ProductQuantity, ProductQuantityId};
use kestrel_partners::{Partner, PartnerId};
use kestrel_products::{Product, ProductId};
use kestrel_purchases::{PurchaseOrder, PurchaseOrderId, Requisition, RequisitionId};
use kestrel_sales::{SalesOrder, SalesOrderId};
use kestrel_time_off::{Leave, LeaveId};

/// An aggregate that lives in the event store.
///
/// `AGGREGATE_TYPE` names its streams (`"<module>.<aggregate>"`) and is what
/// projections filter envelopes on.
pub trait EventSourced: Aggregate<Error = DomainError> + Clone + Send + Sync + 'static
where
    Self::Event: Event + Serialize + DeserializeOwned,
{
    const AGGREGATE_TYPE: &'static str;

    /// Empty instance for rehydration.
    fn empty_stream(id: AggregateId) -> Self;

    /// Owning tenant, `None` until the creation event was applied.
    fn owner(&self) -> Option<TenantId>;
}

macro_rules! event_sourced {
    ($agg:ty, $id:ident, $name:literal) => {
        impl EventSourced for $agg {
            const AGGREGATE_TYPE: &'static str = $name;

            fn empty_stream(id: AggregateId) -> Self {
                <$agg>::empty($id::new(id))
            }

            fn owner(&self) -> Option<TenantId> {
                self.tenant_id()
            }
        }
    };
}

event_sourced!(Partner, PartnerId, "partners.partner");
event_sourced!(Product, ProductId, "products.product");
event_sourced!(Location, LocationId, "inventory.location");
event_sourced!(Operation, OperationId, "inventory.operation");
event_sourced!(ProductQuantity, ProductQuantityId, "inventory.quantity");
event_sourced!(PurchaseOrder, PurchaseOrderId, "purchases.order");
event_sourced!(Requisition, RequisitionId, "purchases.requisition");
event_sourced!(SalesOrder, SalesOrderId, "sales.order");
event_sourced!(Payment, PaymentId, "accounting.payment");
event_sourced!(Ledger, LedgerId, "accounting.ledger");
event_sourced!(Leave, LeaveId, "time_off.leave");
