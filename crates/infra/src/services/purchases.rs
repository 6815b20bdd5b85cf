use chrono::Utc;
use serde::{Deserialize, Serialize};

use kestrel_core::{AggregateId, TenantId};
use kestrel_partners::PartnerId;
use kestrel_products::ProductId;
use kestrel_purchases::{
    AddPurchaseLine, AddRequisitionLine, CreatePurchaseOrder, CreateRequisition, NewPurchaseLine,
    PurchaseOrder, PurchaseOrderAction, PurchaseOrderCommand, PurchaseOrderId, RemovePurchaseLine,
    Requisition, RequisitionAction, RequisitionCommand, RequisitionId, RequisitionState, RequisitionType,
};

use super::{found, listed, OrderTransition, ServiceResult, Services};
use crate::command_dispatcher::DispatchError;
use crate::projections::Snapshot;
use crate::sequencer::{PURCHASE_ORDER, REQUISITION};

pub(crate) const DEFAULT_CURRENCY: &str = "USD";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseOrderInput {
    pub vendor_id: PartnerId,
    pub requisition_id: Option<RequisitionId>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub lines: Vec<NewPurchaseLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequisitionInput {
    #[serde(rename = "type")]
    pub requisition_type: RequisitionType,
    pub vendor_id: Option<PartnerId>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RequisitionLineInput {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionTransition {
    Confirm,
    Close,
    Cancel,
}

impl Services {
    // ---- purchase orders ----

    pub fn create_purchase_order(
        &self,
        tenant_id: TenantId,
        input: PurchaseOrderInput,
    ) -> ServiceResult<Snapshot<PurchaseOrder>> {
        let order_id = PurchaseOrderId::new(AggregateId::new());
        self.write(|s| {
            s.vendor(tenant_id, input.vendor_id, "vendor_id")?;
            if let Some(requisition_id) = input.requisition_id {
                let requisition = s
                    .views()
                    .requisitions
                    .get(tenant_id, requisition_id.0)
                    .ok_or_else(|| DispatchError::field("requisition_id", "the selected agreement does not exist"))?
                    .aggregate;
                if requisition.state() != RequisitionState::Confirmed {
                    return Err(DispatchError::field(
                        "requisition_id",
                        "only confirmed agreements can be used on purchase orders",
                    ));
                }
            }
            for line in &input.lines {
                s.sellable(tenant_id, line.product_id, "lines")?;
            }

            s.execute::<PurchaseOrder>(
                tenant_id,
                order_id.0,
                PurchaseOrderCommand::Create(CreatePurchaseOrder {
                    tenant_id,
                    order_id,
                    reference: s.next_reference(tenant_id, PURCHASE_ORDER),
                    vendor_id: input.vendor_id,
                    requisition_id: input.requisition_id,
                    currency: input.currency.clone(),
                    lines: input.lines.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.purchase_order(tenant_id, order_id)
    }

    pub fn add_purchase_line(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        line: NewPurchaseLine,
    ) -> ServiceResult<Snapshot<PurchaseOrder>> {
        self.write(|s| {
            s.sellable(tenant_id, line.product_id, "product_id")?;
            s.execute::<PurchaseOrder>(
                tenant_id,
                order_id.0,
                PurchaseOrderCommand::AddLine(AddPurchaseLine {
                    tenant_id,
                    order_id,
                    line,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.purchase_order(tenant_id, order_id)
    }

    pub fn remove_purchase_line(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        line_no: u32,
    ) -> ServiceResult<Snapshot<PurchaseOrder>> {
        self.write(|s| {
            s.execute::<PurchaseOrder>(
                tenant_id,
                order_id.0,
                PurchaseOrderCommand::RemoveLine(RemovePurchaseLine {
                    tenant_id,
                    order_id,
                    line_no,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.purchase_order(tenant_id, order_id)
    }

    /// Send, confirm, lock, unlock, cancel or reset a purchase order.
    pub fn purchase_order_action(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        transition: OrderTransition,
    ) -> ServiceResult<Snapshot<PurchaseOrder>> {
        let action = PurchaseOrderAction {
            tenant_id,
            order_id,
            occurred_at: Utc::now(),
        };
        let command = match transition {
            OrderTransition::Send => PurchaseOrderCommand::Send(action),
            OrderTransition::Confirm => PurchaseOrderCommand::Confirm(action),
            OrderTransition::Lock => PurchaseOrderCommand::Lock(action),
            OrderTransition::Unlock => PurchaseOrderCommand::Unlock(action),
            OrderTransition::Cancel => PurchaseOrderCommand::Cancel(action),
            OrderTransition::ResetToDraft => PurchaseOrderCommand::ResetToDraft(action),
        };
        self.write(|s| s.execute::<PurchaseOrder>(tenant_id, order_id.0, command))?;
        self.purchase_order(tenant_id, order_id)
    }

    pub fn purchase_order(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> ServiceResult<Snapshot<PurchaseOrder>> {
        found(&self.views().purchase_orders, tenant_id, order_id.0)
    }

    pub fn purchase_orders(&self, tenant_id: TenantId) -> Vec<Snapshot<PurchaseOrder>> {
        listed(&self.views().purchase_orders, tenant_id)
    }

    // ---- purchase agreements ----

    pub fn create_requisition(&self, tenant_id: TenantId, input: RequisitionInput) -> ServiceResult<Snapshot<Requisition>> {
        let requisition_id = RequisitionId::new(AggregateId::new());
        self.write(|s| {
            if let Some(vendor_id) = input.vendor_id {
                s.vendor(tenant_id, vendor_id, "vendor_id")?;
            }
            s.execute::<Requisition>(
                tenant_id,
                requisition_id.0,
                RequisitionCommand::Create(CreateRequisition {
                    tenant_id,
                    requisition_id,
                    reference: s.next_reference(tenant_id, REQUISITION),
                    requisition_type: input.requisition_type,
                    vendor_id: input.vendor_id,
                    currency: input.currency.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.requisition(tenant_id, requisition_id)
    }

    pub fn add_requisition_line(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        line: RequisitionLineInput,
    ) -> ServiceResult<Snapshot<Requisition>> {
        self.write(|s| {
            s.sellable(tenant_id, line.product_id, "product_id")?;
            s.execute::<Requisition>(
                tenant_id,
                requisition_id.0,
                RequisitionCommand::AddLine(AddRequisitionLine {
                    tenant_id,
                    requisition_id,
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.requisition(tenant_id, requisition_id)
    }

    pub fn requisition_action(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        transition: RequisitionTransition,
    ) -> ServiceResult<Snapshot<Requisition>> {
        let action = RequisitionAction {
            tenant_id,
            requisition_id,
            occurred_at: Utc::now(),
        };
        let command = match transition {
            RequisitionTransition::Confirm => RequisitionCommand::Confirm(action),
            RequisitionTransition::Close => RequisitionCommand::Close(action),
            RequisitionTransition::Cancel => RequisitionCommand::Cancel(action),
        };
        self.write(|s| s.execute::<Requisition>(tenant_id, requisition_id.0, command))?;
        self.requisition(tenant_id, requisition_id)
    }

    pub fn requisition(&self, tenant_id: TenantId, requisition_id: RequisitionId) -> ServiceResult<Snapshot<Requisition>> {
        found(&self.views().requisitions, tenant_id, requisition_id.0)
    }

    pub fn requisitions(&self, tenant_id: TenantId) -> Vec<Snapshot<Requisition>> {
        listed(&self.views().requisitions, tenant_id)
    }
}
