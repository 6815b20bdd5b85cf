use chrono::Utc;
use serde::Deserialize;

use kestrel_core::{AggregateId, TenantId};
use kestrel_partners::PartnerId;
use kestrel_sales::{
    AddLine, CreateSalesOrder, NewOrderLine, RemoveLine, SalesOrder, SalesOrderAction, SalesOrderCommand,
    SalesOrderId,
};

use super::purchases::DEFAULT_CURRENCY;
use super::{found, listed, OrderTransition, ServiceResult, Services};
use crate::projections::Snapshot;
use crate::sequencer::SALES_ORDER;

#[derive(Debug, Clone, Deserialize)]
pub struct SalesOrderInput {
    pub customer_id: PartnerId,
    pub currency: Option<String>,
    #[serde(default)]
    pub lines: Vec<NewOrderLine>,
}

impl Services {
    pub fn create_sales_order(&self, tenant_id: TenantId, input: SalesOrderInput) -> ServiceResult<Snapshot<SalesOrder>> {
        let order_id = SalesOrderId::new(AggregateId::new());
        self.write(|s| {
            s.customer(tenant_id, input.customer_id, "customer_id")?;
            for line in &input.lines {
                s.sellable(tenant_id, line.product_id, "lines")?;
            }
            s.execute::<SalesOrder>(
                tenant_id,
                order_id.0,
                SalesOrderCommand::Create(CreateSalesOrder {
                    tenant_id,
                    order_id,
                    reference: s.next_reference(tenant_id, SALES_ORDER),
                    customer_id: input.customer_id,
                    currency: input.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                    lines: input.lines.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.sales_order(tenant_id, order_id)
    }

    pub fn add_sales_line(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        line: NewOrderLine,
    ) -> ServiceResult<Snapshot<SalesOrder>> {
        self.write(|s| {
            s.sellable(tenant_id, line.product_id, "product_id")?;
            s.execute::<SalesOrder>(
                tenant_id,
                order_id.0,
                SalesOrderCommand::AddLine(AddLine {
                    tenant_id,
                    order_id,
                    line,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.sales_order(tenant_id, order_id)
    }

    pub fn remove_sales_line(&self, tenant_id: TenantId, order_id: SalesOrderId, line_no: u32) -> ServiceResult<Snapshot<SalesOrder>> {
        self.write(|s| {
            s.execute::<SalesOrder>(
                tenant_id,
                order_id.0,
                SalesOrderCommand::RemoveLine(RemoveLine {
                    tenant_id,
                    order_id,
                    line_no,
                    occurred_at: Utc::now(),
                }),
            )
        })?;
        self.sales_order(tenant_id, order_id)
    }

    pub fn sales_order_action(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        transition: OrderTransition,
    ) -> ServiceResult<Snapshot<SalesOrder>> {
        let action = SalesOrderAction {
            tenant_id,
            order_id,
            occurred_at: Utc::now(),
        };
        let command = match transition {
            OrderTransition::Send => SalesOrderCommand::Send(action),
            OrderTransition::Confirm => SalesOrderCommand::Confirm(action),
            OrderTransition::Lock => SalesOrderCommand::Lock(action),
            OrderTransition::Unlock => SalesOrderCommand::Unlock(action),
            OrderTransition::Cancel => SalesOrderCommand::Cancel(action),
            OrderTransition::ResetToDraft => SalesOrderCommand::ResetToDraft(action),
        };
        self.write(|s| s.execute::<SalesOrder>(tenant_id, order_id.0, command))?;
        self.sales_order(tenant_id, order_id)
    }

    pub fn sales_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> ServiceResult<Snapshot<SalesOrder>> {
        found(&self.views().sales_orders, tenant_id, order_id.0)
    }

    pub fn sales_orders(&self, tenant_id: TenantId) -> Vec<Snapshot<SalesOrder>> {
        listed(&self.views().sales_orders, tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use kestrel_partners::PartnerKind;
    use kestrel_products::{ProductId, ProductType};
    use kestrel_sales::SalesOrderState;

    use super::*;
    use crate::command_dispatcher::DispatchError;
    use crate::services::{PartnerInput, ProductInput};

    fn setup() -> (Services, TenantId, PartnerId, ProductId) {
        let services = Services::in_memory();
        let tenant = TenantId::new();
        services.ensure_company(tenant).unwrap();
        let customer = services
            .register_partner(
                tenant,
                PartnerInput {
                    name: "Deco Addict".to_string(),
                    kind: PartnerKind::Customer,
                    email: None,
                    phone: None,
                    address: None,
                },
            )
            .unwrap()
            .aggregate
            .id_typed();
        let install = services
            .create_product(
                tenant,
                ProductInput {
                    sku: "INSTALL".to_string(),
                    name: "Installation".to_string(),
                    product_type: ProductType::Service,
                    sales_price: 5_000,
                    cost: 0,
                },
            )
            .unwrap()
            .aggregate
            .id_typed();
        (services, tenant, customer, install)
    }

    #[test]
    fn amount_total_and_default_currency() {
        let (services, tenant, customer, install) = setup();
        let order = services
            .create_sales_order(
                tenant,
                SalesOrderInput {
                    customer_id: customer,
                    currency: None,
                    lines: vec![NewOrderLine { product_id: install, quantity: 3, unit_price: 5_000 }],
                },
            )
            .unwrap();

        assert_eq!(order.aggregate.reference(), "S00001");
        assert_eq!(order.aggregate.currency(), "USD");
        assert_eq!(order.aggregate.amount_total(), 15_000);
    }

    #[test]
    fn confirming_a_services_only_order_creates_no_delivery() {
        let (services, tenant, customer, install) = setup();
        let id = services
            .create_sales_order(
                tenant,
                SalesOrderInput {
                    customer_id: customer,
                    currency: None,
                    lines: vec![NewOrderLine { product_id: install, quantity: 1, unit_price: 5_000 }],
                },
            )
            .unwrap()
            .aggregate
            .id_typed();

        let confirmed = services.sales_order_action(tenant, id, OrderTransition::Confirm).unwrap();
        assert_eq!(confirmed.aggregate.state(), SalesOrderState::Sale);
        assert!(services.operations(tenant, None).is_empty());
    }

    #[test]
    fn lines_can_be_removed_while_draft() {
        let (services, tenant, customer, install) = setup();
        let id = services
            .create_sales_order(
                tenant,
                SalesOrderInput {
                    customer_id: customer,
                    currency: None,
                    lines: vec![],
                },
            )
            .unwrap()
            .aggregate
            .id_typed();
        services
            .add_sales_line(tenant, id, NewOrderLine { product_id: install, quantity: 2, unit_price: 5_000 })
            .unwrap();
        let order = services.remove_sales_line(tenant, id, 1).unwrap();
        assert!(order.aggregate.lines().is_empty());

        let err = services.sales_order_action(tenant, id, OrderTransition::Confirm).unwrap_err();
        assert!(matches!(err, DispatchError::InvariantViolation(_)));
    }
}
