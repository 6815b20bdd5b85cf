//! Integration tests for the full pipeline.
//!
//! Use case → dispatcher → event store → bus → read models → workflows → ...
//!
//! Verifies:
//! - Confirmed orders generate operations, validated operations update orders
//! - Reservations, backorders and returns across modules
//! - Payments post to the ledger
//! - Tenant isolation and read model rebuilds

#[cfg(test)]
mod tests {
    use kestrel_accounting::PaymentType;
    use kestrel_core::TenantId;
    use kestrel_inventory::{Operation, OperationState, OperationType, ProductQuantityLine, SourceDocumentKind};
    use kestrel_partners::{PartnerId, PartnerKind};
    use kestrel_products::{ProductId, ProductType};
    use kestrel_purchases::{NewPurchaseLine, PurchaseOrderId, ReceiptStatus};
    use kestrel_sales::{DeliveryStatus, NewOrderLine, SalesOrderId};

    use crate::bootstrap::STOCK;
    use crate::command_dispatcher::DispatchError;
    use crate::event_store::EventStore;
    use crate::projections::Snapshot;
    use crate::services::{
        OrderTransition, PartnerInput, PaymentInput, PaymentTransition, ProductInput, PurchaseOrderInput,
        SalesOrderInput, Services,
    };
    use crate::workflows;

    struct Company {
        services: Services,
        tenant: TenantId,
        vendor: PartnerId,
        customer: PartnerId,
        desk: ProductId,
    }

    impl Company {
        fn new() -> Self {
            Self::on(Services::in_memory())
        }

        fn on(services: Services) -> Self {
            let tenant = TenantId::new();
            services.ensure_company(tenant).unwrap();
            let vendor = partner(&services, tenant, "Wood Corner", PartnerKind::Vendor);
            let customer = partner(&services, tenant, "Deco Addict", PartnerKind::Customer);
            let desk = services
                .create_product(
                    tenant,
                    ProductInput {
                        sku: "DESK-001".to_string(),
                        name: "Office Desk".to_string(),
                        product_type: ProductType::Goods,
                        sales_price: 30_000,
                        cost: 18_000,
                    },
                )
                .unwrap()
                .aggregate
                .id_typed();
            Self { services, tenant, vendor, customer, desk }
        }

        fn purchase(&self, quantity: i64) -> PurchaseOrderId {
            let order = self
                .services
                .create_purchase_order(
                    self.tenant,
                    PurchaseOrderInput {
                        vendor_id: self.vendor,
                        requisition_id: None,
                        currency: "USD".to_string(),
                        lines: vec![NewPurchaseLine { product_id: self.desk, quantity, unit_price: 18_000 }],
                    },
                )
                .unwrap()
                .aggregate
                .id_typed();
            self.services
                .purchase_order_action(self.tenant, order, OrderTransition::Confirm)
                .unwrap();
            order
        }

        fn sell(&self, quantity: i64) -> SalesOrderId {
            let order = self
                .services
                .create_sales_order(
                    self.tenant,
                    SalesOrderInput {
                        customer_id: self.customer,
                        currency: None,
                        lines: vec![NewOrderLine { product_id: self.desk, quantity, unit_price: 30_000 }],
                    },
                )
                .unwrap()
                .aggregate
                .id_typed();
            self.services
                .sales_order_action(self.tenant, order, OrderTransition::Confirm)
                .unwrap();
            order
        }

        /// Operations generated from one order.
        fn operations_of(&self, kind: SourceDocumentKind, order: kestrel_core::AggregateId) -> Vec<Snapshot<Operation>> {
            self.services
                .operations(self.tenant, None)
                .into_iter()
                .filter(|op| {
                    op.aggregate
                        .source_document()
                        .is_some_and(|doc| doc.kind == kind && doc.id == order)
                })
                .collect()
        }

        fn receive_all(&self, quantity: i64) -> PurchaseOrderId {
            let order = self.purchase(quantity);
            let receipt = &self.operations_of(SourceDocumentKind::PurchaseOrder, order.0)[0];
            self.services
                .validate_operation(self.tenant, receipt.aggregate.id_typed(), false)
                .unwrap();
            order
        }

        fn on_hand(&self) -> i64 {
            self.services
                .views()
                .stock
                .on_hand(self.tenant, self.desk, STOCK.id(self.tenant))
        }
    }

    fn partner(services: &Services, tenant: TenantId, name: &str, kind: PartnerKind) -> PartnerId {
        services
            .register_partner(
                tenant,
                PartnerInput {
                    name: name.to_string(),
                    kind,
                    email: None,
                    phone: None,
                    address: None,
                },
            )
            .unwrap()
            .aggregate
            .id_typed()
    }

    #[test]
    fn confirmed_purchase_is_received_into_stock() {
        let company = Company::new();
        let order = company.purchase(10);

        let receipts = company.operations_of(SourceDocumentKind::PurchaseOrder, order.0);
        assert_eq!(receipts.len(), 1);
        let receipt = &receipts[0].aggregate;
        assert_eq!(receipt.operation_type(), OperationType::Receipt);
        assert_eq!(receipt.reference(), "WH/IN/00001");
        assert_eq!(receipt.partner_id(), Some(company.vendor));
        assert_ne!(receipt.state(), OperationState::Draft);

        company
            .services
            .validate_operation(company.tenant, receipt.id_typed(), false)
            .unwrap();

        assert_eq!(company.on_hand(), 10);
        let order = company.services.purchase_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(order.lines()[0].qty_received, 10);
        assert_eq!(order.receipt_status(), ReceiptStatus::Full);
    }

    #[test]
    fn sale_reserves_stock_and_backorders_the_rest() {
        let company = Company::new();
        company.receive_all(6);
        let order = company.sell(10);

        let delivery = company.operations_of(SourceDocumentKind::SalesOrder, order.0)[0].clone();
        assert_eq!(delivery.aggregate.state(), OperationState::Assigned);
        assert_eq!(delivery.aggregate.moves()[0].quantity, 6);

        company
            .services
            .validate_operation(company.tenant, delivery.aggregate.id_typed(), true)
            .unwrap();
        assert_eq!(company.on_hand(), 0);

        let so = company.services.sales_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(so.lines()[0].qty_delivered, 6);
        assert_eq!(so.delivery_status(), DeliveryStatus::Partial);

        let backorder = company
            .operations_of(SourceDocumentKind::SalesOrder, order.0)
            .into_iter()
            .find(|op| op.aggregate.backorder_of() == Some(delivery.aggregate.id_typed()))
            .expect("backorder created");
        assert_eq!(backorder.aggregate.state(), OperationState::Confirmed);
        assert_eq!(backorder.aggregate.moves()[0].demand, 4);

        company.receive_all(4);
        let backorder_id = backorder.aggregate.id_typed();
        company.services.check_availability(company.tenant, backorder_id).unwrap();
        company
            .services
            .validate_operation(company.tenant, backorder_id, false)
            .unwrap();

        let so = company.services.sales_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(so.delivery_status(), DeliveryStatus::Full);
        assert_eq!(company.on_hand(), 0);
    }

    #[test]
    fn customer_return_restocks_and_reduces_delivered_quantity() {
        let company = Company::new();
        company.receive_all(5);
        let order = company.sell(5);
        let delivery = company.operations_of(SourceDocumentKind::SalesOrder, order.0)[0]
            .aggregate
            .id_typed();
        company
            .services
            .validate_operation(company.tenant, delivery, false)
            .unwrap();
        assert_eq!(company.on_hand(), 0);

        let returned = company
            .services
            .return_operation(company.tenant, delivery, vec![])
            .unwrap();
        assert_eq!(returned.aggregate.operation_type(), OperationType::Receipt);
        assert_eq!(returned.aggregate.return_of(), Some(delivery));
        company
            .services
            .validate_operation(company.tenant, returned.aggregate.id_typed(), false)
            .unwrap();

        assert_eq!(company.on_hand(), 5);
        let so = company.services.sales_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(so.lines()[0].qty_delivered, 0);
    }

    #[test]
    fn partial_customer_return_reopens_the_delivery_status() {
        let company = Company::new();
        company.receive_all(5);
        let order = company.sell(5);
        let delivery = company.operations_of(SourceDocumentKind::SalesOrder, order.0)[0]
            .aggregate
            .id_typed();
        company
            .services
            .validate_operation(company.tenant, delivery, false)
            .unwrap();

        let returned = company
            .services
            .return_operation(
                company.tenant,
                delivery,
                vec![ProductQuantityLine { product_id: company.desk, quantity: 2 }],
            )
            .unwrap();
        let return_id = returned.aggregate.id_typed();
        assert_eq!(returned.aggregate.moves()[0].demand, 2);
        company
            .services
            .validate_operation(company.tenant, return_id, false)
            .unwrap();

        assert_eq!(company.on_hand(), 2);
        let so = company.services.sales_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(so.lines()[0].qty_delivered, 3);
        assert_eq!(so.delivery_status(), DeliveryStatus::Partial);

        let history = company.services.operation_history(company.tenant, delivery).unwrap();
        assert!(history.iter().any(|e| e.event_type == "inventory.operation.return_requested"));
    }

    #[test]
    fn vendor_return_reduces_received_quantity() {
        let company = Company::new();
        let order = company.receive_all(8);
        let receipt = company.operations_of(SourceDocumentKind::PurchaseOrder, order.0)[0]
            .aggregate
            .id_typed();

        let returned = company
            .services
            .return_operation(company.tenant, receipt, vec![])
            .unwrap();
        let return_id = returned.aggregate.id_typed();
        // Leaving stock: reserved from what is available.
        assert_eq!(returned.aggregate.state(), OperationState::Assigned);
        company
            .services
            .validate_operation(company.tenant, return_id, false)
            .unwrap();

        assert_eq!(company.on_hand(), 0);
        let po = company.services.purchase_order(company.tenant, order).unwrap().aggregate;
        assert_eq!(po.lines()[0].qty_received, 0);
        assert_eq!(po.receipt_status(), ReceiptStatus::Pending);
    }

    #[test]
    fn canceling_an_order_cancels_its_open_operations() {
        let company = Company::new();
        company.receive_all(3);
        let order = company.sell(3);

        company
            .services
            .sales_order_action(company.tenant, order, OrderTransition::Cancel)
            .unwrap();

        let delivery = &company.operations_of(SourceDocumentKind::SalesOrder, order.0)[0];
        assert_eq!(delivery.aggregate.state(), OperationState::Canceled);
        let level = company
            .services
            .views()
            .stock
            .levels(company.tenant)
            .into_iter()
            .find(|l| l.product_id == company.desk && l.location_id == STOCK.id(company.tenant))
            .unwrap();
        assert_eq!((level.on_hand, level.reserved), (3, 0));
    }

    #[test]
    fn redelivered_confirmation_does_not_duplicate_the_delivery() {
        let company = Company::new();
        company.receive_all(2);
        let order = company.sell(2);

        let confirmed = company
            .services
            .store()
            .load_stream(company.tenant, order.0)
            .unwrap()
            .into_iter()
            .find(|e| e.event_type == "sales.order.confirmed")
            .unwrap()
            .to_envelope();
        workflows::react(&company.services, &confirmed);

        assert_eq!(company.operations_of(SourceDocumentKind::SalesOrder, order.0).len(), 1);
    }

    #[test]
    fn payments_post_to_the_ledger() {
        let company = Company::new();
        let payment = company
            .services
            .register_payment(
                company.tenant,
                PaymentInput {
                    payment_type: PaymentType::Outbound,
                    partner_id: company.vendor,
                    amount: 800,
                    currency: None,
                    memo: Some("Desk deposit".to_string()),
                },
            )
            .unwrap()
            .aggregate
            .id_typed();
        assert!(company.services.balances(company.tenant).is_empty());

        company
            .services
            .payment_action(company.tenant, payment, PaymentTransition::Confirm)
            .unwrap();
        assert_eq!(company.services.balance(company.tenant, "1010").unwrap().balance, -800);

        company
            .services
            .payment_action(company.tenant, payment, PaymentTransition::ResetToDraft)
            .unwrap();
        assert_eq!(company.services.balance(company.tenant, "1010").unwrap().balance, 0);
    }

    #[test]
    fn tenants_never_see_each_other() {
        let services = Services::in_memory();
        let first = Company::on(services);
        let order = first.purchase(1);

        let other = TenantId::new();
        first.services.ensure_company(other).unwrap();

        assert!(matches!(
            first.services.purchase_order(other, order),
            Err(DispatchError::NotFound)
        ));
        assert!(first.services.operations(other, None).is_empty());

        let err = first
            .services
            .create_purchase_order(
                other,
                PurchaseOrderInput {
                    vendor_id: first.vendor,
                    requisition_id: None,
                    currency: "USD".to_string(),
                    lines: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation { field: Some("vendor_id"), .. }));
    }

    #[test]
    fn rebuild_reproduces_the_read_models() {
        let company = Company::new();
        company.receive_all(6);
        let order = company.sell(10);
        let delivery = company.operations_of(SourceDocumentKind::SalesOrder, order.0)[0]
            .aggregate
            .id_typed();
        company
            .services
            .validate_operation(company.tenant, delivery, true)
            .unwrap();

        let views = company.services.views();
        let mut operations = views.operations.list(company.tenant);
        operations.sort_by_key(|op| op.aggregate.reference().to_string());
        let mut levels = views.stock.levels(company.tenant);
        levels.sort_by_key(|l| (l.product_id, l.location_id));
        let orders = company.services.sales_orders(company.tenant);

        company.services.rebuild(company.tenant).unwrap();

        let mut rebuilt_operations = views.operations.list(company.tenant);
        rebuilt_operations.sort_by_key(|op| op.aggregate.reference().to_string());
        let mut rebuilt_levels = views.stock.levels(company.tenant);
        rebuilt_levels.sort_by_key(|l| (l.product_id, l.location_id));

        assert_eq!(rebuilt_operations, operations);
        assert_eq!(rebuilt_levels, levels);
        assert_eq!(company.services.sales_orders(company.tenant), orders);
    }
}
