//! Cross-module reactions.
//!
//! `react` runs for every settled envelope, after the read models applied it.
//! Each reaction dispatches follow-up commands through the same services;
//! failures are logged and never undo the triggering command.
//!
//! Documents created here get ids derived from the triggering event, so a
//! redelivered envelope addresses the same stream and fails with `Conflict`
//! instead of creating a duplicate.

use std::collections::BTreeMap;

use chrono::Utc;

use kestrel_accounting::{Payment, PaymentEvent};
use kestrel_core::{AggregateId, TenantId};
use kestrel_inventory::{
    CreateOperation, LocationUsage, NewMove, Operation, OperationEvent, OperationId, OperationState,
    OperationType, OperationValidated, ReturnRequested, ShippingPolicy, SourceDocument,
    SourceDocumentKind,
};
use kestrel_products::ProductId;
use kestrel_purchases::{
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderEvent, PurchaseOrderId, ReceivedQuantity,
    RecordReceipt,
};
use kestrel_sales::{
    DeliveredQuantity, RecordDelivery, SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId,
};

use crate::aggregates::EventSourced;
use crate::bootstrap::{CUSTOMERS, STOCK, VENDORS};
use crate::command_dispatcher::DispatchError;
use crate::services::{JsonEnvelope, ServiceResult, Services};

pub(crate) fn react(services: &Services, envelope: &JsonEnvelope) {
    let result = match envelope.aggregate_type() {
        t if t == PurchaseOrder::AGGREGATE_TYPE => on_purchase_order(services, envelope),
        t if t == SalesOrder::AGGREGATE_TYPE => on_sales_order(services, envelope),
        t if t == Operation::AGGREGATE_TYPE => on_operation(services, envelope),
        t if t == Payment::AGGREGATE_TYPE => on_payment(services, envelope),
        _ => Ok(()),
    };

    match result {
        Ok(()) => {}
        Err(DispatchError::Conflict(reason)) => {
            tracing::debug!(event_type = envelope.event_type(), %reason, "workflow already applied");
        }
        Err(error) => {
            tracing::warn!(
                tenant_id = %envelope.tenant_id(),
                event_type = envelope.event_type(),
                aggregate_id = %envelope.aggregate_id(),
                %error,
                "workflow failed"
            );
        }
    }
}

fn decode<E: serde::de::DeserializeOwned>(envelope: &JsonEnvelope) -> ServiceResult<E> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))
}

/// Stable id for a document created in reaction to `envelope`.
fn follow_up_id(envelope: &JsonEnvelope, purpose: &str) -> OperationId {
    OperationId::new(AggregateId::derived(
        envelope.tenant_id(),
        &format!("{purpose}:{}", envelope.event_id()),
    ))
}

// ---- orders → operations ----

fn on_purchase_order(services: &Services, envelope: &JsonEnvelope) -> ServiceResult<()> {
    let tenant_id = envelope.tenant_id();
    match decode::<PurchaseOrderEvent>(envelope)? {
        PurchaseOrderEvent::Confirmed(confirmed) => {
            let moves = pending_moves(
                services,
                tenant_id,
                confirmed.lines.iter().map(|l| (l.product_id, l.quantity - l.qty_received)),
            );
            if moves.is_empty() {
                return Ok(());
            }
            services.open_operation(CreateOperation {
                tenant_id,
                operation_id: follow_up_id(envelope, "receipt"),
                operation_type: OperationType::Receipt,
                reference: services.next_reference(tenant_id, OperationType::Receipt.sequence_prefix()),
                partner_id: Some(confirmed.vendor_id),
                source: VENDORS.location_ref(tenant_id),
                destination: STOCK.location_ref(tenant_id),
                source_document: Some(SourceDocument {
                    kind: SourceDocumentKind::PurchaseOrder,
                    id: confirmed.order_id.0,
                    reference: confirmed.reference,
                }),
                return_of: None,
                backorder_of: None,
                shipping_policy: ShippingPolicy::default(),
                scheduled_at: None,
                moves,
                occurred_at: Utc::now(),
            })
        }
        PurchaseOrderEvent::Canceled(canceled) => cancel_open_operations(services, tenant_id, canceled.order_id.0),
        _ => Ok(()),
    }
}

fn on_sales_order(services: &Services, envelope: &JsonEnvelope) -> ServiceResult<()> {
    let tenant_id = envelope.tenant_id();
    match decode::<SalesOrderEvent>(envelope)? {
        SalesOrderEvent::Confirmed(confirmed) => {
            let moves = pending_moves(
                services,
                tenant_id,
                confirmed.lines.iter().map(|l| (l.product_id, l.quantity - l.qty_delivered)),
            );
            if moves.is_empty() {
                return Ok(());
            }
            services.open_operation(CreateOperation {
                tenant_id,
                operation_id: follow_up_id(envelope, "delivery"),
                operation_type: OperationType::Delivery,
                reference: services.next_reference(tenant_id, OperationType::Delivery.sequence_prefix()),
                partner_id: Some(confirmed.customer_id),
                source: STOCK.location_ref(tenant_id),
                destination: CUSTOMERS.location_ref(tenant_id),
                source_document: Some(SourceDocument {
                    kind: SourceDocumentKind::SalesOrder,
                    id: confirmed.order_id.0,
                    reference: confirmed.reference,
                }),
                return_of: None,
                backorder_of: None,
                shipping_policy: ShippingPolicy::default(),
                scheduled_at: None,
                moves,
                occurred_at: Utc::now(),
            })
        }
        SalesOrderEvent::Canceled(canceled) => cancel_open_operations(services, tenant_id, canceled.order_id.0),
        _ => Ok(()),
    }
}

/// Storable products with a positive open quantity, one move per line.
fn pending_moves(
    services: &Services,
    tenant_id: TenantId,
    lines: impl Iterator<Item = (ProductId, i64)>,
) -> Vec<NewMove> {
    lines
        .filter(|(_, open)| *open > 0)
        .filter(|(product_id, _)| {
            services
                .views()
                .products
                .get(tenant_id, product_id.0)
                .is_some_and(|p| p.aggregate.is_storable())
        })
        .map(|(product_id, demand)| NewMove { product_id, demand })
        .collect()
}

/// Cancel the operations of an order that were not processed yet.
fn cancel_open_operations(services: &Services, tenant_id: TenantId, order_id: AggregateId) -> ServiceResult<()> {
    let open = services.operations(tenant_id, None).into_iter().filter(|op| {
        op.aggregate.source_document().is_some_and(|doc| doc.id == order_id)
            && !matches!(op.aggregate.state(), OperationState::Done | OperationState::Canceled)
    });
    for op in open {
        services.cancel_operation_document(tenant_id, op.aggregate.id_typed())?;
    }
    Ok(())
}

// ---- operations → orders, backorders, returns ----

fn on_operation(services: &Services, envelope: &JsonEnvelope) -> ServiceResult<()> {
    let tenant_id = envelope.tenant_id();
    match decode::<OperationEvent>(envelope)? {
        OperationEvent::Confirmed(_) => reserve_generated(services, tenant_id, envelope.aggregate_id()),
        OperationEvent::Validated(validated) => {
            record_order_quantities(services, &validated)?;
            open_backorder(services, &validated)
        }
        OperationEvent::ReturnRequested(requested) => open_return(services, &requested),
        _ => Ok(()),
    }
}

/// Generated operations leaving stock try to reserve as soon as they are confirmed.
fn reserve_generated(services: &Services, tenant_id: TenantId, aggregate_id: AggregateId) -> ServiceResult<()> {
    let Some(snapshot) = services.views().operations.get(tenant_id, aggregate_id) else {
        return Ok(());
    };
    let op = snapshot.aggregate;
    let generated = op.return_of().is_some()
        || op.backorder_of().is_some()
        || op
            .source_document()
            .is_some_and(|doc| doc.kind == SourceDocumentKind::SalesOrder);
    if !generated || !op.source().usage.is_internal() || op.state() != OperationState::Confirmed {
        return Ok(());
    }
    services.reserve_operation(tenant_id, op.id_typed())
}

fn record_order_quantities(services: &Services, validated: &OperationValidated) -> ServiceResult<()> {
    let Some(doc) = &validated.source_document else {
        return Ok(());
    };
    let tenant_id = validated.tenant_id;

    let mut per_product: BTreeMap<ProductId, i64> = BTreeMap::new();
    for done in &validated.done {
        *per_product.entry(done.product_id).or_insert(0) += done.quantity;
    }

    match doc.kind {
        SourceDocumentKind::PurchaseOrder => {
            // Anything sent back to a supplier location is a vendor return.
            let sign = if validated.destination.usage == LocationUsage::Supplier { -1 } else { 1 };
            let order_id = PurchaseOrderId::new(doc.id);
            services.execute::<PurchaseOrder>(
                tenant_id,
                doc.id,
                PurchaseOrderCommand::RecordReceipt(RecordReceipt {
                    tenant_id,
                    order_id,
                    operation_id: validated.operation_id.0,
                    quantities: per_product
                        .into_iter()
                        .map(|(product_id, quantity)| ReceivedQuantity {
                            product_id,
                            quantity: sign * quantity,
                        })
                        .collect(),
                    occurred_at: Utc::now(),
                }),
            )?;
        }
        SourceDocumentKind::SalesOrder => {
            // Only what reaches a customer location counts as delivered.
            let sign = if validated.destination.usage == LocationUsage::Customer { 1 } else { -1 };
            let order_id = SalesOrderId::new(doc.id);
            services.execute::<SalesOrder>(
                tenant_id,
                doc.id,
                SalesOrderCommand::RecordDelivery(RecordDelivery {
                    tenant_id,
                    order_id,
                    operation_id: validated.operation_id.0,
                    quantities: per_product
                        .into_iter()
                        .map(|(product_id, quantity)| DeliveredQuantity {
                            product_id,
                            quantity: sign * quantity,
                        })
                        .collect(),
                    occurred_at: Utc::now(),
                }),
            )?;
        }
        SourceDocumentKind::Operation => {}
    }
    Ok(())
}

fn open_backorder(services: &Services, validated: &OperationValidated) -> ServiceResult<()> {
    let Some(backorder) = &validated.backorder else {
        return Ok(());
    };
    let tenant_id = validated.tenant_id;
    services.open_operation(CreateOperation {
        tenant_id,
        operation_id: backorder.operation_id,
        operation_type: validated.operation_type,
        reference: services.next_reference(tenant_id, validated.operation_type.sequence_prefix()),
        partner_id: validated.partner_id,
        source: validated.source,
        destination: validated.destination,
        source_document: validated.source_document.clone(),
        return_of: validated.return_of,
        backorder_of: Some(validated.operation_id),
        shipping_policy: validated.shipping_policy,
        scheduled_at: None,
        moves: backorder.moves.clone(),
        occurred_at: Utc::now(),
    })
}

fn open_return(services: &Services, requested: &ReturnRequested) -> ServiceResult<()> {
    let tenant_id = requested.tenant_id;
    services.open_operation(CreateOperation {
        tenant_id,
        operation_id: requested.return_operation_id,
        operation_type: requested.return_type,
        reference: services.next_reference(tenant_id, requested.return_type.sequence_prefix()),
        partner_id: requested.partner_id,
        source: requested.source,
        destination: requested.destination,
        source_document: requested.source_document.clone(),
        return_of: Some(requested.operation_id),
        backorder_of: None,
        shipping_policy: ShippingPolicy::default(),
        scheduled_at: None,
        moves: requested
            .lines
            .iter()
            .map(|l| NewMove {
                product_id: l.product_id,
                demand: l.quantity,
            })
            .collect(),
        occurred_at: Utc::now(),
    })
}

// ---- payments → ledger ----

fn on_payment(services: &Services, envelope: &JsonEnvelope) -> ServiceResult<()> {
    let tenant_id = envelope.tenant_id();
    match decode::<PaymentEvent>(envelope)? {
        PaymentEvent::Confirmed(confirmed) => {
            let posting = confirmed.posting;
            services.post_journal_entry(
                tenant_id,
                envelope.event_id(),
                posting.journal_lines(false),
                format!("Payment {}", posting.reference),
            )
        }
        PaymentEvent::Canceled(unposted) | PaymentEvent::ResetToDraft(unposted) => match unposted.reversal {
            Some(posting) => services.post_journal_entry(
                tenant_id,
                envelope.event_id(),
                posting.journal_lines(true),
                format!("Reversal of payment {}", posting.reference),
            ),
            None => Ok(()),
        },
        _ => Ok(()),
    }
}
