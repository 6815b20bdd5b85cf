use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use uuid::Uuid;

use kestrel_core::{AggregateId, ExpectedVersion, TenantId};
use kestrel_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use kestrel_infra::services::{OperationInput, OrderTransition, PartnerInput, ProductInput, PurchaseOrderInput};
use kestrel_infra::Services;
use kestrel_inventory::{NewMove, OperationType, SourceDocumentKind};
use kestrel_partners::{ContactInfo, PartnerEvent, PartnerId, PartnerKind, PartnerRegistered};
use kestrel_products::{ProductId, ProductType};
use kestrel_purchases::NewPurchaseLine;

struct Fixture {
    services: Services,
    tenant: TenantId,
    vendor: PartnerId,
    product: ProductId,
}

fn setup() -> Fixture {
    let services = Services::in_memory();
    let tenant = TenantId::new();
    services.ensure_company(tenant).unwrap();
    let vendor = services
        .register_partner(
            tenant,
            PartnerInput {
                name: "Wood Corner".to_string(),
                kind: PartnerKind::Vendor,
                email: None,
                phone: None,
                address: None,
            },
        )
        .unwrap()
        .aggregate
        .id_typed();
    let product = services
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
    Fixture { services, tenant, vendor, product }
}

/// Purchase, confirm and receive `quantity` units.
fn purchase_and_receive(fx: &Fixture, quantity: i64) {
    let order = fx
        .services
        .create_purchase_order(
            fx.tenant,
            PurchaseOrderInput {
                vendor_id: fx.vendor,
                requisition_id: None,
                currency: "USD".to_string(),
                lines: vec![NewPurchaseLine { product_id: fx.product, quantity, unit_price: 18_000 }],
            },
        )
        .unwrap()
        .aggregate
        .id_typed();
    fx.services
        .purchase_order_action(fx.tenant, order, OrderTransition::Confirm)
        .unwrap();
    let receipt = fx
        .services
        .operations(fx.tenant, Some(OperationType::Receipt))
        .into_iter()
        .find(|op| {
            op.aggregate
                .source_document()
                .is_some_and(|doc| doc.kind == SourceDocumentKind::PurchaseOrder && doc.id == order.0)
        })
        .unwrap();
    fx.services
        .validate_operation(fx.tenant, receipt.aggregate.id_typed(), false)
        .unwrap();
}

fn bench_command_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_latency");
    group.sample_size(500);

    group.bench_function("register_partner", |b| {
        let fx = setup();
        b.iter(|| {
            fx.services
                .register_partner(
                    fx.tenant,
                    PartnerInput {
                        name: black_box("Deco Addict".to_string()),
                        kind: PartnerKind::Customer,
                        email: None,
                        phone: None,
                        address: None,
                    },
                )
                .unwrap();
        });
    });

    group.bench_function("add_move_with_history", |b| {
        let fx = setup();
        let receipt = fx
            .services
            .create_operation(fx.tenant, OperationType::Receipt, OperationInput::default())
            .unwrap()
            .aggregate
            .id_typed();
        b.iter(|| {
            fx.services
                .add_move(fx.tenant, receipt, NewMove { product_id: fx.product, demand: black_box(1) })
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            let store = InMemoryEventStore::new();
            let tenant_id = TenantId::new();
            b.iter(|| {
                let aggregate_id = AggregateId::new();
                let partner_id = PartnerId::new(aggregate_id);
                let events = (0..size)
                    .map(|i| {
                        let event = PartnerEvent::Registered(PartnerRegistered {
                            tenant_id,
                            partner_id,
                            kind: PartnerKind::Vendor,
                            name: format!("Vendor {i}"),
                            contact: ContactInfo::default(),
                            occurred_at: Utc::now(),
                        });
                        UncommittedEvent::from_typed(tenant_id, aggregate_id, "partners.partner", Uuid::now_v7(), &event)
                            .unwrap()
                    })
                    .collect();
                store.append(black_box(events), ExpectedVersion::Exact(0)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_read_model_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_model_rebuild");
    group.sample_size(20);

    for receipts in [10usize, 100] {
        let fx = setup();
        for _ in 0..receipts {
            purchase_and_receive(&fx, 5);
        }
        group.bench_with_input(BenchmarkId::new("receipts", receipts), &receipts, |b, _| {
            b.iter(|| fx.services.rebuild(black_box(fx.tenant)).unwrap());
        });
    }

    group.finish();
}

fn bench_purchase_to_stock(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflows");
    group.sample_size(200);

    group.bench_function("purchase_confirm_receive", |b| {
        let fx = setup();
        b.iter(|| purchase_and_receive(&fx, black_box(3)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_command_latency,
    bench_event_append_throughput,
    bench_read_model_rebuild,
    bench_purchase_to_stock
);
criterion_main!(benches);
