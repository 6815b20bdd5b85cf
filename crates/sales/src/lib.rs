//! Sales Orders domain module (event-sourced).
//!
//! This crate contains business rules for quotations and sales orders,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod order;

pub use order::{
    AddLine, CreateSalesOrder, DeliveredQuantity, DeliveryRecorded, DeliveryStatus, LineAdded,
    LineDelivered, LineRemoved, NewOrderLine, OrderConfirmed, OrderLine, OrderTransitioned,
    RecordDelivery, RemoveLine, SalesOrder, SalesOrderAction, SalesOrderCommand,
    SalesOrderCreated, SalesOrderEvent, SalesOrderId, SalesOrderState, delivery_status,
};
