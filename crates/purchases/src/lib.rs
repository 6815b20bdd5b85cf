//! Purchases domain module (event-sourced).
//!
//! Requests for quotation, purchase orders and purchase agreements,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod order;
pub mod requisition;

pub use order::{
    AddPurchaseLine, CreatePurchaseOrder, LineReceived, NewPurchaseLine, PurchaseLineAdded,
    PurchaseLineRemoved, PurchaseOrder, PurchaseOrderAction, PurchaseOrderCommand,
    PurchaseOrderConfirmed, PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId,
    PurchaseOrderLine, PurchaseOrderState, PurchaseOrderTransitioned, ReceiptRecorded,
    ReceiptStatus, ReceivedQuantity, RecordReceipt, RemovePurchaseLine, receipt_status,
};
pub use requisition::{
    AddRequisitionLine, CreateRequisition, Requisition, RequisitionAction, RequisitionCommand,
    RequisitionCreated, RequisitionEvent, RequisitionId, RequisitionLine, RequisitionLineAdded,
    RequisitionState, RequisitionTransitioned, RequisitionType,
};
