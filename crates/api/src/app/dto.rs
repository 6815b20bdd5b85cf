//! Response envelopes and JSON mapping of read models.
//!
//! Request bodies are the service inputs themselves (`PartnerInput`,
//! `OperationInput`, ...); only the few action bodies specific to HTTP live
//! here.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use kestrel_accounting::Payment;
use kestrel_core::AggregateRoot;
use kestrel_infra::projections::{AccountBalance, Snapshot};
use kestrel_inventory::{Location, Operation, ProductQuantityLine};
use kestrel_partners::Partner;
use kestrel_products::Product;
use kestrel_purchases::{PurchaseOrder, Requisition};
use kestrel_sales::SalesOrder;
use kestrel_time_off::Leave;

use crate::app::errors::ApiError;
use crate::app::query::Page;

pub type ApiResult = Result<Response, ApiError>;

// -------------------------
// Envelopes
// -------------------------

pub fn ok(data: Value, message: &str) -> ApiResult {
    Ok((StatusCode::OK, Json(json!({ "data": data, "message": message }))).into_response())
}

pub fn created(data: Value, message: &str) -> ApiResult {
    Ok((StatusCode::CREATED, Json(json!({ "data": data, "message": message }))).into_response())
}

pub fn page(page: Page, message: &str) -> ApiResult {
    Ok((
        StatusCode::OK,
        Json(json!({
            "data": page.data,
            "meta": { "total": page.total, "page": page.page, "per_page": page.per_page },
            "message": message,
        })),
    )
        .into_response())
}

// -------------------------
// Extractors
// -------------------------

/// JSON body whose rejection is a 422 on `body`.
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Body(value)),
            Err(rejection) => Err(ApiError::validation("body", rejection.body_text())),
        }
    }
}

/// Optional JSON body: a missing or blank body is `None`, anything else must
/// parse or the request is rejected with a 422 on `body`.
pub struct OptionalBody<T>(pub Option<T>);

#[async_trait]
impl<S, T> FromRequest<S> for OptionalBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::validation("body", rejection.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalBody(None));
        }
        serde_json::from_slice(&bytes)
            .map(|value| OptionalBody(Some(value)))
            .map_err(|e| ApiError::validation("body", e.to_string()))
    }
}

/// Query string whose rejection is a 422 on `query`.
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Params(value)),
            Err(rejection) => Err(ApiError::validation("query", rejection.body_text())),
        }
    }
}

// -------------------------
// Action bodies
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub create_backorder: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReturnRequest {
    #[serde(default)]
    pub lines: Vec<ProductQuantityLine>,
}

#[derive(Debug, Deserialize)]
pub struct DemandRequest {
    pub demand: i64,
}

#[derive(Debug, Deserialize)]
pub struct MoveLinesRequest {
    pub lines: Vec<kestrel_infra::services::LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CountRequest {
    pub product_id: kestrel_products::ProductId,
    pub location_id: kestrel_inventory::LocationId,
    pub counted: i64,
}

// -------------------------
// JSON mapping helpers
// -------------------------

fn timestamps<A>(snapshot: &Snapshot<A>, mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert("created_at".to_string(), json!(snapshot.created_at));
        map.insert("updated_at".to_string(), json!(snapshot.updated_at));
    }
    body
}

pub fn partner_to_json(s: &Snapshot<Partner>) -> Value {
    let p = &s.aggregate;
    let contact = p.contact();
    timestamps(
        s,
        json!({
            "id": p.id_typed(),
            "name": p.name(),
            "kind": p.kind(),
            "email": contact.email,
            "phone": contact.phone,
            "address": contact.address,
            "archived": p.is_archived(),
        }),
    )
}

pub fn product_to_json(s: &Snapshot<Product>) -> Value {
    let p = &s.aggregate;
    let pricing = p.pricing();
    timestamps(
        s,
        json!({
            "id": p.id_typed(),
            "sku": p.sku(),
            "name": p.name(),
            "type": p.product_type(),
            "sales_price": pricing.sales_price,
            "cost": pricing.cost,
            "archived": p.is_archived(),
        }),
    )
}

pub fn location_to_json(s: &Snapshot<Location>) -> Value {
    let l = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": l.id_typed(),
            "name": l.name(),
            "usage": l.usage(),
            "archived": l.is_archived(),
        }),
    )
}

pub fn operation_to_json(s: &Snapshot<Operation>) -> Value {
    let op = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": op.id_typed(),
            "reference": op.reference(),
            "type": op.operation_type(),
            "state": op.state(),
            "partner_id": op.partner_id(),
            "source_location_id": op.source().id,
            "destination_location_id": op.destination().id,
            "source_document": op.source_document(),
            "return_of": op.return_of(),
            "backorder_of": op.backorder_of(),
            "shipping_policy": op.shipping_policy(),
            "scheduled_at": op.scheduled_at(),
            "moves": op.moves(),
        }),
    )
}

pub fn purchase_order_to_json(s: &Snapshot<PurchaseOrder>) -> Value {
    let o = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": o.id_typed(),
            "reference": o.reference(),
            "partner_id": o.vendor_id(),
            "requisition_id": o.requisition_id(),
            "currency": o.currency(),
            "state": o.state(),
            "lines": o.lines(),
            "amount_total": o.amount_total(),
            "receipt_status": o.receipt_status(),
        }),
    )
}

pub fn requisition_to_json(s: &Snapshot<Requisition>) -> Value {
    let r = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": r.id(),
            "reference": r.reference(),
            "type": r.requisition_type(),
            "partner_id": r.vendor_id(),
            "currency": r.currency(),
            "state": r.state(),
            "lines": r.lines(),
        }),
    )
}

pub fn sales_order_to_json(s: &Snapshot<SalesOrder>) -> Value {
    let o = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": o.id_typed(),
            "reference": o.reference(),
            "partner_id": o.customer_id(),
            "currency": o.currency(),
            "state": o.state(),
            "lines": o.lines(),
            "amount_total": o.amount_total(),
            "delivery_status": o.delivery_status(),
        }),
    )
}

pub fn payment_to_json(s: &Snapshot<Payment>) -> Value {
    let p = &s.aggregate;
    timestamps(
        s,
        json!({
            "id": p.id_typed(),
            "reference": p.reference(),
            "payment_type": p.payment_type(),
            "partner_id": p.partner_id(),
            "amount": p.amount(),
            "currency": p.currency(),
            "memo": p.memo(),
            "state": p.state(),
        }),
    )
}

pub fn balance_to_json(b: &AccountBalance) -> Value {
    json!({
        "account_code": b.account_code,
        "account_name": b.account_name,
        "kind": b.kind,
        "debit": b.debit,
        "credit": b.credit,
        "balance": b.balance,
    })
}

pub fn leave_to_json(s: &Snapshot<Leave>) -> Value {
    let l = &s.aggregate;
    let period = l.period();
    timestamps(
        s,
        json!({
            "id": l.id(),
            "employee_id": l.employee_id(),
            "leave_type": l.leave_type(),
            "date_from": period.map(|p| p.from),
            "date_to": period.map(|p| p.to),
            "days": l.days(),
            "reason": l.reason(),
            "state": l.state(),
        }),
    )
}
