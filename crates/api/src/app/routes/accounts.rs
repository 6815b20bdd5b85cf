use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Router,
};
use serde_json::json;

use kestrel_accounting::PaymentId;
use kestrel_infra::services::{PaymentInput, PaymentTransition};
use kestrel_infra::Services;

use crate::app::dto::{self, ApiResult, Body, Params};
use crate::app::errors::ApiError;
use crate::app::query::{ListQuery, Listing};
use crate::app::routes::parse_id;
use crate::authz::Gate;
use crate::context::RequestContext;

const PAYMENTS: Gate = Gate::new("accounts", "payments");
const BALANCES: Gate = Gate::new("accounts", "balances");

const PAYMENT_LISTING: Listing = Listing {
    searchable: &["reference", "memo"],
    sortable: &["reference", "state", "amount", "payment_type", "created_at", "updated_at"],
};

const BALANCE_LISTING: Listing = Listing {
    searchable: &["account_code", "account_name"],
    sortable: &["account_code", "account_name", "debit", "credit", "balance"],
};

pub fn router() -> Router {
    Router::new()
        .route("/payments", get(list_payments).post(create_payment))
        .route("/payments/:id", get(show_payment))
        .route("/payments/:id/history", get(payment_history))
        .route("/payments/:id/confirm", action(PaymentTransition::Confirm))
        .route("/payments/:id/mark-paid", action(PaymentTransition::MarkPaid))
        .route("/payments/:id/cancel", action(PaymentTransition::Cancel))
        .route("/payments/:id/reset-to-draft", action(PaymentTransition::ResetToDraft))
        .route("/balances", get(list_balances))
        .route("/balances/:code", get(show_balance))
}

fn action(transition: PaymentTransition) -> axum::routing::MethodRouter {
    post(transition_payment).layer(Extension(transition))
}

fn payment_id(raw: &str) -> Result<PaymentId, ApiError> {
    Ok(PaymentId::new(parse_id(raw)?))
}

// -------------------------
// Payments
// -------------------------

async fn list_payments(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(PAYMENTS.ability("view_any"))?;
    let rows = services.payments(ctx.tenant_id()).iter().map(dto::payment_to_json).collect();
    dto::page(query.apply(rows, PAYMENT_LISTING)?, "Payments retrieved.")
}

async fn create_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Body(input): Body<PaymentInput>,
) -> ApiResult {
    ctx.require(PAYMENTS.ability("create"))?;
    let payment = services.register_payment(ctx.tenant_id(), input)?;
    dto::created(dto::payment_to_json(&payment), "Payment registered.")
}

async fn show_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PAYMENTS.ability("view"))?;
    let payment = services.payment(ctx.tenant_id(), payment_id(&id)?)?;
    dto::ok(dto::payment_to_json(&payment), "Payment retrieved.")
}

async fn payment_history(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult {
    ctx.require(PAYMENTS.ability("view"))?;
    let payment_id = payment_id(&id)?;
    services.payment(ctx.tenant_id(), payment_id)?;
    let history = services.history(ctx.tenant_id(), payment_id.0)?;
    dto::ok(json!(history), "History retrieved.")
}

async fn transition_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(transition): Extension<PaymentTransition>,
    Path(id): Path<String>,
) -> ApiResult {
    let (ability, verb) = match transition {
        PaymentTransition::Confirm => ("confirm", "confirmed"),
        PaymentTransition::MarkPaid => ("mark_paid", "marked as paid"),
        PaymentTransition::Cancel => ("cancel", "canceled"),
        PaymentTransition::ResetToDraft => ("reset_to_draft", "reset to draft"),
    };
    ctx.require(PAYMENTS.ability(ability))?;
    let payment = services.payment_action(ctx.tenant_id(), payment_id(&id)?, transition)?;
    dto::ok(dto::payment_to_json(&payment), &format!("Payment {verb}."))
}

// -------------------------
// Balances
// -------------------------

async fn list_balances(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Params(query): Params<ListQuery>,
) -> ApiResult {
    ctx.require(BALANCES.ability("view_any"))?;
    let rows = services.balances(ctx.tenant_id()).iter().map(dto::balance_to_json).collect();
    dto::page(query.apply(rows, BALANCE_LISTING)?, "Balances retrieved.")
}

async fn show_balance(
    Extension(services): Extension<Arc<Services>>,
    Extension(ctx): Extension<RequestContext>,
    Path(code): Path<String>,
) -> ApiResult {
    ctx.require(BALANCES.ability("view"))?;
    let balance = services.balance(ctx.tenant_id(), &code)?;
    dto::ok(dto::balance_to_json(&balance), "Balance retrieved.")
}
