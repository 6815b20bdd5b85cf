use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use kestrel_auth::{JwtClaims, PrincipalId, Role};
use kestrel_core::TenantId;
use kestrel_infra::{AppConfig, Services};
use reqwest::StatusCode;
use serde_json::{json, Value};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let config = AppConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..AppConfig::default()
        };
        let app = kestrel_api::app::build_app(&config, Arc::new(Services::in_memory()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/admin/api/v1"),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(res).await
    }

    /// POST without a body.
    async fn act(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        read(res).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn mint_jwt(tenant_id: TenantId, roles: &[&str]) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        tenant_id,
        roles: roles.iter().map(|r| Role::new(r.to_string())).collect(),
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn id_of(body: &Value) -> String {
    body["data"]["id"].as_str().expect("response carries an id").to_string()
}

async fn create_partner(srv: &TestServer, token: &str, name: &str, kind: &str) -> String {
    let (status, body) = srv
        .post(token, "/partners/partners", json!({ "name": name, "kind": kind }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

async fn create_product(srv: &TestServer, token: &str, sku: &str) -> String {
    let (status, body) = srv
        .post(
            token,
            "/products/products",
            json!({ "sku": sku, "name": format!("Product {sku}"), "sales_price": 1_500, "cost": 900 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_endpoints_require_a_valid_token() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(format!("{}/whoami", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = srv.get("not-a-jwt", "/partners/partners").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reports_tenant_roles_and_permissions() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let token = mint_jwt(tenant_id, &["sales_user"]);

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tenant_id"], tenant_id.to_string());
    assert_eq!(body["data"]["roles"], json!(["sales_user"]));
    let permissions = body["data"]["effective_permissions"].as_array().unwrap();
    assert!(permissions.iter().any(|p| p == "sales.orders.send"));
    assert!(!permissions.iter().any(|p| p == "sales.orders.confirm"));
}

#[tokio::test]
async fn roles_limit_what_a_caller_may_do() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let viewer = mint_jwt(tenant_id, &["viewer"]);

    let (status, _) = srv.get(&viewer, "/partners/partners").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv
        .post(&viewer, "/partners/partners", json!({ "name": "Acme", "kind": "vendor" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("partners.partners.create"));

    let (status, _) = srv.get(&viewer, "/security/roles").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn security_lists_roles_and_permissions() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);

    let (status, body) = srv.get(&admin, "/security/roles").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().iter().any(|r| r["name"] == "inventory_manager"));

    let (status, body) = srv.get(&admin, "/security/permissions").await;
    assert_eq!(status, StatusCode::OK);
    let receipts = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["resource"] == "receipts")
        .unwrap()
        .clone();
    assert!(receipts["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "inventories.receipts.validate"));
}

#[tokio::test]
async fn partner_crud_round_trip() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);

    let id = create_partner(&srv, &admin, "Acme Supplies", "vendor").await;

    let res = srv
        .client
        .put(format!("{}/partners/partners/{id}", srv.base_url))
        .bearer_auth(&admin)
        .json(&json!({ "email": "orders@acme.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (status, body) = srv.get(&admin, &format!("/partners/partners/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Acme Supplies");
    assert_eq!(body["data"]["email"], "orders@acme.test");
    assert!(body["message"].is_string());

    let (status, body) = srv.act(&admin, &format!("/partners/partners/{id}/archive")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["archived"], true);
}

#[tokio::test]
async fn invalid_input_is_reported_per_field() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);

    create_product(&srv, &admin, "DESK-1").await;
    let (status, body) = srv
        .post(&admin, "/products/products", json!({ "sku": "desk-1", "name": "Duplicate" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["sku"].is_array(), "{body}");

    let (status, body) = srv.post(&admin, "/products/products", json!({ "name": 12 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["body"].is_array(), "{body}");
}

#[tokio::test]
async fn illegal_transitions_are_unprocessable() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);
    let vendor = create_partner(&srv, &admin, "Acme", "vendor").await;

    let (status, body) = srv
        .post(&admin, "/purchases/orders", json!({ "vendor_id": vendor }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order = id_of(&body);

    // No lines yet.
    let (status, _) = srv.act(&admin, &format!("/purchases/orders/{order}/confirm")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Only canceled orders go back to draft.
    let (status, _) = srv.act(&admin, &format!("/purchases/orders/{order}/draft")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn confirmed_purchase_is_received_through_its_receipt() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);
    let vendor = create_partner(&srv, &admin, "Acme", "vendor").await;
    let product = create_product(&srv, &admin, "DESK-1").await;

    let (status, body) = srv
        .post(
            &admin,
            "/purchases/orders",
            json!({ "vendor_id": vendor, "lines": [{ "product_id": product, "quantity": 10, "unit_price": 900 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["reference"], "P00001");
    let order = id_of(&body);

    let (status, body) = srv.act(&admin, &format!("/purchases/orders/{order}/confirm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "purchase");

    let (status, body) = srv.get(&admin, "/inventories/receipts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
    let receipt = body["data"][0].clone();
    assert_eq!(receipt["reference"], "WH/IN/00001");
    assert_eq!(receipt["source_document"]["id"], order);
    let receipt_id = receipt["id"].as_str().unwrap().to_string();

    // A receipt is not a delivery.
    let (status, _) = srv.get(&admin, &format!("/inventories/deliveries/{receipt_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = srv
        .post(&admin, &format!("/inventories/receipts/{receipt_id}/validate"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["state"], "done");

    let (_, body) = srv.get(&admin, &format!("/purchases/orders/{order}")).await;
    assert_eq!(body["data"]["lines"][0]["qty_received"], 10);
    assert_eq!(body["data"]["receipt_status"], "full");

    let (_, body) = srv
        .get(&admin, &format!("/inventories/quantities?product_id={product}"))
        .await;
    assert_eq!(body["data"][0]["on_hand"], 10);
    assert_eq!(body["data"][0]["available"], 10);

    let (status, body) = srv.get(&admin, &format!("/inventories/receipts/{receipt_id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().len() >= 3);

    // A malformed return body is rejected instead of returning everything.
    let (status, body) = srv
        .post(&admin, &format!("/inventories/receipts/{receipt_id}/return"), json!({ "lines": "x" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["body"].is_array(), "{body}");
    let (_, body) = srv.get(&admin, "/inventories/deliveries").await;
    assert_eq!(body["meta"]["total"], 0);

    // Without a body, everything still returnable goes back.
    let (status, body) = srv.act(&admin, &format!("/inventories/receipts/{receipt_id}/return")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["type"], "delivery");
    assert_eq!(body["data"]["return_of"], receipt_id.as_str());
    assert_eq!(body["data"]["moves"][0]["demand"], 10);
}

#[tokio::test]
async fn lists_filter_sort_and_paginate() {
    let srv = TestServer::spawn().await;
    let admin = mint_jwt(TenantId::new(), &["admin"]);
    for sku in ["C-3", "A-1", "B-2"] {
        create_product(&srv, &admin, sku).await;
    }

    let (status, body) = srv.get(&admin, "/products/products?sort=-sku&per_page=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"], json!({ "total": 3, "page": 1, "per_page": 2 }));
    let skus: Vec<_> = body["data"].as_array().unwrap().iter().map(|p| p["sku"].clone()).collect();
    assert_eq!(skus, vec![json!("C-3"), json!("B-2")]);

    let (_, body) = srv.get(&admin, "/products/products?search=a-1").await;
    assert_eq!(body["meta"]["total"], 1);

    let (status, body) = srv.get(&admin, "/products/products?sort=secret").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["sort"].is_array());
}

#[tokio::test]
async fn companies_cannot_see_each_other() {
    let srv = TestServer::spawn().await;
    let first = mint_jwt(TenantId::new(), &["admin"]);
    let second = mint_jwt(TenantId::new(), &["admin"]);

    let id = create_partner(&srv, &first, "Acme", "customer").await;

    let (status, _) = srv.get(&second, &format!("/partners/partners/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = srv.get(&second, "/partners/partners").await;
    assert_eq!(body["meta"]["total"], 0);

    let (status, _) = srv.get(&first, "/partners/partners/not-an-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn employees_request_leave_and_officers_approve() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let employee = mint_jwt(tenant_id, &["employee"]);
    let officer = mint_jwt(tenant_id, &["hr_officer"]);

    let (status, body) = srv
        .post(
            &employee,
            "/time-off/leaves",
            json!({ "leave_type": "paid", "date_from": "2026-03-02", "date_to": "2026-03-06" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let leave = id_of(&body);

    let (status, _) = srv.act(&employee, &format!("/time-off/leaves/{leave}/approve")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv.act(&officer, &format!("/time-off/leaves/{leave}/approve")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["state"], "validate");
}
