use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use kedai_auth::{Role, SessionClaims, TacError, TacSender};
use kedai_core::{TenantId, UserId};
use kedai_infra::config::AppConfig;
use reqwest::StatusCode;
use serde_json::{Value, json};

const WEBHOOK_SECRET: &str = "whsec_test";

/// Keeps the last code sent to each address.
#[derive(Default)]
struct CapturingSender {
    codes: Mutex<HashMap<String, String>>,
}

impl CapturingSender {
    fn take(&self, email: &str) -> Option<String> {
        self.codes.lock().unwrap().remove(email)
    }
}

impl TacSender for CapturingSender {
    fn send(&self, email: &str, code: &str, _expires_at: DateTime<Utc>) -> Result<(), TacError> {
        self.codes.lock().unwrap().insert(email.to_string(), code.to_string());
        Ok(())
    }
}

struct TestServer {
    base_url: String,
    secret: String,
    codes: Arc<CapturingSender>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig {
            stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..AppConfig::default()
        };
        let secret = config.session_secret.clone();
        let codes = Arc::new(CapturingSender::default());

        // Same router as prod, bound to an ephemeral port.
        let app = kedai_api::app::build_app_with(config, codes.clone())
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            secret,
            codes,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Registers a company, then signs its owner in with an emailed code.
    async fn sign_up(&self, company: &str, email: &str) -> Session {
        let res = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({
                "company_name": company,
                "owner_name": "Siti Aminah",
                "email": email,
                "tin": "C20880050010",
                "registration_number": "202001234567",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        let tenant_id = body["tenant_id"].as_str().unwrap().to_string();

        // The user directory is a projection; ask again until a code goes out.
        let mut code = None;
        for _ in 0..100 {
            let res = self
                .client
                .post(self.url("/auth/tac/request"))
                .json(&json!({ "email": email }))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::ACCEPTED);
            code = self.codes.take(email);
            if code.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let code = code.expect("no sign-in code was sent");

        let res = self
            .client
            .post(self.url("/auth/tac/verify"))
            .json(&json!({ "email": email, "code": code }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("set-cookie").is_some());
        let body: Value = res.json().await.unwrap();

        Session {
            tenant_id,
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    /// Session for a user the directory does not know; roles come from the token.
    fn mint(&self, tenant_id: TenantId, roles: Vec<Role>) -> String {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: UserId::new(),
            tenant_id,
            roles,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::minutes(10)).timestamp(),
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("failed to encode token")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Session {
    tenant_id: String,
    token: String,
}

/// Polls a read-model endpoint until `ready` holds.
async fn eventually(srv: &TestServer, token: &str, path: &str, ready: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        let res = srv.get(token, path).await;
        if res.status() == StatusCode::OK {
            let body: Value = res.json().await.unwrap();
            if ready(&body) {
                return body;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("{path} did not reach the expected state within timeout");
}

async fn expect_status(res: reqwest::Response, expected: StatusCode) -> Value {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    assert_eq!(status, expected, "unexpected status, body={body}");
    serde_json::from_str(&body).unwrap_or(Value::Null)
}

#[tokio::test]
async fn health_is_public_and_whoami_needs_a_session() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.get("not-a-token", "/whoami").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_up_and_sign_in_with_emailed_code() {
    let srv = TestServer::spawn().await;
    let session = srv.sign_up("Kedai Runcit Siti", "siti@kedai.my").await;

    let body = expect_status(srv.get(&session.token, "/whoami").await, StatusCode::OK).await;
    assert_eq!(body["tenant_id"].as_str().unwrap(), session.tenant_id);
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "owner"));

    let company = eventually(&srv, &session.token, "/company", |b| b["profile"]["name"].is_string()).await;
    assert_eq!(company["profile"]["name"], "Kedai Runcit Siti");

    // Same email cannot open a second company.
    let res = srv
        .client
        .post(srv.url("/auth/register"))
        .json(&json!({ "company_name": "Other", "owner_name": "X", "email": "SITI@kedai.my" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_code_is_rejected() {
    let srv = TestServer::spawn().await;
    srv.sign_up("Kedai A", "a@kedai.my").await;

    let res = srv
        .client
        .post(srv.url("/auth/tac/verify"))
        .json(&json!({ "email": "a@kedai.my", "code": "000000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Unknown addresses get the same answer as known ones.
    let res = srv
        .client
        .post(srv.url("/auth/tac/request"))
        .json(&json!({ "email": "nobody@kedai.my" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert!(srv.codes.take("nobody@kedai.my").is_none());
}

#[tokio::test]
async fn invoice_lifecycle_send_and_pay() {
    let srv = TestServer::spawn().await;
    let session = srv.sign_up("Kedai Invois", "owner@invois.my").await;
    let token = &session.token;

    let customer = expect_status(
        srv.post(
            token,
            "/customers",
            json!({ "name": "Ahmad Trading", "contact": { "email": "ahmad@trading.my", "phone": "012-345 6789" } }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let customer_id = customer["customer_id"].as_str().unwrap().to_string();

    let product = expect_status(
        srv.post(
            token,
            "/products",
            json!({ "sku": "KOPI-01", "name": "Kopi O", "unit": "cup", "unit_price": 1000, "tax_rate": 600, "initial_stock": 10 }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let product_id = product["product_id"].as_str().unwrap().to_string();

    let invoice = expect_status(
        srv.post(
            token,
            "/invoices",
            json!({
                "customer_id": customer_id,
                "lines": [{ "product_id": product_id, "quantity": 3 }],
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["totals"]["subtotal"], 3000);
    assert_eq!(invoice["totals"]["tax_total"], 180);
    assert_eq!(invoice["totals"]["total"], 3180);

    let sent = expect_status(
        srv.post(token, &format!("/invoices/{invoice_id}/send"), json!({})).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(sent["status"], "SENT");

    let product = expect_status(srv.get(token, &format!("/products/{product_id}")).await, StatusCode::OK).await;
    assert_eq!(product["stock"], 7);

    let partial = expect_status(
        srv.post(
            token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": 1000, "method": "bank_transfer" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(partial["status"], "PARTIAL");
    assert_eq!(partial["balance_due"], 2180);

    // Overpayment is refused.
    let res = srv
        .post(
            token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": 5000, "method": "cash" }),
        )
        .await;
    assert!(res.status().is_client_error());

    let res = srv
        .client
        .patch(srv.url(&format!("/invoices/{invoice_id}/status")))
        .bearer_auth(token)
        .json(&json!({ "status": "PAID" }))
        .send()
        .await
        .unwrap();
    let paid = expect_status(res, StatusCode::OK).await;
    assert_eq!(paid["status"], "PAID");
    assert_eq!(paid["balance_due"], 0);

    let listed = eventually(&srv, token, "/invoices?status=PAID", |b| {
        b["items"].as_array().is_some_and(|items| items.len() == 1)
    })
    .await;
    assert_eq!(listed["items"][0]["customer_id"].as_str().unwrap(), customer_id);

    // Paid invoices cannot be cancelled.
    let res = srv
        .post(token, &format!("/invoices/{invoice_id}/cancel"), json!({ "reason": "typo" }))
        .await;
    assert!(res.status().is_client_error());
}

#[tokio::test]
async fn cash_receipt_rounds_to_five_sen_and_posts_to_ledger() {
    let srv = TestServer::spawn().await;
    let session = srv.sign_up("Warung Pak Ali", "ali@warung.my").await;
    let token = &session.token;

    let receipt = expect_status(
        srv.post(
            token,
            "/receipts",
            json!({
                "lines": [{ "description": "Nasi lemak", "quantity": 1, "unit_price": 253 }],
                "payment_method": "cash",
                "amount_tendered": 500,
            }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(receipt["status"], "ISSUED");
    assert_eq!(receipt["totals"]["total"], 253);
    assert_eq!(receipt["settlement"]["payable"], 255);
    assert_eq!(receipt["settlement"]["rounding"], 2);
    assert_eq!(receipt["settlement"]["change"], 245);

    // Tender below the rounded amount is refused.
    let res = srv
        .post(
            token,
            "/receipts",
            json!({
                "lines": [{ "description": "Nasi lemak", "quantity": 1, "unit_price": 253 }],
                "payment_method": "cash",
                "amount_tendered": 250,
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let trial = eventually(&srv, token, "/ledger/trial-balance", |b| b["total_debits"] == 255).await;
    assert_eq!(trial["total_debits"], trial["total_credits"]);
}

#[tokio::test]
async fn pos_order_checkout_issues_a_receipt() {
    let srv = TestServer::spawn().await;
    let session = srv.sign_up("Restoran Maju", "maju@restoran.my").await;
    let token = &session.token;

    let order = expect_status(
        srv.post(token, "/pos/orders", json!({ "order_type": { "type": "dine_in", "table": "T4" } }))
            .await,
        StatusCode::CREATED,
    )
    .await;
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let order = expect_status(
        srv.post(
            token,
            &format!("/pos/orders/{order_id}/items"),
            json!({ "name": "Teh tarik", "quantity": 2, "unit_price": 250 }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(order["items"].as_array().unwrap().len(), 1);

    let checkout = expect_status(
        srv.post(
            token,
            &format!("/pos/orders/{order_id}/checkout"),
            json!({ "payment_method": "card" }),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(checkout["order"]["status"], "COMPLETED");
    assert_eq!(checkout["receipt"]["totals"]["total"], 500);
    assert_eq!(
        checkout["order"]["receipt_id"].as_str().unwrap(),
        checkout["receipt"]["receipt_id"].as_str().unwrap()
    );

    // A completed order takes no more items.
    let res = srv
        .post(
            token,
            &format!("/pos/orders/{order_id}/items"),
            json!({ "name": "Roti canai", "quantity": 1, "unit_price": 150 }),
        )
        .await;
    assert!(res.status().is_client_error());
}

#[tokio::test]
async fn cashier_cannot_touch_the_ledger_or_staff() {
    let srv = TestServer::spawn().await;
    let tenant_id = TenantId::new();
    let cashier = srv.mint(tenant_id, vec![Role::Cashier]);

    let res = srv.get(&cashier, "/ledger/trial-balance").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .post(
            &cashier,
            "/users",
            json!({ "email": "new@kedai.my", "name": "New", "role": "admin" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.get(&cashier, "/customers").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_records() {
    let srv = TestServer::spawn().await;
    let first = srv.sign_up("Kedai Satu", "satu@kedai.my").await;
    let second = srv.sign_up("Kedai Dua", "dua@kedai.my").await;

    let customer = expect_status(
        srv.post(&first.token, "/customers", json!({ "name": "Pelanggan Satu" })).await,
        StatusCode::CREATED,
    )
    .await;
    let customer_id = customer["customer_id"].as_str().unwrap().to_string();

    eventually(&srv, &first.token, "/customers", |b| {
        b["items"].as_array().is_some_and(|items| items.len() == 1)
    })
    .await;

    let res = srv.get(&second.token, &format!("/customers/{customer_id}")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let listed = expect_status(srv.get(&second.token, "/customers").await, StatusCode::OK).await;
    assert_eq!(listed["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn stripe_webhook_requires_a_valid_signature() {
    let srv = TestServer::spawn().await;
    let session = srv.sign_up("Kedai Langganan", "billing@kedai.my").await;

    let payload = json!({
        "type": "customer.subscription.updated",
        "data": { "object": {
            "id": "sub_123",
            "customer": "cus_123",
            "status": "active",
            "current_period_end": (Utc::now() + ChronoDuration::days(30)).timestamp(),
            "metadata": { "tenant_id": session.tenant_id },
            "items": { "data": [{ "price": { "id": "price_pro" } }] },
        } },
    })
    .to_string();

    let res = srv
        .client
        .post(srv.url("/billing/stripe/webhook"))
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let signature =
        kedai_api::stripe::signature_header(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    let res = srv
        .client
        .post(srv.url("/billing/stripe/webhook"))
        .header("stripe-signature", signature)
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let subscription = eventually(&srv, &session.token, "/billing/subscription", |b| b["status"] == "active").await;
    assert_eq!(subscription["stripe_subscription_id"], "sub_123");
}
