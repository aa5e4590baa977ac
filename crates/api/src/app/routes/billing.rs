//! Subscription state, kept in sync by Stripe webhooks.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};

use kedai_company::{
    ChangeSubscription, Company, CompanyCommand, Subscription, SubscriptionStatus, company_stream_id,
};
use kedai_core::TenantId;

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{ok, require};
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};
use crate::stripe::{SIGNATURE_HEADER, verify_signature};

const HANDLED_EVENTS: &[&str] = &[
    "customer.subscription.created",
    "customer.subscription.updated",
    "customer.subscription.deleted",
];

pub async fn subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "company.read")?;
    let company = services
        .read_models
        .companies
        .get(tenant.tenant_id())
        .ok_or_else(|| errors::not_found("company not found"))?;
    Ok(ok(company.subscription))
}

/// `POST /billing/stripe/webhook`. The raw body is needed for the
/// signature, so it is parsed only after verification.
pub async fn stripe_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let Some(secret) = services.config.stripe_webhook_secret.as_deref() else {
        warn!("stripe webhook received but no secret is configured");
        return Err(errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "billing_disabled",
            "webhooks are not configured",
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| errors::json_error(StatusCode::BAD_REQUEST, "invalid_signature", "missing signature"))?;
    verify_signature(&body, signature, secret, Utc::now().timestamp())
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_signature", e.to_string()))?;

    let event: JsonValue = serde_json::from_slice(&body).map_err(|e| errors::bad_request(e.to_string()))?;
    let event_type = event["type"].as_str().unwrap_or_default();
    if !HANDLED_EVENTS.contains(&event_type) {
        return Ok(ok(json!({ "received": true, "handled": false })));
    }

    let object = &event["data"]["object"];
    let (tenant_id, subscription) = subscription_from_stripe(event_type, object)?;
    services
        .dispatcher
        .send::<Company>(
            tenant_id,
            company_stream_id(tenant_id),
            CompanyCommand::ChangeSubscription(ChangeSubscription {
                tenant_id,
                subscription: subscription.clone(),
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    info!(%tenant_id, event_type, plan = %subscription.plan, status = ?subscription.status, "subscription synced");
    Ok(ok(json!({ "received": true, "handled": true })))
}

fn subscription_from_stripe(event_type: &str, object: &JsonValue) -> Result<(TenantId, Subscription), Response> {
    let tenant_id: TenantId = object["metadata"]["tenant_id"]
        .as_str()
        .ok_or_else(|| errors::bad_request("subscription has no tenant_id metadata"))?
        .parse()
        .map_err(|e: kedai_core::DomainError| errors::bad_request(e.to_string()))?;

    let status = if event_type == "customer.subscription.deleted" {
        SubscriptionStatus::Canceled
    } else {
        let raw = object["status"].as_str().unwrap_or_default();
        SubscriptionStatus::from_stripe(raw)
            .ok_or_else(|| errors::bad_request(format!("unknown subscription status '{raw}'")))?
    };

    let price = &object["items"]["data"][0]["price"];
    let plan = object["metadata"]["plan"]
        .as_str()
        .or_else(|| price["lookup_key"].as_str())
        .or_else(|| price["nickname"].as_str())
        .unwrap_or("standard")
        .to_string();

    Ok((
        tenant_id,
        Subscription {
            plan,
            status,
            stripe_customer_id: object["customer"].as_str().map(str::to_string),
            stripe_subscription_id: object["id"].as_str().map(str::to_string),
            current_period_end: object["current_period_end"]
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_subscriptions_are_canceled() {
        let tenant = TenantId::new();
        let object = json!({
            "id": "sub_123",
            "customer": "cus_9",
            "status": "active",
            "current_period_end": 1_700_000_000,
            "metadata": { "tenant_id": tenant.to_string() },
            "items": { "data": [{ "price": { "lookup_key": "pro" } }] },
        });

        let (t, sub) = subscription_from_stripe("customer.subscription.updated", &object).unwrap();
        assert_eq!(t, tenant);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan, "pro");
        assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_123"));
        assert!(sub.current_period_end.is_some());

        let (_, sub) = subscription_from_stripe("customer.subscription.deleted", &object).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn tenant_metadata_is_required() {
        let object = json!({ "status": "active", "metadata": {} });
        let err = subscription_from_stripe("customer.subscription.created", &object).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
