use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::{get, post},
};
use chrono::Utc;

use kedai_customers::CustomerId;
use kedai_infra::projections::ReceiptFilter;
use kedai_infra::read_model::PageRequest;
use kedai_infra::workflows::ReceiptDraft;
use kedai_sales::{Receipt, ReceiptId};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, ok, parse_id, require, resolve_lines};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_receipts).post(issue_receipt))
        .route("/:id", get(get_receipt))
        .route("/:id/void", post(void_receipt))
}

pub async fn list_receipts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<ReceiptFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "receipts.read")?;
    Ok(ok(services.read_models.receipts.query(tenant.tenant_id(), &filter, page)))
}

pub async fn get_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "receipts.read")?;
    let receipt_id: ReceiptId = parse_id(&id)?;
    let receipt: Receipt = services
        .dispatcher
        .load(tenant.tenant_id(), receipt_id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if !receipt.exists() {
        return Err(errors::not_found("receipt not found"));
    }
    Ok(ok(dto::receipt_to_json(&receipt)))
}

/// Counter sale. Cash payments are rounded to 5 sen and need the amount
/// tendered.
pub async fn issue_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReceiptRequest>,
) -> ApiResult {
    require(&tenant, &principal, "receipts.write")?;
    let tenant_id = tenant.tenant_id();
    let customer_id = match body.customer_id.as_deref() {
        Some(raw) => Some(parse_id::<CustomerId>(raw)?),
        None => None,
    };
    let draft = ReceiptDraft {
        customer_id,
        pos_order_id: None,
        lines: resolve_lines(&services, tenant_id, body.lines).await?,
        payment_method: body.payment_method,
        amount_tendered: body.amount_tendered,
    };

    let receipt = services
        .receipts()
        .issue(tenant_id, ReceiptId::generate(), draft, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(created(dto::receipt_to_json(&receipt)))
}

pub async fn void_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> ApiResult {
    require(&tenant, &principal, "receipts.write")?;
    let reason = body.and_then(|Json(b)| b.reason);
    let receipt = services
        .receipts()
        .void(tenant.tenant_id(), parse_id(&id)?, reason, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(dto::receipt_to_json(&receipt)))
}
