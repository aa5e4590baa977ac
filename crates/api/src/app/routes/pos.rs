//! Point-of-sale orders: open, ring up items, kitchen flow and checkout.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, patch, post},
};
use chrono::Utc;
use serde_json::json;

use kedai_infra::projections::PosOrderFilter;
use kedai_infra::read_model::PageRequest;
use kedai_products::{Product, ProductId};
use kedai_sales::{OrderItem, OrderItemId, PosOrder, PosOrderCommand, PosOrderId};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders).post(open_order))
        .route("/:id", get(get_order))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:item_id", patch(change_quantity).delete(remove_item))
        .route("/:id/kitchen", post(send_to_kitchen))
        .route("/:id/served", post(mark_served))
        .route("/:id/checkout", post(checkout))
        .route("/:id/cancel", post(cancel_order))
}

async fn load_order(services: &AppServices, tenant: &TenantContext, id: PosOrderId) -> Result<PosOrder, Response> {
    let order: PosOrder = services
        .dispatcher
        .load(tenant.tenant_id(), id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if order.exists() {
        Ok(order)
    } else {
        Err(errors::not_found("order not found"))
    }
}

async fn send(services: &AppServices, tenant: &TenantContext, id: PosOrderId, cmd: PosOrderCommand) -> ApiResult {
    services
        .dispatcher
        .send::<PosOrder>(tenant.tenant_id(), id.0, cmd)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let order = load_order(services, tenant, id).await?;
    Ok(ok(dto::order_to_json(&order)))
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<PosOrderFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "pos.read")?;
    Ok(ok(services.read_models.pos_orders.query(tenant.tenant_id(), &filter, page)))
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "pos.read")?;
    let order = load_order(&services, &tenant, parse_id(&id)?).await?;
    Ok(ok(dto::order_to_json(&order)))
}

pub async fn open_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::OpenOrderRequest>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order = services
        .pos()
        .open_order(tenant.tenant_id(), body.order_type, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(created(dto::order_to_json(&order)))
}

/// Catalog items take name, price and tax rate from the product unless
/// the request overrides them.
pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddItemRequest>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order_id: PosOrderId = parse_id(&id)?;
    let tenant_id = tenant.tenant_id();

    let item = match body.product_id.as_deref() {
        Some(raw) => {
            let product_id: ProductId = parse_id(raw)?;
            let product: Product = services
                .dispatcher
                .load(tenant_id, product_id.0)
                .await
                .map_err(errors::dispatch_error_to_response)?;
            let details = product
                .details()
                .ok_or_else(|| errors::bad_request(format!("unknown product {product_id}")))?;
            OrderItem {
                item_id: OrderItemId::generate(),
                product_id: Some(product_id),
                name: body.name.unwrap_or_else(|| details.name.clone()),
                quantity: body.quantity,
                unit_price: body.unit_price.unwrap_or(details.unit_price),
                tax_rate: body.tax_rate.unwrap_or(details.tax_rate),
                note: body.note,
            }
        }
        None => OrderItem {
            item_id: OrderItemId::generate(),
            product_id: None,
            name: body
                .name
                .ok_or_else(|| errors::bad_request("name is required for open items"))?,
            quantity: body.quantity,
            unit_price: body
                .unit_price
                .ok_or_else(|| errors::bad_request("unit_price is required for open items"))?,
            tax_rate: body.tax_rate.unwrap_or_default(),
            note: body.note,
        },
    };

    let cmd = PosOrderCommand::AddItem {
        tenant_id,
        order_id,
        item,
        occurred_at: Utc::now(),
    };
    send(&services, &tenant, order_id, cmd).await
}

pub async fn change_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, item_id)): Path<(String, String)>,
    Json(body): Json<dto::ChangeQuantityRequest>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order_id: PosOrderId = parse_id(&id)?;
    let cmd = PosOrderCommand::ChangeItemQuantity {
        tenant_id: tenant.tenant_id(),
        order_id,
        item_id: parse_id(&item_id)?,
        quantity: body.quantity,
        occurred_at: Utc::now(),
    };
    send(&services, &tenant, order_id, cmd).await
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, item_id)): Path<(String, String)>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order_id: PosOrderId = parse_id(&id)?;
    let cmd = PosOrderCommand::RemoveItem {
        tenant_id: tenant.tenant_id(),
        order_id,
        item_id: parse_id(&item_id)?,
        occurred_at: Utc::now(),
    };
    send(&services, &tenant, order_id, cmd).await
}

pub async fn send_to_kitchen(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order_id: PosOrderId = parse_id(&id)?;
    let cmd = PosOrderCommand::SendToKitchen {
        tenant_id: tenant.tenant_id(),
        order_id,
        occurred_at: Utc::now(),
    };
    send(&services, &tenant, order_id, cmd).await
}

pub async fn mark_served(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let order_id: PosOrderId = parse_id(&id)?;
    let cmd = PosOrderCommand::MarkServed {
        tenant_id: tenant.tenant_id(),
        order_id,
        occurred_at: Utc::now(),
    };
    send(&services, &tenant, order_id, cmd).await
}

/// Settles the order with a receipt; answers with both.
pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CheckoutRequest>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let (order, receipt) = services
        .pos()
        .complete(
            tenant.tenant_id(),
            parse_id(&id)?,
            body.payment_method,
            body.amount_tendered,
            Utc::now(),
        )
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(json!({
        "order": dto::order_to_json(&order),
        "receipt": dto::receipt_to_json(&receipt),
    })))
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> ApiResult {
    require(&tenant, &principal, "pos.write")?;
    let reason = body.and_then(|Json(b)| b.reason);
    let order = services
        .pos()
        .cancel(tenant.tenant_id(), parse_id(&id)?, reason, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(dto::order_to_json(&order)))
}
