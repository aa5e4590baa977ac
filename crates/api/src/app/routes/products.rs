use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use kedai_core::TenantId;
use kedai_infra::export;
use kedai_infra::projections::ProductFilter;
use kedai_infra::read_model::PageRequest;
use kedai_products::{
    ActivateProduct, AdjustStock, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductDetails, ProductId,
    ProductPatch, StockReason, UpdateProduct,
};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, csv_attachment, ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/export.csv", get(export_products))
        .route("/low-stock", get(low_stock))
        .route("/:id", get(get_product).put(update_product).delete(archive_product))
        .route("/:id/stock", post(adjust_stock))
        .route("/:id/archive", post(archive_product))
        .route("/:id/activate", post(activate_product))
}

async fn load_product(services: &AppServices, tenant: &TenantContext, id: ProductId) -> Result<Product, Response> {
    let product: Product = services
        .dispatcher
        .load(tenant.tenant_id(), id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if product.exists() {
        Ok(product)
    } else {
        Err(errors::not_found("product not found"))
    }
}

async fn send(services: &AppServices, tenant: &TenantContext, id: ProductId, cmd: ProductCommand) -> ApiResult {
    services
        .dispatcher
        .send::<Product>(tenant.tenant_id(), id.0, cmd)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let product = load_product(services, tenant, id).await?;
    Ok(ok(dto::product_to_json(&product)))
}

/// SKUs are unique per company, ignoring the product being edited.
fn ensure_sku_free(
    services: &AppServices,
    tenant_id: TenantId,
    sku: &str,
    editing: Option<ProductId>,
) -> Result<(), Response> {
    match services.read_models.products.find_by_sku(tenant_id, sku.trim()) {
        Some(existing) if Some(existing.product_id) != editing => Err(errors::json_error(
            StatusCode::CONFLICT,
            "sku_taken",
            format!("sku '{}' is already in use", sku.trim()),
        )),
        _ => Ok(()),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<ProductFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "products.read")?;
    Ok(ok(services.read_models.products.query(tenant.tenant_id(), &filter, page)))
}

pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "products.read")?;
    let items = services.read_models.products.low_stock(tenant.tenant_id());
    Ok(ok(json!({ "items": items })))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "products.read")?;
    let product = load_product(&services, &tenant, parse_id(&id)?).await?;
    Ok(ok(dto::product_to_json(&product)))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ProductRequest>,
) -> ApiResult {
    require(&tenant, &principal, "products.write")?;
    let tenant_id = tenant.tenant_id();
    ensure_sku_free(&services, tenant_id, &body.sku, None)?;

    let product_id = ProductId::generate();
    services
        .dispatcher
        .send::<Product>(
            tenant_id,
            product_id.0,
            ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                details: ProductDetails {
                    sku: body.sku,
                    name: body.name,
                    description: body.description,
                    unit: body.unit,
                    unit_price: body.unit_price,
                    cost_price: body.cost_price,
                    tax_rate: body.tax_rate,
                    classification_code: body.classification_code,
                    low_stock_threshold: body.low_stock_threshold,
                },
                track_stock: body.track_stock,
                initial_stock: body.initial_stock,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let product = load_product(&services, &tenant, product_id).await?;
    Ok(created(dto::product_to_json(&product)))
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<ProductPatch>,
) -> ApiResult {
    require(&tenant, &principal, "products.write")?;
    let product_id: ProductId = parse_id(&id)?;
    if let Some(sku) = patch.sku.as_deref() {
        ensure_sku_free(&services, tenant.tenant_id(), sku, Some(product_id))?;
    }
    let cmd = ProductCommand::UpdateProduct(UpdateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        patch,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, product_id, cmd).await
}

/// Manual stock movement. Without a reason, increases count as restocks
/// and decreases as corrections.
pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> ApiResult {
    require(&tenant, &principal, "products.write")?;
    let product_id: ProductId = parse_id(&id)?;
    let reason = body.reason.unwrap_or(if body.delta > 0 {
        StockReason::Restock
    } else {
        StockReason::Correction
    });
    let cmd = ProductCommand::AdjustStock(AdjustStock {
        tenant_id: tenant.tenant_id(),
        product_id,
        delta: body.delta,
        reason,
        reference: body.reference,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, product_id, cmd).await
}

/// `DELETE` archives; sold products stay referenced by past documents.
pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "products.write")?;
    let product_id: ProductId = parse_id(&id)?;
    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, product_id, cmd).await
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "products.write")?;
    let product_id: ProductId = parse_id(&id)?;
    let cmd = ProductCommand::ActivateProduct(ActivateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, product_id, cmd).await
}

pub async fn export_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "products.read")?;
    let products = services.read_models.products.list(tenant.tenant_id());
    Ok(csv_attachment("products.csv", export::products_csv(&products)))
}
