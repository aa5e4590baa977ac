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

use kedai_customers::{
    ArchiveCustomer, Customer, CustomerCommand, CustomerId, CustomerPatch, RegisterCustomer, RestoreCustomer,
    UpdateCustomer, whatsapp_link,
};
use kedai_infra::export;
use kedai_infra::projections::CustomerFilter;
use kedai_infra::read_model::PageRequest;

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, csv_attachment, ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_customers).post(create_customer))
        .route("/export.csv", get(export_customers))
        .route(
            "/:id",
            get(get_customer).put(update_customer).delete(archive_customer),
        )
        .route("/:id/archive", post(archive_customer))
        .route("/:id/restore", post(restore_customer))
        .route("/:id/invoices", get(customer_invoices))
        .route("/:id/whatsapp", get(customer_whatsapp))
}

async fn load_customer(services: &AppServices, tenant: &TenantContext, id: CustomerId) -> Result<Customer, Response> {
    let customer: Customer = services
        .dispatcher
        .load(tenant.tenant_id(), id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if customer.exists() {
        Ok(customer)
    } else {
        Err(errors::not_found("customer not found"))
    }
}

async fn send(services: &AppServices, tenant: &TenantContext, id: CustomerId, cmd: CustomerCommand) -> ApiResult {
    services
        .dispatcher
        .send::<Customer>(tenant.tenant_id(), id.0, cmd)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let customer = load_customer(services, tenant, id).await?;
    Ok(ok(dto::customer_to_json(&customer)))
}

pub async fn list_customers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<CustomerFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "customers.read")?;
    Ok(ok(services.read_models.customers.query(tenant.tenant_id(), &filter, page)))
}

pub async fn get_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "customers.read")?;
    let customer = load_customer(&services, &tenant, parse_id(&id)?).await?;
    Ok(ok(dto::customer_to_json(&customer)))
}

pub async fn create_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CustomerRequest>,
) -> ApiResult {
    require(&tenant, &principal, "customers.write")?;
    let tenant_id = tenant.tenant_id();
    let customer_id = CustomerId::generate();
    services
        .dispatcher
        .send::<Customer>(
            tenant_id,
            customer_id.0,
            CustomerCommand::Register(RegisterCustomer {
                tenant_id,
                customer_id,
                name: body.name,
                contact: body.contact,
                tax: body.tax,
                notes: body.notes,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let customer = load_customer(&services, &tenant, customer_id).await?;
    Ok(created(dto::customer_to_json(&customer)))
}

/// Partial update: omitted fields keep their value.
pub async fn update_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(patch): Json<CustomerPatch>,
) -> ApiResult {
    require(&tenant, &principal, "customers.write")?;
    let customer_id: CustomerId = parse_id(&id)?;
    let cmd = CustomerCommand::Update(UpdateCustomer {
        tenant_id: tenant.tenant_id(),
        customer_id,
        patch,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, customer_id, cmd).await
}

/// Customers are never hard-deleted; `DELETE` archives.
pub async fn archive_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "customers.write")?;
    let customer_id: CustomerId = parse_id(&id)?;
    let cmd = CustomerCommand::Archive(ArchiveCustomer {
        tenant_id: tenant.tenant_id(),
        customer_id,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, customer_id, cmd).await
}

pub async fn restore_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "customers.write")?;
    let customer_id: CustomerId = parse_id(&id)?;
    let cmd = CustomerCommand::Restore(RestoreCustomer {
        tenant_id: tenant.tenant_id(),
        customer_id,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, customer_id, cmd).await
}

pub async fn customer_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let customer_id: CustomerId = parse_id(&id)?;
    let items = services.read_models.invoices.for_customer(tenant.tenant_id(), customer_id);
    Ok(ok(json!({ "items": items })))
}

pub async fn customer_whatsapp(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::WhatsappQuery>,
) -> ApiResult {
    require(&tenant, &principal, "customers.read")?;
    let customer = load_customer(&services, &tenant, parse_id(&id)?).await?;
    let phone = customer.contact().phone.as_deref().ok_or_else(|| {
        errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "no_phone", "customer has no phone number")
    })?;
    let message = query
        .message
        .unwrap_or_else(|| format!("Hello {}", customer.name()));
    let url = whatsapp_link(phone, &message).map_err(errors::domain_error_to_response)?;
    Ok(ok(json!({ "url": url })))
}

pub async fn export_customers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "customers.read")?;
    let customers = services.read_models.customers.list(tenant.tenant_id());
    Ok(csv_attachment("customers.csv", export::customers_csv(&customers)))
}
