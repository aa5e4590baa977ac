use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, patch, post},
};
use chrono::{Days, Utc};
use serde_json::json;

use kedai_company::{Company, company_stream_id};
use kedai_customers::{Customer, CustomerId};
use kedai_infra::export;
use kedai_infra::projections::InvoiceFilter;
use kedai_infra::read_model::PageRequest;
use kedai_infra::workflows::InvoiceDraft;
use kedai_invoicing::{Invoice, InvoiceId, InvoiceStatus, PaymentMethod};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, csv_attachment, ok, parse_id, require, resolve_lines};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

/// Payment terms applied when a draft has no due date.
const DEFAULT_TERMS_DAYS: u64 = 30;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/export.csv", get(export_invoices))
        .route("/overdue", get(overdue_invoices))
        .route(
            "/:id",
            get(get_invoice)
                .put(update_invoice)
                .patch(change_status)
                .delete(delete_invoice),
        )
        .route("/:id/send", post(send_invoice))
        .route("/:id/payments", post(record_payment))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/status", patch(change_status))
        .route("/:id/whatsapp", get(invoice_whatsapp))
        .route("/:id/document", get(invoice_document))
}

async fn load_invoice(services: &AppServices, tenant: &TenantContext, id: InvoiceId) -> Result<Invoice, Response> {
    let invoice: Invoice = services
        .dispatcher
        .load(tenant.tenant_id(), id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if invoice.exists() {
        Ok(invoice)
    } else {
        Err(errors::not_found("invoice not found"))
    }
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

async fn draft_from(
    services: &AppServices,
    tenant: &TenantContext,
    body: dto::InvoiceRequest,
) -> Result<InvoiceDraft, Response> {
    let customer_id: CustomerId = parse_id(&body.customer_id)?;
    let issue_date = body.issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let due_date = match body.due_date {
        Some(d) => d,
        None => issue_date
            .checked_add_days(Days::new(DEFAULT_TERMS_DAYS))
            .ok_or_else(|| errors::bad_request("issue_date out of range"))?,
    };
    let lines = resolve_lines(services, tenant.tenant_id(), body.lines).await?;
    Ok(InvoiceDraft {
        customer_id,
        issue_date,
        due_date,
        lines,
        notes: body.notes,
    })
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<InvoiceFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    Ok(ok(services.read_models.invoices.query(tenant.tenant_id(), &filter, page)))
}

pub async fn overdue_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let items = services
        .read_models
        .invoices
        .overdue(tenant.tenant_id(), Utc::now().date_naive());
    Ok(ok(json!({ "items": items })))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let invoice = load_invoice(&services, &tenant, parse_id(&id)?).await?;
    Ok(ok(dto::invoice_to_json(&invoice)))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::InvoiceRequest>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.write")?;
    let draft = draft_from(&services, &tenant, body).await?;
    let invoice = services
        .invoices()
        .create(tenant.tenant_id(), draft, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(created(dto::invoice_to_json(&invoice)))
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceRequest>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.write")?;
    let invoice_id: InvoiceId = parse_id(&id)?;
    let draft = draft_from(&services, &tenant, body).await?;
    let invoice = services
        .invoices()
        .update(tenant.tenant_id(), invoice_id, draft, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(dto::invoice_to_json(&invoice)))
}

pub async fn send_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.write")?;
    let invoice = services
        .invoices()
        .send(tenant.tenant_id(), parse_id(&id)?, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(dto::invoice_to_json(&invoice)))
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PaymentRequest>,
) -> ApiResult {
    require(&tenant, &principal, "payments.write")?;
    let now = Utc::now();
    let invoice = services
        .invoices()
        .record_payment(
            tenant.tenant_id(),
            parse_id(&id)?,
            body.amount,
            body.method,
            body.reference,
            body.paid_at.unwrap_or(now),
            now,
        )
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(created(dto::invoice_to_json(&invoice)))
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.write")?;
    let reason = body.and_then(|Json(b)| b.reason);
    let invoice = services
        .invoices()
        .cancel(tenant.tenant_id(), parse_id(&id)?, reason, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(dto::invoice_to_json(&invoice)))
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.write")?;
    let invoice_id: InvoiceId = parse_id(&id)?;
    let number = services
        .invoices()
        .delete(tenant.tenant_id(), invoice_id, Utc::now())
        .await
        .map_err(errors::workflow_error_to_response)?;
    Ok(ok(json!({
        "invoice_id": invoice_id.to_string(),
        "number": number,
        "deleted": true,
    })))
}

/// `{"status": "SENT" | "PAID" | "CANCELLED"}` mapped onto the transitions.
/// `PAID` settles the whole outstanding balance in one payment.
pub async fn change_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceStatusRequest>,
) -> ApiResult {
    let invoice_id: InvoiceId = parse_id(&id)?;
    let tenant_id = tenant.tenant_id();
    let now = Utc::now();
    let workflow = services.invoices();

    let invoice = match body.status {
        InvoiceStatus::Sent => {
            require(&tenant, &principal, "invoices.write")?;
            workflow.send(tenant_id, invoice_id, now).await
        }
        InvoiceStatus::Paid => {
            require(&tenant, &principal, "payments.write")?;
            let current = load_invoice(&services, &tenant, invoice_id).await?;
            let outstanding = current.balance_due();
            if !outstanding.is_positive() {
                return Err(errors::json_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invariant_violation",
                    "invoice has no outstanding balance",
                ));
            }
            workflow
                .record_payment(
                    tenant_id,
                    invoice_id,
                    outstanding,
                    body.method.unwrap_or(PaymentMethod::Cash),
                    body.reference,
                    now,
                    now,
                )
                .await
        }
        InvoiceStatus::Cancelled => {
            require(&tenant, &principal, "invoices.write")?;
            workflow.cancel(tenant_id, invoice_id, body.reason, now).await
        }
        other => {
            return Err(errors::bad_request(format!(
                "cannot move an invoice to {}",
                other.as_str()
            )));
        }
    }
    .map_err(errors::workflow_error_to_response)?;

    Ok(ok(dto::invoice_to_json(&invoice)))
}

/// Click-to-chat link to the customer with the invoice summary.
pub async fn invoice_whatsapp(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::WhatsappQuery>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let invoice = load_invoice(&services, &tenant, parse_id(&id)?).await?;
    let customer_id = invoice
        .customer_id()
        .ok_or_else(|| errors::not_found("customer not found"))?;
    let customer = load_customer(&services, &tenant, customer_id).await?;
    let phone = customer.contact().phone.as_deref().ok_or_else(|| {
        errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "no_phone", "customer has no phone number")
    })?;

    let message = query.message.unwrap_or_else(|| {
        let due = invoice
            .due_date()
            .map(|d| format!(", due {d}"))
            .unwrap_or_default();
        format!(
            "Hi {}, invoice {} for {} is ready{due}. Balance due: {}.",
            customer.name(),
            invoice.number(),
            invoice.totals().total,
            invoice.balance_due()
        )
    });
    let url = kedai_customers::whatsapp_link(phone, &message).map_err(errors::domain_error_to_response)?;
    Ok(ok(json!({ "url": url })))
}

/// Everything a client needs to render the printable invoice.
pub async fn invoice_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let tenant_id = tenant.tenant_id();
    let invoice = load_invoice(&services, &tenant, parse_id(&id)?).await?;
    let company: Company = services
        .dispatcher
        .load(tenant_id, company_stream_id(tenant_id))
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let customer = match invoice.customer_id() {
        Some(customer_id) => Some(load_customer(&services, &tenant, customer_id).await?),
        None => None,
    };
    let einvoice = services
        .read_models
        .einvoices
        .current_for_invoice(tenant_id, invoice.id_typed());

    Ok(ok(json!({
        "seller": company.profile(),
        "buyer": customer.as_ref().map(dto::customer_to_json),
        "invoice": dto::invoice_to_json(&invoice),
        "einvoice": einvoice,
    })))
}

pub async fn export_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "invoices.read")?;
    let tenant_id = tenant.tenant_id();
    let invoices = services.read_models.invoices.list(tenant_id);
    let customers = services.read_models.customers.list(tenant_id);
    Ok(csv_attachment("invoices.csv", export::invoices_csv(&invoices, &customers)))
}
