//! E-invoice readiness checks and the submission document lifecycle.
//!
//! Transport to the tax authority is not done here: clients submit the
//! prepared payload and report back the submission and validation results.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

use kedai_company::{Company, company_stream_id};
use kedai_customers::Customer;
use kedai_invoicing::{
    CancelDocument, EInvoiceCommand, EInvoiceDocument, EInvoiceDocumentId, Invoice, InvoiceId, MarkSubmitted,
    PrepareDocument, Readiness, RecordValidation, build_payload, check_readiness,
};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/invoices/:id/readiness", get(readiness))
        .route("/invoices/:id/prepare", post(prepare))
        .route("/invoices/:id/documents", get(invoice_documents))
        .route("/documents", get(list_documents))
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/submitted", post(mark_submitted))
        .route("/documents/:id/validation", post(record_validation))
        .route("/documents/:id/cancel", post(cancel_document))
}

fn document_to_json(document_id: EInvoiceDocumentId, doc: &EInvoiceDocument) -> JsonValue {
    json!({
        "document_id": document_id.to_string(),
        "invoice_id": doc.invoice_id().map(|i| i.to_string()),
        "invoice_number": doc.invoice_number(),
        "status": doc.status(),
        "submission_uid": doc.submission_uid(),
        "uuid": doc.uuid(),
        "long_id": doc.long_id(),
        "errors": doc.errors(),
        "validated_at": doc.validated_at(),
        "payload": doc.payload(),
    })
}

/// Company, customer and invoice as the readiness check needs them.
async fn load_parties(
    services: &AppServices,
    tenant: &TenantContext,
    invoice_id: InvoiceId,
) -> Result<(Company, Customer, Invoice), Response> {
    let tenant_id = tenant.tenant_id();
    let invoice: Invoice = services
        .dispatcher
        .load(tenant_id, invoice_id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if !invoice.exists() {
        return Err(errors::not_found("invoice not found"));
    }
    let customer_id = invoice
        .customer_id()
        .ok_or_else(|| errors::not_found("customer not found"))?;
    let customer: Customer = services
        .dispatcher
        .load(tenant_id, customer_id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let company: Company = services
        .dispatcher
        .load(tenant_id, company_stream_id(tenant_id))
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if !company.exists() {
        return Err(errors::not_found("company not found"));
    }
    Ok((company, customer, invoice))
}

async fn load_document(
    services: &AppServices,
    tenant: &TenantContext,
    document_id: EInvoiceDocumentId,
) -> Result<EInvoiceDocument, Response> {
    let doc: EInvoiceDocument = services
        .dispatcher
        .load(tenant.tenant_id(), document_id.0)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if doc.exists() {
        Ok(doc)
    } else {
        Err(errors::not_found("e-invoice document not found"))
    }
}

async fn send(
    services: &AppServices,
    tenant: &TenantContext,
    document_id: EInvoiceDocumentId,
    cmd: EInvoiceCommand,
) -> ApiResult {
    services
        .dispatcher
        .send::<EInvoiceDocument>(tenant.tenant_id(), document_id.0, cmd)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    let doc = load_document(services, tenant, document_id).await?;
    Ok(ok(document_to_json(document_id, &doc)))
}

fn not_ready(readiness: Readiness) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": "not_ready",
            "message": "invoice is not ready for e-invoicing",
            "readiness": readiness,
        })),
    )
        .into_response()
}

pub async fn readiness(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.read")?;
    let (company, customer, invoice) = load_parties(&services, &tenant, parse_id(&id)?).await?;
    Ok(ok(check_readiness(company.profile(), &customer, &invoice)))
}

/// Builds the submission payload for a ready invoice. One live document
/// per invoice; a new one may be prepared after rejection or cancellation.
pub async fn prepare(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.write")?;
    let tenant_id = tenant.tenant_id();
    let invoice_id: InvoiceId = parse_id(&id)?;

    if let Some(current) = services.read_models.einvoices.current_for_invoice(tenant_id, invoice_id) {
        return Err(errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("document {} is already {:?}", current.document_id, current.status),
        ));
    }

    let (company, customer, invoice) = load_parties(&services, &tenant, invoice_id).await?;
    let readiness = check_readiness(company.profile(), &customer, &invoice);
    if !readiness.ready {
        return Err(not_ready(readiness));
    }

    let document_id = EInvoiceDocumentId::generate();
    services
        .dispatcher
        .send::<EInvoiceDocument>(
            tenant_id,
            document_id.0,
            EInvoiceCommand::Prepare(PrepareDocument {
                tenant_id,
                document_id,
                invoice_id,
                invoice_number: invoice.number().to_string(),
                payload: build_payload(company.profile(), &customer, &invoice),
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let doc = load_document(&services, &tenant, document_id).await?;
    Ok(created(document_to_json(document_id, &doc)))
}

pub async fn invoice_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.read")?;
    let items = services
        .read_models
        .einvoices
        .for_invoice(tenant.tenant_id(), parse_id(&id)?);
    Ok(ok(json!({ "items": items })))
}

pub async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.read")?;
    let items = services.read_models.einvoices.list(tenant.tenant_id());
    Ok(ok(json!({ "items": items })))
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.read")?;
    let document_id: EInvoiceDocumentId = parse_id(&id)?;
    let doc = load_document(&services, &tenant, document_id).await?;
    Ok(ok(document_to_json(document_id, &doc)))
}

pub async fn mark_submitted(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SubmittedRequest>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.write")?;
    let document_id: EInvoiceDocumentId = parse_id(&id)?;
    let cmd = EInvoiceCommand::MarkSubmitted(MarkSubmitted {
        tenant_id: tenant.tenant_id(),
        document_id,
        submission_uid: body.submission_uid,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, document_id, cmd).await
}

pub async fn record_validation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ValidationResultRequest>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.write")?;
    let document_id: EInvoiceDocumentId = parse_id(&id)?;
    let cmd = EInvoiceCommand::RecordValidation(RecordValidation {
        tenant_id: tenant.tenant_id(),
        document_id,
        valid: body.valid,
        uuid: body.uuid,
        long_id: body.long_id,
        errors: body.errors,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, document_id, cmd).await
}

/// Only validated documents, and only within the cancellation window.
pub async fn cancel_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelDocumentRequest>,
) -> ApiResult {
    require(&tenant, &principal, "einvoice.write")?;
    let document_id: EInvoiceDocumentId = parse_id(&id)?;
    let cmd = EInvoiceCommand::Cancel(CancelDocument {
        tenant_id: tenant.tenant_id(),
        document_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    send(&services, &tenant, document_id, cmd).await
}
