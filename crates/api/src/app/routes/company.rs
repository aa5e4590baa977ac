use std::sync::Arc;

use axum::{Json, Router, extract::Extension, routing::get};
use chrono::Utc;
use serde_json::json;

use kedai_company::{Company, CompanyCommand, ProfilePatch, UpdateCompanyProfile, company_stream_id};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{ok, require};
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().route("/", get(get_company).put(update_company))
}

pub async fn get_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "company.read")?;
    services
        .read_models
        .companies
        .get(tenant.tenant_id())
        .map(ok)
        .ok_or_else(|| errors::not_found("company not found"))
}

pub async fn update_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult {
    require(&tenant, &principal, "company.write")?;
    let tenant_id = tenant.tenant_id();
    let stream = company_stream_id(tenant_id);

    services
        .dispatcher
        .send::<Company>(
            tenant_id,
            stream,
            CompanyCommand::UpdateProfile(UpdateCompanyProfile {
                tenant_id,
                patch,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let company: Company = services
        .dispatcher
        .load(tenant_id, stream)
        .await
        .map_err(errors::dispatch_error_to_response)?;
    Ok(ok(json!({
        "tenant_id": tenant_id.to_string(),
        "profile": company.profile(),
        "prefixes": company.prefixes(),
        "subscription": company.subscription(),
    })))
}
