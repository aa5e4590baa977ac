use std::sync::Arc;

use axum::{Router, extract::Extension, routing::get};
use chrono::Utc;

use crate::app::errors::ApiResult;
use crate::app::routes::common::{ok, require};
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().route("/", get(summary))
}

/// Month-to-date figures; cached per tenant until sales data changes.
pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "dashboard.read")?;
    let today = Utc::now().date_naive();
    Ok(ok(services.dashboard.summary(tenant.tenant_id(), today)))
}
