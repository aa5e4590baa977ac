//! Read access to the event log: every change a tenant made, as stored.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path, Query},
    routing::get,
};

use kedai_core::AggregateId;
use kedai_infra::event_store::{EventFilter, EventQuery, Pagination};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_events))
        .route("/:aggregate_id", get(aggregate_history))
}

/// Newest first, filtered by stream, type or time range.
pub async fn list_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(filter): Query<EventFilter>,
    Query(page): Query<dto::AuditQuery>,
) -> ApiResult {
    require(&tenant, &principal, "audit.read")?;
    let result = services
        .events
        .query_events(tenant.tenant_id(), filter, Pagination::new(page.limit, page.offset))
        .await
        .map_err(|e| errors::dispatch_error_to_response(e.into()))?;
    Ok(ok(result))
}

/// One record's history in the order it happened.
pub async fn aggregate_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(aggregate_id): Path<String>,
    Query(page): Query<dto::AuditQuery>,
) -> ApiResult {
    require(&tenant, &principal, "audit.read")?;
    let aggregate_id: AggregateId = parse_id(&aggregate_id)?;
    let result = services
        .events
        .get_aggregate_events(
            tenant.tenant_id(),
            aggregate_id,
            Some(Pagination::new(page.limit, page.offset)),
        )
        .await
        .map_err(|e| errors::dispatch_error_to_response(e.into()))?;
    if result.total == 0 {
        return Err(errors::not_found("no events for this record"));
    }
    Ok(ok(result))
}
