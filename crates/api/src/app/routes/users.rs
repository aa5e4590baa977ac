use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::Utc;
use serde_json::json;

use kedai_auth::{ChangeRole, ReactivateUser, RegisterUser, Role, SuspendUser, User, UserCommand};
use kedai_core::UserId;

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{created, ok, parse_id, require};
use crate::app::{dto, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user))
        .route("/:id/role", patch(change_role))
        .route("/:id/suspend", post(suspend_user))
        .route("/:id/reactivate", post(reactivate_user))
}

fn user_to_json(user_id: UserId, user: &User) -> serde_json::Value {
    json!({
        "user_id": user_id.to_string(),
        "email": user.email(),
        "name": user.name(),
        "phone": user.phone(),
        "role": user.role(),
        "status": user.status(),
    })
}

async fn load_user(services: &AppServices, tenant: &TenantContext, user_id: UserId) -> Result<User, axum::response::Response> {
    let user: User = services
        .dispatcher
        .load(tenant.tenant_id(), User::stream_id(user_id))
        .await
        .map_err(errors::dispatch_error_to_response)?;
    if user.exists() {
        Ok(user)
    } else {
        Err(errors::not_found("user not found"))
    }
}

/// Only owners hand out the owner role.
fn ensure_may_grant(principal: &PrincipalContext, role: Role) -> Result<(), axum::response::Response> {
    if role == Role::Owner && !principal.roles().contains(&Role::Owner) {
        return Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "only owners can grant the owner role",
        ));
    }
    Ok(())
}

/// The company must keep at least one active owner.
fn ensure_not_last_owner(services: &AppServices, tenant: &TenantContext, user: &User) -> Result<(), axum::response::Response> {
    if user.role() == Role::Owner && services.read_models.users.owner_count(tenant.tenant_id()) <= 1 {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            "the last owner cannot be demoted or suspended",
        ));
    }
    Ok(())
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "users.read")?;
    let items = services.read_models.users.list(tenant.tenant_id());
    Ok(ok(json!({ "items": items })))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let user_id: UserId = parse_id(&id)?;
    if user_id != principal.user_id() {
        require(&tenant, &principal, "users.read")?;
    }
    let user = load_user(&services, &tenant, user_id).await?;
    Ok(ok(user_to_json(user_id, &user)))
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateUserRequest>,
) -> ApiResult {
    require(&tenant, &principal, "users.write")?;
    ensure_may_grant(&principal, body.role)?;
    if services.read_models.users.email_taken(&body.email) {
        return Err(errors::json_error(StatusCode::CONFLICT, "email_taken", "email is already registered"));
    }

    let tenant_id = tenant.tenant_id();
    let user_id = UserId::new();
    services
        .dispatcher
        .send::<User>(
            tenant_id,
            User::stream_id(user_id),
            UserCommand::Register(RegisterUser {
                tenant_id,
                user_id,
                email: body.email,
                name: body.name,
                phone: body.phone,
                role: body.role,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let user = load_user(&services, &tenant, user_id).await?;
    Ok(created(user_to_json(user_id, &user)))
}

pub async fn change_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeRoleRequest>,
) -> ApiResult {
    require(&tenant, &principal, "users.write")?;
    let user_id: UserId = parse_id(&id)?;
    let user = load_user(&services, &tenant, user_id).await?;
    ensure_may_grant(&principal, body.role)?;
    if body.role != Role::Owner {
        ensure_not_last_owner(&services, &tenant, &user)?;
    }

    let tenant_id = tenant.tenant_id();
    services
        .dispatcher
        .send::<User>(
            tenant_id,
            User::stream_id(user_id),
            UserCommand::ChangeRole(ChangeRole {
                tenant_id,
                user_id,
                role: body.role,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let user = load_user(&services, &tenant, user_id).await?;
    Ok(ok(user_to_json(user_id, &user)))
}

pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::ReasonRequest>>,
) -> ApiResult {
    require(&tenant, &principal, "users.write")?;
    let user_id: UserId = parse_id(&id)?;
    if user_id == principal.user_id() {
        return Err(errors::bad_request("you cannot suspend yourself"));
    }
    let user = load_user(&services, &tenant, user_id).await?;
    ensure_not_last_owner(&services, &tenant, &user)?;

    let tenant_id = tenant.tenant_id();
    let reason = body.and_then(|Json(b)| b.reason);
    services
        .dispatcher
        .send::<User>(
            tenant_id,
            User::stream_id(user_id),
            UserCommand::Suspend(SuspendUser {
                tenant_id,
                user_id,
                reason,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let user = load_user(&services, &tenant, user_id).await?;
    Ok(ok(user_to_json(user_id, &user)))
}

pub async fn reactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "users.write")?;
    let user_id: UserId = parse_id(&id)?;
    load_user(&services, &tenant, user_id).await?;

    let tenant_id = tenant.tenant_id();
    services
        .dispatcher
        .send::<User>(
            tenant_id,
            User::stream_id(user_id),
            UserCommand::Reactivate(ReactivateUser {
                tenant_id,
                user_id,
                occurred_at: Utc::now(),
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    let user = load_user(&services, &tenant, user_id).await?;
    Ok(ok(user_to_json(user_id, &user)))
}
