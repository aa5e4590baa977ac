//! Sign-up and passwordless sign-in with emailed codes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use kedai_auth::{RegisterUser, Role, User, UserCommand};
use kedai_company::{Company, CompanyCommand, CompanyProfile, RegisterCompany, company_stream_id};
use kedai_core::validate::validate_email;
use kedai_core::{TenantId, UserId};

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::created;
use crate::app::{dto, services::AppServices};
use crate::middleware::{clear_session_cookie_header, session_cookie_header};

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/tac/request", post(request_code))
        .route("/tac/verify", post(verify_code))
        .route("/logout", post(logout))
}

/// Opens a company with its owner account and default chart of accounts.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterRequest>,
) -> ApiResult {
    let email = validate_email(&body.email).map_err(errors::domain_error_to_response)?;
    if services.read_models.users.email_taken(&email) {
        return Err(errors::json_error(StatusCode::CONFLICT, "email_taken", "email is already registered"));
    }

    let tenant_id = TenantId::new();
    let user_id = UserId::new();
    let now = Utc::now();

    let profile = CompanyProfile {
        name: body.company_name,
        registration_number: body.registration_number,
        tin: body.tin,
        address: body.address.unwrap_or_default(),
        phone: body.phone.clone(),
        email: Some(email.clone()),
        ..CompanyProfile::default()
    };
    services
        .dispatcher
        .send::<Company>(
            tenant_id,
            company_stream_id(tenant_id),
            CompanyCommand::Register(RegisterCompany {
                tenant_id,
                profile,
                prefixes: None,
                occurred_at: now,
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    services
        .dispatcher
        .send::<User>(
            tenant_id,
            User::stream_id(user_id),
            UserCommand::Register(RegisterUser {
                tenant_id,
                user_id,
                email: email.clone(),
                name: body.owner_name,
                phone: body.phone,
                role: Role::Owner,
                occurred_at: now,
            }),
        )
        .await
        .map_err(errors::dispatch_error_to_response)?;

    services
        .ledger()
        .ensure_chart(tenant_id, now)
        .await
        .map_err(errors::dispatch_error_to_response)?;

    info!(%tenant_id, %user_id, "company registered");
    Ok(created(json!({
        "tenant_id": tenant_id.to_string(),
        "user_id": user_id.to_string(),
        "email": email,
    })))
}

/// Always 202 so the endpoint does not reveal which emails exist.
pub async fn request_code(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::TacRequest>,
) -> ApiResult {
    let email = body.email.trim().to_ascii_lowercase();
    let now = Utc::now();
    services.purge_expired();

    if let Some(user) = services.read_models.users.find_by_email(&email).filter(|u| u.is_active()) {
        let code = services.tac.issue(&user.email, now).map_err(errors::tac_error_to_response)?;
        let expires_at = now + services.tac.policy().ttl;
        services
            .tac_sender
            .send(&user.email, &code, expires_at)
            .map_err(errors::tac_error_to_response)?;
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "sent" }))).into_response())
}

pub async fn verify_code(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::TacVerifyRequest>,
) -> ApiResult {
    let email = body.email.trim().to_ascii_lowercase();
    let now = Utc::now();

    services
        .tac
        .verify(&email, body.code.trim(), now)
        .map_err(errors::tac_error_to_response)?;

    let user = services
        .read_models
        .users
        .find_by_email(&email)
        .filter(|u| u.is_active())
        .ok_or_else(|| errors::unauthenticated("account is not active"))?;

    let token = services
        .tokens
        .issue(user.user_id, user.tenant_id, vec![user.role], now)
        .map_err(|e| errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()))?;
    let max_age = services.tokens.ttl().num_seconds();
    let cookie = session_cookie_header(&token, max_age, services.config.cookie_secure);

    info!(tenant_id = %user.tenant_id, user_id = %user.user_id, "signed in");
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "token": token,
            "expires_in": max_age,
            "user": user,
        })),
    )
        .into_response())
}

pub async fn logout(Extension(services): Extension<Arc<AppServices>>) -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie_header(services.config.cookie_secure))],
    )
        .into_response()
}
