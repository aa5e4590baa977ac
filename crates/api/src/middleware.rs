use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

pub const SESSION_COOKIE: &str = "kedai_session";

/// Resolves the session (cookie first, then bearer token) into tenant and
/// principal extensions.
///
/// The user's current role comes from the directory so role changes and
/// suspensions apply to sessions that are already issued.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token(req.headers()).ok_or_else(|| errors::unauthenticated("missing session"))?;

    let claims = services
        .tokens
        .verify(token, Utc::now())
        .map_err(|e| errors::unauthenticated(e.to_string()))?;

    let roles = match services.read_models.users.get(claims.tenant_id, &claims.sub) {
        Some(user) if !user.is_active() => return Err(errors::unauthenticated("account suspended")),
        Some(user) => vec![user.role],
        None => claims.roles.clone(),
    };

    req.extensions_mut().insert(TenantContext::new(claims.tenant_id));
    req.extensions_mut().insert(PrincipalContext::new(claims.sub, roles));

    Ok(next.run(req).await)
}

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    session_cookie(headers).or_else(|| extract_bearer(headers))
}

fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find(|token| !token.is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// `Set-Cookie` value carrying a fresh session.
pub fn session_cookie_header(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session.
pub fn clear_session_cookie_header(secure: bool) -> String {
    session_cookie_header("", 0, secure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; kedai_session=abc.def"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_token(&headers), Some("abc.def"));

        headers.remove(header::COOKIE);
        assert_eq!(extract_token(&headers), Some("xyz"));
    }

    #[test]
    fn similarly_named_cookies_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("kedai_session_old=zzz"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie_header("tok", 3600, true);
        assert_eq!(cookie, "kedai_session=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=3600; Secure");
        assert!(clear_session_cookie_header(false).contains("Max-Age=0"));
    }
}
