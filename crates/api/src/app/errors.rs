use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use kedai_auth::{AuthzError, TacError};
use kedai_core::DomainError;
use kedai_infra::command_dispatcher::DispatchError;
use kedai_infra::workflows::WorkflowError;

/// Handlers return the error response itself on the `Err` side.
pub type ApiResult = Result<Response, Response>;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "concurrency_conflict", msg),
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        DispatchError::NotFound => not_found("not found"),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        DispatchError::Deserialize(msg) => {
            error!(error = %msg, "stored event failed to decode");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
        DispatchError::Store(e) => {
            error!(error = %e, "event store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn workflow_error_to_response(err: WorkflowError) -> Response {
    match err {
        WorkflowError::Dispatch(err) => dispatch_error_to_response(err),
        err @ WorkflowError::Incomplete { .. } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "partially_applied",
            err.to_string(),
        ),
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    dispatch_error_to_response(err.into())
}

pub fn tac_error_to_response(err: TacError) -> Response {
    match err {
        TacError::NotRequested | TacError::Expired | TacError::Mismatch { .. } => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_code", err.to_string())
        }
        TacError::Locked | TacError::TooSoon { .. } => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "too_many_attempts", err.to_string())
        }
        TacError::Delivery(_) => {
            error!(error = %err, "tac delivery failed");
            json_error(StatusCode::BAD_GATEWAY, "delivery_failed", err.to_string())
        }
        TacError::Poisoned => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string()),
    }
}

pub fn forbidden(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn unauthenticated(message: impl Into<String>) -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_map_to_statuses() {
        let cases = [
            (DispatchError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (DispatchError::NotFound, StatusCode::NOT_FOUND),
            (DispatchError::Concurrency("x".into()), StatusCode::CONFLICT),
            (DispatchError::Conflict("x".into()), StatusCode::CONFLICT),
            (DispatchError::InvariantViolation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (DispatchError::Unauthorized, StatusCode::FORBIDDEN),
            (DispatchError::Publish("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(dispatch_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn wrong_codes_are_unauthenticated_and_lockouts_throttled() {
        assert_eq!(
            tac_error_to_response(TacError::Mismatch { remaining: 2 }).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(tac_error_to_response(TacError::Locked).status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
