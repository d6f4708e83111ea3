//! Helpers shared by the route handlers.

use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use almox_infra::DispatchError;

use crate::app::errors;

/// Mandatory `Idempotency-Key` header, parsed as a UUID.
///
/// Attend/return requests must carry one so a retried request replays the
/// recorded outcome instead of mutating twice.
pub fn require_idempotency_key(headers: &HeaderMap) -> Result<Uuid, axum::response::Response> {
    let Some(raw) = headers.get("idempotency-key") else {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "missing_idempotency_key",
            "an Idempotency-Key header is required",
        ));
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<Uuid>().ok())
        .ok_or_else(|| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_idempotency_key",
                "Idempotency-Key must be a UUID",
            )
        })
}

/// Machine-readable code plus human message for a per-item batch outcome.
pub fn error_summary(err: &DispatchError) -> (String, String) {
    match err {
        DispatchError::Concurrency(msg) => ("conflict".to_string(), msg.clone()),
        DispatchError::Validation(msg) => ("validation_error".to_string(), msg.clone()),
        DispatchError::InvalidTransition(msg) => ("invalid_transition".to_string(), msg.clone()),
        DispatchError::InvalidQuantity(msg) => ("invalid_quantity".to_string(), msg.clone()),
        DispatchError::InvalidCondition(msg) => ("invalid_condition".to_string(), msg.clone()),
        DispatchError::Denied { code, reason } => (code.clone(), reason.clone()),
        DispatchError::NotFound => ("not_found".to_string(), "item not found".to_string()),
        DispatchError::Unavailable(msg) => ("dependency_unavailable".to_string(), msg.clone()),
        DispatchError::Deserialize(msg) => ("deserialize_error".to_string(), msg.clone()),
        DispatchError::Store(e) => ("store_error".to_string(), format!("{e:?}")),
        DispatchError::Publish(msg) => ("publish_error".to_string(), msg.clone()),
    }
}
