use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use almox_core::DomainError;
use almox_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DispatchError::InvalidTransition(msg) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", msg)
        }
        DispatchError::InvalidQuantity(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_quantity", msg)
        }
        DispatchError::InvalidCondition(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_condition", msg)
        }
        DispatchError::Denied { code, reason } => forbidden(&code, reason),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", msg)
        }
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

/// Map a gate/domain error raised before dispatch.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    dispatch_error_to_response(DispatchError::from(err))
}

pub fn json_error(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn forbidden(code: &str, reason: String) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, code, reason)
}
