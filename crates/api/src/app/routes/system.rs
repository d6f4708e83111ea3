use axum::{Json, http::StatusCode, response::IntoResponse};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    axum::extract::Extension(actor): axum::extract::Extension<crate::context::ActorContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": actor.actor_id().to_string(),
        "admin": actor.is_admin(),
        "roles": actor.claims().roles.iter().map(|r| r.as_str().to_string()).collect::<Vec<_>>(),
    }))
}
