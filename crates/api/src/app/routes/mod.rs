use axum::{Router, routing::get};

pub mod common;
pub mod requisicoes;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/requisicoes", requisicoes::router())
}
