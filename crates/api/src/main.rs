use std::sync::Arc;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    almox_observability::init();

    // Dev token table until the identity provider integration lands.
    let provider = Arc::new(almox_api::authn::StaticClaimsProvider::dev_defaults());

    let app = almox_api::app::build_app(provider);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on {addr}");
    }

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
