//! Liveness endpoint for hosting platforms that stop idle processes.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;

use crate::EncoreError;

/// Body of every liveness answer.
const ALIVE: &str = "Music bot is running!";

fn router() -> Router {
    Router::new().route("/", get(|| async { ALIVE }))
}

/// Serve the liveness endpoint on all interfaces until the process exits.
pub async fn serve(port: u16) -> Result<(), EncoreError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting keep-alive server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router()).await?;
    Ok(())
}

/// Run [serve] in the background. Failures are logged and never stop the bot.
pub fn spawn(port: u16) {
    tokio::spawn(async move {
        if let Err(e) = serve(port).await {
            tracing::error!("Keep-alive server stopped: {e}");
        }
    });
}
