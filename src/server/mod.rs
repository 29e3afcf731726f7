//! Request Surface Module
//!
//! The HTTP admission path: a small axum application exposing the health
//! check, the GET path-parameter batch endpoint, and the form-encoded POST
//! endpoint, with optional basic authentication in front.
//!
//! ## Submodules
//! - **`params`**: the shared batch-descriptor parser (base64/JSON).
//! - **`handlers`**: route handlers funneling into the orchestrator.
//! - **`auth`**: credentials-file basic auth layer.

pub mod auth;
pub mod handlers;
pub mod params;


use crate::config::{Config, Context};

use anyhow::{Context as _, Result};
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

/// Builds the router; split out so tests can drive it without a listener.
pub fn build_router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route("/healthcheck", get(handlers::handle_healthcheck))
        .route("/mcall/:stype/:params", get(handlers::handle_get_batch))
        .route("/mcall", post(handlers::handle_post_batch))
        .layer(Extension(ctx))
}

/// Runs the HTTP server until a termination signal arrives.
pub async fn serve(ctx: Arc<Context>, config: &Config) -> Result<()> {
    let mut app = build_router(ctx);

    if config.webserver.auth == "basic-auth" {
        let users = Arc::new(auth::AuthUsers::load(auth::DEFAULT_AUTH_FILE)?);
        app = app
            .layer(axum::middleware::from_fn(auth::basic_auth_middleware))
            .layer(Extension(users));
    }

    let addr = format!("{}:{}", config.webserver.host, config.webserver.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or SIGQUIT.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv_or_pending(sig: &mut Option<Signal>) {
        match sig {
            Some(sig) => {
                sig.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigquit = signal(SignalKind::quit()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = recv_or_pending(&mut sigterm) => {},
        _ = recv_or_pending(&mut sigquit) => {},
    }

    tracing::info!("shutdown signal received");
}
