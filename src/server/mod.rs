//! Webhook HTTP surface
//!
//! The task backend calls one route per event with the item document as the
//! JSON body. Routes authenticate with a bearer token; `sortAll` takes the
//! token in the path so it can be opened from a plain link.

mod handlers;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};
use eyre::{Context, Result};
use log::info;
use tower_http::cors::CorsLayer;

use crate::engine::ReconcileEngine;

pub use handlers::CLOSE_PAGE;

/// Shared state of every route
#[derive(Clone)]
pub struct AppState {
    /// `None` when the store is unconfigured or was unreachable at startup
    pub engine: Option<Arc<ReconcileEngine>>,
    pub tokens: Arc<HashSet<String>>,
}

impl AppState {
    pub fn new(engine: Option<Arc<ReconcileEngine>>, tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            engine,
            tokens: Arc::new(tokens.into_iter().collect()),
        }
    }

    pub fn accepts(&self, token: &str) -> bool {
        !token.is_empty() && self.tokens.contains(token)
    }

    /// Token from an `Authorization: Bearer <token>` header
    fn bearer_accepted(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| self.accepts(token.trim()))
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/edit", post(handlers::edit))
        .route("/add", post(handlers::add))
        .route("/markDone", post(handlers::mark_done))
        .route("/delete", post(handlers::delete))
        .route("/{token}/sortAll", get(handlers::sort_all))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the webhook routes until the process is stopped
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await.context("Server error")?;
    Ok(())
}
