use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use log::{info, warn};
use serde_json::Value;

use super::AppState;
use crate::domain::Item;
use crate::engine::{Outcome, ReconcileEngine};
use crate::error::{ReconcileError, Result};

/// Returned by `sortAll` on success; the link is opened in a browser tab.
pub const CLOSE_PAGE: &str = "<!DOCTYPE html><html><body><script>window.close()</script>Done.</body></html>";

const DB_CONNECTION_FAILED: &str = "db connection failed";

/// Engine for an authenticated request, or the response to send instead
fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<Arc<ReconcileEngine>, Response> {
    let Some(engine) = state.engine.clone() else {
        return Err(Json(Outcome::failure(DB_CONNECTION_FAILED)).into_response());
    };
    if !state.bearer_accepted(headers) {
        warn!("Rejected webhook with a missing or unknown token");
        return Err((StatusCode::UNAUTHORIZED, Json(Outcome::failure("unauthorized"))).into_response());
    }
    Ok(engine)
}

/// The item document and the raw body it came from
fn parse_item(body: &[u8]) -> Result<(Item, Value)> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| ReconcileError::Validation(format!("body is not JSON: {}", e)))?;
    let item: Item = serde_json::from_value(payload.clone())
        .map_err(|e| ReconcileError::Validation(format!("body is not an item: {}", e)))?;
    Ok((item, payload))
}

/// Names of the fields an edit changed, from the payload's `setter` object
fn changed_fields(payload: &Value) -> Vec<String> {
    payload
        .get("setter")
        .and_then(Value::as_object)
        .map(|setter| setter.keys().cloned().collect())
        .unwrap_or_default()
}

async fn respond(engine: &ReconcileEngine, route: &str, result: Result<crate::engine::Report>) -> Response {
    let outcome = engine.outcome(&result).await;
    if outcome.success {
        info!("{}: {}", route, outcome.message);
    } else {
        warn!("{}: {}", route, outcome.message);
    }
    Json(outcome).into_response()
}

pub async fn edit(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let engine = match authorize(&state, &headers) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let result = match parse_item(&body) {
        Ok((item, payload)) => engine.on_edit(&item, &changed_fields(&payload)).await,
        Err(err) => Err(err),
    };
    respond(&engine, "edit", result).await
}

pub async fn add(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let engine = match authorize(&state, &headers) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let result = match parse_item(&body) {
        Ok((item, _)) => engine.on_add(&item).await,
        Err(err) => Err(err),
    };
    respond(&engine, "add", result).await
}

pub async fn mark_done(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let engine = match authorize(&state, &headers) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let result = match parse_item(&body) {
        Ok((item, _)) => engine.on_mark_done(&item).await,
        Err(err) => Err(err),
    };
    respond(&engine, "markDone", result).await
}

pub async fn delete(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let engine = match authorize(&state, &headers) {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    let result = match parse_item(&body) {
        Ok((item, _)) => engine.on_delete(&item).await,
        Err(err) => Err(err),
    };
    respond(&engine, "delete", result).await
}

pub async fn sort_all(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let Some(engine) = state.engine.clone() else {
        return Json(Outcome::failure(DB_CONNECTION_FAILED)).into_response();
    };
    if !state.accepts(&token) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let result = engine.on_full_resync().await;
    let outcome = engine.outcome(&result).await;
    if outcome.success {
        info!("sortAll: {}", outcome.message);
        Html(CLOSE_PAGE).into_response()
    } else {
        warn!("sortAll: {}", outcome.message);
        Json(outcome).into_response()
    }
}
