//! Webhook endpoint admin CRUD. Not part of the original external surface,
//! but every webhook the dispatcher (`webhook_dispatch.rs`) delivers to has
//! to be registered somehow; this is that surface, wrapping
//! `flynn_store::StateStore`'s existing add/remove/list directly.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use flynn_core::webhook::{WebhookConfig, WebhookId};
use flynn_core::HostError;
use serde::Deserialize;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddWebhookRequest {
    pub url: String,
}

pub async fn add_webhook(
    State(state): State<AppState>,
    Json(req): Json<AddWebhookRequest>,
) -> Result<Json<WebhookConfig>, ApiError> {
    if !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
        return Err(HostError::Validation("webhook url must be http(s)".into()).into());
    }
    let config = state.store.add_webhook(req.url, state.now_ms())?;
    Ok(Json(config))
}

pub async fn remove_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl axum::response::IntoResponse, ApiError> {
    state.store.remove_webhook(WebhookId::from_string(&id))?;
    Ok(StatusCode::OK)
}

pub async fn list_webhooks(State(state): State<AppState>) -> Result<Json<Vec<WebhookConfig>>, ApiError> {
    Ok(Json(state.store.list_webhooks()?))
}
