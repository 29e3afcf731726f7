//! HTTP Request Handlers
//!
//! Axum route handlers for the request surface. Probe and expectation
//! failures never surface as HTTP errors; they are encoded in the result
//! payload. Only malformed submissions produce non-2xx responses.

use super::params;
use crate::batch::orchestrator;
use crate::config::Context;
use crate::pipeline::types::{Batch, WorkKind};

use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Form};
use serde::Deserialize;
use std::sync::Arc;

pub async fn handle_healthcheck() -> &'static str {
    "OK"
}

/// `GET /mcall/{type}/{params}`: `params` is a (possibly base64) JSON
/// batch descriptor; `{type}` is the request kind applied to URL inputs
/// that carry no explicit type.
pub async fn handle_get_batch(
    Extension(ctx): Extension<Arc<Context>>,
    Path((kind, params)): Path<(String, String)>,
) -> Response {
    tracing::debug!("GET batch - type: {}, params: {}", kind, params);
    execute(ctx, &kind, "", &params).await
}

#[derive(Debug, Deserialize)]
pub struct BatchForm {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub params: Option<String>,
}

/// `POST /mcall`: form-encoded `type`, `name`, `params`.
pub async fn handle_post_batch(
    Extension(ctx): Extension<Arc<Context>>,
    Form(form): Form<BatchForm>,
) -> Response {
    let Some(kind) = form.kind.filter(|k| !k.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing type parameter").into_response();
    };
    let Some(batch_params) = form.params.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing params parameter").into_response();
    };
    let name = form.name.unwrap_or_default();

    tracing::debug!("POST batch - type: {}, name: {}", kind, name);
    execute(ctx, &kind, &name, &batch_params).await
}

async fn execute(ctx: Arc<Context>, kind: &str, name: &str, batch_params: &str) -> Response {
    let default_name = if name.is_empty() {
        ctx.subject.clone()
    } else {
        name.to_string()
    };

    let items =
        match params::parse_input_params(batch_params, WorkKind::from_flag(kind), &default_name) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("rejected batch submission: {}", e);
                return (StatusCode::BAD_REQUEST, format!("bad params: {}", e)).into_response();
            }
        };

    match orchestrator::respond(&ctx, Batch::new(items)).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("batch execution failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "batch execution failed").into_response()
        }
    }
}
