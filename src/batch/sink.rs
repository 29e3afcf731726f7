//! Elasticsearch Sink
//!
//! Forwards json-format batch results as a bulk indexing request. The index
//! name is the configured prefix plus the UTC date, so each day's results
//! land in their own index.

use crate::config::{Context, EsConfig};

use anyhow::{Context as _, Result};
use serde_json::{Map, Value};
use std::time::Duration;

const BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the `_bulk` payload: an empty index action line before every
/// record document, newline-terminated.
pub fn bulk_payload(rendered: &[Map<String, Value>]) -> Result<String> {
    let mut body = String::new();
    for entry in rendered {
        body.push_str("{ \"index\":{} }\n");
        body.push_str(&serde_json::to_string(entry).context("failed to marshal record")?);
        body.push('\n');
    }
    Ok(body)
}

pub fn daily_index_name(prefix: &str) -> String {
    format!("{}-{}", prefix, chrono::Utc::now().format("%Y.%m.%d"))
}

/// POSTs the batch to `<host>/<index>/_bulk` with basic auth. Callers treat
/// failures as log-only; the sink never affects the batch result.
pub async fn forward_bulk(
    ctx: &Context,
    es: &EsConfig,
    rendered: &[Map<String, Value>],
) -> Result<()> {
    if rendered.is_empty() {
        return Ok(());
    }

    let index = daily_index_name(&es.index_name);
    let url = format!("{}/{}/_bulk", es.host.trim_end_matches('/'), index);
    let body = bulk_payload(rendered)?;

    let response = ctx
        .http_client
        .post(&url)
        .basic_auth(&es.id, Some(&es.password))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .timeout(BULK_TIMEOUT)
        .body(body)
        .send()
        .await
        .with_context(|| format!("bulk request to {} failed", index))?;

    if !response.status().is_success() {
        anyhow::bail!("bulk indexing to {} returned {}", index, response.status());
    }

    tracing::debug!("forwarded {} record(s) to {}", rendered.len(), index);
    Ok(())
}
