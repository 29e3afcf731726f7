//! HTTP Probe
//!
//! Fetches one absolute URL with GET or POST (empty body). The response body
//! becomes the captured content while the decimal status code is what the
//! expectation evaluator inspects.

use super::ProbeOutcome;
use crate::pipeline::types::WorkKind;

use std::time::Duration;

/// Builds the client shared by every HTTP probe in the process.
///
/// Certificate verification is off by default because the probe targets
/// internal endpoints with self-signed certificates; `http.insecure_tls`
/// in the configuration turns verification back on.
pub fn build_client(insecure_tls: bool) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(insecure_tls)
        .build()
}

/// Performs one GET or POST probe. `timeout` of `None` leaves the request
/// unbounded (the `-1` daemon policy).
pub async fn fetch_url(
    client: &reqwest::Client,
    input: &str,
    kind: WorkKind,
    timeout: Option<Duration>,
) -> ProbeOutcome {
    if input.is_empty() {
        return ProbeOutcome::success(String::new());
    }

    let mut request = match kind {
        WorkKind::HttpPost => client.post(input),
        _ => client.get(input),
    };
    if let Some(limit) = timeout {
        request = request.timeout(limit);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let diag = if e.is_timeout() {
                format!("request timed out: {}", input)
            } else {
                format!("request failed: {}", e)
            };
            tracing::warn!("{}", diag);
            return ProbeOutcome::failure(diag);
        }
    };

    let status = response.status().as_u16().to_string();
    match response.text().await {
        Ok(body) => ProbeOutcome {
            content: body,
            check: status,
            error: None,
        },
        Err(e) => ProbeOutcome::failure(format!("failed to read response body: {}", e)),
    }
}
