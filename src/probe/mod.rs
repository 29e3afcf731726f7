//! Probe Executors & Expectation Evaluation
//!
//! One probe is a single execution of either a shell command or an HTTP
//! request, bounded by a timeout, with its output captured. After a
//! mechanically successful probe the expectation evaluator validates the
//! output; a failed expectation triggers the item's remediation command and
//! notifications before the failure is reported.
//!
//! ## Submodules
//! - **`shell`**: child-process execution with tokenization quirks and
//!   combined output capture.
//! - **`http`**: GET/POST probes where the status code, not the body, is
//!   validated.
//! - **`expect`**: the pipe-separated substring / `$count` expression
//!   evaluator.

pub mod expect;
pub mod http;
pub mod shell;


use crate::config::Context;
use crate::pipeline::types::{Outcome, WorkItem, WorkKind};

/// Raw result of one probe before expectation evaluation.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Captured output: combined stdout+stderr, or the HTTP response body.
    pub content: String,
    /// The value the expectation evaluator inspects. Equal to `content` for
    /// commands; the decimal status code for HTTP probes.
    pub check: String,
    /// `None` when the probe mechanically succeeded.
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn success(content: String) -> Self {
        ProbeOutcome {
            check: content.clone(),
            content,
            error: None,
        }
    }

    /// A mechanical failure: the diagnostic doubles as the captured content
    /// so it surfaces in the result payload.
    pub fn failure(diag: String) -> Self {
        ProbeOutcome {
            content: diag.clone(),
            check: String::new(),
            error: Some(diag),
        }
    }
}

/// Runs one work item end to end: probe, expectation check, and on
/// expectation failure the remediation/notification dispatch.
///
/// An empty input is a no-op that succeeds with empty content.
pub async fn execute_item(ctx: &Context, item: &WorkItem) -> Outcome {
    if item.input.is_empty() {
        return Outcome {
            content: String::new(),
            error: None,
        };
    }

    let timeout = item.timeout.duration(ctx.default_timeout_secs);
    let mut probe = match item.kind {
        WorkKind::Command => shell::run_command(&item.input, timeout).await,
        WorkKind::HttpGet | WorkKind::HttpPost => {
            http::fetch_url(&ctx.http_client, &item.input, item.kind, timeout).await
        }
    };

    if probe.error.is_none() {
        if let Err(reason) = expect::evaluate(&probe.check, &item.expect) {
            tracing::debug!("expectation failed for {}: {}", item.input, reason);
            handle_expect_failure(ctx, item, &reason).await;
            probe.error = Some(reason);
        }
    }

    Outcome {
        content: probe.content,
        error: probe.error,
    }
}

/// Failure dispatch: notify every named receiver, then run the remediation
/// command bounded by the item timeout. Remediation output is logged only;
/// the original expectation failure is what the caller reports.
async fn handle_expect_failure(ctx: &Context, item: &WorkItem, reason: &str) {
    for receiver in &item.notify {
        ctx.notifier.notify(receiver, &item.name, reason).await;
    }

    if item.remediation.is_empty() {
        return;
    }

    tracing::info!("running remediation for {}: {}", item.input, item.remediation);
    let timeout = item.timeout.duration(ctx.default_timeout_secs);
    let outcome = shell::run_command(&item.remediation, timeout).await;
    match outcome.error {
        Some(e) => tracing::warn!("remediation failed: {}", e),
        None => tracing::debug!("remediation output: {}", outcome.content.trim_end()),
    }
}
