//! Shell Probe
//!
//! Runs one command line as a child process with combined stdout/stderr
//! capture and a hard wall-clock timeout. Tokenization reproduces the
//! historical engine behavior, including its `bash -c` quote peeling.

use super::ProbeOutcome;

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const BASH_PREFIX: &str = "bash -c ";

/// Splits a command line into program + arguments.
///
/// A `bash -c ` prefix hands the remainder to bash as a single argument,
/// with exactly one character peeled from each end. This peels the usual
/// surrounding quotes but is not quote-aware; preserved as-is because
/// deployed command sets depend on it.
///
/// Plain command lines split on whitespace. The
/// `'Content-Type_application/json'` token is rewritten to a real header
/// value and backticks in arguments turn into spaces, so callers can smuggle
/// spaces through the whitespace split.
pub fn tokenize(input: &str) -> (String, Vec<String>) {
    if let Some(rest) = input.strip_prefix(BASH_PREFIX) {
        let inner = if rest.len() >= 2 {
            rest.get(1..rest.len() - 1).unwrap_or("")
        } else {
            ""
        };
        return (
            "bash".to_string(),
            vec!["-c".to_string(), inner.to_string()],
        );
    }

    let mut parts = input.split_whitespace();
    let program = parts.next().unwrap_or("").to_string();
    let args = parts
        .map(|arg| {
            if arg == "'Content-Type_application/json'" {
                "'Content-Type: application/json'".to_string()
            } else {
                arg.replace('`', " ")
            }
        })
        .collect();

    (program, args)
}

/// Executes one command line. `timeout` of `None` means no wall clock at all.
///
/// The returned outcome carries the combined stdout+stderr as content; a
/// timed-out or unspawnable command reports the diagnostic as both content
/// and error, matching how failures surface in result payloads.
pub async fn run_command(input: &str, timeout: Option<Duration>) -> ProbeOutcome {
    if input.is_empty() {
        return ProbeOutcome::success(String::new());
    }

    let (program, args) = tokenize(input);
    if program.is_empty() {
        return ProbeOutcome::failure("empty command".to_string());
    }

    let child = Command::new(&program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            let diag = format!("failed to spawn {}: {}", program, e);
            tracing::warn!("{}", diag);
            return ProbeOutcome::failure(diag);
        }
    };

    let wait = child.wait_with_output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                let diag = format!("command timed out after {}s", limit.as_secs());
                tracing::warn!("{}: {}", diag, input);
                return ProbeOutcome::failure(diag);
            }
        },
        None => wait.await,
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            let diag = format!("failed to collect output: {}", e);
            return ProbeOutcome::failure(diag);
        }
    };

    let mut content = String::from_utf8_lossy(&output.stdout).into_owned();
    content.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        ProbeOutcome::success(content)
    } else {
        let error = format!("command failed: {}", output.status);
        tracing::debug!("{} ({})", error, input);
        ProbeOutcome {
            content,
            check: String::new(),
            error: Some(error),
        }
    }
}
