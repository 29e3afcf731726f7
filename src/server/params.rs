//! Batch Descriptor Parsing
//!
//! Every admission path (console flags, HTTP params, configuration file,
//! task claims) funnels through the same JSON shape:
//! `{"inputs":[{"input":..., "type":..., ...}]}`. HTTP callers may base64
//! the JSON (standard or URL alphabet) because the descriptor travels
//! inside a path segment.

use crate::pipeline::types::{ItemTimeout, WorkItem, WorkKind};

use anyhow::{Context as _, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct InputsEnvelope {
    #[serde(default)]
    inputs: Vec<RawEntry>,
}

/// One descriptor entry as it appears on the wire. `type` stays optional
/// here so an absent kind can fall back to the caller's request kind.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    input: String,
    #[serde(rename = "type")]
    kind: Option<WorkKind>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    expect: String,
    #[serde(rename = "exec", default)]
    remediation: String,
    #[serde(rename = "receivers", default)]
    receivers: String,
    #[serde(default)]
    timeout: ItemTimeout,
}

/// Parses a batch descriptor that may be base64-standard, base64-url, or
/// raw JSON. Items without a `type` get `default_kind` when their input is
/// an absolute URL and `cmd` otherwise; items without a `name` get
/// `default_name`.
pub fn parse_input_params(
    params: &str,
    default_kind: WorkKind,
    default_name: &str,
) -> Result<Vec<WorkItem>> {
    let json = decode_params(params);
    parse_descriptor(&json, default_kind, default_name)
}

/// Parses an already-decoded JSON descriptor (config file, console).
pub fn parse_descriptor(
    json: &str,
    default_kind: WorkKind,
    default_name: &str,
) -> Result<Vec<WorkItem>> {
    let envelope: InputsEnvelope =
        serde_json::from_str(json).context("failed to parse batch descriptor")?;

    let items = envelope
        .inputs
        .into_iter()
        .filter(|entry| {
            if entry.input.is_empty() {
                tracing::warn!("dropping descriptor entry without input");
                false
            } else {
                true
            }
        })
        .map(|entry| {
            let kind = entry.kind.unwrap_or_else(|| {
                if is_url(&entry.input) {
                    default_kind
                } else {
                    WorkKind::Command
                }
            });
            WorkItem {
                input: entry.input,
                kind,
                name: if entry.name.is_empty() {
                    default_name.to_string()
                } else {
                    entry.name
                },
                expect: entry.expect,
                remediation: entry.remediation,
                notify: split_receivers(&entry.receivers),
                timeout: entry.timeout,
            }
        })
        .collect();

    Ok(items)
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn split_receivers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Decoding ladder: base64-standard first (the historical default), then
/// base64-url, then the string is taken as raw JSON.
fn decode_params(params: &str) -> String {
    if let Some(text) = try_decode(&STANDARD, params) {
        return text;
    }
    if let Some(text) = try_decode(&URL_SAFE, params) {
        return text;
    }
    params.to_string()
}

fn try_decode<E: Engine>(engine: &E, params: &str) -> Option<String> {
    let decoded = engine.decode(params).ok()?;
    String::from_utf8(decoded).ok()
}

/// Builds the console batch: comma-separated inputs, one shared name, and
/// the request-kind flag applied to URL inputs only.
pub fn parse_console_inputs(input: &str, kind_flag: &str, name: &str) -> Vec<WorkItem> {
    let kind = WorkKind::from_flag(kind_flag);

    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut item = WorkItem::command(part);
            item.name = name.to_string();
            if is_url(part) {
                item.kind = kind;
            }
            item
        })
        .collect()
}
