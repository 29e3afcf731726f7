//! Result Formatting
//!
//! Renders collected records into the configured response shape. The json
//! form is an array of flat string maps (with the process-wide subject and
//! hostname stamped in); the plain form concatenates raw contents with
//! separator rules.

use crate::config::{ContentEncoding, Context};
use crate::pipeline::types::ResultRecord;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{Map, Value};

const PLAIN_SEPARATOR: &str = "=============================================================";

/// Renders records as the json response payload: one flat string map per
/// record, with subject (when set) and hostname stamped in.
pub fn render_json(ctx: &Context, records: &[ResultRecord]) -> Vec<Map<String, Value>> {
    records
        .iter()
        .map(|record| {
            let mut entry = Map::new();
            if !ctx.subject.is_empty() {
                entry.insert("subject".to_string(), Value::String(ctx.subject.clone()));
            }
            entry.insert("hostname".to_string(), Value::String(ctx.hostname.clone()));
            entry.insert("input".to_string(), Value::String(record.input.clone()));
            entry.insert("name".to_string(), Value::String(record.name.clone()));
            entry.insert(
                "errorCode".to_string(),
                Value::String(record.error_code.clone()),
            );
            entry.insert(
                "result".to_string(),
                Value::String(encode_content(ctx.encoding, &record.content)),
            );
            entry.insert("ts".to_string(), Value::String(record.ts.clone()));
            entry
        })
        .collect()
}

/// Plain format: each content block framed by a separator rule.
pub fn render_plain(records: &[ResultRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push('\n');
        out.push_str(&record.content);
        out.push('\n');
        out.push_str(PLAIN_SEPARATOR);
        out.push('\n');
    }
    out
}

/// Applies the configured base64 encoding to result content.
pub fn encode_content(encoding: ContentEncoding, content: &str) -> String {
    match encoding {
        ContentEncoding::Raw => content.to_string(),
        ContentEncoding::Std => STANDARD.encode(content),
        ContentEncoding::Url => URL_SAFE.encode(content),
    }
}
