//! Configuration & Runtime Context
//!
//! The YAML configuration file mirrors the deployed key layout
//! (`worker.*`, `webserver.*`, `response.*`, `request.*`, `log.*`); unknown
//! keys are ignored and missing keys take the documented defaults. Wire
//! values stay as strings here; [`Context::new`] resolves them into the
//! typed, read-only value threaded through the rest of the engine.

use crate::notify::Notifier;
use crate::probe;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_WORKER_NUM: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_HTTP_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: &str = "3000";
pub const DEFAULT_FORMAT: &str = "json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub webserver: WebServerConfig,
    pub response: ResponseConfig,
    pub request: RequestConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub number: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    pub enable: bool,
    pub host: String,
    pub port: String,
    /// `"basic-auth"` switches on the credentials-file HTTP auth layer.
    pub auth: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// `json` (default) or `plain`.
    pub format: String,
    pub encoding: EncodingConfig,
    pub es: EsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// `""` (no encoding), `std`, or `url`.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EsSection {
    pub host: String,
    pub id: String,
    pub password: String,
    pub index_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub subject: String,
    pub timeout: u64,
    /// One-shot batch descriptor, same JSON shape the HTTP surface accepts.
    pub input: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Probes target internal endpoints with self-signed certificates, so
    /// verification is off unless explicitly enabled.
    pub insecure_tls: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { insecure_tls: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Config {
    /// Loads and normalizes a YAML configuration file.
    pub fn load(path: &str) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let mut config: Config =
            serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path))?;
        config.apply_defaults();
        Ok(config)
    }

    pub fn apply_defaults(&mut self) {
        if self.worker.number == 0 {
            self.worker.number = DEFAULT_WORKER_NUM;
        }
        if self.webserver.host.is_empty() {
            self.webserver.host = DEFAULT_HTTP_HOST.to_string();
        }
        if self.webserver.port.is_empty() {
            self.webserver.port = DEFAULT_HTTP_PORT.to_string();
        }
        if self.response.format.is_empty() {
            self.response.format = DEFAULT_FORMAT.to_string();
        }
        if self.request.timeout == 0 {
            self.request.timeout = DEFAULT_TIMEOUT_SECS;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Plain,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "plain" => OutputFormat::Plain,
            _ => OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Raw,
    Std,
    Url,
}

impl ContentEncoding {
    pub fn from_str(s: &str) -> Self {
        match s {
            "std" => ContentEncoding::Std,
            "url" => ContentEncoding::Url,
            _ => ContentEncoding::Raw,
        }
    }
}

/// Elasticsearch sink coordinates; present only when a host is configured.
#[derive(Debug, Clone)]
pub struct EsConfig {
    pub host: String,
    pub id: String,
    pub password: String,
    pub index_name: String,
}

/// The resolved, read-only runtime context.
///
/// Built once at startup from the configuration and threaded explicitly
/// through the orchestrator, the request surface, and the distributed loops.
pub struct Context {
    pub worker_num: usize,
    pub default_timeout_secs: u64,
    pub subject: String,
    /// Replica identity; also echoed into json-format results.
    pub hostname: String,
    pub format: OutputFormat,
    pub encoding: ContentEncoding,
    pub es: Option<EsConfig>,
    pub http_client: reqwest::Client,
    pub notifier: Arc<dyn Notifier>,
}

impl Context {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Arc<Context>> {
        let http_client = probe::http::build_client(config.http.insecure_tls)
            .context("failed to build HTTP client")?;

        let es = if config.response.es.host.is_empty() {
            None
        } else {
            Some(EsConfig {
                host: config.response.es.host.clone(),
                id: config.response.es.id.clone(),
                password: config.response.es.password.clone(),
                index_name: config.response.es.index_name.clone(),
            })
        };

        Ok(Arc::new(Context {
            worker_num: if config.worker.number == 0 {
                DEFAULT_WORKER_NUM
            } else {
                config.worker.number
            },
            default_timeout_secs: if config.request.timeout == 0 {
                DEFAULT_TIMEOUT_SECS
            } else {
                config.request.timeout
            },
            subject: config.request.subject.clone(),
            hostname: replica_identity(),
            format: OutputFormat::from_str(&config.response.format),
            encoding: ContentEncoding::from_str(&config.response.encoding.kind),
            es,
            http_client,
            notifier,
        }))
    }
}

/// The replica identity used for results, the lease, and claim assignment.
/// Kubernetes sets `HOSTNAME` on every pod; the fallback matches the
/// historical standalone default.
pub fn replica_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "mcall-pod".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;

    #[test]
    fn test_defaults_fill_missing_values() {
        let mut config = Config::default();
        config.apply_defaults();

        assert_eq!(config.worker.number, DEFAULT_WORKER_NUM);
        assert_eq!(config.webserver.host, "localhost");
        assert_eq!(config.webserver.port, "3000");
        assert_eq!(config.response.format, "json");
        assert_eq!(config.request.timeout, DEFAULT_TIMEOUT_SECS);
        assert!(config.http.insecure_tls);
    }

    #[test]
    fn test_yaml_parsing_ignores_unknown_keys() {
        let raw = r#"
worker:
  number: 4
webserver:
  enable: true
  port: "8080"
response:
  format: plain
  encoding:
    type: std
  es:
    host: https://es.internal:9200
    index_name: mcall_data
request:
  subject: uptime
  timeout: 3
some_future_section:
  whatever: true
"#;
        let mut config: Config = serde_yaml::from_str(raw).expect("parse failed");
        config.apply_defaults();

        assert_eq!(config.worker.number, 4);
        assert!(config.webserver.enable);
        assert_eq!(config.webserver.port, "8080");
        assert_eq!(config.response.format, "plain");
        assert_eq!(config.response.encoding.kind, "std");
        assert_eq!(config.response.es.index_name, "mcall_data");
        assert_eq!(config.request.subject, "uptime");
        assert_eq!(config.request.timeout, 3);
    }

    #[test]
    fn test_context_resolves_typed_values() {
        let raw = r#"
response:
  format: plain
  encoding:
    type: url
"#;
        let mut config: Config = serde_yaml::from_str(raw).unwrap();
        config.apply_defaults();

        let ctx = Context::new(&config, Arc::new(LogNotifier)).unwrap();
        assert_eq!(ctx.format, OutputFormat::Plain);
        assert_eq!(ctx.encoding, ContentEncoding::Url);
        assert_eq!(ctx.worker_num, DEFAULT_WORKER_NUM);
        assert!(ctx.es.is_none());
    }
}
