use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `errorCode` value reported when the probe ran and the expectation passed.
pub const ERROR_CODE_SUCCESS: &str = "0";
/// `errorCode` value reported for probe failures and expectation mismatches.
pub const ERROR_CODE_FAILURE: &str = "-1";

/// How a [`WorkItem`] input is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum WorkKind {
    /// Shell command line, tokenized and run as a child process.
    #[default]
    #[serde(rename = "cmd")]
    Command,
    /// HTTP GET against an absolute URL.
    #[serde(rename = "get")]
    HttpGet,
    /// HTTP POST with an empty body.
    #[serde(rename = "post")]
    HttpPost,
}

impl<'de> Deserialize<'de> for WorkKind {
    /// `cmd` and `post` are explicit; every other value falls back to GET,
    /// matching the historical request-type handling.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "cmd" => WorkKind::Command,
            "post" => WorkKind::HttpPost,
            _ => WorkKind::HttpGet,
        })
    }
}

impl WorkKind {
    /// Maps a request-type flag (`-t`) to a kind. Anything that is not
    /// `get` or `post` falls back to `cmd`.
    pub fn from_flag(s: &str) -> Self {
        match s {
            "get" => WorkKind::HttpGet,
            "post" => WorkKind::HttpPost,
            _ => WorkKind::Command,
        }
    }
}

/// Per-item timeout as carried on the wire.
///
/// `0` means "use the pool default", a positive value is a hard per-item
/// wall clock, and `-1` disables the timeout entirely. The process-killing
/// side effect the original attached to `-1` lives on [`BatchPolicy`], not
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemTimeout {
    #[default]
    PoolDefault,
    Secs(u64),
    Unbounded,
}

impl ItemTimeout {
    /// Resolves the effective wall clock for a probe. `None` means no limit.
    pub fn duration(self, default_secs: u64) -> Option<std::time::Duration> {
        match self {
            ItemTimeout::PoolDefault => Some(std::time::Duration::from_secs(default_secs)),
            ItemTimeout::Secs(s) => Some(std::time::Duration::from_secs(s)),
            ItemTimeout::Unbounded => None,
        }
    }

    pub fn wire_value(self) -> i64 {
        match self {
            ItemTimeout::PoolDefault => 0,
            ItemTimeout::Secs(s) => s as i64,
            ItemTimeout::Unbounded => -1,
        }
    }

    pub fn from_wire(v: i64) -> Self {
        if v < 0 {
            ItemTimeout::Unbounded
        } else if v == 0 {
            ItemTimeout::PoolDefault
        } else {
            ItemTimeout::Secs(v as u64)
        }
    }
}

impl Serialize for ItemTimeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.wire_value())
    }
}

struct ItemTimeoutVisitor;

impl<'de> Visitor<'de> for ItemTimeoutVisitor {
    type Value = ItemTimeout;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("an integer timeout or a decimal string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ItemTimeout, E> {
        Ok(ItemTimeout::from_wire(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ItemTimeout, E> {
        Ok(ItemTimeout::from_wire(v as i64))
    }

    // Request params carry timeouts as decimal strings ("30"); unparsable
    // values collapse to the pool default just like the original conversion.
    fn visit_str<E: de::Error>(self, v: &str) -> Result<ItemTimeout, E> {
        Ok(ItemTimeout::from_wire(v.trim().parse().unwrap_or(0)))
    }
}

impl<'de> Deserialize<'de> for ItemTimeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ItemTimeoutVisitor)
    }
}

/// Serde adapter for the `receivers` wire field, which is a comma-separated
/// string rather than a JSON array.
mod comma_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&list.join(","))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// One unit of work: a shell command or an HTTP request plus the metadata
/// that drives validation and failure handling.
///
/// Empty `expect` / `exec` strings mean "absent"; the wire format never
/// distinguishes the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub input: String,
    #[serde(rename = "type", default)]
    pub kind: WorkKind,
    #[serde(default)]
    pub name: String,
    /// Expectation expression evaluated against the probe output (§ expect).
    #[serde(default)]
    pub expect: String,
    /// Shell command executed when the expectation fails.
    #[serde(rename = "exec", default)]
    pub remediation: String,
    /// Receiver names notified when the expectation fails.
    #[serde(rename = "receivers", default, with = "comma_list")]
    pub notify: Vec<String>,
    #[serde(default)]
    pub timeout: ItemTimeout,
}

impl WorkItem {
    pub fn command(input: impl Into<String>) -> Self {
        WorkItem {
            input: input.into(),
            kind: WorkKind::Command,
            name: String::new(),
            expect: String::new(),
            remediation: String::new(),
            notify: Vec::new(),
            timeout: ItemTimeout::PoolDefault,
        }
    }

    /// The deduplication fingerprint. The engine memoizes on the raw input
    /// string; two items with identical inputs execute at most once per batch.
    pub fn fingerprint(&self) -> &str {
        &self.input
    }
}

/// One result per submitted [`WorkItem`], in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub input: String,
    pub name: String,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "result")]
    pub content: String,
    /// ISO-8601 UTC with millisecond precision.
    pub ts: String,
}

impl ResultRecord {
    pub fn is_failure(&self) -> bool {
        self.error_code == ERROR_CODE_FAILURE
    }
}

/// Memoized probe outcome kept by the per-batch deduplicator.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub content: String,
    /// `None` means the probe succeeded and the expectation passed.
    pub error: Option<String>,
}

/// Batch-level effects derived from the items at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Terminate the whole process with a nonzero status as soon as any item
    /// fails. Set by the `-1` wire timeout (daemon self-destruct).
    pub exit_on_failure: bool,
}

/// An ordered collection of work items processed together. Result index `i`
/// always corresponds to submission index `i`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub items: Vec<WorkItem>,
    pub policy: BatchPolicy,
}

impl Batch {
    pub fn new(items: Vec<WorkItem>) -> Self {
        let exit_on_failure = items
            .iter()
            .any(|item| item.timeout == ItemTimeout::Unbounded);
        Batch {
            items,
            policy: BatchPolicy { exit_on_failure },
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
