// src/types.rs
//! Value types flowing through ingestion: severity, message payload,
//! request context and the raw event handed in by capture points.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Severity classification of a captured error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Parse,
    Notice,
    CoreError,
    CoreWarning,
    CompileError,
    CompileWarning,
    UserError,
    UserWarning,
    RecoverableError,
    UserNotice,
    Deprecated,
    UserDeprecated,
    Improvement,
    Exception,
    Fatal,
    Other(String),
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Parse => "parse",
            Severity::Notice => "notice",
            Severity::CoreError => "core_error",
            Severity::CoreWarning => "core_warning",
            Severity::CompileError => "compile_error",
            Severity::CompileWarning => "compile_warning",
            Severity::UserError => "user_error",
            Severity::UserWarning => "user_warning",
            Severity::RecoverableError => "recoverable_error",
            Severity::UserNotice => "user_notice",
            Severity::Deprecated => "deprecated",
            Severity::UserDeprecated => "user_deprecated",
            Severity::Improvement => "improvement",
            Severity::Exception => "exception",
            Severity::Fatal => "fatal",
            Severity::Other(s) => s.as_str(),
        }
    }

    /// Severities that alert instantly instead of waiting for the digest.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Severity::Error
                | Severity::Parse
                | Severity::CoreError
                | Severity::CompileError
                | Severity::UserError
                | Severity::Exception
                | Severity::Fatal
        )
    }
}

impl FromStr for Severity {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "parse" => Severity::Parse,
            "notice" => Severity::Notice,
            "core_error" => Severity::CoreError,
            "core_warning" => Severity::CoreWarning,
            "compile_error" => Severity::CompileError,
            "compile_warning" => Severity::CompileWarning,
            "user_error" => Severity::UserError,
            "user_warning" => Severity::UserWarning,
            "recoverable_error" => Severity::RecoverableError,
            "user_notice" => Severity::UserNotice,
            "deprecated" => Severity::Deprecated,
            "user_deprecated" => Severity::UserDeprecated,
            "improvement" => Severity::Improvement,
            "exception" => Severity::Exception,
            "fatal" => Severity::Fatal,
            _ => Severity::Other(normalized),
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(Severity::Error))
    }
}

/// The logical message of an error: plain text or a structured value.
///
/// Deserialization goes through `From<Value>`, so JSON scalars arrive as
/// text just like they come back out of the cipher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

impl Payload {
    /// Canonical text form. Used both as fingerprint input and as the
    /// plaintext handed to the cipher.
    pub fn canonical(&self) -> String {
        match self {
            Payload::Text(s) => s.clone(),
            // serde_json::Map is ordered by key, so this is stable
            Payload::Structured(v) => serde_json::to_string(v).unwrap_or_else(|_| v.to_string()),
        }
    }

    /// Interpret decrypted or stored plaintext. Only JSON objects and arrays
    /// count as structured; everything else stays text.
    pub fn from_plaintext(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => Payload::Structured(v),
            _ => Payload::Text(text.to_string()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::Object(_) | Value::Array(_) => Payload::Structured(v),
            Value::String(s) => Payload::Text(s),
            other => Payload::Text(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Payload::from)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Snapshot of the request that triggered an error. Captured on first insert
/// only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor_id: Option<i64>,
    pub request_uri: Option<String>,
    pub request_method: Option<String>,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
}

impl RequestContext {
    /// Build a context from lower-cased request headers plus the peer
    /// address. `client-ip` wins over `x-forwarded-for`, which wins over the
    /// socket address.
    pub fn from_headers(
        method: &str,
        uri: &str,
        headers: &HashMap<String, String>,
        remote_addr: Option<&str>,
    ) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let client_ip = header("client-ip")
            .or_else(|| {
                header("x-forwarded-for")
                    .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
                    .filter(|v| !v.is_empty())
            })
            .or_else(|| remote_addr.map(str::to_string));

        Self {
            actor_id: None,
            request_uri: Some(uri.to_string()).filter(|s| !s.is_empty()),
            request_method: Some(method.to_ascii_uppercase()).filter(|s| !s.is_empty()),
            user_agent: header("user-agent"),
            client_ip,
        }
    }

    pub fn with_actor(mut self, actor_id: i64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == RequestContext::default()
    }
}

/// A raw error event as delivered by a capture point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub message: Payload,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    /// Precomputed fingerprint carried from an earlier layer; wins over
    /// recomputation.
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

impl RawEvent {
    pub fn new(message: impl Into<Payload>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            file: None,
            line: None,
            fingerprint: None,
            context: None,
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }
}
