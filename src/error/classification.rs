/// Error classification for recovery strategy selection
///
/// Workers hand the classifier an opaque [`Failure`] description plus an
/// [`ErrorContext`]. The classifier picks an [`ErrorType`] (explicit, or inferred
/// from ordered keyword rules over the failure's kind and message), derives the
/// category from the static table and produces a fresh [`ProcessingError`].
use super::taxonomy::{ErrorCategory, ErrorType, Severity};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

lazy_static! {
    /// 429 as an HTTP status, not as digits inside ids, ports or sizes
    static ref RATE_LIMIT_STATUS: Regex =
        Regex::new(r"\b(?:status|http|code|error|response)[\s:=_-]{0,3}429\b")
            .expect("rate-limit status pattern is valid");
}

/// Opaque description of a raised failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Kind/type name of the raised error (e.g. "TimeoutError", "PermissionDenied")
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Source chain or backtrace, when available
    pub stack_trace: Option<String>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Describe any error value; the kind is the short name of its Rust type
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let kind = type_name.rsplit("::").next().unwrap_or(type_name);

        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: kind.to_string(),
            message: err.to_string(),
            stack_trace: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\ncaused by: "))
            },
        }
    }

    /// Lowercased text the keyword rules are matched against
    fn haystack(&self) -> String {
        format!("{} {}", self.kind, self.message).to_lowercase()
    }
}

impl From<&std::io::Error> for Failure {
    fn from(err: &std::io::Error) -> Self {
        Self::new(format!("{:?}", err.kind()), err.to_string())
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::from(&err)
    }
}

impl From<&reqwest::Error> for Failure {
    fn from(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "TimeoutError"
        } else if err.is_connect() {
            "ConnectError"
        } else if err.is_status() {
            "HttpStatusError"
        } else if err.is_decode() {
            "DecodeError"
        } else {
            "RequestError"
        };

        let message = match err.status() {
            Some(status) => format!("HTTP status {}: {}", status.as_u16(), err),
            None => err.to_string(),
        };

        Self::new(kind, message)
    }
}

/// Where and during what operation a failure happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Worker instance name
    pub instance: String,

    /// Operation name (e.g., "download_paper", "extract_text", "store_chunks")
    pub operation: String,

    pub file_path: Option<PathBuf>,

    pub item_id: Option<String>,

    pub url: Option<String>,

    /// Additional free-form data
    pub extra: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(instance: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            operation: operation.into(),
            file_path: None,
            item_id: None,
            url: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Host part of the URL, if any
    pub fn domain(&self) -> Option<String> {
        self.url
            .as_deref()
            .and_then(|url| reqwest::Url::parse(url).ok())
            .and_then(|url| url.host_str().map(|h| h.to_string()))
    }
}

/// How an error was finally disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Mitigation succeeded; the caller should re-run the operation
    Retry,

    /// Accepted loss: the item is dropped on purpose
    Skip,

    /// Work was rerouted to an alternate path
    Fallback,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Retry => "retry",
            ResolutionMethod::Skip => "skip",
            ResolutionMethod::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure and its recovery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub instance: String,
    pub error_type: ErrorType,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,

    /// Kind of the original failure
    pub original_exception: String,
    pub stack_trace: Option<String>,
    pub context: ErrorContext,

    pub is_recoverable: bool,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    pub last_recovery_attempt: Option<DateTime<Utc>>,

    pub is_resolved: bool,
    pub resolution_method: Option<ResolutionMethod>,
    pub resolved_at: Option<DateTime<Utc>>,

    /// Extra resolution information (quarantine path, fallback route, reason)
    pub resolution_detail: Option<String>,
}

impl ProcessingError {
    /// Whether another recovery attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.is_recoverable
            && self.recovery_attempts < self.max_recovery_attempts
            && !self.is_resolved
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_recovery_attempts
            .saturating_sub(self.recovery_attempts)
    }

    /// Record the start of a recovery attempt
    pub(crate) fn begin_attempt(&mut self) {
        self.recovery_attempts = (self.recovery_attempts + 1).min(self.max_recovery_attempts);
        self.last_recovery_attempt = Some(Utc::now());
    }

    pub(crate) fn mark_resolved(&mut self, method: ResolutionMethod, detail: Option<String>) {
        if self.is_resolved {
            return;
        }
        self.is_resolved = true;
        self.resolution_method = Some(method);
        self.resolved_at = Some(Utc::now());
        if detail.is_some() {
            self.resolution_detail = detail;
        }
    }

    pub(crate) fn mark_unrecoverable(&mut self, reason: impl Into<String>) {
        self.is_recoverable = false;
        self.resolution_detail = Some(reason.into());
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} error in {} on {}: {} (attempt {}/{})",
            self.severity,
            self.error_type,
            self.context.operation,
            self.instance,
            self.message,
            self.recovery_attempts,
            self.max_recovery_attempts
        )
    }
}

/// Error classifier - determines error type, category and severity
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_recovery_attempts: u32,
}

impl ErrorClassifier {
    pub fn new(max_recovery_attempts: u32) -> Self {
        Self {
            max_recovery_attempts,
        }
    }

    /// Classify a failure into a new [`ProcessingError`]
    pub fn classify(
        &self,
        failure: &Failure,
        context: ErrorContext,
        explicit_type: Option<ErrorType>,
        explicit_severity: Option<Severity>,
    ) -> ProcessingError {
        let error_type = explicit_type.unwrap_or_else(|| Self::infer_type(failure));
        let severity = explicit_severity.unwrap_or_else(|| error_type.default_severity());

        ProcessingError {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            instance: context.instance.clone(),
            error_type,
            category: error_type.category(),
            severity,
            message: failure.message.clone(),
            original_exception: failure.kind.clone(),
            stack_trace: failure.stack_trace.clone(),
            context,
            is_recoverable: error_type.recoverable_by_default(),
            recovery_attempts: 0,
            max_recovery_attempts: self.max_recovery_attempts,
            last_recovery_attempt: None,
            is_resolved: false,
            resolution_method: None,
            resolved_at: None,
            resolution_detail: None,
        }
    }

    /// Infer the error type from ordered keyword rules
    pub fn infer_type(failure: &Failure) -> ErrorType {
        let text = failure.haystack();
        let kind = failure.kind.to_lowercase();

        // Network failures come first: their messages often mention files or URLs
        if contains_any(&text, &["rate limit", "ratelimit", "too many requests"])
            || RATE_LIMIT_STATUS.is_match(&text)
        {
            return ErrorType::RateLimitExceeded;
        }
        if contains_any(&text, &["timeout", "timed out", "timedout", "deadline exceeded"]) {
            return ErrorType::ConnectionTimeout;
        }
        if contains_any(&text, &["connection refused", "connectionrefused", "refused"]) {
            return ErrorType::ConnectionRefused;
        }
        if contains_any(
            &text,
            &[
                "dns",
                "name resolution",
                "failed to lookup address",
                "nodename nor servname",
                "name or service not known",
            ],
        ) {
            return ErrorType::DnsResolutionFailed;
        }
        if contains_any(&text, &["token expired", "expired token", "jwt expired"]) {
            return ErrorType::TokenExpired;
        }
        if contains_any(
            &text,
            &["unauthorized", "authentication", "forbidden", "invalid api key"],
        ) {
            return ErrorType::AuthenticationFailed;
        }
        if kind.contains("http")
            || contains_any(
                &text,
                &[
                    "http error",
                    "http status",
                    "status code",
                    "bad gateway",
                    "service unavailable",
                    "internal server error",
                ],
            )
        {
            return ErrorType::HttpError;
        }
        if contains_any(
            &text,
            &[
                "connection reset",
                "connectionreset",
                "reset by peer",
                "connection aborted",
                "connecterror",
                "network",
                "unreachable",
                "broken pipe",
            ],
        ) {
            return ErrorType::NetworkUnreachable;
        }

        // PDF processing
        if contains_any(&text, &["pdf", "xref", "eof marker"]) {
            if contains_any(&text, &["encrypt", "password", "decrypt"]) {
                return ErrorType::PdfEncrypted;
            }
            if contains_any(
                &text,
                &["corrupt", "damaged", "malformed", "invalid header", "eof marker", "empty"],
            ) {
                return ErrorType::PdfCorrupt;
            }
            if contains_any(&text, &["extract", "no text"]) {
                return ErrorType::PdfTextExtractionFailed;
            }
            return ErrorType::PdfParseFailed;
        }

        if contains_any(
            &text,
            &["out of memory", "memoryerror", "memory error", "cannot allocate", "oom killed"],
        ) {
            return ErrorType::MemoryError;
        }

        // Storage
        if contains_any(
            &text,
            &["no space left", "disk full", "storagefull", "quota exceeded", "enospc"],
        ) {
            return ErrorType::DiskFull;
        }
        if contains_any(
            &text,
            &[
                "permission denied",
                "permissiondenied",
                "access denied",
                "operation not permitted",
                "eacces",
            ],
        ) {
            return ErrorType::PermissionDenied;
        }
        if contains_any(
            &text,
            &["no such file", "not found", "notfound", "filenotfound", "enoent"],
        ) {
            return ErrorType::FileNotFound;
        }
        if contains_any(&text, &["i/o error", "io error", "ioerror", "input/output error"]) {
            return ErrorType::IoError;
        }

        // Vector store
        if contains_any(&text, &["embedding"]) {
            return ErrorType::EmbeddingFailed;
        }
        if contains_any(&text, &["vector", "qdrant", "chroma", "pinecone", "weaviate"]) {
            if contains_any(&text, &["corrupt"]) {
                return ErrorType::IndexCorrupted;
            }
            return ErrorType::VectorStoreUnavailable;
        }

        if contains_any(&text, &["config", "setting", "environment variable"]) {
            if contains_any(&text, &["missing", "not set", "undefined"]) {
                return ErrorType::ConfigMissing;
            }
            return ErrorType::ConfigInvalid;
        }

        if contains_any(&text, &["validation", "invalid value", "schema", "valueerror"]) {
            return ErrorType::ValidationFailed;
        }

        if contains_any(&text, &["crash", "segfault", "panicked", "killed"]) {
            return ErrorType::ProcessCrashed;
        }
        if contains_any(&text, &["resource exhausted", "too many open files"]) {
            return ErrorType::ResourceExhausted;
        }

        ErrorType::Unknown
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}
