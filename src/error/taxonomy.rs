/// Failure taxonomy: severities, categories and fine-grained error types
///
/// Every [`ErrorType`] belongs to exactly one [`ErrorCategory`]. The mapping is a
/// static `match`, so it cannot drift at runtime and the classifier never has to
/// guess a category independently of the type it picked.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How badly a failure affects the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .iter()
            .copied()
            .find(|sev| sev.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown severity: {}", s))
    }
}

/// Coarse failure category; selects the specialized handler and default strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    PdfProcessing,
    Storage,
    VectorStore,
    Configuration,
    Authentication,
    Validation,
    System,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Network,
        ErrorCategory::PdfProcessing,
        ErrorCategory::Storage,
        ErrorCategory::VectorStore,
        ErrorCategory::Configuration,
        ErrorCategory::Authentication,
        ErrorCategory::Validation,
        ErrorCategory::System,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::PdfProcessing => "pdf_processing",
            ErrorCategory::Storage => "storage",
            ErrorCategory::VectorStore => "vector_store",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::System => "system",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ErrorCategory::ALL
            .iter()
            .copied()
            .find(|cat| cat.as_str() == wanted)
            .ok_or_else(|| format!("unknown error category: {}", s))
    }
}

/// Fine-grained failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    // Network
    ConnectionTimeout,
    ConnectionRefused,
    DnsResolutionFailed,
    HttpError,
    RateLimitExceeded,
    NetworkUnreachable,

    // PDF processing
    PdfCorrupt,
    PdfEncrypted,
    PdfParseFailed,
    PdfTextExtractionFailed,

    // Storage
    DiskFull,
    PermissionDenied,
    FileNotFound,
    IoError,

    // Vector store
    VectorStoreUnavailable,
    EmbeddingFailed,
    IndexCorrupted,

    // Configuration
    ConfigMissing,
    ConfigInvalid,

    // Authentication
    AuthenticationFailed,
    TokenExpired,

    // Validation
    ValidationFailed,

    // System
    MemoryError,
    ProcessCrashed,
    ResourceExhausted,

    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 26] = [
        ErrorType::ConnectionTimeout,
        ErrorType::ConnectionRefused,
        ErrorType::DnsResolutionFailed,
        ErrorType::HttpError,
        ErrorType::RateLimitExceeded,
        ErrorType::NetworkUnreachable,
        ErrorType::PdfCorrupt,
        ErrorType::PdfEncrypted,
        ErrorType::PdfParseFailed,
        ErrorType::PdfTextExtractionFailed,
        ErrorType::DiskFull,
        ErrorType::PermissionDenied,
        ErrorType::FileNotFound,
        ErrorType::IoError,
        ErrorType::VectorStoreUnavailable,
        ErrorType::EmbeddingFailed,
        ErrorType::IndexCorrupted,
        ErrorType::ConfigMissing,
        ErrorType::ConfigInvalid,
        ErrorType::AuthenticationFailed,
        ErrorType::TokenExpired,
        ErrorType::ValidationFailed,
        ErrorType::MemoryError,
        ErrorType::ProcessCrashed,
        ErrorType::ResourceExhausted,
        ErrorType::Unknown,
    ];

    /// The one category this type belongs to
    pub fn category(&self) -> ErrorCategory {
        use ErrorType::*;
        match self {
            ConnectionTimeout | ConnectionRefused | DnsResolutionFailed | HttpError
            | RateLimitExceeded | NetworkUnreachable => ErrorCategory::Network,
            PdfCorrupt | PdfEncrypted | PdfParseFailed | PdfTextExtractionFailed => {
                ErrorCategory::PdfProcessing
            }
            DiskFull | PermissionDenied | FileNotFound | IoError => ErrorCategory::Storage,
            VectorStoreUnavailable | EmbeddingFailed | IndexCorrupted => {
                ErrorCategory::VectorStore
            }
            ConfigMissing | ConfigInvalid => ErrorCategory::Configuration,
            AuthenticationFailed | TokenExpired => ErrorCategory::Authentication,
            ValidationFailed => ErrorCategory::Validation,
            MemoryError | ProcessCrashed | ResourceExhausted => ErrorCategory::System,
            Unknown => ErrorCategory::Unknown,
        }
    }

    /// Severity assigned when the caller does not pass one explicitly
    pub fn default_severity(&self) -> Severity {
        use ErrorType::*;
        match self {
            DiskFull | MemoryError | IndexCorrupted | ConfigMissing => Severity::Critical,
            PermissionDenied | ConfigInvalid | AuthenticationFailed | ProcessCrashed
            | ResourceExhausted | VectorStoreUnavailable => Severity::High,
            RateLimitExceeded | ValidationFailed => Severity::Low,
            _ => Severity::Medium,
        }
    }

    /// Whether an error of this type starts out eligible for recovery attempts
    pub fn recoverable_by_default(&self) -> bool {
        !matches!(
            self,
            ErrorType::ConfigMissing
                | ErrorType::ConfigInvalid
                | ErrorType::AuthenticationFailed
                | ErrorType::ValidationFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        use ErrorType::*;
        match self {
            ConnectionTimeout => "connection_timeout",
            ConnectionRefused => "connection_refused",
            DnsResolutionFailed => "dns_resolution_failed",
            HttpError => "http_error",
            RateLimitExceeded => "rate_limit_exceeded",
            NetworkUnreachable => "network_unreachable",
            PdfCorrupt => "pdf_corrupt",
            PdfEncrypted => "pdf_encrypted",
            PdfParseFailed => "pdf_parse_failed",
            PdfTextExtractionFailed => "pdf_text_extraction_failed",
            DiskFull => "disk_full",
            PermissionDenied => "permission_denied",
            FileNotFound => "file_not_found",
            IoError => "io_error",
            VectorStoreUnavailable => "vector_store_unavailable",
            EmbeddingFailed => "embedding_failed",
            IndexCorrupted => "index_corrupted",
            ConfigMissing => "config_missing",
            ConfigInvalid => "config_invalid",
            AuthenticationFailed => "authentication_failed",
            TokenExpired => "token_expired",
            ValidationFailed => "validation_failed",
            MemoryError => "memory_error",
            ProcessCrashed => "process_crashed",
            ResourceExhausted => "resource_exhausted",
            Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ErrorType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == wanted)
            .ok_or_else(|| format!("unknown error type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_round_trips_through_its_name() {
        for ty in ErrorType::ALL {
            assert_eq!(ty.as_str().parse::<ErrorType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_every_category_is_reachable() {
        for category in ErrorCategory::ALL {
            assert!(
                ErrorType::ALL.iter().any(|ty| ty.category() == category),
                "no type maps to {}",
                category
            );
        }
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&ErrorType::PdfTextExtractionFailed).unwrap();
        assert_eq!(json, "\"pdf_text_extraction_failed\"");
        let json = serde_json::to_string(&ErrorCategory::VectorStore).unwrap();
        assert_eq!(json, "\"vector_store\"");
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(ErrorType::DiskFull.default_severity(), Severity::Critical);
        assert_eq!(ErrorType::ConnectionTimeout.default_severity(), Severity::Medium);
        assert_eq!(ErrorType::RateLimitExceeded.default_severity(), Severity::Low);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_configuration_errors_start_unrecoverable() {
        assert!(!ErrorType::ConfigMissing.recoverable_by_default());
        assert!(ErrorType::DiskFull.recoverable_by_default());
    }

    #[test]
    fn test_parse_rejects_unknown_names() {
        assert!("not_a_type".parse::<ErrorType>().is_err());
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
    }
}
