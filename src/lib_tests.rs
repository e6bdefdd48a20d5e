// Tests for lib.rs error types and crate-level re-exports
//
// Tests cover: SentinelError display strings, From conversions, and the
// re-exported entry points.

use super::*;

// ==================== ERROR DISPLAY TESTS ====================

#[test]
fn test_http_status_display() {
    let err = SentinelError::HttpStatus {
        url: "https://arxiv.org/pdf/1234".to_string(),
        status: 503,
    };
    assert_eq!(
        err.to_string(),
        "HTTP request to https://arxiv.org/pdf/1234 failed with status 503"
    );
}

#[test]
fn test_retries_exhausted_display() {
    let err = SentinelError::RetriesExhausted {
        url: "https://example.org/paper.pdf".to_string(),
        attempts: 3,
        last_error: "connection reset".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("after 3 attempts"));
    assert!(msg.contains("connection reset"));
}

#[test]
fn test_insufficient_space_display() {
    let err = SentinelError::InsufficientSpace {
        path: "/data".to_string(),
        available: 1024,
        required: 4096,
    };
    assert_eq!(
        err.to_string(),
        "Insufficient disk space on /data: 1024 bytes available, 4096 required"
    );
}

#[test]
fn test_quarantine_and_action_display() {
    let quarantine = SentinelError::Quarantine {
        path: "/tmp/a.pdf".to_string(),
        reason: "rename failed".to_string(),
    };
    assert!(quarantine.to_string().starts_with("Quarantine failed for /tmp/a.pdf"));

    let action = SentinelError::ActionFailed {
        action: "cleanup_disk".to_string(),
        reason: "nothing to remove".to_string(),
    };
    assert_eq!(
        action.to_string(),
        "Prevention action cleanup_disk failed: nothing to remove"
    );
}

// ==================== CONVERSION TESTS ====================

#[test]
fn test_io_error_converts() {
    fn fails() -> SentinelResult<Vec<u8>> {
        Ok(std::fs::read("/definitely/not/a/real/path/errors.json")?)
    }
    let err = fails().unwrap_err();
    assert!(matches!(err, SentinelError::Io(_)));
    assert!(err.to_string().starts_with("I/O error"));
}

#[test]
fn test_serde_error_converts() {
    fn fails() -> SentinelResult<serde_json::Value> {
        Ok(serde_json::from_str("{not json")?)
    }
    assert!(matches!(fails().unwrap_err(), SentinelError::Serialization(_)));
}

#[test]
fn test_rusqlite_error_converts() {
    let err: SentinelError = rusqlite::Error::InvalidQuery.into();
    assert!(matches!(err, SentinelError::Persistence(_)));
}

// ==================== RE-EXPORT TESTS ====================

#[test]
fn test_reexported_entry_points() {
    let config = SentinelConfig::default();
    assert!(!config.instance.is_empty());

    let failure = Failure::new("TimeoutError", "timed out");
    let context = ErrorContext::new(config.instance.clone(), "download_paper");
    let error = error::ErrorClassifier::default().classify(&failure, context, None, None);
    assert_eq!(error.error_type, ErrorType::ConnectionTimeout);
    assert_eq!(error.category, ErrorCategory::Network);
    assert_eq!(error.severity, Severity::Medium);
}
