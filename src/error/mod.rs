/// Error recovery system for document-ingestion workers
///
/// This module provides the recovery framework including:
/// - Error classification into a fixed type / category / severity taxonomy
/// - Strategy selection (retry, skip, fallback, escalate, manual)
/// - Exponential backoff with jitter
/// - Per-error-type circuit breakers
/// - Network, PDF and storage handlers
/// - A durable per-instance error log and manual-intervention ledger
///
/// # Architecture
///
/// The error recovery system is built in layers:
///
/// ```text
/// ┌─────────────────────────────────────────┐
/// │      Recovery Manager (Orchestration)   │
/// └────────────────┬────────────────────────┘
///                  │
///      ┌───────────┴───────────┐
///      ↓                       ↓
/// ┌──────────────┐      ┌──────────────┐
/// │Classification│      │  Error Log & │
/// │ Strategy,    │      │ Manual Ledger│
/// │ Breakers     │      └──────────────┘
/// └─────┬────────┘
///       │
///       ↓
/// ┌─────────────────────────────────────┐
/// │     Recovery Handlers               │
/// │  - Network (backoff, rate limits)   │
/// │  - PDF (validation, quarantine)     │
/// │  - Storage (cleanup, permissions)   │
/// └─────────────────────────────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,ignore
/// use ingest_sentinel::error::{ErrorContext, Failure, RecoveryManager};
/// use ingest_sentinel::SentinelConfig;
///
/// let manager = RecoveryManager::new(SentinelConfig::for_instance("worker-1", "/var/lib/sentinel"))?;
///
/// let failure = Failure::new("TimeoutError", "Read timed out");
/// let context = ErrorContext::new("worker-1", "download_paper")
///     .with_url("https://arxiv.org/pdf/2401.00001");
///
/// let error = manager.handle_error(&failure, context, None, None).await;
/// if error.is_resolved {
///     // re-run the download
/// }
///
/// // Periodically re-drive errors that still have attempts left
/// let report = manager.retry_failed_operations(50).await;
/// ```

pub mod classification;
pub mod error_log;
pub mod handlers;
pub mod recovery_manager;
pub mod retry;
pub mod strategy;
pub mod taxonomy;

// Re-export main types for convenience
pub use classification::{
    ErrorClassifier, ErrorContext, Failure, ProcessingError, ResolutionMethod,
};
pub use error_log::{ErrorLog, ManualIntervention, ManualLedger};
pub use handlers::{
    HandlerOutcome, NetworkHandler, PdfBackend, PdfHandler, QuarantineReason, QuarantineRecord,
    SpaceProbe, StorageHandler,
};
pub use recovery_manager::{
    ErrorHistorySource, ErrorStatistics, ErrorSummary, RecoveryManager, RecoveryReport,
};
pub use retry::{BreakerBoard, BreakerDecision, BreakerState, ExponentialBackoff};
pub use strategy::{RecoveryOutcome, RecoveryStrategy, StrategySelector};
pub use taxonomy::{ErrorCategory, ErrorType, Severity};
