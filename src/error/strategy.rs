/// Recovery strategy selection and typed outcomes
use super::classification::{ProcessingError, ResolutionMethod};
use super::taxonomy::{ErrorCategory, ErrorType, Severity};
use crate::settings::RecoveryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// What the recovery manager does with a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Back off, then let the category handler mitigate
    Retry,

    /// Accept the loss and move on
    Skip,

    /// Reroute to an alternate path
    Fallback,

    /// Notify a human and give up
    Escalate,

    /// Record for manual intervention and give up
    Manual,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Skip => "skip",
            RecoveryStrategy::Fallback => "fallback",
            RecoveryStrategy::Escalate => "escalate",
            RecoveryStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(RecoveryStrategy::Retry),
            "skip" => Ok(RecoveryStrategy::Skip),
            "fallback" => Ok(RecoveryStrategy::Fallback),
            "escalate" => Ok(RecoveryStrategy::Escalate),
            "manual" => Ok(RecoveryStrategy::Manual),
            other => Err(format!("unknown recovery strategy: {}", other)),
        }
    }
}

/// Result of one recovery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Mitigation applied; the caller re-executes the operation
    Retried { detail: String },

    /// Accepted loss (the input may have been quarantined)
    Skipped { detail: Option<String> },

    /// Rerouted to an alternate path
    FellBack { route: String },

    /// A human was notified; no further attempts
    Escalated,

    /// Recorded in the manual-intervention ledger; no further attempts
    ManualRequired,

    /// The attempt did not resolve the error
    Failed { reason: String },
}

impl RecoveryOutcome {
    /// Resolution method recorded on the error, if this outcome resolves it
    pub fn resolution_method(&self) -> Option<ResolutionMethod> {
        match self {
            RecoveryOutcome::Retried { .. } => Some(ResolutionMethod::Retry),
            RecoveryOutcome::Skipped { .. } => Some(ResolutionMethod::Skip),
            RecoveryOutcome::FellBack { .. } => Some(ResolutionMethod::Fallback),
            RecoveryOutcome::Escalated
            | RecoveryOutcome::ManualRequired
            | RecoveryOutcome::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.resolution_method().is_some()
    }

    /// Outcomes after which the error must never be attempted again
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::Escalated | RecoveryOutcome::ManualRequired
        )
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            RecoveryOutcome::Retried { detail } => Some(detail.clone()),
            RecoveryOutcome::Skipped { detail } => detail.clone(),
            RecoveryOutcome::FellBack { route } => Some(route.clone()),
            RecoveryOutcome::Escalated => Some("escalated".to_string()),
            RecoveryOutcome::ManualRequired => Some("manual intervention required".to_string()),
            RecoveryOutcome::Failed { reason } => Some(reason.clone()),
        }
    }
}

/// Strategy lookup: exact type override, then category default, then severity
#[derive(Debug, Clone)]
pub struct StrategySelector {
    type_overrides: HashMap<ErrorType, RecoveryStrategy>,
    category_defaults: HashMap<ErrorCategory, RecoveryStrategy>,
}

impl StrategySelector {
    /// Built-in tables with configured entries layered on top
    pub fn from_config(config: &RecoveryConfig) -> Self {
        let mut selector = Self::default();

        for (key, value) in &config.type_overrides {
            match (key.parse::<ErrorType>(), value.parse::<RecoveryStrategy>()) {
                (Ok(error_type), Ok(strategy)) => {
                    selector.type_overrides.insert(error_type, strategy);
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(key = %key, value = %value, error = %e, "Ignoring invalid type override");
                }
            }
        }

        for (key, value) in &config.category_defaults {
            match (key.parse::<ErrorCategory>(), value.parse::<RecoveryStrategy>()) {
                (Ok(category), Ok(strategy)) => {
                    selector.category_defaults.insert(category, strategy);
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(key = %key, value = %value, error = %e, "Ignoring invalid category default");
                }
            }
        }

        selector
    }

    pub fn with_type_override(mut self, error_type: ErrorType, strategy: RecoveryStrategy) -> Self {
        self.type_overrides.insert(error_type, strategy);
        self
    }

    pub fn with_category_default(
        mut self,
        category: ErrorCategory,
        strategy: RecoveryStrategy,
    ) -> Self {
        self.category_defaults.insert(category, strategy);
        self
    }

    pub fn select(&self, error: &ProcessingError) -> RecoveryStrategy {
        if let Some(strategy) = self.type_overrides.get(&error.error_type) {
            return *strategy;
        }
        if let Some(strategy) = self.category_defaults.get(&error.category) {
            return *strategy;
        }
        match error.severity {
            Severity::Critical => RecoveryStrategy::Escalate,
            Severity::High => RecoveryStrategy::Retry,
            Severity::Medium | Severity::Low => RecoveryStrategy::Skip,
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        let type_overrides = HashMap::from([
            (ErrorType::DiskFull, RecoveryStrategy::Escalate),
            (ErrorType::MemoryError, RecoveryStrategy::Escalate),
            (ErrorType::PdfEncrypted, RecoveryStrategy::Skip),
            (ErrorType::RateLimitExceeded, RecoveryStrategy::Retry),
        ]);

        let category_defaults = HashMap::from([
            (ErrorCategory::Network, RecoveryStrategy::Retry),
            (ErrorCategory::PdfProcessing, RecoveryStrategy::Skip),
            (ErrorCategory::Storage, RecoveryStrategy::Retry),
            (ErrorCategory::VectorStore, RecoveryStrategy::Fallback),
            (ErrorCategory::Configuration, RecoveryStrategy::Manual),
            (ErrorCategory::System, RecoveryStrategy::Escalate),
        ]);

        Self {
            type_overrides,
            category_defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::{ErrorClassifier, ErrorContext, Failure};
    use test_case::test_case;

    fn error_of(error_type: ErrorType, severity: Option<Severity>) -> ProcessingError {
        ErrorClassifier::default().classify(
            &Failure::new("Test", "test"),
            ErrorContext::new("worker-1", "op"),
            Some(error_type),
            severity,
        )
    }

    #[test_case(ErrorType::ConnectionTimeout => RecoveryStrategy::Retry ; "network default")]
    #[test_case(ErrorType::PdfCorrupt => RecoveryStrategy::Skip ; "pdf default")]
    #[test_case(ErrorType::PermissionDenied => RecoveryStrategy::Retry ; "storage default")]
    #[test_case(ErrorType::EmbeddingFailed => RecoveryStrategy::Fallback ; "vector store default")]
    #[test_case(ErrorType::ConfigInvalid => RecoveryStrategy::Manual ; "configuration default")]
    #[test_case(ErrorType::ProcessCrashed => RecoveryStrategy::Escalate ; "system default")]
    #[test_case(ErrorType::DiskFull => RecoveryStrategy::Escalate ; "disk full override")]
    #[test_case(ErrorType::MemoryError => RecoveryStrategy::Escalate ; "memory override")]
    #[test_case(ErrorType::PdfEncrypted => RecoveryStrategy::Skip ; "encrypted override")]
    #[test_case(ErrorType::RateLimitExceeded => RecoveryStrategy::Retry ; "rate limit override")]
    fn test_builtin_tables(error_type: ErrorType) -> RecoveryStrategy {
        StrategySelector::default().select(&error_of(error_type, None))
    }

    #[test_case(Severity::Critical => RecoveryStrategy::Escalate ; "critical")]
    #[test_case(Severity::High => RecoveryStrategy::Retry ; "high")]
    #[test_case(Severity::Medium => RecoveryStrategy::Skip ; "medium")]
    #[test_case(Severity::Low => RecoveryStrategy::Skip ; "low")]
    fn test_severity_fallback(severity: Severity) -> RecoveryStrategy {
        // Authentication has no category default
        StrategySelector::default().select(&error_of(ErrorType::TokenExpired, Some(severity)))
    }

    #[test]
    fn test_type_override_beats_category_default() {
        let selector = StrategySelector::default()
            .with_type_override(ErrorType::PdfParseFailed, RecoveryStrategy::Retry);
        let strategy = selector.select(&error_of(ErrorType::PdfParseFailed, None));
        assert_eq!(strategy, RecoveryStrategy::Retry);

        let strategy = selector.select(&error_of(ErrorType::PdfCorrupt, None));
        assert_eq!(strategy, RecoveryStrategy::Skip);
    }

    #[test]
    fn test_config_tables_layer_over_builtins() {
        let mut config = RecoveryConfig::default();
        config
            .type_overrides
            .insert("pdf_parse_failed".to_string(), "retry".to_string());
        config
            .category_defaults
            .insert("authentication".to_string(), "manual".to_string());
        config
            .type_overrides
            .insert("not_a_type".to_string(), "retry".to_string());

        let selector = StrategySelector::from_config(&config);
        assert_eq!(
            selector.select(&error_of(ErrorType::PdfParseFailed, None)),
            RecoveryStrategy::Retry
        );
        assert_eq!(
            selector.select(&error_of(ErrorType::TokenExpired, None)),
            RecoveryStrategy::Manual
        );
        assert_eq!(
            selector.select(&error_of(ErrorType::DiskFull, None)),
            RecoveryStrategy::Escalate
        );
    }

    #[test]
    fn test_outcome_resolution_methods() {
        let retried = RecoveryOutcome::Retried {
            detail: "backoff".to_string(),
        };
        assert_eq!(retried.resolution_method(), Some(ResolutionMethod::Retry));
        assert!(RecoveryOutcome::Skipped { detail: None }.is_success());
        assert!(!RecoveryOutcome::Escalated.is_success());
        assert!(RecoveryOutcome::ManualRequired.is_terminal_failure());
        assert!(!RecoveryOutcome::Failed {
            reason: "x".to_string()
        }
        .is_terminal_failure());
    }
}
