/// Per-type impact assessment
///
/// Static downtime and data-loss tables are scaled by how often the type occurs
/// and how critical the failing operations are. The resulting user and business
/// scores (0-10) map onto an impact level.
use crate::error::{ErrorType, ProcessingError, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const MAX_SCORE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            ImpactLevel::Critical
        } else if score >= 6.0 {
            ImpactLevel::High
        } else if score >= 4.0 {
            ImpactLevel::Medium
        } else if score >= 2.0 {
            ImpactLevel::Low
        } else {
            ImpactLevel::Minimal
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImpactLevel::Minimal => "minimal",
            ImpactLevel::Low => "low",
            ImpactLevel::Medium => "medium",
            ImpactLevel::High => "high",
            ImpactLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorImpactAssessment {
    pub error_type: ErrorType,
    pub frequency: usize,
    pub estimated_downtime_minutes: f64,
    pub data_loss_risk: bool,
    pub user_impact: f64,
    pub business_impact: f64,
    pub impact_score: f64,
    pub impact_level: ImpactLevel,
    pub affected_operations: Vec<String>,
}

/// Minutes of worker downtime one occurrence typically costs
fn base_downtime_minutes(error_type: ErrorType) -> f64 {
    use ErrorType::*;
    match error_type {
        DiskFull | MemoryError | IndexCorrupted | ProcessCrashed => 30.0,
        ConfigMissing | ConfigInvalid | AuthenticationFailed => 20.0,
        VectorStoreUnavailable | ResourceExhausted => 15.0,
        NetworkUnreachable | DnsResolutionFailed | PermissionDenied => 5.0,
        RateLimitExceeded | ConnectionRefused | TokenExpired | EmbeddingFailed => 2.0,
        ConnectionTimeout | HttpError | IoError => 1.0,
        PdfCorrupt | PdfEncrypted | PdfParseFailed | PdfTextExtractionFailed => 0.5,
        FileNotFound | ValidationFailed | Unknown => 0.5,
    }
}

fn has_data_loss_risk(error_type: ErrorType) -> bool {
    matches!(
        error_type,
        ErrorType::DiskFull
            | ErrorType::IndexCorrupted
            | ErrorType::ProcessCrashed
            | ErrorType::MemoryError
            | ErrorType::PdfCorrupt
            | ErrorType::IoError
    )
}

fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 2.5,
        Severity::High => 4.0,
        Severity::Critical => 6.0,
    }
}

/// Multiplier for operations whose failure loses already-paid-for work
pub fn operation_criticality(operation: &str) -> f64 {
    let op = operation.to_lowercase();
    if ["store", "index", "embed", "save", "commit"]
        .iter()
        .any(|k| op.contains(k))
    {
        1.5
    } else if ["download", "fetch", "parse", "extract"]
        .iter()
        .any(|k| op.contains(k))
    {
        1.2
    } else {
        1.0
    }
}

/// Assess every error type present in `errors`, most severe first
pub fn assess_impact(errors: &[ProcessingError]) -> Vec<ErrorImpactAssessment> {
    let mut by_type: BTreeMap<ErrorType, Vec<&ProcessingError>> = BTreeMap::new();
    for error in errors {
        by_type.entry(error.error_type).or_default().push(error);
    }

    let mut assessments: Vec<ErrorImpactAssessment> = by_type
        .into_iter()
        .map(|(error_type, members)| assess_type(error_type, &members))
        .collect();

    assessments.sort_by(|a, b| {
        b.impact_score
            .partial_cmp(&a.impact_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.error_type.cmp(&b.error_type))
    });
    assessments
}

fn assess_type(error_type: ErrorType, members: &[&ProcessingError]) -> ErrorImpactAssessment {
    let frequency = members.len();
    let criticality = members
        .iter()
        .map(|e| operation_criticality(&e.context.operation))
        .sum::<f64>()
        / frequency.max(1) as f64;
    let severity = members
        .iter()
        .map(|e| e.severity)
        .max()
        .unwrap_or(Severity::Low);

    let estimated_downtime_minutes = base_downtime_minutes(error_type) * frequency as f64 * criticality;
    let data_loss_risk = has_data_loss_risk(error_type);

    let user_impact =
        (severity_weight(severity) * (1.0 + (frequency as f64).ln()) * criticality).min(MAX_SCORE);
    let business_impact = (user_impact * 0.6
        + if data_loss_risk { 3.0 } else { 0.0 }
        + estimated_downtime_minutes / 60.0)
        .min(MAX_SCORE);
    let impact_score = (user_impact + business_impact) / 2.0;

    let affected_operations: BTreeSet<String> =
        members.iter().map(|e| e.context.operation.clone()).collect();

    ErrorImpactAssessment {
        error_type,
        frequency,
        estimated_downtime_minutes,
        data_loss_risk,
        user_impact,
        business_impact,
        impact_score,
        impact_level: ImpactLevel::from_score(impact_score),
        affected_operations: affected_operations.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClassifier, ErrorContext, Failure};
    use test_case::test_case;

    fn errors(kind: &str, message: &str, operation: &str, count: usize) -> Vec<ProcessingError> {
        (0..count)
            .map(|_| {
                ErrorClassifier::default().classify(
                    &Failure::new(kind, message),
                    ErrorContext::new("worker-1", operation),
                    None,
                    None,
                )
            })
            .collect()
    }

    #[test_case(9.0 => ImpactLevel::Critical)]
    #[test_case(6.5 => ImpactLevel::High)]
    #[test_case(4.0 => ImpactLevel::Medium)]
    #[test_case(2.5 => ImpactLevel::Low)]
    #[test_case(0.3 => ImpactLevel::Minimal)]
    fn test_level_thresholds(score: f64) -> ImpactLevel {
        ImpactLevel::from_score(score)
    }

    #[test_case("store_chunks" => 1.5)]
    #[test_case("download_paper" => 1.2)]
    #[test_case("healthcheck" => 1.0)]
    fn test_operation_criticality(operation: &str) -> f64 {
        operation_criticality(operation)
    }

    #[test]
    fn test_repeated_disk_full_is_critical() {
        let assessments = assess_impact(&errors("OSError", "No space left on device", "save_chunk", 10));
        let disk = &assessments[0];
        assert_eq!(disk.error_type, ErrorType::DiskFull);
        assert!(disk.data_loss_risk);
        assert_eq!(disk.impact_level, ImpactLevel::Critical);
        assert!(disk.user_impact <= MAX_SCORE);
    }

    #[test]
    fn test_single_rate_limit_is_minor() {
        let assessments = assess_impact(&errors("HTTPError", "429 Too Many Requests", "healthcheck", 1));
        assert_eq!(assessments[0].error_type, ErrorType::RateLimitExceeded);
        assert!(assessments[0].impact_level <= ImpactLevel::Low);
        assert!(!assessments[0].data_loss_risk);
    }

    #[test]
    fn test_sorted_by_score() {
        let mut all = errors("TimeoutError", "timed out", "fetch", 2);
        all.extend(errors("MemoryError", "out of memory", "embed_chunks", 4));

        let assessments = assess_impact(&all);
        assert_eq!(assessments.len(), 2);
        assert_eq!(assessments[0].error_type, ErrorType::MemoryError);
        assert!(assessments[0].impact_score >= assessments[1].impact_score);
    }
}
