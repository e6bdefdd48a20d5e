/// Rule-based resolution suggestions
///
/// Suggestions are derived from patterns, trends and impact assessments, then
/// deduplicated by id and ranked by priority.
use super::impact::{ErrorImpactAssessment, ImpactLevel};
use super::patterns::{ErrorPattern, PatternDimension};
use super::trends::ErrorTrend;
use crate::error::{ErrorCategory, ErrorType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn discount(&self) -> f64 {
        match self {
            Effort::Low => 1.0,
            Effort::Medium => 0.8,
            Effort::High => 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn discount(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 0.85,
            RiskLevel::High => 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSuggestion {
    pub id: String,
    pub title: String,
    pub description: String,
    pub error_types: Vec<ErrorType>,
    pub steps: Vec<String>,
    pub effort: Effort,
    pub success_probability: f64,
    pub risk: RiskLevel,
    pub prerequisites: Vec<String>,
    pub priority: f64,
}

impl ResolutionSuggestion {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: String,
        title: String,
        description: String,
        error_types: Vec<ErrorType>,
        steps: Vec<String>,
        effort: Effort,
        success_probability: f64,
        risk: RiskLevel,
    ) -> Self {
        let success_probability = success_probability.clamp(0.0, 1.0);
        Self {
            id,
            title,
            description,
            error_types,
            steps,
            effort,
            success_probability,
            risk,
            prerequisites: Vec::new(),
            priority: success_probability * effort.discount() * risk.discount(),
        }
    }

    fn with_prerequisites(mut self, prerequisites: &[&str]) -> Self {
        self.prerequisites = prerequisites.iter().map(|s| s.to_string()).collect();
        self
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn maintenance_window(pattern: &ErrorPattern) -> ResolutionSuggestion {
    ResolutionSuggestion::new(
        format!("maintenance_window:{}", pattern.id),
        format!("Schedule maintenance around {} {}", pattern.dimension, pattern.key),
        format!(
            "{} errors cluster at {} {}; move batch jobs or plan a maintenance window there",
            pattern.frequency, pattern.dimension, pattern.key
        ),
        pattern.error_types.clone(),
        strings(&[
            "Correlate the window with scheduled jobs and upstream maintenance",
            "Shift crawl and ingest batches away from the window",
            "Re-run analysis after one week to confirm the cluster is gone",
        ]),
        Effort::Low,
        0.6 * pattern.confidence.max(0.5),
        RiskLevel::Low,
    )
}

fn root_cause(error_type: ErrorType, frequency: usize) -> ResolutionSuggestion {
    let steps = match error_type.category() {
        ErrorCategory::Network => strings(&[
            "Check upstream availability and DNS for the affected domains",
            "Review connect and read timeouts against observed latency",
            "Inspect rate-limit headers for exhausted quotas",
        ]),
        ErrorCategory::PdfProcessing => strings(&[
            "Sample quarantined files and identify the producing sources",
            "Compare failures across parser backends",
            "Filter known-bad sources before download",
        ]),
        ErrorCategory::Storage => strings(&[
            "Review disk usage growth and retention of temp and log files",
            "Verify ownership and permissions of the data directory",
        ]),
        ErrorCategory::VectorStore => strings(&[
            "Check vector store health and connection limits",
            "Verify embedding model availability and quotas",
        ]),
        _ => strings(&[
            "Collect stack traces for the most recent occurrences",
            "Reproduce with a single document in isolation",
        ]),
    };

    ResolutionSuggestion::new(
        format!("root_cause:{}", error_type),
        format!("Investigate root cause of {}", error_type),
        format!(
            "{} occurred {} times; recurring failures at this rate point to a systemic cause",
            error_type, frequency
        ),
        vec![error_type],
        steps,
        Effort::Medium,
        0.7,
        RiskLevel::Low,
    )
}

fn trend_mitigation(trend: &ErrorTrend) -> ResolutionSuggestion {
    let (title, steps, effort) = match trend.error_type.category() {
        ErrorCategory::Network => (
            format!("Add backoff and a circuit breaker for {}", trend.error_type),
            strings(&[
                "Increase the base backoff delay for the affected client",
                "Lower the circuit breaker threshold for this error type",
                "Alert when the per-hour rate exceeds the current baseline",
            ]),
            Effort::Low,
        ),
        _ => (
            format!("Monitor rising {} errors", trend.error_type),
            strings(&[
                "Add an alert on the per-hour rate of this error type",
                "Review recent deployments and configuration changes",
            ]),
            Effort::Low,
        ),
    };

    ResolutionSuggestion::new(
        format!("trend_mitigation:{}", trend.error_type),
        title,
        format!(
            "{} rate changed by {:+.0}% ({:.1}/day to {:.1}/day)",
            trend.error_type, trend.change_rate_pct, trend.first_half_per_day, trend.second_half_per_day
        ),
        vec![trend.error_type],
        steps,
        effort,
        0.75 * trend.confidence,
        RiskLevel::Low,
    )
}

fn emergency_mitigation(assessment: &ErrorImpactAssessment) -> ResolutionSuggestion {
    ResolutionSuggestion::new(
        format!("emergency:{}", assessment.error_type),
        format!("Emergency mitigation for {}", assessment.error_type),
        format!(
            "{} has critical impact: ~{:.0} minutes of downtime across {} operations{}",
            assessment.error_type,
            assessment.estimated_downtime_minutes,
            assessment.affected_operations.len(),
            if assessment.data_loss_risk {
                " with data-loss risk"
            } else {
                ""
            }
        ),
        vec![assessment.error_type],
        strings(&[
            "Pause ingestion on affected instances",
            "Apply the immediate fix (free space, restart, restore index)",
            "Resume one instance and watch the error rate before scaling back up",
        ]),
        Effort::High,
        0.85,
        RiskLevel::Medium,
    )
    .with_prerequisites(&["On-call approval", "Current backup of the vector index"])
}

/// Build, deduplicate and rank suggestions
pub fn generate_suggestions(
    patterns: &[ErrorPattern],
    trends: &[ErrorTrend],
    impacts: &[ErrorImpactAssessment],
    high_frequency_threshold: usize,
) -> Vec<ResolutionSuggestion> {
    let mut candidates = Vec::new();

    for pattern in patterns {
        if pattern.dimension.is_temporal() {
            candidates.push(maintenance_window(pattern));
        }
        if pattern.dimension == PatternDimension::ErrorType
            && pattern.frequency > high_frequency_threshold
        {
            if let Some(error_type) = pattern.error_types.first() {
                candidates.push(root_cause(*error_type, pattern.frequency));
            }
        }
    }

    for trend in trends.iter().filter(|t| t.is_concerning()) {
        candidates.push(trend_mitigation(trend));
    }

    for assessment in impacts
        .iter()
        .filter(|a| a.impact_level == ImpactLevel::Critical)
    {
        candidates.push(emergency_mitigation(assessment));
    }

    let mut deduped: BTreeMap<String, ResolutionSuggestion> = BTreeMap::new();
    for suggestion in candidates {
        match deduped.get(&suggestion.id) {
            Some(existing) if existing.priority >= suggestion.priority => {}
            _ => {
                deduped.insert(suggestion.id.clone(), suggestion);
            }
        }
    }

    let mut ranked: Vec<ResolutionSuggestion> = deduped.into_values().collect();
    ranked.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::trends::TrendDirection;
    use chrono::Utc;

    fn pattern(dimension: PatternDimension, key: &str, frequency: usize) -> ErrorPattern {
        ErrorPattern {
            id: format!("{}:{}", dimension, key),
            dimension,
            key: key.to_string(),
            frequency,
            first_occurrence: Utc::now(),
            last_occurrence: Utc::now(),
            affected_operations: vec!["download_paper".to_string()],
            error_types: vec![ErrorType::ConnectionTimeout],
            confidence: 0.9,
        }
    }

    fn trend(direction: TrendDirection, change: f64, confidence: f64) -> ErrorTrend {
        ErrorTrend {
            error_type: ErrorType::ConnectionTimeout,
            direction,
            change_rate_pct: change,
            confidence,
            first_half_per_day: 1.0,
            second_half_per_day: 3.0,
            coefficient_of_variation: 0.2,
            sample_size: 30,
            window_days: 7,
        }
    }

    #[test]
    fn test_priority_formula() {
        let s = ResolutionSuggestion::new(
            "x".into(),
            "t".into(),
            "d".into(),
            vec![],
            vec![],
            Effort::Medium,
            0.5,
            RiskLevel::Medium,
        );
        assert!((s.priority - 0.5 * 0.8 * 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_temporal_pattern_suggests_maintenance_window() {
        let suggestions =
            generate_suggestions(&[pattern(PatternDimension::HourOfDay, "03:00", 5)], &[], &[], 10);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].id, "maintenance_window:hour_of_day:03:00");
    }

    #[test]
    fn test_high_frequency_suggests_root_cause() {
        let patterns = [
            pattern(PatternDimension::ErrorType, "connection_timeout", 11),
            pattern(PatternDimension::Operation, "download_paper", 11),
        ];
        let suggestions = generate_suggestions(&patterns, &[], &[], 10);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].id, "root_cause:connection_timeout");

        let at_threshold = ErrorPattern {
            frequency: 10,
            ..patterns[0].clone()
        };
        assert!(generate_suggestions(&[at_threshold], &[], &[], 10).is_empty());
    }

    #[test]
    fn test_only_concerning_trends_produce_suggestions() {
        let trends = [
            trend(TrendDirection::Increasing, 200.0, 0.9),
            trend(TrendDirection::Increasing, 20.0, 0.9),
        ];
        let suggestions = generate_suggestions(&[], &trends, &[], 10);
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].title.contains("circuit breaker"));
    }

    #[test]
    fn test_critical_impact_carries_prerequisites() {
        let assessment = ErrorImpactAssessment {
            error_type: ErrorType::DiskFull,
            frequency: 12,
            estimated_downtime_minutes: 360.0,
            data_loss_risk: true,
            user_impact: 10.0,
            business_impact: 10.0,
            impact_score: 10.0,
            impact_level: ImpactLevel::Critical,
            affected_operations: vec!["save_chunk".to_string()],
        };
        let suggestions = generate_suggestions(&[], &[], &[assessment], 10);
        assert_eq!(suggestions[0].id, "emergency:disk_full");
        assert_eq!(suggestions[0].prerequisites.len(), 2);
        assert!(suggestions[0].description.contains("data-loss risk"));
    }

    #[test]
    fn test_suggestions_are_ranked_and_deduplicated() {
        let patterns = [
            pattern(PatternDimension::HourOfDay, "03:00", 5),
            pattern(PatternDimension::HourOfDay, "03:00", 5),
            pattern(PatternDimension::ErrorType, "connection_timeout", 20),
        ];
        let trends = [trend(TrendDirection::Increasing, 200.0, 1.0)];
        let suggestions = generate_suggestions(&patterns, &trends, &[], 10);

        assert_eq!(suggestions.len(), 3);
        for pair in suggestions.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }
}
