/// Error analyzer - runs every analysis pass and exports the result
use super::impact::{assess_impact, ErrorImpactAssessment, ImpactLevel};
use super::patterns::{detect_patterns, ErrorPattern};
use super::suggestions::{generate_suggestions, ResolutionSuggestion};
use super::trends::{analyze_trends, ErrorTrend};
use crate::error::{ErrorHistorySource, ErrorSummary, ProcessingError};
use crate::settings::AnalyzerConfig;
use crate::SentinelResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Serialized analysis document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub total_errors: usize,
    pub summary: ErrorSummary,
    pub patterns: Vec<ErrorPattern>,
    pub trends: Vec<ErrorTrend>,
    pub impacts: Vec<ErrorImpactAssessment>,
    pub suggestions: Vec<ResolutionSuggestion>,
}

/// Holds the results of the most recent analysis run
#[derive(Debug, Clone)]
pub struct ErrorAnalyzer {
    config: AnalyzerConfig,
    analyzed_at: Option<DateTime<Utc>>,
    summary: ErrorSummary,
    total_errors: usize,
    patterns: Vec<ErrorPattern>,
    trends: Vec<ErrorTrend>,
    impacts: Vec<ErrorImpactAssessment>,
    suggestions: Vec<ResolutionSuggestion>,
}

impl ErrorAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            analyzed_at: None,
            summary: ErrorSummary::default(),
            total_errors: 0,
            patterns: Vec::new(),
            trends: Vec::new(),
            impacts: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Reset previous results and run patterns, trends, impact and suggestions
    pub fn perform_comprehensive_analysis(&mut self, errors: &[ProcessingError], now: DateTime<Utc>) {
        self.reset();

        let window = chrono::Duration::days(self.config.trend_window_days.max(1));
        let windowed: Vec<ProcessingError> = errors
            .iter()
            .filter(|e| e.timestamp >= now - window && e.timestamp <= now)
            .cloned()
            .collect();

        self.total_errors = windowed.len();
        self.summary = ErrorSummary::from_errors(errors, window, now, self.config.top_messages);
        self.patterns = detect_patterns(&windowed, self.config.min_pattern_frequency);
        self.trends = analyze_trends(errors, now, &self.config);
        self.impacts = assess_impact(&windowed);
        self.suggestions = generate_suggestions(
            &self.patterns,
            &self.trends,
            &self.impacts,
            self.config.high_frequency_threshold,
        );
        self.analyzed_at = Some(now);

        tracing::info!(
            errors = self.total_errors,
            patterns = self.patterns.len(),
            trends = self.trends.len(),
            concerning_trends = self.concerning_trends().len(),
            suggestions = self.suggestions.len(),
            "Error analysis completed"
        );
    }

    /// Analyze a snapshot taken from any history source
    pub fn analyze_source(&mut self, source: &dyn ErrorHistorySource, now: DateTime<Utc>) {
        let history = source.error_history();
        self.perform_comprehensive_analysis(&history, now);
    }

    fn reset(&mut self) {
        self.analyzed_at = None;
        self.summary = ErrorSummary::default();
        self.total_errors = 0;
        self.patterns.clear();
        self.trends.clear();
        self.impacts.clear();
        self.suggestions.clear();
    }

    pub fn analyzed_at(&self) -> Option<DateTime<Utc>> {
        self.analyzed_at
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    pub fn trends(&self) -> &[ErrorTrend] {
        &self.trends
    }

    pub fn impacts(&self) -> &[ErrorImpactAssessment] {
        &self.impacts
    }

    pub fn suggestions(&self) -> &[ResolutionSuggestion] {
        &self.suggestions
    }

    pub fn concerning_trends(&self) -> Vec<&ErrorTrend> {
        self.trends.iter().filter(|t| t.is_concerning()).collect()
    }

    pub fn critical_impacts(&self) -> Vec<&ErrorImpactAssessment> {
        self.impacts
            .iter()
            .filter(|a| a.impact_level == ImpactLevel::Critical)
            .collect()
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            report_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            analyzed_at: self.analyzed_at,
            total_errors: self.total_errors,
            summary: self.summary.clone(),
            patterns: self.patterns.clone(),
            trends: self.trends.clone(),
            impacts: self.impacts.clone(),
            suggestions: self.suggestions.clone(),
        }
    }

    /// Write the current results to `path` as pretty JSON
    pub fn generate_report(&self, path: &Path) -> SentinelResult<AnalysisReport> {
        let report = self.report();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(&report)?)?;

        tracing::info!(path = %path.display(), report_id = %report.report_id, "Analysis report written");
        Ok(report)
    }
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}
