/// Early warnings derived from analysis results and metrics
///
/// Warnings expire after a fixed lifetime. Informational warnings are
/// acknowledged automatically once they have been visible long enough.
use super::metrics::SystemMetrics;
use super::rules::PreventionRule;
use crate::analysis::{ErrorAnalyzer, ImpactLevel, PatternDimension};
use crate::error::ErrorType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A metric within this fraction of a rule limit raises a warning
const APPROACH_MARGIN: f64 = 0.1;
/// Trends rising faster than this are critical
const CRITICAL_CHANGE_PCT: f64 = 200.0;
const MIN_TEMPORAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningLevel::Info => "info",
            WarningLevel::Warning => "warning",
            WarningLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyWarning {
    pub id: String,
    /// Stable key of what raised the warning; one live warning per source
    pub source: String,
    pub level: WarningLevel,
    pub message: String,
    pub predicted_error_types: Vec<ErrorType>,
    pub confidence: f64,
    pub recommended_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl EarlyWarning {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: impl Into<String>,
        level: WarningLevel,
        message: impl Into<String>,
        predicted_error_types: Vec<ErrorType>,
        confidence: f64,
        recommended_actions: Vec<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            level,
            message: message.into(),
            predicted_error_types,
            confidence: confidence.clamp(0.0, 1.0),
            recommended_actions,
            created_at: now,
            expires_at: now + ttl,
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.acknowledged && !self.is_expired(now)
    }
}

/// Result of one sweep over the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub expired: usize,
    pub auto_acknowledged: usize,
}

/// Live warnings for one instance
#[derive(Debug, Clone)]
pub struct WarningBoard {
    warnings: Vec<EarlyWarning>,
    info_auto_ack: chrono::Duration,
}

impl WarningBoard {
    pub fn new(info_auto_ack: chrono::Duration) -> Self {
        Self {
            warnings: Vec::new(),
            info_auto_ack,
        }
    }

    /// Add a warning, or refresh the live one from the same source; returns true when new
    pub fn issue(&mut self, warning: EarlyWarning) -> bool {
        let now = warning.created_at;
        if let Some(existing) = self
            .warnings
            .iter_mut()
            .find(|w| w.source == warning.source && !w.is_expired(now))
        {
            existing.level = existing.level.max(warning.level);
            existing.message = warning.message;
            existing.confidence = warning.confidence;
            existing.expires_at = warning.expires_at;
            return false;
        }

        match warning.level {
            WarningLevel::Critical => {
                tracing::error!(source = %warning.source, message = %warning.message, "Early warning raised")
            }
            WarningLevel::Warning => {
                tracing::warn!(source = %warning.source, message = %warning.message, "Early warning raised")
            }
            WarningLevel::Info => {
                tracing::info!(source = %warning.source, message = %warning.message, "Early warning raised")
            }
        }
        self.warnings.push(warning);
        true
    }

    /// Drop expired warnings and auto-acknowledge old informational ones
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepResult {
        let before = self.warnings.len();
        self.warnings.retain(|w| !w.is_expired(now));
        let mut result = SweepResult {
            expired: before - self.warnings.len(),
            auto_acknowledged: 0,
        };

        for warning in &mut self.warnings {
            if warning.level == WarningLevel::Info
                && !warning.acknowledged
                && now - warning.created_at >= self.info_auto_ack
            {
                warning.acknowledged = true;
                warning.acknowledged_at = Some(now);
                result.auto_acknowledged += 1;
            }
        }
        result
    }

    pub fn acknowledge(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.warnings.iter_mut().find(|w| w.id == id) {
            Some(warning) if !warning.acknowledged => {
                warning.acknowledged = true;
                warning.acknowledged_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self, now: DateTime<Utc>) -> Vec<EarlyWarning> {
        self.warnings
            .iter()
            .filter(|w| w.is_active(now))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Warnings for concerning trends, critical impacts and clustered failures
pub fn warnings_from_analysis(
    analyzer: &ErrorAnalyzer,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Vec<EarlyWarning> {
    let mut warnings = Vec::new();

    for trend in analyzer.concerning_trends() {
        let level = if trend.change_rate_pct > CRITICAL_CHANGE_PCT {
            WarningLevel::Critical
        } else {
            WarningLevel::Warning
        };
        let actions = analyzer
            .suggestions()
            .iter()
            .filter(|s| s.error_types.contains(&trend.error_type))
            .flat_map(|s| s.steps.iter().cloned())
            .collect();
        warnings.push(EarlyWarning::new(
            format!("trend:{}", trend.error_type),
            level,
            format!(
                "{} errors rising {:+.0}% over the last {} days",
                trend.error_type, trend.change_rate_pct, trend.window_days
            ),
            vec![trend.error_type],
            trend.confidence,
            actions,
            now,
            ttl,
        ));
    }

    for impact in analyzer
        .impacts()
        .iter()
        .filter(|a| a.impact_level == ImpactLevel::Critical)
    {
        warnings.push(EarlyWarning::new(
            format!("impact:{}", impact.error_type),
            WarningLevel::Critical,
            format!(
                "{} has critical impact (~{:.0} minutes downtime)",
                impact.error_type, impact.estimated_downtime_minutes
            ),
            vec![impact.error_type],
            (impact.impact_score / 10.0).min(1.0),
            vec!["Review the emergency mitigation suggestion".to_string()],
            now,
            ttl,
        ));
    }

    for pattern in analyzer.patterns().iter().filter(|p| {
        p.dimension.is_temporal() && p.confidence >= MIN_TEMPORAL_CONFIDENCE
    }) {
        let dimension = if pattern.dimension == PatternDimension::HourOfDay {
            "hour"
        } else {
            "weekday"
        };
        warnings.push(EarlyWarning::new(
            format!("pattern:{}", pattern.id),
            WarningLevel::Info,
            format!(
                "{} errors cluster at {} {}",
                pattern.frequency, dimension, pattern.key
            ),
            pattern.error_types.clone(),
            pattern.confidence,
            Vec::new(),
            now,
            ttl,
        ));
    }

    warnings
}

/// Warnings for metrics close to (but not over) an enabled rule's limit
pub fn warnings_from_metrics(
    metrics: &SystemMetrics,
    rules: &[PreventionRule],
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Vec<EarlyWarning> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .flat_map(|rule| {
            rule.thresholds
                .iter()
                .filter(|t| t.approaching(metrics, APPROACH_MARGIN))
                .map(move |t| {
                    let value = metrics.value(t.metric);
                    EarlyWarning::new(
                        format!("metric:{}:{}", rule.id, t.metric.as_str()),
                        WarningLevel::Warning,
                        format!(
                            "{} at {:.1} approaching {} limit {:.1}",
                            t.metric.as_str(),
                            value,
                            rule.name,
                            t.limit
                        ),
                        rule.error_types.clone(),
                        if t.limit > 0.0 { value / t.limit } else { 1.0 },
                        rule.actions.iter().map(|a| a.to_string()).collect(),
                        now,
                        ttl,
                    )
                })
        })
        .collect()
}
