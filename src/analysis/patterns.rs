/// Recurring-error pattern detection
///
/// Errors are grouped along four dimensions (type, operation, hour of day and
/// weekday). Groups reaching the minimum frequency become patterns whose
/// confidence grows with the observed rate.
use crate::error::{ErrorType, ProcessingError};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Errors per hour at which pattern confidence saturates
const CONFIDENCE_RATE_PER_HOUR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDimension {
    ErrorType,
    Operation,
    HourOfDay,
    Weekday,
}

impl PatternDimension {
    pub const ALL: [PatternDimension; 4] = [
        PatternDimension::ErrorType,
        PatternDimension::Operation,
        PatternDimension::HourOfDay,
        PatternDimension::Weekday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternDimension::ErrorType => "error_type",
            PatternDimension::Operation => "operation",
            PatternDimension::HourOfDay => "hour_of_day",
            PatternDimension::Weekday => "weekday",
        }
    }

    /// Whether the dimension groups by time rather than by what failed
    pub fn is_temporal(&self) -> bool {
        matches!(self, PatternDimension::HourOfDay | PatternDimension::Weekday)
    }

    fn key_of(&self, error: &ProcessingError) -> String {
        match self {
            PatternDimension::ErrorType => error.error_type.to_string(),
            PatternDimension::Operation => error.context.operation.clone(),
            PatternDimension::HourOfDay => format!("{:02}:00", error.timestamp.hour()),
            PatternDimension::Weekday => error.timestamp.weekday().to_string(),
        }
    }
}

impl fmt::Display for PatternDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of errors sharing one dimension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub id: String,
    pub dimension: PatternDimension,
    pub key: String,
    pub frequency: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub affected_operations: Vec<String>,
    pub error_types: Vec<ErrorType>,
    pub confidence: f64,
}

impl ErrorPattern {
    /// Observed errors per hour over the pattern's span (at least one hour)
    pub fn rate_per_hour(&self) -> f64 {
        let span_hours =
            (self.last_occurrence - self.first_occurrence).num_seconds() as f64 / 3600.0;
        self.frequency as f64 / span_hours.max(1.0)
    }
}

/// Group errors along every dimension, keeping groups with `frequency >= min_frequency`
pub fn detect_patterns(errors: &[ProcessingError], min_frequency: usize) -> Vec<ErrorPattern> {
    let mut groups: BTreeMap<(PatternDimension, String), Vec<&ProcessingError>> = BTreeMap::new();
    for error in errors {
        for dimension in PatternDimension::ALL {
            groups
                .entry((dimension, dimension.key_of(error)))
                .or_default()
                .push(error);
        }
    }

    let mut patterns: Vec<ErrorPattern> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= min_frequency.max(1))
        .filter_map(|((dimension, key), members)| build_pattern(dimension, key, &members))
        .collect();

    patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.id.cmp(&b.id)));
    patterns
}

fn build_pattern(
    dimension: PatternDimension,
    key: String,
    members: &[&ProcessingError],
) -> Option<ErrorPattern> {
    let first_occurrence = members.iter().map(|e| e.timestamp).min()?;
    let last_occurrence = members.iter().map(|e| e.timestamp).max()?;

    let affected_operations: BTreeSet<String> =
        members.iter().map(|e| e.context.operation.clone()).collect();
    let error_types: BTreeSet<ErrorType> = members.iter().map(|e| e.error_type).collect();

    let mut pattern = ErrorPattern {
        id: format!("{}:{}", dimension, key),
        dimension,
        key,
        frequency: members.len(),
        first_occurrence,
        last_occurrence,
        affected_operations: affected_operations.into_iter().collect(),
        error_types: error_types.into_iter().collect(),
        confidence: 0.0,
    };
    pattern.confidence = (pattern.rate_per_hour() / CONFIDENCE_RATE_PER_HOUR).min(1.0);
    Some(pattern)
}
