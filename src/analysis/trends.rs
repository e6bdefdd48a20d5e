/// Per-type trend analysis over a sliding window
///
/// The window is split into two equal halves and the per-day error rate of each
/// half is compared. Daily counts over the whole window feed a coefficient of
/// variation that separates flat series from erratic ones.
use crate::error::{ErrorType, ProcessingError};
use crate::settings::AnalyzerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sample size at which trend confidence saturates
const FULL_CONFIDENCE_SAMPLES: f64 = 30.0;
const CONCERNING_CHANGE_PCT: f64 = 50.0;
const CONCERNING_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Volatile => "volatile",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrend {
    pub error_type: ErrorType,
    pub direction: TrendDirection,
    /// Percentage change of the per-day rate, second half vs first half
    pub change_rate_pct: f64,
    pub confidence: f64,
    pub first_half_per_day: f64,
    pub second_half_per_day: f64,
    pub coefficient_of_variation: f64,
    pub sample_size: usize,
    pub window_days: i64,
}

impl ErrorTrend {
    pub fn is_concerning(&self) -> bool {
        self.direction == TrendDirection::Increasing
            && self.change_rate_pct > CONCERNING_CHANGE_PCT
            && self.confidence > CONCERNING_CONFIDENCE
    }
}

/// Analyze every error type with enough samples in the window ending at `now`
pub fn analyze_trends(
    errors: &[ProcessingError],
    now: DateTime<Utc>,
    config: &AnalyzerConfig,
) -> Vec<ErrorTrend> {
    let window_days = config.trend_window_days.max(2);
    let window_start = now - chrono::Duration::days(window_days);

    let mut by_type: BTreeMap<ErrorType, Vec<DateTime<Utc>>> = BTreeMap::new();
    for error in errors {
        if error.timestamp >= window_start && error.timestamp <= now {
            by_type.entry(error.error_type).or_default().push(error.timestamp);
        }
    }

    by_type
        .into_iter()
        .filter(|(_, stamps)| stamps.len() >= config.min_trend_errors)
        .map(|(error_type, stamps)| trend_for(error_type, &stamps, now, window_days, config))
        .collect()
}

fn trend_for(
    error_type: ErrorType,
    stamps: &[DateTime<Utc>],
    now: DateTime<Utc>,
    window_days: i64,
    config: &AnalyzerConfig,
) -> ErrorTrend {
    let window_secs = window_days * 86_400;
    let half_days = window_days as f64 / 2.0;
    let midpoint = now - chrono::Duration::seconds(window_secs / 2);

    let second_half = stamps.iter().filter(|t| **t >= midpoint).count();
    let first_half = stamps.len() - second_half;
    let first_half_per_day = first_half as f64 / half_days;
    let second_half_per_day = second_half as f64 / half_days;

    let change_rate_pct = if first_half_per_day == 0.0 {
        if second_half_per_day > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (second_half_per_day - first_half_per_day) / first_half_per_day * 100.0
    };

    let coefficient_of_variation = daily_variation(stamps, now, window_days);

    let direction = if change_rate_pct.abs() < config.stable_threshold_pct {
        if coefficient_of_variation > config.volatility_cv {
            TrendDirection::Volatile
        } else {
            TrendDirection::Stable
        }
    } else if change_rate_pct > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    ErrorTrend {
        error_type,
        direction,
        change_rate_pct,
        confidence: (stamps.len() as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0),
        first_half_per_day,
        second_half_per_day,
        coefficient_of_variation,
        sample_size: stamps.len(),
        window_days,
    }
}

/// Coefficient of variation of daily counts across the window
fn daily_variation(stamps: &[DateTime<Utc>], now: DateTime<Utc>, window_days: i64) -> f64 {
    let days = window_days as usize;
    let mut buckets = vec![0usize; days];
    for stamp in stamps {
        let age_days = ((now - *stamp).num_seconds() / 86_400).clamp(0, window_days - 1) as usize;
        buckets[age_days] += 1;
    }

    let mean = stamps.len() as f64 / days as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = buckets
        .iter()
        .map(|count| (*count as f64 - mean).powi(2))
        .sum::<f64>()
        / days as f64;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClassifier, ErrorContext, Failure};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn timeouts_at(offsets_hours: &[i64]) -> Vec<ProcessingError> {
        offsets_hours
            .iter()
            .map(|hours| {
                let mut error = ErrorClassifier::default().classify(
                    &Failure::new("TimeoutError", "timed out"),
                    ErrorContext::new("worker-1", "download_paper"),
                    None,
                    None,
                );
                error.timestamp = now() - chrono::Duration::hours(*hours);
                error
            })
            .collect()
    }

    #[test]
    fn test_zero_to_n_is_full_increase() {
        // All 30 errors in the most recent day of a 7-day window
        let offsets: Vec<i64> = (0..30).map(|i| i % 20).collect();
        let trends = analyze_trends(&timeouts_at(&offsets), now(), &AnalyzerConfig::default());

        assert_eq!(trends.len(), 1);
        let trend = &trends[0];
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert_eq!(trend.change_rate_pct, 100.0);
        assert_eq!(trend.confidence, 1.0);
        assert!(trend.is_concerning());
    }

    #[test]
    fn test_too_few_errors_yield_no_trend() {
        let trends = analyze_trends(&timeouts_at(&[1, 2, 3]), now(), &AnalyzerConfig::default());
        assert!(trends.is_empty());
    }

    #[test]
    fn test_decreasing_trend() {
        // 12 errors 5-6 days ago, 2 errors today
        let mut offsets: Vec<i64> = (0..12).map(|i| 120 + i).collect();
        offsets.extend([1, 2]);
        let trends = analyze_trends(&timeouts_at(&offsets), now(), &AnalyzerConfig::default());

        assert_eq!(trends[0].direction, TrendDirection::Decreasing);
        assert!(trends[0].change_rate_pct < -50.0);
        assert!(!trends[0].is_concerning());
    }

    #[test]
    fn test_even_spread_is_stable() {
        // One error every 12 hours for 7 days
        let offsets: Vec<i64> = (0..14).map(|i| i * 12 + 6).collect();
        let trends = analyze_trends(&timeouts_at(&offsets), now(), &AnalyzerConfig::default());

        assert_eq!(trends[0].direction, TrendDirection::Stable);
        assert!(trends[0].coefficient_of_variation < 0.01);
    }

    #[test]
    fn test_balanced_bursts_are_volatile() {
        // Same count in each half, but concentrated in single days
        let mut offsets: Vec<i64> = (0..6).map(|i| 24 + i).collect();
        offsets.extend((0..6).map(|i| 5 * 24 + i));
        let config = AnalyzerConfig {
            volatility_cv: 1.0,
            ..AnalyzerConfig::default()
        };
        let trends = analyze_trends(&timeouts_at(&offsets), now(), &config);

        assert_eq!(trends[0].direction, TrendDirection::Volatile);
        assert_eq!(trends[0].change_rate_pct, 0.0);
    }

    #[test]
    fn test_errors_outside_window_are_ignored() {
        let offsets: Vec<i64> = (0..15).map(|i| 24 * 30 + i).collect();
        let trends = analyze_trends(&timeouts_at(&offsets), now(), &AnalyzerConfig::default());
        assert!(trends.is_empty());
    }
}
