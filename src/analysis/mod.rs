/// Error analytics over the recovery history
///
/// The analyzer never touches live manager state. It works on exported
/// snapshots (see [`crate::error::ErrorHistorySource`]) and produces:
/// - Recurring patterns by type, operation, hour of day and weekday
/// - Per-type trends over a sliding window
/// - Impact assessments with downtime and data-loss estimates
/// - Ranked resolution suggestions
pub mod analyzer;
pub mod impact;
pub mod patterns;
pub mod suggestions;
pub mod trends;

pub use analyzer::{AnalysisReport, ErrorAnalyzer};
pub use impact::{ErrorImpactAssessment, ImpactLevel};
pub use patterns::{ErrorPattern, PatternDimension};
pub use suggestions::{Effort, ResolutionSuggestion, RiskLevel};
pub use trends::{ErrorTrend, TrendDirection};
