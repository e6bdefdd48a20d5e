/// Prevention subsystem
///
/// Closes the loop between recovery and analysis: rules watch host and traffic
/// metrics and publish advisories through [`PreventionControls`], the warning
/// board turns analysis results into time-bound advisories, and learning tunes
/// rules by how often their actions actually work.
pub mod controls;
pub mod learning;
pub mod metrics;
pub mod rules;
pub mod system;
pub mod warnings;

pub use controls::{ControlsSnapshot, PreventionControls, TrafficMonitor};
pub use learning::{LearningOutcome, LearningRecord, LearningStore};
pub use metrics::{MetricKind, MetricsProvider, SysinfoMetrics, SystemMetrics};
pub use rules::{
    ActionContext, ActionRegistry, PreventionAction, PreventionRule, PreventionStrategy, Threshold,
};
pub use system::{LoopIntervals, PreventionHandle, PreventionStatistics, PreventionSystem, RuleStatus};
pub use warnings::{EarlyWarning, WarningBoard, WarningLevel};
