/// Prevention rules and the action registry
///
/// A rule binds error types to a strategy, metric thresholds and an ordered list
/// of actions. Evaluating a rule only reads metrics; executing its actions goes
/// through the [`ActionRegistry`], a map from the fixed [`PreventionAction`] key
/// to a boxed handler built when the prevention system is constructed.
use super::metrics::{MetricKind, SystemMetrics};
use crate::error::ErrorType;
use crate::{SentinelError, SentinelResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreventionStrategy {
    Monitoring,
    CircuitBreaker,
    RateLimiting,
    HealthCheck,
}

/// Remediation step a rule can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreventionAction {
    CleanupDisk,
    RequestCacheClear,
    ReduceConcurrency,
    PauseNetwork,
    ThrottleRequests,
    NotifyOperators,
}

impl PreventionAction {
    pub const ALL: [PreventionAction; 6] = [
        PreventionAction::CleanupDisk,
        PreventionAction::RequestCacheClear,
        PreventionAction::ReduceConcurrency,
        PreventionAction::PauseNetwork,
        PreventionAction::ThrottleRequests,
        PreventionAction::NotifyOperators,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreventionAction::CleanupDisk => "cleanup_disk",
            PreventionAction::RequestCacheClear => "request_cache_clear",
            PreventionAction::ReduceConcurrency => "reduce_concurrency",
            PreventionAction::PauseNetwork => "pause_network",
            PreventionAction::ThrottleRequests => "throttle_requests",
            PreventionAction::NotifyOperators => "notify_operators",
        }
    }
}

impl fmt::Display for PreventionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger when `metric` exceeds `limit`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: MetricKind,
    pub limit: f64,
    /// Limit the rule was configured with; tightening never goes below a fraction of it
    #[serde(default)]
    pub baseline: f64,
}

impl Threshold {
    pub fn new(metric: MetricKind, limit: f64) -> Self {
        Self {
            metric,
            limit,
            baseline: limit,
        }
    }

    pub fn exceeded(&self, metrics: &SystemMetrics) -> bool {
        metrics.value(self.metric) > self.limit
    }

    /// Whether the metric is within `margin` (fraction) below the limit
    pub fn approaching(&self, metrics: &SystemMetrics, margin: f64) -> bool {
        let value = metrics.value(self.metric);
        value <= self.limit && value >= self.limit * (1.0 - margin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreventionRule {
    pub id: String,
    pub name: String,
    pub error_types: Vec<ErrorType>,
    pub strategy: PreventionStrategy,
    pub thresholds: Vec<Threshold>,
    pub actions: Vec<PreventionAction>,
    pub enabled: bool,
    pub cooldown_secs: u64,
    pub trigger_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_triggered: Option<DateTime<Utc>>,
    /// Set while analysis reports a concerning trend for one of the rule's types;
    /// halves the cooldown
    #[serde(default)]
    pub elevated: bool,
}

impl PreventionRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        strategy: PreventionStrategy,
        error_types: Vec<ErrorType>,
        thresholds: Vec<Threshold>,
        actions: Vec<PreventionAction>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            error_types,
            strategy,
            thresholds,
            actions,
            enabled: true,
            cooldown_secs: 0,
            trigger_count: 0,
            success_count: 0,
            failure_count: 0,
            last_triggered: None,
            elevated: false,
        }
    }

    pub fn with_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn effective_cooldown_secs(&self) -> u64 {
        if self.elevated {
            self.cooldown_secs / 2
        } else {
            self.cooldown_secs
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let cooldown = chrono::Duration::seconds(self.effective_cooldown_secs() as i64);
        self.last_triggered
            .map(|last| now - last < cooldown)
            .unwrap_or(false)
    }

    pub fn targets(&self, error_type: ErrorType) -> bool {
        self.error_types.contains(&error_type)
    }

    /// Enabled, out of cooldown and any threshold exceeded
    pub fn should_trigger(&self, metrics: &SystemMetrics, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.in_cooldown(now)
            && self.thresholds.iter().any(|t| t.exceeded(metrics))
    }

    pub fn record_execution(&mut self, success: bool, now: DateTime<Utc>) {
        self.trigger_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_triggered = Some(now);
    }

    pub fn success_rate(&self) -> f64 {
        if self.trigger_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.trigger_count as f64
    }

    /// Scale every limit by `factor` so the rule fires earlier
    /// Scale limits by `factor`, clamped at `floor_fraction` of each baseline
    ///
    /// Returns false when every threshold already sits at its floor.
    pub fn tighten(&mut self, factor: f64, floor_fraction: f64) -> bool {
        let mut changed = false;
        for threshold in &mut self.thresholds {
            let floor = threshold.baseline * floor_fraction;
            let next = (threshold.limit * factor).max(floor);
            if next < threshold.limit {
                threshold.limit = next;
                changed = true;
            }
        }
        changed
    }

    pub fn threshold_for(&self, metric: MetricKind) -> Option<f64> {
        self.thresholds
            .iter()
            .find(|t| t.metric == metric)
            .map(|t| t.limit)
    }
}

/// The five rules every instance starts with
pub fn builtin_rules(cooldown_secs: u64) -> Vec<PreventionRule> {
    use ErrorType::*;
    vec![
        PreventionRule::new(
            "disk_space_monitor",
            "Disk space monitor",
            PreventionStrategy::Monitoring,
            vec![DiskFull, IoError],
            vec![Threshold::new(MetricKind::DiskUsagePct, 85.0)],
            vec![PreventionAction::CleanupDisk, PreventionAction::RequestCacheClear],
        ),
        PreventionRule::new(
            "memory_monitor",
            "Memory monitor",
            PreventionStrategy::Monitoring,
            vec![MemoryError, ResourceExhausted],
            vec![Threshold::new(MetricKind::MemoryUsagePct, 90.0)],
            vec![PreventionAction::RequestCacheClear, PreventionAction::ReduceConcurrency],
        ),
        PreventionRule::new(
            "network_circuit_breaker",
            "Network circuit breaker",
            PreventionStrategy::CircuitBreaker,
            vec![ConnectionTimeout, ConnectionRefused, DnsResolutionFailed, NetworkUnreachable],
            // Five failures within the ten-minute network window
            vec![Threshold::new(MetricKind::NetworkFailures, 4.0)],
            vec![PreventionAction::PauseNetwork],
        ),
        PreventionRule::new(
            "rate_limiter",
            "Outbound rate limiter",
            PreventionStrategy::RateLimiting,
            vec![RateLimitExceeded],
            vec![Threshold::new(MetricKind::RequestsPerMinute, 60.0)],
            vec![PreventionAction::ThrottleRequests],
        ),
        PreventionRule::new(
            "health_check",
            "Health check",
            PreventionStrategy::HealthCheck,
            vec![ProcessCrashed, ConnectionTimeout],
            vec![
                Threshold::new(MetricKind::CpuUsagePct, 95.0),
                Threshold::new(MetricKind::LatencyMs, 5000.0),
            ],
            vec![PreventionAction::ReduceConcurrency, PreventionAction::NotifyOperators],
        ),
    ]
    .into_iter()
    .map(|rule| rule.with_cooldown(cooldown_secs))
    .collect()
}

/// Input passed to an action handler
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub rule_id: String,
    pub metrics: SystemMetrics,
    pub thresholds: Vec<Threshold>,
}

pub type ActionHandler = Box<dyn Fn(&ActionContext) -> SentinelResult<()> + Send + Sync>;

/// Fixed-key dispatch table for prevention actions
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<PreventionAction, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for `action`
    pub fn register(
        &mut self,
        action: PreventionAction,
        handler: impl Fn(&ActionContext) -> SentinelResult<()> + Send + Sync + 'static,
    ) {
        self.handlers.insert(action, Box::new(handler));
    }

    pub fn is_registered(&self, action: PreventionAction) -> bool {
        self.handlers.contains_key(&action)
    }

    pub fn execute(&self, action: PreventionAction, context: &ActionContext) -> SentinelResult<()> {
        match self.handlers.get(&action) {
            Some(handler) => handler(context),
            None => Err(SentinelError::ActionFailed {
                action: action.to_string(),
                reason: "no handler registered".to_string(),
            }),
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn disk_rule() -> PreventionRule {
        builtin_rules(300)
            .into_iter()
            .find(|r| r.id == "disk_space_monitor")
            .unwrap()
    }

    #[test]
    fn test_builtin_rule_thresholds() {
        let rules = builtin_rules(300);
        assert_eq!(rules.len(), 5);
        let limit = |id: &str, metric| {
            rules
                .iter()
                .find(|r| r.id == id)
                .and_then(|r| r.threshold_for(metric))
        };
        assert_eq!(limit("disk_space_monitor", MetricKind::DiskUsagePct), Some(85.0));
        assert_eq!(limit("memory_monitor", MetricKind::MemoryUsagePct), Some(90.0));
        assert_eq!(limit("rate_limiter", MetricKind::RequestsPerMinute), Some(60.0));
        assert_eq!(limit("health_check", MetricKind::CpuUsagePct), Some(95.0));
        assert_eq!(limit("health_check", MetricKind::LatencyMs), Some(5000.0));
    }

    #[test]
    fn test_network_breaker_fires_on_fifth_failure() {
        let rule = builtin_rules(0)
            .into_iter()
            .find(|r| r.id == "network_circuit_breaker")
            .unwrap();
        let mut metrics = SystemMetrics {
            network_failures: 4,
            ..SystemMetrics::default()
        };
        assert!(!rule.should_trigger(&metrics, Utc::now()));
        metrics.network_failures = 5;
        assert!(rule.should_trigger(&metrics, Utc::now()));
    }

    #[test]
    fn test_health_check_triggers_on_either_threshold() {
        let rule = builtin_rules(0)
            .into_iter()
            .find(|r| r.id == "health_check")
            .unwrap();
        let latency = SystemMetrics {
            avg_latency_ms: 6000.0,
            ..SystemMetrics::default()
        };
        let cpu = SystemMetrics {
            cpu_usage_pct: 97.0,
            ..SystemMetrics::default()
        };
        assert!(rule.should_trigger(&latency, Utc::now()));
        assert!(rule.should_trigger(&cpu, Utc::now()));
        assert!(!rule.should_trigger(&SystemMetrics::default(), Utc::now()));
    }

    #[test]
    fn test_cooldown_and_disabled_rules_do_not_trigger() {
        let mut rule = disk_rule();
        let metrics = SystemMetrics {
            disk_usage_pct: 92.0,
            ..SystemMetrics::default()
        };
        let now = Utc::now();
        assert!(rule.should_trigger(&metrics, now));

        rule.record_execution(true, now);
        assert!(!rule.should_trigger(&metrics, now + chrono::Duration::seconds(10)));
        assert!(rule.should_trigger(&metrics, now + chrono::Duration::seconds(301)));

        rule.enabled = false;
        assert!(!rule.should_trigger(&metrics, now + chrono::Duration::seconds(301)));
    }

    #[test]
    fn test_elevated_rule_halves_cooldown() {
        let mut rule = disk_rule();
        let now = Utc::now();
        rule.record_execution(true, now);
        assert!(rule.in_cooldown(now + chrono::Duration::seconds(200)));

        rule.elevated = true;
        assert_eq!(rule.effective_cooldown_secs(), 150);
        assert!(!rule.in_cooldown(now + chrono::Duration::seconds(200)));
    }

    #[test]
    fn test_tighten_scales_limits() {
        let mut rule = disk_rule();
        assert!(rule.tighten(0.9, 0.5));
        let limit = rule.threshold_for(MetricKind::DiskUsagePct).unwrap();
        assert!((limit - 76.5).abs() < 1e-9);
    }

    #[test]
    fn test_tighten_stops_at_floor() {
        let mut rule = disk_rule();
        for _ in 0..20 {
            rule.tighten(0.9, 0.5);
        }
        let limit = rule.threshold_for(MetricKind::DiskUsagePct).unwrap();
        assert!((limit - 42.5).abs() < 1e-9);
        assert!(!rule.tighten(0.9, 0.5));
    }

    #[test]
    fn test_threshold_approaching() {
        let threshold = Threshold::new(MetricKind::DiskUsagePct, 85.0);
        let near = SystemMetrics {
            disk_usage_pct: 80.0,
            ..SystemMetrics::default()
        };
        assert!(threshold.approaching(&near, 0.1));
        assert!(!threshold.approaching(&SystemMetrics::default(), 0.1));
    }

    #[test]
    fn test_registry_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register(PreventionAction::NotifyOperators, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let context = ActionContext {
            rule_id: "health_check".to_string(),
            metrics: SystemMetrics::default(),
            thresholds: Vec::new(),
        };
        registry
            .execute(PreventionAction::NotifyOperators, &context)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = registry
            .execute(PreventionAction::PauseNetwork, &context)
            .unwrap_err();
        assert!(matches!(err, SentinelError::ActionFailed { .. }));
    }
}
