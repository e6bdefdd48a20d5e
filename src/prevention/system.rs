/// Prevention system: rule evaluation, early warnings and learning
///
/// Three loops run on the tokio runtime once [`PreventionSystem::start`] is
/// called. Cycles execute on the blocking pool. Each loop catches its own
/// errors and panics, doubles its interval
/// while failing (capped by `max_backoff_factor`), and exits when the
/// [`PreventionHandle`] is shut down.
///
/// ```text
///   MetricsProvider ──► evaluate_rules ──► ActionRegistry ──► PreventionControls
///   ErrorHistorySource ─► update_warnings ─► ErrorAnalyzer ──► WarningBoard
///                         run_learning ───► LearningStore (SQLite)
/// ```
///
/// The history source is only read; recovery state is never modified here.
use super::controls::{ControlsSnapshot, PreventionControls};
use super::learning::{learn, LearningOutcome, LearningRecord, LearningStore, LEARNING_DB_FILE};
use super::metrics::{MetricKind, MetricsProvider, SysinfoMetrics, SystemMetrics, NETWORK_WINDOW};
use super::rules::{
    builtin_rules, ActionContext, ActionRegistry, PreventionAction, PreventionRule,
};
use super::warnings::{warnings_from_analysis, warnings_from_metrics, EarlyWarning, WarningBoard};
use crate::analysis::ErrorAnalyzer;
use crate::error::{ErrorCategory, ErrorHistorySource, StorageHandler};
use crate::error::handlers::StatvfsProbe;
use crate::settings::{AnalyzerConfig, PreventionConfig, SentinelConfig};
use crate::{SentinelError, SentinelResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long the network-pause action holds outbound work
const NETWORK_PAUSE: Duration = Duration::from_secs(60);
const DEFAULT_THROTTLE_RPM: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Rules,
    Warnings,
    Learning,
}

impl LoopKind {
    pub const ALL: [LoopKind; 3] = [LoopKind::Rules, LoopKind::Warnings, LoopKind::Learning];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Rules => "rule_evaluation",
            LoopKind::Warnings => "early_warnings",
            LoopKind::Learning => "learning",
        }
    }
}

/// Base period of each loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopIntervals {
    pub rules: Duration,
    pub warnings: Duration,
    pub learning: Duration,
}

impl LoopIntervals {
    pub fn from_config(config: &PreventionConfig) -> Self {
        Self {
            rules: Duration::from_secs(config.rule_interval_secs),
            warnings: Duration::from_secs(config.warning_interval_secs),
            learning: Duration::from_secs(config.learning_interval_secs),
        }
    }

    pub fn uniform(interval: Duration) -> Self {
        Self {
            rules: interval,
            warnings: interval,
            learning: interval,
        }
    }

    fn for_loop(&self, kind: LoopKind) -> Duration {
        match kind {
            LoopKind::Rules => self.rules,
            LoopKind::Warnings => self.warnings,
            LoopKind::Learning => self.learning,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub elevated: bool,
    pub trigger_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub effectiveness: Option<f64>,
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreventionStatistics {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub rules: Vec<RuleStatus>,
    pub rule_cycles: u64,
    pub warning_cycles: u64,
    pub learning_cycles: u64,
    pub loop_failures: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub warnings_issued: u64,
    pub active_warnings: usize,
    pub controls: ControlsSnapshot,
    pub last_metrics: Option<SystemMetrics>,
}

#[derive(Debug, Default)]
struct Counters {
    rule_cycles: AtomicU64,
    warning_cycles: AtomicU64,
    learning_cycles: AtomicU64,
    loop_failures: AtomicU64,
    actions_executed: AtomicU64,
    actions_failed: AtomicU64,
    warnings_issued: AtomicU64,
}

/// Handlers for every [`PreventionAction`], publishing through `controls`
fn default_registry(controls: Arc<PreventionControls>, storage: Arc<StorageHandler>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(PreventionAction::CleanupDisk, cleanup_action(storage));

    let c = Arc::clone(&controls);
    registry.register(PreventionAction::RequestCacheClear, move |_| {
        c.request_cache_clear();
        Ok(())
    });

    let c = Arc::clone(&controls);
    registry.register(PreventionAction::ReduceConcurrency, move |_| {
        c.reduce_concurrency(num_cpus::get());
        Ok(())
    });

    let c = Arc::clone(&controls);
    registry.register(PreventionAction::PauseNetwork, move |_| {
        c.pause_network(NETWORK_PAUSE);
        Ok(())
    });

    let c = Arc::clone(&controls);
    registry.register(PreventionAction::ThrottleRequests, move |ctx| {
        let limit = ctx
            .thresholds
            .iter()
            .find(|t| t.metric == MetricKind::RequestsPerMinute)
            .map(|t| t.limit)
            .unwrap_or(DEFAULT_THROTTLE_RPM);
        c.throttle(limit.max(1.0) as u32);
        Ok(())
    });

    registry.register(PreventionAction::NotifyOperators, |ctx| {
        tracing::error!(
            rule_id = %ctx.rule_id,
            cpu_usage_pct = ctx.metrics.cpu_usage_pct,
            avg_latency_ms = ctx.metrics.avg_latency_ms,
            "Prevention rule requires operator attention"
        );
        Ok(())
    });

    registry
}

fn cleanup_action(
    storage: Arc<StorageHandler>,
) -> impl Fn(&ActionContext) -> SentinelResult<()> + Send + Sync + 'static {
    move |_: &ActionContext| {
        let report = storage.run_cleanup();
        if report.target_met {
            Ok(())
        } else {
            Err(SentinelError::ActionFailed {
                action: PreventionAction::CleanupDisk.to_string(),
                reason: format!(
                    "freed {} bytes across {} entries, below target",
                    report.freed_bytes, report.removed_entries
                ),
            })
        }
    }
}

/// Prevention system - one per worker process
pub struct PreventionSystem {
    config: PreventionConfig,
    analyzer_config: AnalyzerConfig,
    intervals: LoopIntervals,
    rules: Mutex<Vec<PreventionRule>>,
    registry: ActionRegistry,
    controls: Arc<PreventionControls>,
    metrics: Arc<dyn MetricsProvider>,
    history: Arc<dyn ErrorHistorySource>,
    warnings: Mutex<WarningBoard>,
    learning: Mutex<HashMap<String, LearningRecord>>,
    store: Option<LearningStore>,
    last_metrics: Mutex<Option<SystemMetrics>>,
    counters: Counters,
}

impl PreventionSystem {
    /// Build the system with the built-in rules and restore persisted learning
    pub fn new(
        config: &SentinelConfig,
        metrics: Arc<dyn MetricsProvider>,
        history: Arc<dyn ErrorHistorySource>,
    ) -> Self {
        Self::build(config, metrics, history, Arc::new(PreventionControls::new()))
    }

    /// Host metrics from `sysinfo` and `statvfs`, traffic from the shared controls
    pub fn for_host(config: &SentinelConfig, history: Arc<dyn ErrorHistorySource>) -> Self {
        let controls = Arc::new(PreventionControls::new());
        let metrics = SysinfoMetrics::new(Arc::new(StatvfsProbe), config.storage.watch_path.clone())
            .with_traffic(Arc::clone(&controls));
        Self::build(config, Arc::new(metrics), history, controls)
    }

    fn build(
        config: &SentinelConfig,
        metrics: Arc<dyn MetricsProvider>,
        history: Arc<dyn ErrorHistorySource>,
        controls: Arc<PreventionControls>,
    ) -> Self {
        let prevention = config.prevention.clone();
        let storage = Arc::new(StorageHandler::new(config.storage.clone()));
        let registry = default_registry(Arc::clone(&controls), storage);

        let store = if prevention.persist_learning {
            let path = config.instance_dir().join(LEARNING_DB_FILE);
            match LearningStore::open(&path) {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Learning store unavailable; learning will not persist");
                    None
                }
            }
        } else {
            None
        };

        let mut rules = builtin_rules(prevention.rule_cooldown_secs);
        let mut learning = HashMap::new();
        if let Some(store) = &store {
            match store.load_all() {
                Ok(records) => {
                    for record in records {
                        if let Some(rule) = rules.iter_mut().find(|r| r.id == record.rule_id) {
                            record.apply_to(rule);
                        }
                        learning.insert(record.rule_id.clone(), record);
                    }
                    tracing::debug!(records = learning.len(), "Restored rule learning state");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load learning records; starting fresh");
                }
            }
        }

        let info_auto_ack = chrono::Duration::minutes(prevention.info_auto_ack_minutes);

        Self {
            intervals: LoopIntervals::from_config(&prevention),
            analyzer_config: config.analysis.clone(),
            rules: Mutex::new(rules),
            registry,
            controls,
            metrics,
            history,
            warnings: Mutex::new(WarningBoard::new(info_auto_ack)),
            learning: Mutex::new(learning),
            store,
            last_metrics: Mutex::new(None),
            counters: Counters::default(),
            config: prevention,
        }
    }

    pub fn with_intervals(mut self, intervals: LoopIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Replace the handler for one action
    pub fn with_action(
        mut self,
        action: PreventionAction,
        handler: impl Fn(&ActionContext) -> SentinelResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.registry.register(action, handler);
        self
    }

    /// Run disk cleanup through a shared storage handler
    pub fn with_storage_handler(mut self, storage: Arc<StorageHandler>) -> Self {
        self.registry
            .register(PreventionAction::CleanupDisk, cleanup_action(storage));
        self
    }

    pub fn controls(&self) -> &Arc<PreventionControls> {
        &self.controls
    }

    pub fn rules(&self) -> Vec<PreventionRule> {
        self.rules.lock().clone()
    }

    /// Evaluate every rule once and run the actions of those that trigger.
    /// Returns the ids of triggered rules.
    pub fn evaluate_rules(&self, now: DateTime<Utc>) -> SentinelResult<Vec<String>> {
        let mut metrics = self.metrics.collect()?;

        // Classified network errors count alongside failures workers reported directly
        let cutoff = now - chrono::Duration::seconds(NETWORK_WINDOW.as_secs() as i64);
        let recent_network = self
            .history
            .error_history()
            .iter()
            .filter(|e| e.category == ErrorCategory::Network && e.timestamp >= cutoff)
            .count() as u32;
        metrics.network_failures = metrics.network_failures.max(recent_network);
        *self.last_metrics.lock() = Some(metrics);

        let mut triggered = Vec::new();
        let mut rules = self.rules.lock();
        for rule in rules.iter_mut() {
            if !rule.should_trigger(&metrics, now) {
                continue;
            }

            let context = ActionContext {
                rule_id: rule.id.clone(),
                metrics,
                thresholds: rule.thresholds.clone(),
            };
            let mut success = true;
            for action in &rule.actions {
                match self.registry.execute(*action, &context) {
                    Ok(()) => {
                        self.counters.actions_executed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        success = false;
                        self.counters.actions_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(rule_id = %rule.id, action = %action, error = %e, "Prevention action failed");
                    }
                }
            }

            rule.record_execution(success, now);
            tracing::info!(rule_id = %rule.id, success = success, "Prevention rule triggered");
            triggered.push(rule.id.clone());
        }

        Ok(triggered)
    }

    /// Analyze the error history, raise warnings and mark rules whose error
    /// types are trending up. Returns the number of new warnings.
    pub fn update_warnings(&self, now: DateTime<Utc>) -> usize {
        let history = self.history.error_history();
        let mut analyzer = ErrorAnalyzer::new(self.analyzer_config.clone());
        analyzer.perform_comprehensive_analysis(&history, now);

        let ttl = chrono::Duration::hours(self.config.warning_ttl_hours);
        let mut candidates = warnings_from_analysis(&analyzer, now, ttl);

        let metrics = match self.metrics.collect() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics unavailable for early warnings");
                None
            }
        };

        {
            let concerning = analyzer.concerning_trends();
            let mut rules = self.rules.lock();
            for rule in rules.iter_mut() {
                let elevated = concerning.iter().any(|t| rule.targets(t.error_type));
                if elevated != rule.elevated {
                    tracing::debug!(rule_id = %rule.id, elevated = elevated, "Rule elevation changed");
                }
                rule.elevated = elevated;
            }
            if let Some(metrics) = &metrics {
                candidates.extend(warnings_from_metrics(metrics, &rules, now, ttl));
            }
        }

        let mut board = self.warnings.lock();
        let issued = candidates
            .into_iter()
            .map(|warning| board.issue(warning))
            .filter(|new| *new)
            .count();
        let sweep = board.sweep(now);
        if sweep.expired > 0 || sweep.auto_acknowledged > 0 {
            tracing::debug!(
                expired = sweep.expired,
                auto_acknowledged = sweep.auto_acknowledged,
                "Warning board swept"
            );
        }

        self.counters
            .warnings_issued
            .fetch_add(issued as u64, Ordering::Relaxed);
        issued
    }

    /// Update rule effectiveness and persist the records that changed
    pub fn run_learning(&self, now: DateTime<Utc>) -> LearningOutcome {
        let (outcome, changed) = {
            let mut rules = self.rules.lock();
            let mut records = self.learning.lock();
            let outcome = learn(&mut rules, &mut records, &self.config, now);
            let changed: Vec<LearningRecord> = outcome
                .observed
                .iter()
                .filter_map(|id| records.get(id).cloned())
                .collect();
            (outcome, changed)
        };

        if let Some(store) = &self.store {
            for record in &changed {
                if let Err(e) = store.save(record) {
                    tracing::warn!(rule_id = %record.rule_id, error = %e, "Failed to persist learning record");
                }
            }
        }

        outcome
    }

    fn run_cycle(&self, kind: LoopKind) -> SentinelResult<()> {
        let now = Utc::now();
        match kind {
            LoopKind::Rules => {
                self.evaluate_rules(now)?;
                self.counters.rule_cycles.fetch_add(1, Ordering::Relaxed);
            }
            LoopKind::Warnings => {
                self.update_warnings(now);
                self.counters.warning_cycles.fetch_add(1, Ordering::Relaxed);
            }
            LoopKind::Learning => {
                self.run_learning(now);
                self.counters.learning_cycles.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Spawn the three loops; they run until the handle is shut down
    pub fn start(self: &Arc<Self>) -> PreventionHandle {
        let (shutdown, receiver) = watch::channel(false);
        let tasks = LoopKind::ALL
            .iter()
            .map(|kind| {
                let system = Arc::clone(self);
                let receiver = receiver.clone();
                let kind = *kind;
                tokio::spawn(async move { system.run_loop(kind, receiver).await })
            })
            .collect();

        tracing::info!(
            rules = %humantime::format_duration(self.intervals.rules),
            warnings = %humantime::format_duration(self.intervals.warnings),
            learning = %humantime::format_duration(self.intervals.learning),
            "Prevention loops started"
        );

        PreventionHandle { shutdown, tasks }
    }

    async fn run_loop(self: Arc<Self>, kind: LoopKind, mut shutdown: watch::Receiver<bool>) {
        let base = self.intervals.for_loop(kind);
        let max_factor = self.config.max_backoff_factor.max(1);
        let mut factor: u32 = 1;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(base * factor) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            // Metrics collection, disk cleanup and SQLite writes all block
            let system = Arc::clone(&self);
            let failure = match tokio::task::spawn_blocking(move || system.run_cycle(kind)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) if e.is_panic() => Some("panicked".to_string()),
                Err(e) => Some(e.to_string()),
            };

            match failure {
                None => factor = 1,
                Some(reason) => {
                    self.counters.loop_failures.fetch_add(1, Ordering::Relaxed);
                    factor = (factor * 2).min(max_factor);
                    tracing::warn!(
                        loop_name = kind.as_str(),
                        error = %reason,
                        next_interval = %humantime::format_duration(base * factor),
                        "Prevention loop cycle failed"
                    );
                }
            }
        }

        tracing::debug!(loop_name = kind.as_str(), "Prevention loop stopped");
    }

    pub fn active_warnings(&self) -> Vec<EarlyWarning> {
        self.warnings.lock().active(Utc::now())
    }

    pub fn acknowledge_warning(&self, id: &str) -> bool {
        self.warnings.lock().acknowledge(id, Utc::now())
    }

    pub fn prevention_statistics(&self) -> PreventionStatistics {
        let rules = self.rules.lock();
        let learning = self.learning.lock();

        let statuses: Vec<RuleStatus> = rules
            .iter()
            .map(|rule| RuleStatus {
                id: rule.id.clone(),
                name: rule.name.clone(),
                enabled: rule.enabled,
                elevated: rule.elevated,
                trigger_count: rule.trigger_count,
                success_count: rule.success_count,
                failure_count: rule.failure_count,
                success_rate: rule.success_rate(),
                effectiveness: learning.get(&rule.id).and_then(|r| r.effectiveness),
                last_triggered: rule.last_triggered,
            })
            .collect();

        PreventionStatistics {
            total_rules: statuses.len(),
            enabled_rules: statuses.iter().filter(|s| s.enabled).count(),
            rules: statuses,
            rule_cycles: self.counters.rule_cycles.load(Ordering::Relaxed),
            warning_cycles: self.counters.warning_cycles.load(Ordering::Relaxed),
            learning_cycles: self.counters.learning_cycles.load(Ordering::Relaxed),
            loop_failures: self.counters.loop_failures.load(Ordering::Relaxed),
            actions_executed: self.counters.actions_executed.load(Ordering::Relaxed),
            actions_failed: self.counters.actions_failed.load(Ordering::Relaxed),
            warnings_issued: self.counters.warnings_issued.load(Ordering::Relaxed),
            active_warnings: self.warnings.lock().active(Utc::now()).len(),
            controls: self.controls.snapshot(),
            last_metrics: *self.last_metrics.lock(),
        }
    }
}

/// Owner of the running prevention loops
pub struct PreventionHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PreventionHandle {
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Signal every loop to stop and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Prevention loop did not exit cleanly");
            }
        }
        tracing::info!("Prevention loops stopped");
    }
}
