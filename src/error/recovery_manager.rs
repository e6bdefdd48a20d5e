/// Recovery manager - classifies, gates, recovers and records worker failures
///
/// This module provides the orchestration layer that:
/// - Classifies failures into [`ProcessingError`]s
/// - Fails fast through per-type circuit breakers
/// - Selects a strategy and delegates to the category handlers
/// - Keeps the active-error map, a bounded history and the durable log
///
/// All mutable state lives behind one reentrant lock. Recovery attempts sleep and
/// do I/O, so they always run with the lock released; a per-error in-flight set
/// keeps attempt N+1 from starting before attempt N is recorded.
use super::classification::{ErrorClassifier, ErrorContext, Failure, ProcessingError};
use super::error_log::{ErrorLog, ManualLedger};
use super::handlers::{
    HandlerOutcome, NetworkHandler, PdfBackend, PdfHandler, SpaceProbe, StorageHandler,
};
use super::retry::{breaker_open_reason, BreakerBoard, BreakerDecision, BreakerSnapshot, ExponentialBackoff};
use super::strategy::{RecoveryOutcome, RecoveryStrategy, StrategySelector};
use super::taxonomy::{ErrorCategory, ErrorType, Severity};
use crate::settings::SentinelConfig;
use crate::SentinelResult;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const ESCALATION_CHANNEL_CAPACITY: usize = 64;

/// Run a synchronous handler on the blocking pool; a panic becomes an unrecovered outcome
async fn run_blocking_handler<F>(handler: F) -> HandlerOutcome
where
    F: FnOnce() -> HandlerOutcome + Send + 'static,
{
    match tokio::task::spawn_blocking(handler).await {
        Ok(outcome) => outcome,
        Err(e) => HandlerOutcome::Unrecovered(format!("handler task failed: {}", e)),
    }
}

/// Read-only access to an error history snapshot
pub trait ErrorHistorySource: Send + Sync {
    fn error_history(&self) -> Vec<ProcessingError>;
}

impl ErrorHistorySource for Vec<ProcessingError> {
    fn error_history(&self) -> Vec<ProcessingError> {
        self.clone()
    }
}

impl ErrorHistorySource for ErrorLog {
    fn error_history(&self) -> Vec<ProcessingError> {
        self.load().unwrap_or_else(|e| {
            tracing::warn!(path = %self.path().display(), error = %e, "Error log unreadable");
            Vec::new()
        })
    }
}

/// Aggregate over a time window of the error history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub window_hours: f64,
    pub total_errors: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub resolved: usize,
    pub unresolved: usize,
    pub rate_per_hour: f64,
    pub top_messages: Vec<(String, usize)>,
}

impl ErrorSummary {
    pub fn from_errors(
        errors: &[ProcessingError],
        window: chrono::Duration,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Self {
        let cutoff = now - window;
        let mut summary = ErrorSummary {
            window_hours: window.num_seconds() as f64 / 3600.0,
            ..Default::default()
        };
        let mut messages: HashMap<&str, usize> = HashMap::new();

        for error in errors.iter().filter(|e| e.timestamp >= cutoff) {
            summary.total_errors += 1;
            *summary
                .by_category
                .entry(error.category.to_string())
                .or_default() += 1;
            *summary
                .by_severity
                .entry(error.severity.to_string())
                .or_default() += 1;
            *summary.by_type.entry(error.error_type.to_string()).or_default() += 1;
            if error.is_resolved {
                summary.resolved += 1;
            } else {
                summary.unresolved += 1;
            }
            *messages.entry(error.message.as_str()).or_default() += 1;
        }

        if summary.window_hours > 0.0 {
            summary.rate_per_hour = summary.total_errors as f64 / summary.window_hours;
        }

        let mut top: Vec<(String, usize)> = messages
            .into_iter()
            .map(|(message, count)| (message.to_string(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(top_n);
        summary.top_messages = top;

        summary
    }
}

/// Aggregate for one `retry_failed_operations` batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_by_breaker: usize,
    pub resolution_methods: BTreeMap<String, usize>,
}

impl RecoveryReport {
    fn start() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped_by_breaker: 0,
            resolution_methods: BTreeMap::new(),
        }
    }

    fn finish(&mut self) {
        let finished = Utc::now();
        self.duration_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);
    }
}

/// Counters and breakdowns for introspection
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub active_errors: usize,
    pub history_size: usize,
    pub resolved: u64,
    pub unrecoverable: u64,
    pub failed_attempts: u64,
    pub breaker_rejections: u64,
    pub escalations: u64,
    pub handler_invocations: u64,
    pub by_category: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub resolution_methods: BTreeMap<String, u64>,
    pub circuit_breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    resolved: u64,
    unrecoverable: u64,
    failed_attempts: u64,
    breaker_rejections: u64,
    by_method: BTreeMap<String, u64>,
}

struct ManagerState {
    active: HashMap<String, ProcessingError>,
    history: VecDeque<ProcessingError>,
    breakers: BreakerBoard,
    in_flight: HashSet<String>,
    counters: Counters,
}

impl ManagerState {
    fn sync_history(&mut self, error: &ProcessingError) {
        if let Some(entry) = self.history.iter_mut().rev().find(|e| e.id == error.id) {
            *entry = error.clone();
        }
    }
}

/// Recovery manager - one per worker process
pub struct RecoveryManager {
    config: SentinelConfig,
    classifier: ErrorClassifier,
    selector: StrategySelector,
    backoff: ExponentialBackoff,
    state: ReentrantMutex<RefCell<ManagerState>>,
    network: NetworkHandler,
    pdf: Arc<PdfHandler>,
    storage: Arc<StorageHandler>,
    error_log: Option<Arc<ErrorLog>>,
    ledger: Option<Arc<ManualLedger>>,
    escalations: broadcast::Sender<ProcessingError>,
    escalation_count: AtomicU64,
    handler_invocations: AtomicU64,
}

impl RecoveryManager {
    /// Create a manager with the default handlers for `config`
    pub fn new(config: SentinelConfig) -> SentinelResult<Self> {
        let instance_dir = config.instance_dir();
        let (error_log, ledger) = if config.recovery.persist {
            (
                Some(Arc::new(ErrorLog::new(
                    &instance_dir,
                    config.recovery.log_capacity,
                    config.recovery.history_retention_days,
                ))),
                Some(Arc::new(ManualLedger::new(&instance_dir))),
            )
        } else {
            (None, None)
        };

        let (escalations, _) = broadcast::channel(ESCALATION_CHANNEL_CAPACITY);

        Ok(Self {
            classifier: ErrorClassifier::new(config.recovery.max_recovery_attempts),
            selector: StrategySelector::from_config(&config.recovery),
            backoff: ExponentialBackoff::from_config(&config.recovery.backoff),
            state: ReentrantMutex::new(RefCell::new(ManagerState {
                active: HashMap::new(),
                history: VecDeque::new(),
                breakers: BreakerBoard::new(
                    config.recovery.breaker_failure_threshold,
                    config.recovery.breaker_cooldown(),
                ),
                in_flight: HashSet::new(),
                counters: Counters::default(),
            })),
            network: NetworkHandler::new(config.network.clone())?,
            pdf: Arc::new(PdfHandler::new(
                config.instance.clone(),
                config.quarantine_root(),
                config.pdf.clone(),
            )),
            storage: Arc::new(StorageHandler::new(config.storage.clone())),
            error_log,
            ledger,
            escalations,
            escalation_count: AtomicU64::new(0),
            handler_invocations: AtomicU64::new(0),
            config,
        })
    }

    /// Swap the PDF parsing backend
    pub fn with_pdf_backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.pdf = Arc::new(PdfHandler::with_backend(
            self.config.instance.clone(),
            self.config.quarantine_root(),
            self.config.pdf.clone(),
            backend,
        ));
        self
    }

    /// Swap the free-space probe
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.storage = Arc::new(StorageHandler::with_probe(self.config.storage.clone(), probe));
        self
    }

    /// Override the breaker cooldown (finer than the configured seconds)
    pub fn with_breaker_cooldown(self, cooldown: Duration) -> Self {
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.breakers = BreakerBoard::new(self.config.recovery.breaker_failure_threshold, cooldown);
        }
        self
    }

    pub fn with_strategy_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn network_handler(&self) -> &NetworkHandler {
        &self.network
    }

    pub fn pdf_handler(&self) -> &PdfHandler {
        &self.pdf
    }

    pub fn storage_handler(&self) -> &StorageHandler {
        &self.storage
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Classify a failure, gate it through the breaker and attempt recovery
    pub async fn handle_error(
        &self,
        failure: &Failure,
        context: ErrorContext,
        error_type: Option<ErrorType>,
        severity: Option<Severity>,
    ) -> ProcessingError {
        let mut error = self
            .classifier
            .classify(failure, context, error_type, severity);

        tracing::warn!(
            error_id = %error.id,
            error_type = %error.error_type,
            category = %error.category,
            severity = %error.severity,
            operation = %error.context.operation,
            message = %error.message,
            "Error captured"
        );

        let capacity = self.config.recovery.history_capacity.max(1);
        let decision = self.with_state(|state| {
            state.counters.total += 1;
            state.active.insert(error.id.clone(), error.clone());
            state.history.push_back(error.clone());
            while state.history.len() > capacity {
                state.history.pop_front();
            }

            let decision = state.breakers.check(error.error_type, Instant::now());
            if let BreakerDecision::Reject { remaining } = decision {
                state.counters.breaker_rejections += 1;
                error.mark_unrecoverable(breaker_open_reason(error.error_type, remaining));
                state.active.remove(&error.id);
                state.sync_history(&error);
            }
            decision
        });

        if let BreakerDecision::Reject { remaining } = decision {
            tracing::warn!(
                error_id = %error.id,
                error_type = %error.error_type,
                remaining = %humantime::format_duration(Duration::from_secs(remaining.as_secs())),
                "Circuit breaker open, failing fast"
            );
            self.persist(&error).await;
            return error;
        }

        let strategy = self.selector.select(&error);
        let routed_to_human = matches!(strategy, RecoveryStrategy::Escalate | RecoveryStrategy::Manual);

        let attempted = if error.can_retry() || routed_to_human {
            match self.attempt_recovery(&error.id, strategy).await {
                Some(updated) => {
                    error = updated;
                    true
                }
                None => false,
            }
        } else {
            self.with_state(|state| {
                state.active.remove(&error.id);
            });
            tracing::debug!(error_id = %error.id, "Error not eligible for recovery");
            false
        };

        if decision == BreakerDecision::Probe && !attempted {
            self.release_probe(error.error_type);
        }

        self.persist(&error).await;
        error
    }

    /// Re-run recovery for up to `max` retryable active errors, oldest first
    pub async fn retry_failed_operations(&self, max: usize) -> RecoveryReport {
        let mut report = RecoveryReport::start();

        let mut candidates: Vec<(DateTime<Utc>, String, ErrorType)> = self.with_state(|state| {
            state
                .active
                .values()
                .filter(|e| e.can_retry() && !state.in_flight.contains(&e.id))
                .map(|e| (e.timestamp, e.id.clone(), e.error_type))
                .collect()
        });
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        candidates.truncate(max);

        for (_, id, error_type) in candidates {
            // Another caller may have finished this error since the candidate scan
            let Some(error) = self.with_state(|state| state.active.get(&id).cloned()) else {
                continue;
            };

            let decision = self.with_state(|state| {
                let decision = state.breakers.check(error_type, Instant::now());
                if matches!(decision, BreakerDecision::Reject { .. }) {
                    state.counters.breaker_rejections += 1;
                }
                decision
            });
            if matches!(decision, BreakerDecision::Reject { .. }) {
                report.skipped_by_breaker += 1;
                continue;
            }

            let strategy = self.selector.select(&error);
            let Some(updated) = self.attempt_recovery(&id, strategy).await else {
                if decision == BreakerDecision::Probe {
                    self.release_probe(error_type);
                }
                continue;
            };
            self.persist(&updated).await;

            report.processed += 1;
            match updated.resolution_method {
                Some(method) if updated.is_resolved => {
                    report.succeeded += 1;
                    *report
                        .resolution_methods
                        .entry(method.to_string())
                        .or_default() += 1;
                }
                _ => report.failed += 1,
            }
        }

        report.finish();
        tracing::info!(
            session_id = %report.session_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_by_breaker = report.skipped_by_breaker,
            "Retry batch finished"
        );
        report
    }

    fn release_probe(&self, error_type: ErrorType) {
        self.with_state(|state| state.breakers.release_probe(error_type));
        tracing::debug!(error_type = %error_type, "Breaker probe released without an attempt");
    }

    /// One recovery attempt; `None` when the error is unknown or already in flight
    async fn attempt_recovery(
        &self,
        error_id: &str,
        strategy: RecoveryStrategy,
    ) -> Option<ProcessingError> {
        let snapshot = self.with_state(|state| {
            if state.in_flight.contains(error_id) {
                return None;
            }
            let error = state.active.get_mut(error_id)?;
            error.begin_attempt();
            let snapshot = error.clone();
            state.in_flight.insert(error_id.to_string());
            state.sync_history(&snapshot);
            Some(snapshot)
        })?;

        tracing::debug!(
            error_id = %snapshot.id,
            strategy = %strategy,
            attempt = snapshot.recovery_attempts,
            max_attempts = snapshot.max_recovery_attempts,
            "Attempting recovery"
        );

        let outcome = match AssertUnwindSafe(self.execute_strategy(strategy, &snapshot))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(error_id = %snapshot.id, strategy = %strategy, "Recovery attempt panicked");
                RecoveryOutcome::Failed {
                    reason: "recovery attempt panicked".to_string(),
                }
            }
        };

        Some(self.record_outcome(snapshot, &outcome))
    }

    fn record_outcome(&self, mut error: ProcessingError, outcome: &RecoveryOutcome) -> ProcessingError {
        let now = Instant::now();

        self.with_state(|state| {
            if let Some(current) = state.active.get(&error.id) {
                error = current.clone();
            }

            match outcome.resolution_method() {
                Some(method) => {
                    error.mark_resolved(method, outcome.detail());
                    state.breakers.record_success(error.error_type);
                    state.counters.resolved += 1;
                    *state
                        .counters
                        .by_method
                        .entry(method.to_string())
                        .or_default() += 1;
                }
                None if outcome.is_terminal_failure() => {
                    error.mark_unrecoverable(outcome.detail().unwrap_or_default());
                    state.breakers.record_failure(error.error_type, now);
                    state.counters.unrecoverable += 1;
                }
                None => {
                    error.resolution_detail = outcome.detail();
                    state.breakers.record_failure(error.error_type, now);
                    state.counters.failed_attempts += 1;
                }
            }

            state.in_flight.remove(&error.id);
            if error.can_retry() {
                state.active.insert(error.id.clone(), error.clone());
            } else {
                state.active.remove(&error.id);
            }
            state.sync_history(&error);
        });

        match outcome {
            RecoveryOutcome::Failed { reason } => tracing::warn!(
                error_id = %error.id,
                error_type = %error.error_type,
                attempt = error.recovery_attempts,
                reason = %reason,
                "Recovery attempt failed"
            ),
            _ if error.is_resolved => tracing::info!(
                error_id = %error.id,
                error_type = %error.error_type,
                method = ?error.resolution_method,
                "Error resolved"
            ),
            _ => {}
        }

        error
    }

    async fn execute_strategy(
        &self,
        strategy: RecoveryStrategy,
        error: &ProcessingError,
    ) -> RecoveryOutcome {
        match strategy {
            RecoveryStrategy::Retry => self.execute_retry(error).await,
            RecoveryStrategy::Skip => self.execute_skip(error).await,
            RecoveryStrategy::Fallback => {
                match self.config.recovery.fallback_routes.get(error.category.as_str()) {
                    Some(route) => {
                        tracing::info!(error_id = %error.id, route = %route, "Falling back to alternate route");
                        RecoveryOutcome::FellBack {
                            route: route.clone(),
                        }
                    }
                    None => {
                        tracing::debug!(category = %error.category, "No fallback route, degrading to retry");
                        self.execute_retry(error).await
                    }
                }
            }
            RecoveryStrategy::Escalate => {
                self.escalation_count.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error_id = %error.id,
                    error_type = %error.error_type,
                    severity = %error.severity,
                    instance = %error.instance,
                    operation = %error.context.operation,
                    message = %error.message,
                    "Error escalated"
                );
                // No subscribers is fine
                let _ = self.escalations.send(error.clone());
                RecoveryOutcome::Escalated
            }
            RecoveryStrategy::Manual => {
                if let Some(ledger) = &self.ledger {
                    let ledger = Arc::clone(ledger);
                    let entry = error.clone();
                    let appended = tokio::task::spawn_blocking(move || {
                        ledger.append(&entry, "manual intervention required")
                    })
                    .await;
                    match appended {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(error_id = %error.id, error = %e, "Failed to append manual intervention");
                        }
                        Err(e) => {
                            tracing::warn!(error_id = %error.id, error = %e, "Manual ledger task failed");
                        }
                    }
                }
                tracing::warn!(
                    error_id = %error.id,
                    error_type = %error.error_type,
                    "Manual intervention required"
                );
                RecoveryOutcome::ManualRequired
            }
        }
    }

    async fn execute_retry(&self, error: &ProcessingError) -> RecoveryOutcome {
        // The network handler sleeps on its own schedule
        if error.category != ErrorCategory::Network {
            let delay = self.backoff.delay(error.recovery_attempts);
            tracing::debug!(error_id = %error.id, delay_ms = delay.as_millis() as u64, "Backing off before recovery");
            tokio::time::sleep(delay).await;
        }

        let outcome = match error.category {
            ErrorCategory::Network => {
                self.handler_invocations.fetch_add(1, Ordering::Relaxed);
                self.network.handle(error).await
            }
            ErrorCategory::PdfProcessing => {
                self.handler_invocations.fetch_add(1, Ordering::Relaxed);
                let pdf = Arc::clone(&self.pdf);
                let error = error.clone();
                run_blocking_handler(move || pdf.handle(&error)).await
            }
            ErrorCategory::Storage => {
                self.handler_invocations.fetch_add(1, Ordering::Relaxed);
                let storage = Arc::clone(&self.storage);
                let error = error.clone();
                run_blocking_handler(move || storage.handle(&error)).await
            }
            _ => {
                return RecoveryOutcome::Retried {
                    detail: "no specialized handler; retry signalled".to_string(),
                }
            }
        };

        match outcome {
            HandlerOutcome::Recovered(detail) => RecoveryOutcome::Retried { detail },
            HandlerOutcome::Quarantined(path) => RecoveryOutcome::Skipped {
                detail: Some(path.display().to_string()),
            },
            HandlerOutcome::Unrecovered(reason) => RecoveryOutcome::Failed { reason },
        }
    }

    async fn execute_skip(&self, error: &ProcessingError) -> RecoveryOutcome {
        let mut detail = None;

        let has_input = error
            .context
            .file_path
            .as_deref()
            .map(|p| p.exists())
            .unwrap_or(false);
        if error.category == ErrorCategory::PdfProcessing && has_input {
            self.handler_invocations.fetch_add(1, Ordering::Relaxed);
            let pdf = Arc::clone(&self.pdf);
            let input = error.clone();
            detail = match run_blocking_handler(move || pdf.handle(&input)).await {
                HandlerOutcome::Quarantined(path) => Some(path.display().to_string()),
                HandlerOutcome::Recovered(d) | HandlerOutcome::Unrecovered(d) => Some(d),
            };
        }

        tracing::warn!(
            error_id = %error.id,
            error_type = %error.error_type,
            item_id = ?error.context.item_id,
            accepted_loss = true,
            "Skipping failed item"
        );

        RecoveryOutcome::Skipped { detail }
    }

    async fn persist(&self, error: &ProcessingError) {
        let Some(log) = &self.error_log else {
            return;
        };

        let writer = Arc::clone(log);
        let entry = error.clone();
        match tokio::task::spawn_blocking(move || writer.record(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(path = %log.path().display(), error = %e, "Failed to persist error log");
            }
            Err(e) => {
                tracing::warn!(path = %log.path().display(), error = %e, "Error log writer task failed");
            }
        }
    }

    /// Errors still awaiting a recovery attempt
    pub fn active_errors(&self) -> Vec<ProcessingError> {
        let mut errors: Vec<ProcessingError> =
            self.with_state(|state| state.active.values().cloned().collect());
        errors.sort_by_key(|e| e.timestamp);
        errors
    }

    /// Snapshot of the bounded in-memory history, oldest first
    pub fn export_history(&self) -> Vec<ProcessingError> {
        self.with_state(|state| state.history.iter().cloned().collect())
    }

    pub fn error_summary(&self, window: chrono::Duration) -> ErrorSummary {
        let history = self.export_history();
        ErrorSummary::from_errors(
            &history,
            window,
            Utc::now(),
            self.config.analysis.top_messages,
        )
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        let now = Instant::now();
        self.with_state(|state| {
            let mut by_category = BTreeMap::new();
            let mut by_type = BTreeMap::new();
            let mut by_severity = BTreeMap::new();
            for error in &state.history {
                *by_category.entry(error.category.to_string()).or_insert(0) += 1;
                *by_type.entry(error.error_type.to_string()).or_insert(0) += 1;
                *by_severity.entry(error.severity.to_string()).or_insert(0) += 1;
            }

            ErrorStatistics {
                total_errors: state.counters.total,
                active_errors: state.active.len(),
                history_size: state.history.len(),
                resolved: state.counters.resolved,
                unrecoverable: state.counters.unrecoverable,
                failed_attempts: state.counters.failed_attempts,
                breaker_rejections: state.counters.breaker_rejections,
                escalations: self.escalation_count.load(Ordering::Relaxed),
                handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
                by_category,
                by_type,
                by_severity,
                resolution_methods: state.counters.by_method.clone(),
                circuit_breakers: state.breakers.snapshot(now),
            }
        })
    }

    /// Drop history and active entries older than the retention window
    pub fn prune_history(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.recovery.history_retention_days);
        let removed = self.with_state(|state| {
            let before = state.history.len();
            state.history.retain(|e| e.timestamp >= cutoff);
            state.active.retain(|_, e| e.timestamp >= cutoff);
            before - state.history.len()
        });
        if removed > 0 {
            tracing::info!(removed = removed, "Pruned error history");
        }
        removed
    }

    pub fn subscribe_escalations(&self) -> broadcast::Receiver<ProcessingError> {
        self.escalations.subscribe()
    }

    pub fn reset_circuit_breakers(&self) {
        self.with_state(|state| state.breakers.reset());
    }

    /// Number of times a specialized handler was called
    pub fn handler_invocations(&self) -> u64 {
        self.handler_invocations.load(Ordering::Relaxed)
    }

    pub fn escalation_count(&self) -> u64 {
        self.escalation_count.load(Ordering::Relaxed)
    }
}

impl ErrorHistorySource for RecoveryManager {
    fn error_history(&self) -> Vec<ProcessingError> {
        self.export_history()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::ResolutionMethod;
    use crate::settings::BackoffConfig;
    use tempfile::TempDir;

    fn fast_config(dir: &TempDir) -> SentinelConfig {
        let mut config = SentinelConfig::for_instance("worker-1", dir.path());
        let fast = BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            ..BackoffConfig::default()
        };
        config.recovery.backoff = fast.clone();
        config.network.backoff = fast;
        config
    }

    fn failure(kind: &str, message: &str) -> Failure {
        Failure::new(kind, message)
    }

    fn ctx(operation: &str) -> ErrorContext {
        ErrorContext::new("worker-1", operation)
    }

    #[tokio::test]
    async fn test_network_error_resolves_by_retry() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        let error = manager
            .handle_error(&failure("TimeoutError", "Read timed out"), ctx("download_paper"), None, None)
            .await;

        assert!(error.is_resolved);
        assert_eq!(error.resolution_method, Some(ResolutionMethod::Retry));
        assert_eq!(error.recovery_attempts, 1);
        assert_eq!(manager.handler_invocations(), 1);
        assert!(manager.active_errors().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_uses_configured_route() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        let error = manager
            .handle_error(
                &failure("QdrantError", "vector collection unavailable"),
                ctx("store_chunks"),
                None,
                None,
            )
            .await;

        assert_eq!(error.error_type, ErrorType::VectorStoreUnavailable);
        assert_eq!(error.resolution_method, Some(ResolutionMethod::Fallback));
        assert_eq!(error.resolution_detail.as_deref(), Some("local_index"));
    }

    #[tokio::test]
    async fn test_fallback_without_route_degrades_to_retry() {
        let dir = TempDir::new().unwrap();
        let mut config = fast_config(&dir);
        config.recovery.fallback_routes.clear();
        let manager = RecoveryManager::new(config).unwrap();

        let error = manager
            .handle_error(&failure("EmbeddingError", "embedding model overloaded"), ctx("embed"), None, None)
            .await;

        assert_eq!(error.resolution_method, Some(ResolutionMethod::Retry));
        assert_eq!(manager.handler_invocations(), 0);
    }

    #[tokio::test]
    async fn test_configuration_error_goes_to_manual_ledger() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        let error = manager
            .handle_error(
                &failure("KeyError", "config value MODEL_PATH missing"),
                ctx("startup"),
                None,
                None,
            )
            .await;

        assert_eq!(error.error_type, ErrorType::ConfigMissing);
        assert!(!error.is_recoverable);
        assert!(!error.is_resolved);

        let ledger = ManualLedger::new(&dir.path().join("worker-1"));
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error.id, error.id);
    }

    #[tokio::test]
    async fn test_escalations_are_broadcast() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
        let mut escalations = manager.subscribe_escalations();

        let error = manager
            .handle_error(&failure("MemoryError", "out of memory"), ctx("embed"), None, None)
            .await;

        assert!(!error.is_recoverable);
        let received = escalations.try_recv().unwrap();
        assert_eq!(received.id, error.id);
        assert_eq!(manager.escalation_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempts_stay_active_until_budget_is_spent() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        // A 404 is not retryable, so every attempt fails
        let error = manager
            .handle_error(&failure("HTTPError", "404 Client Error: Not Found"), ctx("download_paper"), None, None)
            .await;
        assert!(!error.is_resolved);
        assert_eq!(error.recovery_attempts, 1);
        assert_eq!(manager.active_errors().len(), 1);

        let report = manager.retry_failed_operations(50).await;
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.finished_at.is_some());

        manager.retry_failed_operations(50).await;
        let history = manager.export_history();
        assert_eq!(history[0].recovery_attempts, 3);
        assert!(manager.active_errors().is_empty());

        let report = manager.retry_failed_operations(50).await;
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_counts_as_failed_attempt() {
        let dir = TempDir::new().unwrap();
        let config = fast_config(&dir);
        let mut probe = crate::error::handlers::storage::MockSpaceProbe::new();
        probe
            .expect_space()
            .returning(|_| panic!("statvfs wrapper crashed"));

        let manager = RecoveryManager::new(config.clone())
            .unwrap()
            .with_space_probe(Arc::new(probe))
            .with_strategy_selector(
                StrategySelector::from_config(&config.recovery)
                    .with_type_override(ErrorType::DiskFull, RecoveryStrategy::Retry),
            );

        let error = manager
            .handle_error(&failure("OSError", "No space left on device"), ctx("save_chunk"), None, None)
            .await;

        assert_eq!(error.error_type, ErrorType::DiskFull);
        assert_eq!(error.recovery_attempts, 1);
        assert!(!error.is_resolved);
        assert!(error.resolution_detail.unwrap().contains("handler task failed"));
        assert_eq!(manager.error_statistics().failed_attempts, 1);
        assert_eq!(manager.active_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_persisted_to_log() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        manager
            .handle_error(&failure("TimeoutError", "timed out"), ctx("download_paper"), None, None)
            .await;

        let log = ErrorLog::new(&dir.path().join("worker-1"), 1000, 90);
        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_resolved);
    }

    #[tokio::test]
    async fn test_statistics_and_summary() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

        for _ in 0..2 {
            manager
                .handle_error(&failure("TimeoutError", "timed out"), ctx("download_paper"), None, None)
                .await;
        }
        manager
            .handle_error(&failure("ValueError", "validation failed for chunk"), ctx("chunk"), None, None)
            .await;

        let stats = manager.error_statistics();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.by_category.get("network"), Some(&2));
        assert_eq!(stats.resolution_methods.get("retry"), Some(&2));

        let summary = manager.error_summary(chrono::Duration::hours(1));
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.top_messages[0], ("timed out".to_string(), 2));
        assert!((summary.rate_per_hour - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_prunable() {
        let dir = TempDir::new().unwrap();
        let mut config = fast_config(&dir);
        config.recovery.history_capacity = 2;
        config.recovery.persist = false;
        let manager = RecoveryManager::new(config).unwrap();

        for i in 0..3 {
            manager
                .handle_error(&failure("TimeoutError", &format!("timed out {}", i)), ctx("op"), None, None)
                .await;
        }

        let history = manager.export_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "timed out 1");
        assert_eq!(manager.prune_history(), 0);
        assert!(!dir.path().join("worker-1/errors.json").exists());
    }

    #[tokio::test]
    async fn test_history_source_trait_exports_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
        manager
            .handle_error(&failure("TimeoutError", "timed out"), ctx("op"), None, None)
            .await;

        let source: &dyn ErrorHistorySource = &manager;
        assert_eq!(source.error_history().len(), 1);
    }
}
