/// Exponential backoff with jitter and per-type circuit breaking
///
/// Backoff follows `delay = base * multiplier^(attempt - 1)`, then adds a random
/// 10-30% on top and caps the result. With the default multiplier of 2 the
/// schedule never shrinks from one attempt to the next.
///
/// The circuit breaker board keeps one breaker per [`ErrorType`]:
/// - Closed: recovery attempts pass through
/// - Open: too many failed attempts, fail fast until the cooldown elapses
/// - HalfOpen: cooldown elapsed, exactly one probe attempt is let through
use super::taxonomy::ErrorType;
use crate::settings::BackoffConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Exponential backoff schedule with additive jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    min_jitter: f64,
    max_jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: multiplier.max(1.0),
            max_delay,
            min_jitter: 0.10,
            max_jitter: 0.30,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.min_jitter, config.max_jitter)
    }

    /// Set the jitter band as fractions of the unjittered delay
    pub fn with_jitter(mut self, min_jitter: f64, max_jitter: f64) -> Self {
        let min_jitter = min_jitter.clamp(0.0, 1.0);
        self.min_jitter = min_jitter;
        self.max_jitter = max_jitter.clamp(min_jitter, 1.0);
        self
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay without jitter for the given 1-based attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        clamp_secs(secs, self.max_delay)
    }

    /// Jittered delay for the given 1-based attempt, capped at the maximum
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter = if self.max_jitter > 0.0 {
            rand::thread_rng().gen_range(self.min_jitter..=self.max_jitter)
        } else {
            0.0
        };
        clamp_secs(base * (1.0 + jitter), self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

fn clamp_secs(secs: f64, max: Duration) -> Duration {
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of asking the board whether an attempt may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Normal operation
    Allow,

    /// Cooldown elapsed; this caller holds the single probe
    Probe,

    /// Fail fast
    Reject { remaining: Duration },
}

#[derive(Debug, Clone, Default)]
struct BreakerEntry {
    failure_count: u32,
    last_failure: Option<DateTime<Utc>>,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub error_type: ErrorType,
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub probe_in_flight: bool,
}

/// One circuit breaker per error type
///
/// Not synchronized on its own; the recovery manager keeps it inside its state lock.
#[derive(Debug, Clone)]
pub struct BreakerBoard {
    failure_threshold: u32,
    cooldown: Duration,
    entries: HashMap<ErrorType, BreakerEntry>,
}

impl BreakerBoard {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            entries: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether a recovery attempt for `error_type` may proceed at `now`
    pub fn check(&mut self, error_type: ErrorType, now: Instant) -> BreakerDecision {
        let Some(entry) = self.entries.get_mut(&error_type) else {
            return BreakerDecision::Allow;
        };

        match entry.open_until {
            None => BreakerDecision::Allow,
            Some(until) if now < until => BreakerDecision::Reject {
                remaining: until - now,
            },
            Some(_) if entry.probe_in_flight => BreakerDecision::Reject {
                remaining: Duration::ZERO,
            },
            Some(_) => {
                entry.probe_in_flight = true;
                tracing::info!(error_type = %error_type, "Circuit breaker half-open, allowing probe");
                BreakerDecision::Probe
            }
        }
    }

    /// Give back a probe slot that never produced an attempt
    ///
    /// The breaker stays open-but-expired, so the next caller gets the probe.
    pub fn release_probe(&mut self, error_type: ErrorType) {
        if let Some(entry) = self.entries.get_mut(&error_type) {
            entry.probe_in_flight = false;
        }
    }

    /// A recovery attempt succeeded: close the breaker and reset its count
    pub fn record_success(&mut self, error_type: ErrorType) {
        if let Some(entry) = self.entries.get_mut(&error_type) {
            if entry.open_until.is_some() {
                tracing::info!(error_type = %error_type, "Circuit breaker closed after successful probe");
            }
            entry.failure_count = 0;
            entry.open_until = None;
            entry.probe_in_flight = false;
        }
    }

    /// A recovery attempt failed; returns true when this failure opened the breaker
    pub fn record_failure(&mut self, error_type: ErrorType, now: Instant) -> bool {
        let threshold = self.failure_threshold;
        let cooldown = self.cooldown;
        let entry = self.entries.entry(error_type).or_default();

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = Some(Utc::now());

        if entry.probe_in_flight {
            entry.probe_in_flight = false;
            entry.open_until = Some(now + cooldown);
            tracing::error!(
                error_type = %error_type,
                cooldown = %humantime::format_duration(cooldown),
                "Circuit breaker reopened after failed probe"
            );
            return true;
        }

        if entry.open_until.is_none() && entry.failure_count >= threshold {
            entry.open_until = Some(now + cooldown);
            tracing::error!(
                error_type = %error_type,
                failures = entry.failure_count,
                cooldown = %humantime::format_duration(cooldown),
                "Circuit breaker opened"
            );
            return true;
        }

        false
    }

    pub fn state(&self, error_type: ErrorType, now: Instant) -> BreakerState {
        match self.entries.get(&error_type) {
            Some(entry) => entry_state(entry, now),
            None => BreakerState::Closed,
        }
    }

    pub fn failure_count(&self, error_type: ErrorType) -> u32 {
        self.entries
            .get(&error_type)
            .map(|e| e.failure_count)
            .unwrap_or(0)
    }

    /// Breakers that have seen at least one failure, sorted by type
    pub fn snapshot(&self, now: Instant) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .entries
            .iter()
            .map(|(error_type, entry)| BreakerSnapshot {
                error_type: *error_type,
                state: entry_state(entry, now),
                failure_count: entry.failure_count,
                last_failure: entry.last_failure,
                probe_in_flight: entry.probe_in_flight,
            })
            .collect();
        snapshots.sort_by_key(|s| s.error_type);
        snapshots
    }

    /// Close every breaker
    pub fn reset(&mut self) {
        self.entries.clear();
        tracing::info!("Circuit breakers manually reset to closed");
    }
}

fn entry_state(entry: &BreakerEntry, now: Instant) -> BreakerState {
    match entry.open_until {
        None => BreakerState::Closed,
        Some(until) if now < until || entry.probe_in_flight => BreakerState::Open,
        Some(_) => BreakerState::HalfOpen,
    }
}

/// Human-readable reason attached to errors rejected by an open breaker
pub fn breaker_open_reason(error_type: ErrorType, remaining: Duration) -> String {
    format!(
        "Circuit breaker is OPEN for {} - failing fast ({} until probe)",
        error_type,
        humantime::format_duration(Duration::from_secs(remaining.as_secs()))
    )
}
