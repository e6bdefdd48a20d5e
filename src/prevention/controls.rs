/// Advisory controls published by prevention actions
///
/// Prevention actions never reach into recovery state. They set advisories here
/// (throttle, network pause, concurrency limit, cache-clear request) and workers
/// consult them before starting new work. The traffic monitor is the opposite
/// direction: workers report requests and failures so rules can see them.
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Events older than this are dropped from the traffic monitor
const TRAFFIC_RETENTION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
enum TrafficEvent {
    Request { at: Instant, latency: Duration },
    NetworkFailure { at: Instant },
}

impl TrafficEvent {
    fn at(&self) -> Instant {
        match self {
            TrafficEvent::Request { at, .. } | TrafficEvent::NetworkFailure { at } => *at,
        }
    }
}

/// Sliding record of outbound requests and network failures
#[derive(Debug, Default)]
pub struct TrafficMonitor {
    events: Mutex<VecDeque<TrafficEvent>>,
}

impl TrafficMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, latency: Duration) {
        self.push(TrafficEvent::Request {
            at: Instant::now(),
            latency,
        });
    }

    pub fn record_network_failure(&self) {
        self.push(TrafficEvent::NetworkFailure { at: Instant::now() });
    }

    fn push(&self, event: TrafficEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while let Some(front) = events.front() {
            if event.at().saturating_duration_since(front.at()) > TRAFFIC_RETENTION {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        let cutoff = Duration::from_secs(60);
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, TrafficEvent::Request { at, .. } if at.elapsed() <= cutoff))
            .count() as u32
    }

    pub fn network_failures(&self, window: Duration) -> u32 {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, TrafficEvent::NetworkFailure { at } if at.elapsed() <= window))
            .count() as u32
    }

    /// Mean latency of requests within `window`; zero without samples
    pub fn avg_latency_ms(&self, window: Duration) -> f64 {
        let events = self.events.lock();
        let latencies: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                TrafficEvent::Request { at, latency } if at.elapsed() <= window => {
                    Some(latency.as_secs_f64() * 1000.0)
                }
                _ => None,
            })
            .collect();
        if latencies.is_empty() {
            return 0.0;
        }
        latencies.iter().sum::<f64>() / latencies.len() as f64
    }
}

/// Point-in-time view of the advisories
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControlsSnapshot {
    pub throttle_rpm: Option<u32>,
    pub network_paused_for_secs: Option<u64>,
    pub concurrency_limit: Option<usize>,
    pub cache_clear_requested: bool,
}

/// Advisories shared between prevention actions and workers
#[derive(Debug, Default)]
pub struct PreventionControls {
    throttle_rpm: AtomicU32,
    concurrency_limit: AtomicUsize,
    cache_clear_requested: AtomicBool,
    network_paused_until: Mutex<Option<Instant>>,
    traffic: TrafficMonitor,
}

impl PreventionControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traffic(&self) -> &TrafficMonitor {
        &self.traffic
    }

    /// Ask workers to stay under `rpm` requests per minute
    pub fn throttle(&self, rpm: u32) {
        self.throttle_rpm.store(rpm.max(1), Ordering::Relaxed);
        tracing::info!(rpm = rpm, "Request throttle engaged");
    }

    pub fn throttle_rpm(&self) -> Option<u32> {
        match self.throttle_rpm.load(Ordering::Relaxed) {
            0 => None,
            rpm => Some(rpm),
        }
    }

    /// Pause outbound network work; extends an existing pause, never shortens it
    pub fn pause_network(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut paused = self.network_paused_until.lock();
        if paused.map_or(true, |current| current < until) {
            *paused = Some(until);
        }
        tracing::warn!(
            duration = %humantime::format_duration(duration),
            "Network pause engaged"
        );
    }

    pub fn network_paused(&self) -> bool {
        self.network_pause_remaining().is_some()
    }

    pub fn network_pause_remaining(&self) -> Option<Duration> {
        let paused = *self.network_paused_until.lock();
        paused.and_then(|until| until.checked_duration_since(Instant::now()))
    }

    /// Halve the concurrency limit, starting from `baseline` when unlimited
    pub fn reduce_concurrency(&self, baseline: usize) -> usize {
        let current = match self.concurrency_limit.load(Ordering::Relaxed) {
            0 => baseline.max(1),
            limit => limit,
        };
        let reduced = (current / 2).max(1);
        self.concurrency_limit.store(reduced, Ordering::Relaxed);
        tracing::info!(limit = reduced, "Concurrency limit lowered");
        reduced
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.concurrency_limit.load(Ordering::Relaxed) {
            0 => None,
            limit => Some(limit),
        }
    }

    pub fn request_cache_clear(&self) {
        self.cache_clear_requested.store(true, Ordering::Relaxed);
    }

    /// Consume a pending cache-clear request
    pub fn take_cache_clear_request(&self) -> bool {
        self.cache_clear_requested.swap(false, Ordering::Relaxed)
    }

    /// Drop every advisory
    pub fn clear(&self) {
        self.throttle_rpm.store(0, Ordering::Relaxed);
        self.concurrency_limit.store(0, Ordering::Relaxed);
        self.cache_clear_requested.store(false, Ordering::Relaxed);
        *self.network_paused_until.lock() = None;
    }

    pub fn snapshot(&self) -> ControlsSnapshot {
        ControlsSnapshot {
            throttle_rpm: self.throttle_rpm(),
            network_paused_for_secs: self.network_pause_remaining().map(|d| d.as_secs()),
            concurrency_limit: self.concurrency_limit(),
            cache_clear_requested: self.cache_clear_requested.load(Ordering::Relaxed),
        }
    }
}
