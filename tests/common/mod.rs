//! Common test utilities shared by the integration tests
//!
//! This module provides:
//! - Sentinel configurations rooted in a temporary directory
//! - Failure and context builders for the scenarios under test
//! - A fixed metrics provider for driving prevention rules
#![allow(dead_code)]

use ingest_sentinel::prevention::{MetricsProvider, SystemMetrics};
use ingest_sentinel::settings::BackoffConfig;
use ingest_sentinel::{ErrorContext, Failure, SentinelConfig, SentinelResult};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const INSTANCE: &str = "worker-1";

/// Defaults rooted at `dir`, as a worker would run in production
pub fn default_config(dir: &TempDir) -> SentinelConfig {
    SentinelConfig::for_instance(INSTANCE, dir.path())
}

/// Millisecond backoffs so retry paths finish quickly
pub fn fast_config(dir: &TempDir) -> SentinelConfig {
    let mut config = default_config(dir);
    let fast = BackoffConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..BackoffConfig::default()
    };
    config.recovery.backoff = fast.clone();
    config.network.backoff = fast;
    config.prevention.rule_cooldown_secs = 0;
    config
}

pub fn context(operation: &str) -> ErrorContext {
    ErrorContext::new(INSTANCE, operation)
}

pub fn timeout() -> Failure {
    Failure::new("TimeoutError", "Read timed out after 30s")
}

pub fn disk_full() -> Failure {
    Failure::new("OSError", "[Errno 28] No space left on device")
}

pub fn invalid_record() -> Failure {
    Failure::new("ValueError", "schema validation failed for record 17")
}

pub fn corrupt_pdf() -> Failure {
    Failure::new("PdfReadError", "EOF marker not found")
}

/// Write `bytes` to `dir/name` and return the path
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Metrics provider returning the same values on every collection
pub struct FixedMetrics(pub SystemMetrics);

impl MetricsProvider for FixedMetrics {
    fn collect(&self) -> SentinelResult<SystemMetrics> {
        Ok(self.0)
    }
}
