/// End-to-end recovery scenarios through the public `handle_error` contract
mod common;

use common::*;
use ingest_sentinel::error::{ResolutionMethod, RecoveryManager};
use ingest_sentinel::{ErrorCategory, ErrorType, Severity};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_timeout_on_download_resolves_by_retry_after_backoff() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(default_config(&dir)).unwrap();

    let started = Instant::now();
    let error = manager
        .handle_error(&timeout(), context("download_paper"), None, None)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(error.error_type, ErrorType::ConnectionTimeout);
    assert_eq!(error.category, ErrorCategory::Network);
    assert!(error.is_resolved);
    assert_eq!(error.resolution_method, Some(ResolutionMethod::Retry));
    assert_eq!(error.recovery_attempts, 1);

    // One second base delay with 10-30% jitter
    assert!(elapsed >= Duration::from_millis(1_100), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1_800), "elapsed {:?}", elapsed);
    assert!(manager.active_errors().is_empty());
}

#[tokio::test]
async fn test_open_breaker_fast_fails_disk_full() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir)).unwrap();

    for _ in 0..5 {
        let error = manager
            .handle_error(&disk_full(), context("save_chunk"), None, None)
            .await;
        assert_eq!(error.error_type, ErrorType::DiskFull);
        assert_eq!(error.severity, Severity::Critical);
        assert!(!error.is_resolved);
    }
    assert_eq!(manager.escalation_count(), 5);
    let invocations = manager.handler_invocations();

    let started = Instant::now();
    let sixth = manager
        .handle_error(&disk_full(), context("save_chunk"), None, None)
        .await;

    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!sixth.is_recoverable);
    assert!(!sixth.is_resolved);
    assert_eq!(sixth.recovery_attempts, 0);
    assert_eq!(manager.handler_invocations(), invocations);
    assert_eq!(manager.escalation_count(), 5);

    let stats = manager.error_statistics();
    assert_eq!(stats.breaker_rejections, 1);
    assert_eq!(stats.total_errors, 6);
}

#[tokio::test]
async fn test_breaker_allows_probe_after_cooldown() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir))
        .unwrap()
        .with_breaker_cooldown(Duration::from_millis(50));

    for _ in 0..5 {
        manager
            .handle_error(&disk_full(), context("save_chunk"), None, None)
            .await;
    }
    let rejected = manager
        .handle_error(&disk_full(), context("save_chunk"), None, None)
        .await;
    assert_eq!(rejected.recovery_attempts, 0);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let probe = manager
        .handle_error(&disk_full(), context("save_chunk"), None, None)
        .await;
    assert_eq!(probe.recovery_attempts, 1);
    assert_eq!(manager.escalation_count(), 6);
}

#[tokio::test]
async fn test_ineligible_error_after_cooldown_frees_half_open_slot() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir))
        .unwrap()
        .with_breaker_cooldown(Duration::from_millis(50));

    for _ in 0..5 {
        manager
            .handle_error(
                &invalid_record(),
                context("validate_chunk"),
                Some(ErrorType::ValidationFailed),
                Some(Severity::Critical),
            )
            .await;
    }
    assert_eq!(manager.escalation_count(), 5);

    tokio::time::sleep(Duration::from_millis(80)).await;

    // Low severity selects skip, and validation errors are not recoverable
    let ineligible = manager
        .handle_error(
            &invalid_record(),
            context("validate_chunk"),
            Some(ErrorType::ValidationFailed),
            None,
        )
        .await;
    assert_eq!(ineligible.recovery_attempts, 0);
    assert!(!ineligible.is_resolved);

    let breaker = manager
        .error_statistics()
        .circuit_breakers
        .into_iter()
        .find(|b| b.error_type == ErrorType::ValidationFailed)
        .unwrap();
    assert!(!breaker.probe_in_flight);

    let retried = manager
        .handle_error(
            &invalid_record(),
            context("validate_chunk"),
            Some(ErrorType::ValidationFailed),
            Some(Severity::Critical),
        )
        .await;
    assert_eq!(retried.recovery_attempts, 1);
    assert_eq!(manager.escalation_count(), 6);
    assert_eq!(manager.error_statistics().breaker_rejections, 0);
}

#[tokio::test]
async fn test_empty_pdf_is_quarantined_and_skipped() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
    let pdf = write_file(&dir.path().join("incoming"), "paper.pdf", b"");

    let error = manager
        .handle_error(
            &corrupt_pdf(),
            context("parse_pdf").with_file_path(&pdf),
            None,
            None,
        )
        .await;

    assert_eq!(error.error_type, ErrorType::PdfCorrupt);
    assert!(error.is_resolved);
    assert_eq!(error.resolution_method, Some(ResolutionMethod::Skip));
    assert!(!pdf.exists());

    let quarantined = std::path::PathBuf::from(error.resolution_detail.clone().unwrap());
    assert!(quarantined.exists());
    assert_eq!(
        quarantined.parent().and_then(|p| p.file_name()).unwrap(),
        "corrupt"
    );

    let records = manager.pdf_handler().list_quarantine().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].detail, "File is empty");
    assert_eq!(records[0].original_path, pdf);
    assert_eq!(records[0].instance, INSTANCE);
}

#[tokio::test]
async fn test_skip_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
    let pdf = write_file(&dir.path().join("incoming"), "paper.pdf", b"");

    let first = manager
        .handle_error(&corrupt_pdf(), context("parse_pdf").with_file_path(&pdf), None, None)
        .await;
    let second = manager
        .handle_error(&corrupt_pdf(), context("parse_pdf").with_file_path(&pdf), None, None)
        .await;

    assert_eq!(first.resolution_method, Some(ResolutionMethod::Skip));
    assert_eq!(second.resolution_method, Some(ResolutionMethod::Skip));
    assert_eq!(manager.pdf_handler().list_quarantine().unwrap().len(), 1);
}

#[tokio::test]
async fn test_quarantine_round_trip_and_cleanup() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
    let pdf = write_file(&dir.path().join("incoming"), "broken.pdf", b"");

    manager
        .handle_error(&corrupt_pdf(), context("parse_pdf").with_file_path(&pdf), None, None)
        .await;

    let handler = manager.pdf_handler();
    assert_eq!(handler.cleanup_quarantine(Duration::from_secs(3600)).unwrap(), 0);
    assert_eq!(handler.list_quarantine().unwrap().len(), 1);

    assert_eq!(handler.cleanup_quarantine(Duration::ZERO).unwrap(), 1);
    assert!(handler.list_quarantine().unwrap().is_empty());
}

#[tokio::test]
async fn test_escalations_reach_subscribers() {
    let dir = TempDir::new().unwrap();
    let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
    let mut escalations = manager.subscribe_escalations();

    let error = manager
        .handle_error(&disk_full(), context("save_chunk"), None, None)
        .await;

    let received = escalations.recv().await.unwrap();
    assert_eq!(received.id, error.id);
    assert_eq!(received.error_type, ErrorType::DiskFull);
}

#[tokio::test]
async fn test_persisted_log_survives_manager_restart() {
    let dir = TempDir::new().unwrap();
    {
        let manager = RecoveryManager::new(fast_config(&dir)).unwrap();
        manager
            .handle_error(&timeout(), context("download_paper"), None, None)
            .await;
    }

    let log = ingest_sentinel::error::ErrorLog::new(&default_config(&dir).instance_dir(), 1000, 90);
    let errors = log.load().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_resolved);
}
