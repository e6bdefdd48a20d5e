/// Storage fault recovery: space reclamation, permission repair, missing paths
///
/// Disk-full recovery runs ordered cleanup strategies until the freed-space target
/// is met:
/// 1. Stale temp files
/// 2. Old and rotated logs
/// 3. Cache and bytecode artifacts matched by glob
/// 4. Registered [`CleanupExtension`]s (compression, archival, ...)
///
/// When nothing frees enough space the handler fails with ranked recommendations.
use super::HandlerOutcome;
use crate::error::classification::ProcessingError;
use crate::error::taxonomy::ErrorType;
use crate::settings::StorageConfig;
use crate::{SentinelError, SentinelResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Filesystem capacity for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceReport {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl SpaceReport {
    pub fn used_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Source of free-space information
#[cfg_attr(test, mockall::automock)]
pub trait SpaceProbe: Send + Sync {
    fn space(&self, path: &Path) -> SentinelResult<SpaceReport>;
}

/// `statvfs(2)` probe
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    fn space(&self, path: &Path) -> SentinelResult<SpaceReport> {
        let stats = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        let fragment = stats.fragment_size() as u64;
        Ok(SpaceReport {
            total_bytes: stats.blocks() as u64 * fragment,
            available_bytes: stats.blocks_available() as u64 * fragment,
        })
    }

    #[cfg(not(unix))]
    fn space(&self, path: &Path) -> SentinelResult<SpaceReport> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("free space probe unsupported for {}", path.display()),
        )
        .into())
    }
}

/// Extra space-reclaiming step run after the built-in strategies
pub trait CleanupExtension: Send + Sync {
    fn name(&self) -> &str;

    /// Reclaim space; returns bytes freed
    fn run(&self) -> SentinelResult<u64>;
}

/// What a cleanup pass achieved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub freed_bytes: u64,
    pub removed_entries: usize,
    pub strategies_run: Vec<String>,
    pub target_met: bool,
}

/// Candidate for manual cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupRecommendation {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub reason: String,
}

/// Storage error handler
pub struct StorageHandler {
    config: StorageConfig,
    probe: Arc<dyn SpaceProbe>,
    cached_space: Mutex<Option<(Instant, SpaceReport)>>,
    extensions: RwLock<Vec<Arc<dyn CleanupExtension>>>,
}

impl StorageHandler {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_probe(config, Arc::new(StatvfsProbe))
    }

    pub fn with_probe(config: StorageConfig, probe: Arc<dyn SpaceProbe>) -> Self {
        Self {
            config,
            probe,
            cached_space: Mutex::new(None),
            extensions: RwLock::new(Vec::new()),
        }
    }

    /// Add a cleanup step that runs after the built-in strategies
    pub fn register_extension(&self, extension: Arc<dyn CleanupExtension>) {
        tracing::debug!(extension = %extension.name(), "Cleanup extension registered");
        self.extensions.write().push(extension);
    }

    /// Free space on the watched filesystem, cached for the configured TTL
    pub fn space(&self) -> Option<SpaceReport> {
        let ttl = Duration::from_secs(self.config.space_cache_ttl_secs);
        {
            let cached = self.cached_space.lock();
            if let Some((probed_at, report)) = *cached {
                if probed_at.elapsed() < ttl {
                    return Some(report);
                }
            }
        }
        self.refresh_space()
    }

    /// Probe free space, bypassing the cache
    pub fn refresh_space(&self) -> Option<SpaceReport> {
        match self.probe.space(&self.config.watch_path) {
            Ok(report) => {
                *self.cached_space.lock() = Some((Instant::now(), report));
                Some(report)
            }
            Err(e) => {
                tracing::warn!(path = %self.config.watch_path.display(), error = %e, "Free space probe failed");
                None
            }
        }
    }

    fn space_is_low(&self, report: Option<SpaceReport>) -> bool {
        report
            .map(|r| r.available_bytes < self.config.min_free_bytes)
            .unwrap_or(false)
    }

    /// Apply the mitigation for a storage error
    pub fn handle(&self, error: &ProcessingError) -> HandlerOutcome {
        let path = error.context.file_path.as_deref();
        match error.error_type {
            ErrorType::DiskFull => self.handle_disk_full(),
            ErrorType::PermissionDenied => match path {
                Some(path) => self.repair_permissions(path),
                None => HandlerOutcome::Unrecovered("no file path in error context".to_string()),
            },
            ErrorType::FileNotFound => match path {
                Some(path) => self.create_parent_dirs(path),
                None => HandlerOutcome::Unrecovered("no file path in error context".to_string()),
            },
            ErrorType::IoError => self.diagnose_io_error(path),
            other => HandlerOutcome::Unrecovered(format!("{} is not a storage error", other)),
        }
    }

    fn handle_disk_full(&self) -> HandlerOutcome {
        let before = self.space();
        if before.is_some() && !self.space_is_low(before) {
            return HandlerOutcome::Recovered("free space above threshold".to_string());
        }

        let report = self.run_cleanup();
        let after = self.refresh_space();

        if report.target_met || (after.is_some() && !self.space_is_low(after)) {
            tracing::info!(
                freed_bytes = report.freed_bytes,
                strategies = ?report.strategies_run,
                "Disk space reclaimed"
            );
            return HandlerOutcome::Recovered(format!(
                "cleanup freed {} bytes",
                report.freed_bytes
            ));
        }

        let recommendations = self.recommendations();
        for rec in &recommendations {
            tracing::warn!(
                path = %rec.path.display(),
                size_bytes = rec.size_bytes,
                reason = %rec.reason,
                "Cleanup recommendation"
            );
        }

        let err = SentinelError::InsufficientSpace {
            path: self.config.watch_path.display().to_string(),
            available: after.map(|r| r.available_bytes).unwrap_or(0),
            required: self.config.min_free_bytes,
        };
        HandlerOutcome::Unrecovered(format!(
            "{}; freed {} bytes, {} recommendations",
            err,
            report.freed_bytes,
            recommendations.len()
        ))
    }

    /// Run the cleanup strategies in order until the freed-space target is met
    pub fn run_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let target = self.config.freed_target_bytes;

        let temp_age = Duration::from_secs(self.config.temp_max_age_hours * 3600);
        for dir in &self.config.temp_dirs {
            let (freed, removed) = self.remove_stale_files(dir, temp_age, |_| true);
            report.freed_bytes += freed;
            report.removed_entries += removed;
        }
        report.strategies_run.push("temp_files".to_string());
        if report.freed_bytes >= target {
            report.target_met = true;
            return report;
        }

        let log_age = Duration::from_secs(self.config.log_max_age_days * 86_400);
        for dir in &self.config.log_dirs {
            let (freed, removed) = self.remove_stale_files(dir, log_age, is_log_file);
            report.freed_bytes += freed;
            report.removed_entries += removed;
        }
        report.strategies_run.push("old_logs".to_string());
        if report.freed_bytes >= target {
            report.target_met = true;
            return report;
        }

        for root in &self.config.cache_roots {
            let (freed, removed) = self.remove_cache_artifacts(root);
            report.freed_bytes += freed;
            report.removed_entries += removed;
        }
        report.strategies_run.push("cache_artifacts".to_string());
        if report.freed_bytes >= target {
            report.target_met = true;
            return report;
        }

        let extensions = self.extensions.read().clone();
        for extension in extensions {
            match extension.run() {
                Ok(freed) => report.freed_bytes += freed,
                Err(e) => {
                    tracing::warn!(extension = %extension.name(), error = %e, "Cleanup extension failed");
                }
            }
            report.strategies_run.push(extension.name().to_string());
            if report.freed_bytes >= target {
                report.target_met = true;
                return report;
            }
        }

        report
    }

    fn remove_stale_files(
        &self,
        dir: &Path,
        max_age: Duration,
        matches: impl Fn(&Path) -> bool,
    ) -> (u64, usize) {
        let now = SystemTime::now();
        let mut freed = 0;
        let mut removed = 0;

        for (path, size, modified) in walk_files(dir, self.config.max_scan_depth) {
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < max_age || !matches(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    freed += size;
                    removed += 1;
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Could not remove stale file");
                }
            }
        }

        (freed, removed)
    }

    fn remove_cache_artifacts(&self, root: &Path) -> (u64, usize) {
        let mut freed = 0;
        let mut removed = 0;
        let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

        for pattern in &self.config.cache_patterns {
            let full = format!("{}/{}", escaped_root, pattern);
            let entries = match glob::glob(&full) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(pattern = %full, error = %e, "Invalid cache pattern");
                    continue;
                }
            };

            for entry in entries.filter_map(Result::ok) {
                let size = path_size(&entry, self.config.max_scan_depth);
                let result = if entry.is_dir() {
                    fs::remove_dir_all(&entry)
                } else {
                    fs::remove_file(&entry)
                };
                match result {
                    Ok(()) => {
                        freed += size;
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::debug!(path = %entry.display(), error = %e, "Could not remove cache artifact");
                    }
                }
            }
        }

        (freed, removed)
    }

    /// Largest files under the watched path, biggest first
    pub fn recommendations(&self) -> Vec<CleanupRecommendation> {
        let mut files = walk_files(&self.config.watch_path, self.config.max_scan_depth);
        files.sort_by(|a, b| b.1.cmp(&a.1));

        files
            .into_iter()
            .take(self.config.max_recommendations)
            .map(|(path, size_bytes, _)| {
                let reason = if self.config.temp_dirs.iter().any(|t| path.starts_with(t)) {
                    "temporary file"
                } else if is_log_file(&path) {
                    "log file"
                } else {
                    "large file"
                };
                CleanupRecommendation {
                    path,
                    size_bytes,
                    reason: reason.to_string(),
                }
            })
            .collect()
    }

    fn repair_permissions(&self, path: &Path) -> HandlerOutcome {
        if !path.exists() {
            return self.create_missing(path);
        }

        if let Err(e) = reset_permissions(path) {
            return HandlerOutcome::Unrecovered(format!(
                "failed to reset permissions on {}: {}",
                path.display(),
                e
            ));
        }

        let accessible = if path.is_dir() {
            fs::read_dir(path).is_ok()
        } else {
            fs::File::open(path).is_ok()
        };

        if accessible {
            tracing::info!(path = %path.display(), "Permissions reset to safe defaults");
            HandlerOutcome::Recovered("permissions reset".to_string())
        } else {
            HandlerOutcome::Unrecovered(format!("{} still inaccessible", path.display()))
        }
    }

    fn create_missing(&self, path: &Path) -> HandlerOutcome {
        // A path without an extension is taken to be a directory
        let result = if path.extension().is_none() {
            fs::create_dir_all(path)
        } else {
            match path.parent() {
                Some(parent) => fs::create_dir_all(parent),
                None => Ok(()),
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Created missing path");
                HandlerOutcome::Recovered(format!("created {}", path.display()))
            }
            Err(e) => HandlerOutcome::Unrecovered(format!(
                "could not create {}: {}",
                path.display(),
                e
            )),
        }
    }

    fn create_parent_dirs(&self, path: &Path) -> HandlerOutcome {
        let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return HandlerOutcome::Unrecovered(format!("{} has no parent directory", path.display()));
        };

        if parent.is_dir() {
            return HandlerOutcome::Unrecovered(format!(
                "parent exists; {} itself is missing",
                path.display()
            ));
        }

        match fs::create_dir_all(parent) {
            Ok(()) => {
                tracing::info!(parent = %parent.display(), "Created missing parent directories");
                HandlerOutcome::Recovered(format!("created {}", parent.display()))
            }
            Err(e) => HandlerOutcome::Unrecovered(format!(
                "could not create {}: {}",
                parent.display(),
                e
            )),
        }
    }

    fn diagnose_io_error(&self, path: Option<&Path>) -> HandlerOutcome {
        if self.space_is_low(self.refresh_space()) {
            tracing::debug!("I/O error traced to low disk space");
            return self.handle_disk_full();
        }

        if let Some(path) = path {
            if path.exists() {
                let readable = if path.is_dir() {
                    fs::read_dir(path).is_ok()
                } else {
                    fs::File::open(path).is_ok()
                };
                if !readable {
                    tracing::debug!(path = %path.display(), "I/O error traced to permissions");
                    return self.repair_permissions(path);
                }
            } else if path.parent().map(|p| !p.exists()).unwrap_or(false) {
                tracing::debug!(path = %path.display(), "I/O error traced to a missing directory");
                return self.create_parent_dirs(path);
            }
        }

        HandlerOutcome::Recovered("no persistent cause found; treating as transient".to_string())
    }
}

fn is_log_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".log") || name.contains(".log.")
}

#[cfg(unix)]
fn reset_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if path.is_dir() { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn reset_permissions(path: &Path) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

/// Regular files under `dir` (symlinks skipped) with size and mtime
fn walk_files(dir: &Path, max_depth: usize) -> Vec<(PathBuf, u64, SystemTime)> {
    let mut files = Vec::new();
    walk_into(dir, 0, max_depth, &mut files);
    files
}

fn walk_into(dir: &Path, depth: usize, max_depth: usize, out: &mut Vec<(PathBuf, u64, SystemTime)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            if depth < max_depth {
                walk_into(&path, depth + 1, max_depth, out);
            }
        } else if meta.is_file() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, meta.len(), modified));
        }
    }
}

fn path_size(path: &Path, max_depth: usize) -> u64 {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => walk_files(path, max_depth).iter().map(|f| f.1).sum(),
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}
