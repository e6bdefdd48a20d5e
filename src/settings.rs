/// Runtime configuration for the sentinel
///
/// Every section carries serde defaults so a partial TOML file (or none at all)
/// yields a usable configuration. Values are layered as: built-in defaults, then
/// an optional TOML file, then `INGEST_SENTINEL__SECTION__KEY` environment variables.
use crate::SentinelResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "INGEST_SENTINEL";

/// Top-level configuration for one worker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Instance name used for log, ledger and quarantine paths
    pub instance: String,

    /// Root directory for persisted state
    pub data_dir: PathBuf,

    pub recovery: RecoveryConfig,
    pub network: NetworkConfig,
    pub pdf: PdfConfig,
    pub storage: StorageConfig,
    pub analysis: AnalyzerConfig,
    pub prevention: PreventionConfig,
    pub logging: LoggingConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "ingest-sentinel")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".ingest-sentinel"));

        Self {
            instance: "worker-0".to_string(),
            data_dir,
            recovery: RecoveryConfig::default(),
            network: NetworkConfig::default(),
            pdf: PdfConfig::default(),
            storage: StorageConfig::default(),
            analysis: AnalyzerConfig::default(),
            prevention: PreventionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> SentinelResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: SentinelConfig = builder.build()?.try_deserialize()?;

        tracing::debug!(
            instance = %loaded.instance,
            data_dir = %loaded.data_dir.display(),
            "Configuration loaded"
        );

        Ok(loaded)
    }

    /// Default configuration rooted at a specific data directory
    pub fn for_instance(instance: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let mut config = Self {
            instance: instance.into(),
            data_dir: data_dir.clone(),
            ..Self::default()
        };
        config.storage.temp_dirs = vec![data_dir.join("tmp")];
        config.storage.watch_path = data_dir;
        config
    }

    /// Directory holding this instance's log, ledger and learning state
    pub fn instance_dir(&self) -> PathBuf {
        self.data_dir.join(&self.instance)
    }

    /// Quarantine root; relative roots are resolved against `data_dir`
    pub fn quarantine_root(&self) -> PathBuf {
        if self.pdf.quarantine_root.is_absolute() {
            self.pdf.quarantine_root.clone()
        } else {
            self.data_dir.join(&self.pdf.quarantine_root)
        }
    }
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Lower bound of the additive jitter, as a fraction of the delay
    pub min_jitter: f64,
    /// Upper bound of the additive jitter, as a fraction of the delay
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            min_jitter: 0.10,
            max_jitter: 0.30,
        }
    }
}

/// Recovery manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_recovery_attempts: u32,
    pub history_capacity: usize,
    pub history_retention_days: i64,
    pub log_capacity: usize,
    pub backoff: BackoffConfig,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Extra type → strategy overrides, keyed by snake_case type name
    pub type_overrides: HashMap<String, String>,
    /// Extra category → strategy defaults, keyed by snake_case category name
    pub category_defaults: HashMap<String, String>,
    /// Alternate routes used by the fallback strategy, keyed by category
    pub fallback_routes: HashMap<String, String>,
    /// Write the durable error log and manual ledger
    pub persist: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let mut fallback_routes = HashMap::new();
        fallback_routes.insert("vector_store".to_string(), "local_index".to_string());

        Self {
            max_recovery_attempts: 3,
            history_capacity: 1000,
            history_retention_days: 90,
            log_capacity: 1000,
            backoff: BackoffConfig::default(),
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 300,
            type_overrides: HashMap::new(),
            category_defaults: HashMap::new(),
            fallback_routes,
            persist: true,
        }
    }
}

impl RecoveryConfig {
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

/// Network handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub dns_cache_ttl_secs: u64,
    pub backoff: BackoffConfig,
    pub max_request_retries: u32,
    pub default_rate_limit_wait_secs: u64,
    pub max_rate_limit_wait_secs: u64,
    pub retryable_statuses: Vec<u16>,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            total_timeout_secs: 60,
            pool_max_idle_per_host: 10,
            dns_cache_ttl_secs: 300,
            backoff: BackoffConfig {
                max_delay_ms: 60_000,
                ..BackoffConfig::default()
            },
            max_request_retries: 3,
            default_rate_limit_wait_secs: 60,
            max_rate_limit_wait_secs: 300,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            user_agent: concat!("ingest-sentinel/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// PDF handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    pub quarantine_root: PathBuf,
    pub max_alternate_attempts: u32,
    pub common_passwords: Vec<String>,
    pub hash_cache_capacity: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            quarantine_root: PathBuf::from("quarantine"),
            max_alternate_attempts: 2,
            common_passwords: ["", "password", "123456", "admin", "user", "pdf", "1234"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hash_cache_capacity: 10_000,
        }
    }
}

/// Storage handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path whose filesystem is probed for free space
    pub watch_path: PathBuf,
    pub min_free_bytes: u64,
    /// Cleanup stops once this many bytes have been reclaimed
    pub freed_target_bytes: u64,
    pub space_cache_ttl_secs: u64,
    pub temp_dirs: Vec<PathBuf>,
    pub temp_max_age_hours: u64,
    pub log_dirs: Vec<PathBuf>,
    pub log_max_age_days: u64,
    pub cache_roots: Vec<PathBuf>,
    pub cache_patterns: Vec<String>,
    pub max_recommendations: usize,
    pub max_scan_depth: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            watch_path: PathBuf::from("."),
            min_free_bytes: 1024 * 1024 * 1024,
            freed_target_bytes: 512 * 1024 * 1024,
            space_cache_ttl_secs: 300,
            temp_dirs: vec![std::env::temp_dir().join("ingest-sentinel")],
            temp_max_age_hours: 24,
            log_dirs: Vec::new(),
            log_max_age_days: 7,
            cache_roots: Vec::new(),
            cache_patterns: vec![
                "**/__pycache__".to_string(),
                "**/*.pyc".to_string(),
                "**/.cache".to_string(),
            ],
            max_recommendations: 10,
            max_scan_depth: 6,
        }
    }
}

/// Error analyzer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub min_pattern_frequency: usize,
    pub min_trend_errors: usize,
    pub trend_window_days: i64,
    /// Change below this percentage counts as stable
    pub stable_threshold_pct: f64,
    /// Coefficient of variation of daily counts above which a stable trend is volatile
    pub volatility_cv: f64,
    pub high_frequency_threshold: usize,
    pub top_messages: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_pattern_frequency: 3,
            min_trend_errors: 10,
            trend_window_days: 7,
            stable_threshold_pct: 10.0,
            volatility_cv: 1.0,
            high_frequency_threshold: 10,
            top_messages: 5,
        }
    }
}

/// Prevention system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreventionConfig {
    pub rule_interval_secs: u64,
    pub warning_interval_secs: u64,
    pub learning_interval_secs: u64,
    /// Cap on the interval multiplier applied after repeated loop failures
    pub max_backoff_factor: u32,
    pub ema_alpha: f64,
    pub disable_below: f64,
    pub disable_min_uses: u64,
    pub tighten_above: f64,
    pub tighten_min_uses: u64,
    pub tighten_factor: f64,
    /// Fraction of the configured limit below which thresholds never tighten
    pub tighten_floor: f64,
    pub warning_ttl_hours: i64,
    pub info_auto_ack_minutes: i64,
    pub rule_cooldown_secs: u64,
    pub persist_learning: bool,
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            rule_interval_secs: 30,
            warning_interval_secs: 60,
            learning_interval_secs: 3600,
            max_backoff_factor: 8,
            ema_alpha: 0.3,
            disable_below: 0.3,
            disable_min_uses: 10,
            tighten_above: 0.8,
            tighten_min_uses: 5,
            tighten_factor: 0.9,
            tighten_floor: 0.5,
            warning_ttl_hours: 24,
            info_auto_ack_minutes: 60,
            rule_cooldown_secs: 300,
            persist_learning: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    /// Directory for a daily rolling log file; stderr only when unset
    pub file_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
            file_prefix: "ingest-sentinel.log".to_string(),
        }
    }
}
