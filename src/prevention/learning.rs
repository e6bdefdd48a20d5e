/// Rule-effectiveness learning and its SQLite store
///
/// Each learning cycle folds the success rate of a rule's executions since the
/// previous cycle into an exponential moving average. Rules that keep failing are
/// disabled; rules that keep working get tighter thresholds so they fire earlier.
/// Records survive restarts in a per-instance SQLite database (WAL mode).
use super::metrics::MetricKind;
use super::rules::{PreventionRule, Threshold};
use crate::settings::PreventionConfig;
use crate::SentinelResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const LEARNING_DB_FILE: &str = "learning.db";

/// Persisted effectiveness of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub rule_id: String,
    /// EMA of per-cycle success rate; `None` until the rule has run once
    pub effectiveness: Option<f64>,
    pub uses: u64,
    pub successes: u64,
    pub enabled: bool,
    pub thresholds: Vec<Threshold>,
    pub updated_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn for_rule(rule: &PreventionRule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            effectiveness: None,
            uses: 0,
            successes: 0,
            enabled: rule.enabled,
            thresholds: rule.thresholds.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Fold the rule's executions since the last observation into the EMA.
    /// Returns false when the rule has not run since.
    pub fn observe(&mut self, rule: &PreventionRule, alpha: f64, now: DateTime<Utc>) -> bool {
        let new_uses = rule.trigger_count.saturating_sub(self.uses);
        if new_uses == 0 {
            return false;
        }
        let new_successes = rule.success_count.saturating_sub(self.successes);
        let rate = new_successes as f64 / new_uses as f64;

        self.effectiveness = Some(match self.effectiveness {
            Some(previous) => alpha * rate + (1.0 - alpha) * previous,
            None => rate,
        });
        self.uses = rule.trigger_count;
        self.successes = rule.success_count;
        self.updated_at = now;
        true
    }

    /// Restore persisted counters, enablement and thresholds onto a fresh rule
    pub fn apply_to(&self, rule: &mut PreventionRule) {
        rule.enabled = self.enabled;
        rule.trigger_count = self.uses;
        rule.success_count = self.successes;
        rule.failure_count = self.uses.saturating_sub(self.successes);
        for saved in &self.thresholds {
            if let Some(threshold) = rule
                .thresholds
                .iter_mut()
                .find(|t| t.metric == saved.metric)
            {
                threshold.limit = saved.limit;
            }
        }
    }
}

/// Rules changed by one learning cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningOutcome {
    pub observed: Vec<String>,
    pub disabled: Vec<String>,
    pub tightened: Vec<String>,
}

/// Run one learning cycle over `rules`, updating `records` in place
pub fn learn(
    rules: &mut [PreventionRule],
    records: &mut HashMap<String, LearningRecord>,
    config: &PreventionConfig,
    now: DateTime<Utc>,
) -> LearningOutcome {
    let mut outcome = LearningOutcome::default();

    for rule in rules.iter_mut() {
        let record = records
            .entry(rule.id.clone())
            .or_insert_with(|| LearningRecord::for_rule(rule));

        if !record.observe(rule, config.ema_alpha, now) {
            continue;
        }
        outcome.observed.push(rule.id.clone());
        let effectiveness = record.effectiveness.unwrap_or(0.0);

        if rule.enabled && record.uses > config.disable_min_uses && effectiveness < config.disable_below {
            rule.enabled = false;
            outcome.disabled.push(rule.id.clone());
            tracing::warn!(
                rule_id = %rule.id,
                effectiveness = effectiveness,
                uses = record.uses,
                "Prevention rule disabled for low effectiveness"
            );
        } else if record.uses > config.tighten_min_uses && effectiveness > config.tighten_above {
            if rule.tighten(config.tighten_factor, config.tighten_floor) {
                outcome.tightened.push(rule.id.clone());
                tracing::info!(
                    rule_id = %rule.id,
                    effectiveness = effectiveness,
                    "Prevention rule thresholds tightened"
                );
            } else {
                tracing::debug!(rule_id = %rule.id, "Prevention rule thresholds at floor");
            }
        }

        record.enabled = rule.enabled;
        record.thresholds = rule.thresholds.clone();
    }

    outcome
}

/// SQLite store for learning records
pub struct LearningStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl LearningStore {
    /// Create or open the store at `db_path`
    pub fn open(db_path: &Path) -> SentinelResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        // WAL for crash resilience
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn, db_path.to_path_buf())
    }

    pub fn in_memory() -> SentinelResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> SentinelResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS learning_records (
                rule_id TEXT PRIMARY KEY NOT NULL,
                effectiveness REAL,
                uses INTEGER NOT NULL DEFAULT 0,
                successes INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                thresholds TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Insert or update the record for its rule
    pub fn save(&self, record: &LearningRecord) -> SentinelResult<()> {
        let thresholds = serde_json::to_string(&record.thresholds)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO learning_records (
                rule_id, effectiveness, uses, successes, enabled, thresholds, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(rule_id)
            DO UPDATE SET
                effectiveness = excluded.effectiveness,
                uses = excluded.uses,
                successes = excluded.successes,
                enabled = excluded.enabled,
                thresholds = excluded.thresholds,
                updated_at = excluded.updated_at
            "#,
            params![
                record.rule_id,
                record.effectiveness,
                record.uses as i64,
                record.successes as i64,
                record.enabled,
                thresholds,
                record.updated_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, rule_id: &str) -> SentinelResult<Option<LearningRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                r#"
            SELECT rule_id, effectiveness, uses, successes, enabled, thresholds, updated_at
            FROM learning_records
            WHERE rule_id = ?1
            "#,
                params![rule_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn load_all(&self) -> SentinelResult<Vec<LearningRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT rule_id, effectiveness, uses, successes, enabled, thresholds, updated_at
            FROM learning_records
            ORDER BY rule_id
            "#,
        )?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningRecord> {
        Ok(LearningRecord {
            rule_id: row.get(0)?,
            effectiveness: row.get(1)?,
            uses: row.get::<_, i64>(2)? as u64,
            successes: row.get::<_, i64>(3)? as u64,
            enabled: row.get(4)?,
            thresholds: {
                let json: String = row.get(5)?;
                serde_json::from_str(&json).unwrap_or_default()
            },
            updated_at: {
                let s: String = row.get(6)?;
                DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now)
            },
        })
    }
}

/// Limit of `metric` in a stored record, if present
pub fn recorded_limit(record: &LearningRecord, metric: MetricKind) -> Option<f64> {
    record
        .thresholds
        .iter()
        .find(|t| t.metric == metric)
        .map(|t| t.limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prevention::rules::builtin_rules;
    use tempfile::TempDir;

    fn disk_rule() -> PreventionRule {
        builtin_rules(0).into_iter().next().unwrap()
    }

    fn run(rule: &mut PreventionRule, successes: u64, failures: u64) {
        for _ in 0..successes {
            rule.record_execution(true, Utc::now());
        }
        for _ in 0..failures {
            rule.record_execution(false, Utc::now());
        }
    }

    #[test]
    fn test_ema_update() {
        let mut rule = disk_rule();
        let mut record = LearningRecord::for_rule(&rule);
        assert!(!record.observe(&rule, 0.3, Utc::now()));

        run(&mut rule, 1, 0);
        assert!(record.observe(&rule, 0.3, Utc::now()));
        assert_eq!(record.effectiveness, Some(1.0));

        run(&mut rule, 0, 1);
        record.observe(&rule, 0.3, Utc::now());
        assert!((record.effectiveness.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_ineffective_rule_is_disabled_after_enough_uses() {
        let config = PreventionConfig::default();
        let mut rules = vec![disk_rule()];
        let mut records = HashMap::new();

        run(&mut rules[0], 0, 10);
        let outcome = learn(&mut rules, &mut records, &config, Utc::now());
        assert!(outcome.disabled.is_empty());
        assert!(rules[0].enabled);

        run(&mut rules[0], 0, 1);
        let outcome = learn(&mut rules, &mut records, &config, Utc::now());
        assert_eq!(outcome.disabled, vec!["disk_space_monitor".to_string()]);
        assert!(!rules[0].enabled);
        assert!(!records["disk_space_monitor"].enabled);
    }

    #[test]
    fn test_effective_rule_is_tightened() {
        let config = PreventionConfig::default();
        let mut rules = vec![disk_rule()];
        let mut records = HashMap::new();

        run(&mut rules[0], 6, 0);
        let outcome = learn(&mut rules, &mut records, &config, Utc::now());
        assert_eq!(outcome.tightened, vec!["disk_space_monitor".to_string()]);

        let limit = rules[0].threshold_for(MetricKind::DiskUsagePct).unwrap();
        assert!((limit - 76.5).abs() < 1e-9);
        assert_eq!(
            recorded_limit(&records["disk_space_monitor"], MetricKind::DiskUsagePct),
            Some(limit)
        );

        // No new executions, no further tightening
        let outcome = learn(&mut rules, &mut records, &config, Utc::now());
        assert!(outcome.tightened.is_empty());
    }

    #[test]
    fn test_repeated_tightening_is_bounded() {
        let config = PreventionConfig::default();
        let mut rules = vec![disk_rule()];
        let mut records = HashMap::new();

        let mut tightened = 0;
        for _ in 0..30 {
            run(&mut rules[0], 6, 0);
            if !learn(&mut rules, &mut records, &config, Utc::now())
                .tightened
                .is_empty()
            {
                tightened += 1;
            }
        }

        // 85 * 0.9^n reaches the 42.5 floor on the seventh cycle
        assert_eq!(tightened, 7);
        let limit = rules[0].threshold_for(MetricKind::DiskUsagePct).unwrap();
        assert!((limit - 42.5).abs() < 1e-9);
        assert!(rules[0].enabled);
    }

    #[test]
    fn test_store_round_trip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker-1").join(LEARNING_DB_FILE);

        let mut rule = disk_rule();
        run(&mut rule, 3, 1);
        let mut record = LearningRecord::for_rule(&rule);
        record.observe(&rule, 0.3, Utc::now());
        record.enabled = false;

        {
            let store = LearningStore::open(&path).unwrap();
            store.save(&record).unwrap();
            record.uses = 5;
            store.save(&record).unwrap();
        }

        let store = LearningStore::open(&path).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uses, 5);
        assert!(!all[0].enabled);
        assert_eq!(all[0].effectiveness, Some(0.75));
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_apply_restores_rule_state() {
        let store = LearningStore::in_memory().unwrap();
        let mut rule = disk_rule();
        rule.tighten(0.9, 0.5);
        run(&mut rule, 2, 2);
        let mut record = LearningRecord::for_rule(&rule);
        record.observe(&rule, 0.3, Utc::now());
        store.save(&record).unwrap();

        let mut fresh = disk_rule();
        store
            .load("disk_space_monitor")
            .unwrap()
            .unwrap()
            .apply_to(&mut fresh);
        assert_eq!(fresh.trigger_count, 4);
        assert_eq!(fresh.failure_count, 2);
        assert_eq!(
            fresh.threshold_for(MetricKind::DiskUsagePct),
            rule.threshold_for(MetricKind::DiskUsagePct)
        );
    }
}
