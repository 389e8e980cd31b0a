use std::path::PathBuf;
use std::time::Duration;

use crate::limits::{MAX_CONNECTIONS, MAX_SOLVER_BUDGET_MS};

/// Runtime configuration, read from `PITCHBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub schedule: ScheduleConfig,
    /// Periodic feasibility check; `None` disables it.
    pub check_interval: Option<Duration>,
}

/// Knobs for formulation and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub solver_budget: Duration,
    pub horizon_days: i64,
    /// Granularity of candidate start times.
    pub slot_step_minutes: i64,
    /// Offset of club-local time from UTC, used for day boundaries.
    pub utc_offset_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            solver_budget: Duration::from_millis(2_000),
            horizon_days: 28,
            slot_step_minutes: 15,
            utc_offset_minutes: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "pitchbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            schedule: ScheduleConfig::default(),
            check_interval: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Config::default();
        let get = |key: &str| lookup(&format!("PITCHBOOK_{key}"));
        let parse = |key: &str| get(key).and_then(|s| s.trim().parse::<i64>().ok());

        let solver_budget_ms = parse("SOLVER_BUDGET_MS")
            .map(|ms| ms.clamp(0, MAX_SOLVER_BUDGET_MS as i64) as u64)
            .map(Duration::from_millis)
            .unwrap_or(d.schedule.solver_budget);

        Self {
            bind: get("BIND").unwrap_or(d.bind),
            port: parse("PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(d.port),
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("PASSWORD").unwrap_or(d.password),
            max_connections: parse("MAX_CONNECTIONS")
                .map(|n| n.clamp(1, MAX_CONNECTIONS as i64) as usize)
                .unwrap_or(d.max_connections),
            compact_threshold: parse("COMPACT_THRESHOLD")
                .map(|n| n.max(1) as u64)
                .unwrap_or(d.compact_threshold),
            tls_cert: get("TLS_CERT"),
            tls_key: get("TLS_KEY"),
            metrics_port: parse("METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            schedule: ScheduleConfig {
                solver_budget: solver_budget_ms,
                horizon_days: parse("HORIZON_DAYS")
                    .map(|n| n.clamp(1, 366))
                    .unwrap_or(d.schedule.horizon_days),
                slot_step_minutes: parse("SLOT_STEP_MINUTES")
                    .map(|n| n.clamp(1, 240))
                    .unwrap_or(d.schedule.slot_step_minutes),
                utc_offset_minutes: parse("UTC_OFFSET_MINUTES")
                    .map(|n| n.clamp(-14 * 60, 14 * 60))
                    .unwrap_or(d.schedule.utc_offset_minutes),
            },
            check_interval: parse("CHECK_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(|s| Duration::from_secs(s as u64)),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// The engine's WAL lives directly in the data directory.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("pitchbook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.schedule, ScheduleConfig::default());
        assert!(cfg.check_interval.is_none());
        assert!(cfg.metrics_port.is_none());
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let cfg = Config::from_lookup(lookup(&[
            ("PITCHBOOK_PORT", "6000"),
            ("PITCHBOOK_SOLVER_BUDGET_MS", "999999999"),
            ("PITCHBOOK_SLOT_STEP_MINUTES", "30"),
            ("PITCHBOOK_UTC_OFFSET_MINUTES", "60"),
            ("PITCHBOOK_CHECK_INTERVAL_SECS", "300"),
            ("PITCHBOOK_DATA_DIR", "/var/lib/pitchbook"),
        ]));
        assert_eq!(cfg.port, 6000);
        assert_eq!(
            cfg.schedule.solver_budget,
            Duration::from_millis(MAX_SOLVER_BUDGET_MS)
        );
        assert_eq!(cfg.schedule.slot_step_minutes, 30);
        assert_eq!(cfg.schedule.utc_offset_minutes, 60);
        assert_eq!(cfg.check_interval, Some(Duration::from_secs(300)));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/pitchbook/pitchbook.wal"));
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = Config::from_lookup(lookup(&[
            ("PITCHBOOK_PORT", "not-a-port"),
            ("PITCHBOOK_CHECK_INTERVAL_SECS", "0"),
        ]));
        assert_eq!(cfg.port, 5433);
        assert!(cfg.check_interval.is_none());
    }
}
