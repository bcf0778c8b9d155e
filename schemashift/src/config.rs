//! Executor configuration.

use std::num::ParseIntError;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Shared configuration for the online DDL executor.
///
/// Usable as command-line options via `#[command(flatten)]`.
#[derive(Debug, Clone, Parser, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Whether online DDL is enabled at all. When disabled, every mutating
    /// API call is rejected.
    #[arg(long, env = "ENABLE_ONLINE_DDL", action = clap::ArgAction::Set, default_value_t = true)]
    #[serde(default = "default_enable_online_ddl")]
    pub enable_online_ddl: bool,

    /// Interval between migration checks, in seconds.
    #[arg(long = "migration-check-interval", env = "MIGRATION_CHECK_INTERVAL", default_value = "60", value_parser = duration_from_seconds)]
    #[serde(default = "default_check_interval")]
    pub migration_check_interval: Duration,

    /// How long to keep an old migrated table before handing it to table
    /// GC, in seconds.
    #[arg(long = "retain-online-ddl-tables", env = "RETAIN_ONLINE_DDL_TABLES", default_value = "86400", value_parser = duration_from_seconds)]
    #[serde(default = "default_retain_tables")]
    pub retain_online_ddl_tables: Duration,

    /// Maximum number of online DDL migrations that may run concurrently.
    #[arg(long = "max-concurrent-online-ddl", env = "MAX_CONCURRENT_ONLINE_DDL", default_value = "256")]
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_online_ddl: usize,

    /// Name of the sidecar database holding the `schema_migrations`,
    /// `vreplication`, `vreplication_log` and `copy_state` tables. Table
    /// qualifiers in every query are rewritten when this is customized.
    #[arg(long = "sidecar-db-name", env = "SIDECAR_DB_NAME", default_value = "_vt")]
    #[serde(default = "default_sidecar_db_name")]
    pub sidecar_db_name: String,
}

fn default_enable_online_ddl() -> bool {
    true
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retain_tables() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_max_concurrent() -> usize {
    256
}

fn default_sidecar_db_name() -> String {
    "_vt".to_string()
}

fn duration_from_seconds(i: &str) -> Result<Duration, ParseIntError> {
    i.parse::<u64>().map(Duration::from_secs)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_online_ddl: default_enable_online_ddl(),
            migration_check_interval: default_check_interval(),
            retain_online_ddl_tables: default_retain_tables(),
            max_concurrent_online_ddl: default_max_concurrent(),
            sidecar_db_name: default_sidecar_db_name(),
        }
    }
}

impl Config {
    /// The concurrency cap, clamped so that at least one migration can ever
    /// run.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent_online_ddl.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.enable_online_ddl);
        assert_eq!(config.migration_check_interval, Duration::from_secs(60));
        assert_eq!(
            config.retain_online_ddl_tables,
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(config.max_concurrent_online_ddl, 256);
        assert_eq!(config.sidecar_db_name, "_vt");
    }

    #[test]
    fn max_concurrent_is_clamped() {
        let config = Config {
            max_concurrent_online_ddl: 0,
            ..Default::default()
        };
        assert_eq!(config.max_concurrent(), 1);
    }

    #[test]
    fn parses_from_args() {
        let config = Config::parse_from([
            "executor",
            "--migration-check-interval",
            "10",
            "--max-concurrent-online-ddl",
            "4",
        ]);
        assert_eq!(config.migration_check_interval, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_online_ddl, 4);
    }
}
