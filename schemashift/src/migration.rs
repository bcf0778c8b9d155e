//! The typed migration record and its surrounding domain logic.
//!
//! Metadata rows are accessed by column name with typed accessors and
//! mapped once into [`Migration`]; everything downstream works with the
//! typed record.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mysql_async::Row;
use schemashift_sql::ddl::DdlAction;
use schemashift_sql::strategy::{DdlStrategy, StrategySetting};
use strum::{Display, EnumString};

use crate::error::{Code, SchemaShiftError, SchemaShiftResult};

/// Lifecycle status of a migration. Transitions are monotone toward a
/// terminal state; the only backward edge is an explicit retry
/// (terminal → queued).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MigrationStatus {
    Queued,
    Ready,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Complete | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }

    /// Pending = expected to run or currently running.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }
}

/// The role of the local server. Only a primary runs migrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabletType {
    Primary,
    Replica,
    Rdonly,
}

/// Default cut-over threshold, applied when a migration specifies none.
pub const DEFAULT_CUT_OVER_THRESHOLD: Duration = Duration::from_secs(10);
/// Minimum accepted cut-over threshold.
pub const MIN_CUT_OVER_THRESHOLD: Duration = Duration::from_secs(5);
/// Maximum accepted cut-over threshold.
pub const MAX_CUT_OVER_THRESHOLD: Duration = Duration::from_secs(30);

/// Validates a desired cut-over threshold. Zero means "use the default";
/// out-of-range values are rejected.
pub fn safe_cut_over_threshold(threshold: Duration) -> SchemaShiftResult<Duration> {
    if threshold == Duration::ZERO {
        Ok(DEFAULT_CUT_OVER_THRESHOLD)
    } else if threshold < MIN_CUT_OVER_THRESHOLD {
        Err(SchemaShiftError::new(
            Code::FailedPrecondition,
            format!("cut-over min value is {MIN_CUT_OVER_THRESHOLD:?}"),
        ))
    } else if threshold > MAX_CUT_OVER_THRESHOLD {
        Err(SchemaShiftError::new(
            Code::FailedPrecondition,
            format!("cut-over max value is {MAX_CUT_OVER_THRESHOLD:?}"),
        ))
    } else {
        Ok(threshold)
    }
}

/// Splits a comma-delimited list column, dropping empty entries.
pub fn split_delimited_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

/// A migration row, mapped once from the metadata store.
#[derive(Clone, Debug)]
pub struct Migration {
    pub uuid: String,
    pub keyspace: String,
    pub shard: String,
    pub mysql_schema: String,
    pub mysql_table: String,
    pub migration_statement: String,
    pub strategy: StrategySetting,
    pub status: MigrationStatus,
    pub ddl_action: String,
    pub retries: i64,
    pub ready_to_complete: bool,
    pub was_ready_to_complete: bool,
    pub tablet: String,
    pub migration_context: String,
    pub cut_over_threshold: Duration,
    pub is_view: bool,
    pub is_immediate_operation: bool,
    pub postpone_launch: bool,
    pub postpone_completion: bool,
    pub artifacts: String,
    pub shadow_analyzed: bool,
}

impl Migration {
    /// Maps a `schema_migrations` row. Unknown or null columns take safe
    /// defaults; a bad cut-over threshold falls back to the default rather
    /// than failing the read.
    pub fn from_row(row: &mut Row) -> SchemaShiftResult<Self> {
        let take_string = |row: &mut Row, column: &str| -> String {
            row.take::<Option<String>, _>(column).flatten().unwrap_or_default()
        };
        let take_i64 = |row: &mut Row, column: &str| -> i64 {
            row.take::<Option<i64>, _>(column).flatten().unwrap_or(0)
        };

        let status_str = take_string(row, "migration_status");
        let status = MigrationStatus::from_str(&status_str).map_err(|_| {
            SchemaShiftError::new(
                Code::Internal,
                format!("unexpected migration_status: {status_str}"),
            )
        })?;
        let strategy_str = take_string(row, "strategy");
        let options = take_string(row, "options");
        let strategy = StrategySetting::parse(&strategy_str, &options)
            .map_err(SchemaShiftError::from)?;

        let threshold = Duration::from_secs(take_i64(row, "cutover_threshold_seconds") as u64);
        let cut_over_threshold =
            safe_cut_over_threshold(threshold).unwrap_or(DEFAULT_CUT_OVER_THRESHOLD);

        Ok(Migration {
            uuid: take_string(row, "migration_uuid"),
            keyspace: take_string(row, "keyspace"),
            shard: take_string(row, "shard"),
            mysql_schema: take_string(row, "mysql_schema"),
            mysql_table: take_string(row, "mysql_table"),
            migration_statement: take_string(row, "migration_statement"),
            strategy,
            status,
            ddl_action: take_string(row, "ddl_action"),
            retries: take_i64(row, "retries"),
            ready_to_complete: take_i64(row, "ready_to_complete") != 0,
            was_ready_to_complete: take_i64(row, "was_ready_to_complete") != 0,
            tablet: take_string(row, "tablet"),
            migration_context: take_string(row, "migration_context"),
            cut_over_threshold,
            is_view: take_i64(row, "is_view") != 0,
            is_immediate_operation: take_i64(row, "is_immediate_operation") != 0,
            postpone_launch: take_i64(row, "postpone_launch") != 0,
            postpone_completion: take_i64(row, "postpone_completion") != 0,
            artifacts: take_string(row, "artifacts"),
            shadow_analyzed: take_i64(row, "shadow_analyzed") != 0,
        })
    }

    pub fn action(&self) -> Option<DdlAction> {
        DdlAction::from_str(&self.ddl_action).ok()
    }

    pub fn artifact_tables(&self) -> Vec<String> {
        split_delimited_list(&self.artifacts)
    }
}

/// An entry in the executor's ownership set: a running migration this
/// executor drives. The ready flags are read by the runner's conflict
/// check while the running-reviewer mutates them, hence atomics.
#[derive(Debug)]
pub struct OwnedMigration {
    pub migration: Migration,
    ready_to_complete: AtomicBool,
    was_ready_to_complete: AtomicBool,
}

impl OwnedMigration {
    pub fn new(migration: Migration) -> Self {
        let ready = migration.ready_to_complete;
        let was_ready = migration.was_ready_to_complete;
        Self {
            migration,
            ready_to_complete: AtomicBool::new(ready),
            was_ready_to_complete: AtomicBool::new(was_ready),
        }
    }

    pub fn set_ready_to_complete(&self, ready: bool) {
        self.ready_to_complete.store(ready, Ordering::SeqCst);
        if ready {
            // set once, never cleared
            self.was_ready_to_complete.store(true, Ordering::SeqCst);
        }
    }

    pub fn ready_to_complete(&self) -> bool {
        self.ready_to_complete.load(Ordering::SeqCst)
    }

    pub fn was_ready_to_complete(&self) -> bool {
        self.was_ready_to_complete.load(Ordering::SeqCst)
    }
}

/// Whether the migration both requests and is eligible for concurrent
/// execution. CREATE, DROP and REVERT may run concurrently; ALTER only
/// when executed via a replication workflow.
pub fn allow_concurrent_migration(migration: &Migration) -> bool {
    if !migration.strategy.is_allow_concurrent() {
        return false;
    }
    match migration.action() {
        Some(DdlAction::Create) | Some(DdlAction::Drop) | Some(DdlAction::Revert) => true,
        Some(DdlAction::Alter) => matches!(
            migration.strategy.strategy,
            DdlStrategy::Online | DdlStrategy::Vitess
        ),
        None => false,
    }
}

/// Whether a proposed migration conflicts with a running one, such that
/// the two cannot run concurrently.
pub fn conflicts_with_running(
    running: &Migration,
    running_was_ready_to_complete: bool,
    proposed: &Migration,
) -> bool {
    if running.mysql_table == proposed.mysql_table {
        return true;
    }
    if !allow_concurrent_migration(running) && !allow_concurrent_migration(proposed) {
        return true;
    }
    if proposed.action() == Some(DdlAction::Alter) && !running_was_ready_to_complete {
        // the running migration is still busy copying rows
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration(table: &str, action: &str, strategy: DdlStrategy, options: &str) -> Migration {
        Migration {
            uuid: "2201058f_f266_41ea_bab4_0242c0a8b005".to_string(),
            keyspace: "ks".to_string(),
            shard: "0".to_string(),
            mysql_schema: "db".to_string(),
            mysql_table: table.to_string(),
            migration_statement: String::new(),
            strategy: StrategySetting::new(strategy, options),
            status: MigrationStatus::Running,
            ddl_action: action.to_string(),
            retries: 0,
            ready_to_complete: false,
            was_ready_to_complete: false,
            tablet: "tablet-100".to_string(),
            migration_context: String::new(),
            cut_over_threshold: DEFAULT_CUT_OVER_THRESHOLD,
            is_view: false,
            is_immediate_operation: false,
            postpone_launch: false,
            postpone_completion: false,
            artifacts: String::new(),
            shadow_analyzed: false,
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!MigrationStatus::Queued.is_terminal());
        assert!(!MigrationStatus::Running.is_terminal());
        assert!(MigrationStatus::Complete.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
        assert!(MigrationStatus::Cancelled.is_terminal());
        assert!(MigrationStatus::Ready.is_pending());
    }

    #[test]
    fn threshold_boundaries() {
        assert_eq!(
            safe_cut_over_threshold(Duration::ZERO).unwrap(),
            DEFAULT_CUT_OVER_THRESHOLD
        );
        assert_eq!(
            safe_cut_over_threshold(Duration::from_secs(5)).unwrap(),
            Duration::from_secs(5)
        );
        assert_eq!(
            safe_cut_over_threshold(Duration::from_secs(30)).unwrap(),
            Duration::from_secs(30)
        );
        assert!(safe_cut_over_threshold(Duration::from_secs(4)).is_err());
        assert!(safe_cut_over_threshold(Duration::from_secs(31)).is_err());
    }

    #[test]
    fn delimited_lists() {
        assert_eq!(
            split_delimited_list("a,b , c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_delimited_list("").is_empty());
        assert_eq!(split_delimited_list("a,,b").len(), 2);
    }

    #[test]
    fn concurrency_eligibility() {
        // not requested
        assert!(!allow_concurrent_migration(&migration(
            "t",
            "drop",
            DdlStrategy::Vitess,
            ""
        )));
        // CREATE/DROP/REVERT are eligible
        for action in ["create", "drop", "revert"] {
            assert!(allow_concurrent_migration(&migration(
                "t",
                action,
                DdlStrategy::Vitess,
                "--allow-concurrent"
            )));
        }
        // ALTER only via workflow strategies
        assert!(allow_concurrent_migration(&migration(
            "t",
            "alter",
            DdlStrategy::Online,
            "--allow-concurrent"
        )));
        assert!(!allow_concurrent_migration(&migration(
            "t",
            "alter",
            DdlStrategy::MySql,
            "--allow-concurrent"
        )));
    }

    #[test]
    fn same_table_always_conflicts() {
        let running = migration("t", "alter", DdlStrategy::Vitess, "--allow-concurrent");
        let proposed = migration("t", "drop", DdlStrategy::Vitess, "--allow-concurrent");
        assert!(conflicts_with_running(&running, true, &proposed));
    }

    #[test]
    fn non_concurrent_pairs_conflict() {
        let running = migration("t1", "alter", DdlStrategy::Vitess, "");
        let proposed = migration("t2", "drop", DdlStrategy::Vitess, "");
        assert!(conflicts_with_running(&running, true, &proposed));
    }

    #[test]
    fn alter_waits_for_running_row_copy() {
        let running = migration("t1", "alter", DdlStrategy::Vitess, "--allow-concurrent");
        let proposed = migration("t2", "alter", DdlStrategy::Vitess, "--allow-concurrent");
        assert!(conflicts_with_running(&running, false, &proposed));
        assert!(!conflicts_with_running(&running, true, &proposed));
    }

    #[test]
    fn concurrent_revert_does_not_conflict() {
        let running = migration("t1", "alter", DdlStrategy::Vitess, "--allow-concurrent");
        let proposed = migration("t2", "revert", DdlStrategy::Vitess, "--allow-concurrent");
        assert!(!conflicts_with_running(&running, true, &proposed));
    }

    #[test]
    fn owned_migration_ready_flags_are_sticky() {
        let owned = OwnedMigration::new(migration("t", "alter", DdlStrategy::Vitess, ""));
        assert!(!owned.ready_to_complete());
        assert!(!owned.was_ready_to_complete());
        owned.set_ready_to_complete(true);
        assert!(owned.ready_to_complete());
        assert!(owned.was_ready_to_complete());
        owned.set_ready_to_complete(false);
        assert!(!owned.ready_to_complete());
        // sticky
        assert!(owned.was_ready_to_complete());
    }
}
