//! The metadata store.
//!
//! One row per migration in `schema_migrations` is the source of truth for
//! the whole state machine. This module owns the SQL templates and exposes
//! typed accessors over a small `mysql_async` pool. When the sidecar
//! database name has been customized, table qualifiers are rewritten on
//! every query.

use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{params, Conn, Params, Pool, Row};
use schemashift_sql::analysis::{ColumnInfo, UniqueKey};

use crate::error::{Code, SchemaShiftError, SchemaShiftResult};
use crate::migration::{Migration, MigrationStatus};
use crate::vrepl::{VReplStream, VReplState, TERMINAL_ERROR_INDICATOR};

pub mod queries;

const DEFAULT_SIDECAR_DB_NAME: &str = "_vt";
const MAX_MESSAGE_LEN: usize = 16383;

/// Truncates a migration message to the column limit, respecting UTF-8
/// boundaries.
pub fn sanitize_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_LEN {
        return message;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Escapes a table name for use in a `SHOW TABLES LIKE` pattern.
fn like_pattern(table: &str) -> String {
    table.replace('\\', "\\\\").replace('\'', "''").replace('_', "\\_")
}

/// One row of the pending-migrations listing.
#[derive(Clone, Debug)]
pub struct PendingMigration {
    pub uuid: String,
    pub keyspace: String,
    pub mysql_table: String,
    pub migration_context: String,
    pub status: MigrationStatus,
}

/// One row of the scheduler's queued-migrations listing.
#[derive(Clone, Debug)]
pub struct QueuedMigration {
    pub uuid: String,
    pub postpone_launch: bool,
    pub postpone_completion: bool,
    pub ready_to_complete: bool,
    pub is_immediate_operation: bool,
}

/// One row of the running-migrations listing, with the computed intervals
/// the running-reviewer needs.
#[derive(Clone, Debug)]
pub struct RunningMigrationSnapshot {
    pub uuid: String,
    pub postpone_completion: bool,
    pub force_cutover: bool,
    pub cutover_attempts: i64,
    pub liveness_indicator: i64,
    pub since_last_cutover_attempt: Duration,
    pub since_ready_to_complete: Duration,
    pub elapsed: Duration,
}

/// A running migration whose liveness timestamp has aged.
#[derive(Clone, Debug)]
pub struct StaleMigration {
    pub uuid: String,
    pub stale_minutes: i64,
    pub liveness_timestamp: String,
}

/// A terminal migration whose artifacts await collection.
#[derive(Clone, Debug)]
pub struct UncollectedArtifacts {
    pub uuid: String,
    pub artifacts: String,
    pub log_path: String,
}

/// Parameters of a new migration row.
#[derive(Clone, Debug)]
pub struct InsertMigration {
    pub uuid: String,
    pub keyspace: String,
    pub shard: String,
    pub mysql_schema: String,
    pub mysql_table: String,
    pub migration_statement: String,
    pub strategy: String,
    pub options: String,
    pub ddl_action: String,
    pub migration_context: String,
    pub tablet: String,
    pub retain_artifacts_seconds: i64,
    pub cutover_threshold_seconds: i64,
    pub postpone_launch: bool,
    pub postpone_completion: bool,
    pub allow_concurrent: bool,
    pub reverted_uuid: String,
    pub is_view: bool,
}

/// Typed access to `schema_migrations` and its sibling sidecar tables.
pub struct MigrationStore {
    pool: Pool,
    sidecar_db_name: String,
}

impl MigrationStore {
    pub fn new(pool: Pool, sidecar_db_name: impl Into<String>) -> Self {
        Self {
            pool,
            sidecar_db_name: sidecar_db_name.into(),
        }
    }

    /// Rewrites sidecar table qualifiers when the sidecar database name has
    /// been customized.
    pub fn rewrite_sidecar(&self, query: &str) -> String {
        if self.sidecar_db_name == DEFAULT_SIDECAR_DB_NAME {
            query.to_string()
        } else {
            query.replace(
                concat!("_vt", "."),
                &format!("{}.", self.sidecar_db_name),
            )
        }
    }

    async fn conn(&self) -> SchemaShiftResult<Conn> {
        Ok(self.pool.get_conn().await?)
    }

    /// A pooled connection, for callers issuing ad-hoc statements.
    pub(crate) async fn pool_conn(&self) -> SchemaShiftResult<Conn> {
        self.conn().await
    }

    /// Executes a fully-rendered statement on a pooled connection.
    pub async fn exec_raw(&self, query: &str) -> SchemaShiftResult<u64> {
        self.exec(query, ()).await
    }

    async fn exec<P>(&self, template: &str, params: P) -> SchemaShiftResult<u64>
    where
        P: Into<Params> + Send,
    {
        let mut conn = self.conn().await?;
        conn.exec_drop(self.rewrite_sidecar(template), params).await?;
        Ok(conn.affected_rows())
    }

    async fn query_rows<P>(&self, template: &str, params: P) -> SchemaShiftResult<Vec<Row>>
    where
        P: Into<Params> + Send,
    {
        let mut conn = self.conn().await?;
        Ok(conn.exec(self.rewrite_sidecar(template), params).await?)
    }

    async fn query_first<P>(&self, template: &str, params: P) -> SchemaShiftResult<Option<Row>>
    where
        P: Into<Params> + Send,
    {
        let mut conn = self.conn().await?;
        Ok(conn.exec_first(self.rewrite_sidecar(template), params).await?)
    }

    fn take_string(row: &mut Row, column: &str) -> String {
        row.take::<Option<String>, _>(column).flatten().unwrap_or_default()
    }

    fn take_i64(row: &mut Row, column: &str) -> i64 {
        row.take::<Option<i64>, _>(column).flatten().unwrap_or(0)
    }

    // -- migration rows ------------------------------------------------------

    pub async fn insert_migration(&self, insert: &InsertMigration) -> SchemaShiftResult<u64> {
        self.exec(
            queries::INSERT_MIGRATION,
            params! {
                "migration_uuid" => insert.uuid.as_str(),
                "keyspace" => insert.keyspace.as_str(),
                "shard" => insert.shard.as_str(),
                "mysql_schema" => insert.mysql_schema.as_str(),
                "mysql_table" => insert.mysql_table.as_str(),
                "migration_statement" => insert.migration_statement.as_str(),
                "strategy" => insert.strategy.as_str(),
                "options" => insert.options.as_str(),
                "ddl_action" => insert.ddl_action.as_str(),
                "migration_context" => insert.migration_context.as_str(),
                "migration_status" => MigrationStatus::Queued.to_string(),
                "tablet" => insert.tablet.as_str(),
                "retain_artifacts_seconds" => insert.retain_artifacts_seconds,
                "cutover_threshold_seconds" => insert.cutover_threshold_seconds,
                "postpone_launch" => insert.postpone_launch,
                "postpone_completion" => insert.postpone_completion,
                "allow_concurrent" => insert.allow_concurrent,
                "reverted_uuid" => insert.reverted_uuid.as_str(),
                "is_view" => insert.is_view,
            },
        )
        .await
    }

    pub async fn read_migration(&self, uuid: &str) -> SchemaShiftResult<Migration> {
        let query = queries::SELECT_MIGRATION.replace("{columns}", queries::MIGRATION_COLUMNS);
        let row = self
            .query_first(&query, params! { "migration_uuid" => uuid })
            .await?;
        match row {
            Some(mut row) => Migration::from_row(&mut row),
            None => Err(SchemaShiftError::MigrationNotFound),
        }
    }

    pub async fn pending_migrations(&self) -> SchemaShiftResult<Vec<PendingMigration>> {
        let rows = self.query_rows(queries::SELECT_PENDING_MIGRATIONS, ()).await?;
        let mut pending = Vec::with_capacity(rows.len());
        for mut row in rows {
            let status_str = Self::take_string(&mut row, "migration_status");
            let status = status_str.parse().map_err(|_| {
                SchemaShiftError::new(
                    Code::Internal,
                    format!("unexpected migration_status: {status_str}"),
                )
            })?;
            pending.push(PendingMigration {
                uuid: Self::take_string(&mut row, "migration_uuid"),
                keyspace: Self::take_string(&mut row, "keyspace"),
                mysql_table: Self::take_string(&mut row, "mysql_table"),
                migration_context: Self::take_string(&mut row, "migration_context"),
                status,
            });
        }
        Ok(pending)
    }

    pub async fn pending_migration_uuids(&self) -> SchemaShiftResult<Vec<String>> {
        Ok(self
            .pending_migrations()
            .await?
            .into_iter()
            .map(|m| m.uuid)
            .collect())
    }

    pub async fn queued_unreviewed_uuids(&self) -> SchemaShiftResult<Vec<String>> {
        let rows = self
            .query_rows(queries::SELECT_QUEUED_UNREVIEWED_MIGRATIONS, ())
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| Self::take_string(&mut row, "migration_uuid"))
            .collect())
    }

    pub async fn queued_migrations(&self) -> SchemaShiftResult<Vec<QueuedMigration>> {
        let rows = self.query_rows(queries::SELECT_QUEUED_MIGRATIONS, ()).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| QueuedMigration {
                uuid: Self::take_string(&mut row, "migration_uuid"),
                postpone_launch: Self::take_i64(&mut row, "postpone_launch") != 0,
                postpone_completion: Self::take_i64(&mut row, "postpone_completion") != 0,
                ready_to_complete: Self::take_i64(&mut row, "ready_to_complete") != 0,
                is_immediate_operation: Self::take_i64(&mut row, "is_immediate_operation") != 0,
            })
            .collect())
    }

    pub async fn ready_migration_uuids(&self) -> SchemaShiftResult<Vec<String>> {
        let rows = self.query_rows(queries::SELECT_READY_MIGRATIONS, ()).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| Self::take_string(&mut row, "migration_uuid"))
            .collect())
    }

    pub async fn running_migrations(&self) -> SchemaShiftResult<Vec<RunningMigrationSnapshot>> {
        let rows = self.query_rows(queries::SELECT_RUNNING_MIGRATIONS, ()).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| RunningMigrationSnapshot {
                uuid: Self::take_string(&mut row, "migration_uuid"),
                postpone_completion: Self::take_i64(&mut row, "postpone_completion") != 0,
                force_cutover: Self::take_i64(&mut row, "force_cutover") != 0,
                cutover_attempts: Self::take_i64(&mut row, "cutover_attempts"),
                liveness_indicator: Self::take_i64(&mut row, "vitess_liveness_indicator"),
                since_last_cutover_attempt: Duration::from_secs(
                    Self::take_i64(&mut row, "seconds_since_last_cutover_attempt").max(0) as u64,
                ),
                since_ready_to_complete: Duration::from_micros(
                    Self::take_i64(&mut row, "microseconds_since_ready_to_complete").max(0) as u64,
                ),
                elapsed: Duration::from_secs(
                    Self::take_i64(&mut row, "elapsed_seconds").max(0) as u64,
                ),
            })
            .collect())
    }

    pub async fn stale_migrations(
        &self,
        stale_minutes: i64,
    ) -> SchemaShiftResult<Vec<StaleMigration>> {
        let rows = self
            .query_rows(
                queries::SELECT_STALE_MIGRATIONS,
                params! { "stale_minutes" => stale_minutes },
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| StaleMigration {
                uuid: Self::take_string(&mut row, "migration_uuid"),
                stale_minutes: Self::take_i64(&mut row, "stale_minutes"),
                liveness_timestamp: Self::take_string(&mut row, "liveness"),
            })
            .collect())
    }

    pub async fn last_complete_migration_on_table(
        &self,
        keyspace: &str,
        table: &str,
    ) -> SchemaShiftResult<Option<String>> {
        let row = self
            .query_first(
                queries::SELECT_COMPLETE_MIGRATIONS_ON_TABLE,
                params! { "keyspace" => keyspace, "mysql_table" => table },
            )
            .await?;
        Ok(row.map(|mut row| Self::take_string(&mut row, "migration_uuid")))
    }

    pub async fn complete_migration_by_context_and_sql(
        &self,
        keyspace: &str,
        migration_context: &str,
        sql: &str,
    ) -> SchemaShiftResult<Option<String>> {
        let row = self
            .query_first(
                queries::SELECT_COMPLETE_MIGRATIONS_BY_CONTEXT_AND_SQL,
                params! {
                    "keyspace" => keyspace,
                    "migration_context" => migration_context,
                    "migration_statement" => sql,
                },
            )
            .await?;
        Ok(row.map(|mut row| Self::take_string(&mut row, "migration_uuid")))
    }

    pub async fn failed_cancelled_in_context_before(
        &self,
        migration_context: &str,
        uuid: &str,
    ) -> SchemaShiftResult<Vec<String>> {
        let rows = self
            .query_rows(
                queries::SELECT_FAILED_CANCELLED_MIGRATIONS_IN_CONTEXT_BEFORE,
                params! { "migration_context" => migration_context, "migration_uuid" => uuid },
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| Self::take_string(&mut row, "migration_uuid"))
            .collect())
    }

    pub async fn uncollected_artifacts(
        &self,
        retain: Duration,
    ) -> SchemaShiftResult<Vec<UncollectedArtifacts>> {
        let rows = self
            .query_rows(
                queries::SELECT_UNCOLLECTED_ARTIFACTS,
                params! { "retain_seconds" => retain.as_secs() },
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| UncollectedArtifacts {
                uuid: Self::take_string(&mut row, "migration_uuid"),
                artifacts: Self::take_string(&mut row, "artifacts"),
                log_path: Self::take_string(&mut row, "log_path"),
            })
            .collect())
    }

    pub async fn fix_completed_timestamp(&self) -> SchemaShiftResult<()> {
        self.exec(queries::FIX_COMPLETED_TIMESTAMP, ()).await?;
        Ok(())
    }

    pub async fn migration_log_file(&self, uuid: &str) -> SchemaShiftResult<Option<String>> {
        let row = self
            .query_first(
                queries::SELECT_MIGRATION_LOG_FILE,
                params! { "migration_uuid" => uuid },
            )
            .await?;
        match row {
            None => Err(SchemaShiftError::MigrationNotFound),
            Some(mut row) => {
                let log_file = Self::take_string(&mut row, "log_file");
                Ok((!log_file.is_empty()).then_some(log_file))
            }
        }
    }

    pub async fn show_migrations(&self, where_expr: &str) -> SchemaShiftResult<Vec<Row>> {
        let query = queries::SHOW_MIGRATIONS_WHERE.replace("{where_expr}", where_expr);
        self.query_rows(&query, ()).await
    }

    // -- single-row updates --------------------------------------------------

    async fn exec_uuid(&self, template: &str, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec(template, params! { "migration_uuid" => uuid }).await
    }

    pub async fn update_migration_status(
        &self,
        uuid: &str,
        status: MigrationStatus,
    ) -> SchemaShiftResult<()> {
        tracing::info!(%uuid, %status, "transitioning migration");
        self.exec(
            queries::UPDATE_MIGRATION_STATUS,
            params! { "migration_status" => status.to_string(), "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_status_failed_or_cancelled(
        &self,
        uuid: &str,
    ) -> SchemaShiftResult<()> {
        tracing::info!(%uuid, "transitioning migration into status failed or cancelled");
        self.exec_uuid(queries::UPDATE_MIGRATION_STATUS_FAILED_OR_CANCELLED, uuid)
            .await?;
        Ok(())
    }

    /// Stamps a timestamp column with NOW(). `column` is always a literal
    /// at the call site.
    pub async fn update_migration_timestamp(
        &self,
        column: &str,
        uuid: &str,
    ) -> SchemaShiftResult<()> {
        let query = queries::UPDATE_MIGRATION_TIMESTAMP.replace("{column}", column);
        self.exec_uuid(&query, uuid).await?;
        Ok(())
    }

    pub async fn update_migration_started_timestamp(&self, uuid: &str) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::UPDATE_MIGRATION_STARTED_TIMESTAMP, uuid)
            .await?;
        Ok(())
    }

    pub async fn update_artifacts(&self, uuid: &str, artifacts: &[&str]) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_ARTIFACTS,
            params! { "artifacts" => artifacts.join(","), "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn clear_artifacts(&self, uuid: &str) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::CLEAR_ARTIFACTS, uuid).await?;
        Ok(())
    }

    pub async fn clear_single_artifact(&self, uuid: &str, artifact: &str) -> SchemaShiftResult<()> {
        self.exec(
            queries::CLEAR_SINGLE_ARTIFACT,
            params! { "artifact" => artifact, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_mysql_table(&self, uuid: &str, table: &str) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MYSQL_TABLE,
            params! { "mysql_table" => table, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_ddl_action(&self, uuid: &str, action: &str) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_DDL_ACTION,
            params! { "ddl_action" => action, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_is_view(&self, uuid: &str, is_view: bool) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_IS_VIEW,
            params! { "is_view" => is_view, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_set_immediate_operation(
        &self,
        uuid: &str,
    ) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::UPDATE_MIGRATION_SET_IMMEDIATE_OPERATION, uuid)
            .await?;
        Ok(())
    }

    pub async fn update_migration_ready_to_complete(
        &self,
        uuid: &str,
        is_ready: bool,
    ) -> SchemaShiftResult<()> {
        let template = if is_ready {
            queries::SET_MIGRATION_READY_TO_COMPLETE
        } else {
            queries::CLEAR_MIGRATION_READY_TO_COMPLETE
        };
        self.exec_uuid(template, uuid).await?;
        Ok(())
    }

    pub async fn update_migration_message(&self, uuid: &str, message: &str) -> SchemaShiftResult<()> {
        tracing::info!(%uuid, message, "updating migration message");
        let result = self
            .exec(
                queries::UPDATE_MIGRATION_MESSAGE,
                params! { "message" => sanitize_message(message), "migration_uuid" => uuid },
            )
            .await;
        if result.is_err() {
            self.exec(
                queries::UPDATE_MIGRATION_MESSAGE,
                params! {
                    "message" => "unable to update with original migration error message",
                    "migration_uuid" => uuid,
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn update_migration_special_plan(
        &self,
        uuid: &str,
        special_plan: &str,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_SPECIAL_PLAN,
            params! { "special_plan" => special_plan, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_stage(&self, uuid: &str, stage: &str) -> SchemaShiftResult<()> {
        tracing::info!(%uuid, stage, "migration stage");
        self.exec(
            queries::UPDATE_STAGE,
            params! { "stage" => stage, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn increment_cutover_attempts(&self, uuid: &str) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::INCREMENT_CUTOVER_ATTEMPTS, uuid).await?;
        Ok(())
    }

    pub async fn update_force_cutover(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec_uuid(queries::UPDATE_FORCE_CUTOVER, uuid).await
    }

    pub async fn update_cutover_threshold_seconds(
        &self,
        uuid: &str,
        threshold: Duration,
    ) -> SchemaShiftResult<u64> {
        self.exec(
            queries::UPDATE_CUTOVER_THRESHOLD_SECONDS,
            params! {
                "cutover_threshold_seconds" => threshold.as_secs(),
                "migration_uuid" => uuid,
            },
        )
        .await
    }

    pub async fn update_ready_for_cleanup(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec_uuid(queries::UPDATE_READY_FOR_CLEANUP, uuid).await
    }

    pub async fn update_ready_for_cleanup_all(&self) -> SchemaShiftResult<u64> {
        self.exec(queries::UPDATE_READY_FOR_CLEANUP_ALL, ()).await
    }

    pub async fn clear_postpone_completion(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec_uuid(queries::CLEAR_POSTPONE_COMPLETION, uuid).await
    }

    pub async fn set_postpone_completion(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec_uuid(queries::SET_POSTPONE_COMPLETION, uuid).await
    }

    pub async fn update_launch_migration(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.exec_uuid(queries::UPDATE_LAUNCH_MIGRATION, uuid).await
    }

    pub async fn update_migration_tablet(&self, uuid: &str, tablet: &str) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_TABLET,
            params! { "tablet" => tablet, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_tablet_failure(&self, uuid: &str) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::UPDATE_TABLET_FAILURE, uuid).await?;
        Ok(())
    }

    pub async fn retry_migration(&self, uuid: &str, tablet: &str) -> SchemaShiftResult<u64> {
        self.exec(
            queries::RETRY_MIGRATION,
            params! { "tablet" => tablet, "migration_uuid" => uuid },
        )
        .await
    }

    pub async fn retry_tablet_failure_migrations(&self, tablet: &str) -> SchemaShiftResult<u64> {
        self.exec(
            queries::RETRY_TABLET_FAILURE_MIGRATIONS,
            params! { "tablet" => tablet },
        )
        .await
    }

    pub async fn update_rows_copied(&self, uuid: &str, rows_copied: i64) -> SchemaShiftResult<()> {
        if rows_copied <= 0 {
            // zero or negative means "no information"
            return Ok(());
        }
        self.exec(
            queries::UPDATE_MIGRATION_ROWS_COPIED,
            params! { "rows_copied" => rows_copied, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_table_rows(
        &self,
        uuid: &str,
        table_rows: i64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_TABLE_ROWS,
            params! { "table_rows" => table_rows, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_progress(&self, uuid: &str, progress: f64) -> SchemaShiftResult<()> {
        if progress <= 0.0 {
            // progress starts at 0 and can only increase
            return Ok(());
        }
        self.exec(
            queries::UPDATE_MIGRATION_PROGRESS,
            params! { "progress" => progress, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_progress_by_rows_copied(
        &self,
        uuid: &str,
        rows_copied: i64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_PROGRESS_BY_ROWS_COPIED,
            params! { "rows_copied" => rows_copied, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_eta_seconds(
        &self,
        uuid: &str,
        eta_seconds: i64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_ETA_SECONDS,
            params! { "eta_seconds" => eta_seconds, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_eta_seconds_by_progress(
        &self,
        uuid: &str,
    ) -> SchemaShiftResult<()> {
        self.exec_uuid(queries::UPDATE_MIGRATION_ETA_SECONDS_BY_PROGRESS, uuid)
            .await?;
        Ok(())
    }

    pub async fn update_migration_vreplication_lag_seconds(
        &self,
        uuid: &str,
        lag_seconds: i64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_VREPLICATION_LAG_SECONDS,
            params! { "vreplication_lag_seconds" => lag_seconds, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_vitess_liveness_indicator(
        &self,
        uuid: &str,
        liveness_indicator: i64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_VITESS_LIVENESS_INDICATOR,
            params! { "liveness_indicator" => liveness_indicator, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_last_throttled(
        &self,
        uuid: &str,
        last_throttled_unix: i64,
        component: &str,
        reason: &str,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_LAST_THROTTLED,
            params! {
                "last_throttled" => last_throttled_unix,
                "component_throttled" => component,
                "reason_throttled" => reason,
                "migration_uuid" => uuid,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn update_migration_user_throttle_ratio(
        &self,
        uuid: &str,
        ratio: f64,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_MIGRATION_USER_THROTTLE_RATIO,
            params! { "ratio" => ratio, "migration_uuid" => uuid },
        )
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_schema_analysis(
        &self,
        uuid: &str,
        added_unique_keys: i64,
        removed_unique_keys: i64,
        removed_unique_key_names: &str,
        removed_foreign_key_names: &str,
        dropped_no_default_column_names: &str,
        expanded_column_names: &str,
        revertible_notes: &str,
    ) -> SchemaShiftResult<()> {
        self.exec(
            queries::UPDATE_SCHEMA_ANALYSIS,
            params! {
                "added_unique_keys" => added_unique_keys,
                "removed_unique_keys" => removed_unique_keys,
                "removed_unique_key_names" => removed_unique_key_names,
                "removed_foreign_key_names" => removed_foreign_key_names,
                "dropped_no_default_column_names" => dropped_no_default_column_names,
                "expanded_column_names" => expanded_column_names,
                "revertible_notes" => revertible_notes,
                "migration_uuid" => uuid,
            },
        )
        .await?;
        Ok(())
    }

    // -- replication registry ------------------------------------------------

    /// Reads the workflow registry row for a migration. An earlier error in
    /// the stream's history may be overshadowed by a newer message, so the
    /// log is scanned for terminal errors as well.
    pub async fn read_vrepl_stream(
        &self,
        db_name: &str,
        workflow: &str,
        ok_if_missing: bool,
    ) -> SchemaShiftResult<Option<VReplStream>> {
        let row = self
            .query_first(
                queries::READ_VREPL_STREAM,
                params! { "workflow" => workflow, "db_name" => db_name },
            )
            .await?;
        let mut stream = match row {
            Some(mut row) => VReplStream::from_row(&mut row),
            None if ok_if_missing => return Ok(None),
            None => {
                return Err(SchemaShiftError::new(
                    Code::Unknown,
                    format!("cannot find unique workflow for UUID: {workflow}"),
                ))
            }
        };

        let log_row = self
            .query_first(
                queries::READ_VREPL_LOG_ERRORS,
                params! { "stream_id" => stream.id, "indicator" => TERMINAL_ERROR_INDICATOR },
            )
            .await?;
        if let Some(mut log_row) = log_row {
            stream.state = VReplState::Error;
            let message = Self::take_string(&mut log_row, "message");
            if !message.is_empty() {
                stream.message = format!("vreplication: {message}");
            }
        }
        Ok(Some(stream))
    }

    pub async fn read_copy_state_count(&self, stream_id: i32) -> SchemaShiftResult<i64> {
        let row = self
            .query_first(
                queries::READ_COUNT_COPY_STATE,
                params! { "stream_id" => stream_id },
            )
            .await?;
        let mut row = row.ok_or_else(|| {
            SchemaShiftError::new(
                Code::Unknown,
                format!("unexpected empty result reading copy state for stream {stream_id}"),
            )
        })?;
        Ok(Self::take_i64(&mut row, "cnt"))
    }

    // -- server-side inspection ----------------------------------------------

    pub async fn table_exists(&self, table: &str) -> SchemaShiftResult<bool> {
        let query = queries::SHOW_TABLES_LIKE.replace("{pattern}", &like_pattern(table));
        let rows = self.query_rows(&query, ()).await?;
        Ok(!rows.is_empty())
    }

    pub async fn show_create_table(&self, table: &str) -> SchemaShiftResult<String> {
        let query = queries::SHOW_CREATE_TABLE.replace("{table}", table);
        let row = self.query_first(&query, ()).await?;
        let mut row = match row {
            Some(row) => row,
            None => return Ok(String::new()),
        };
        Ok(row.take::<String, _>(1).unwrap_or_default())
    }

    pub async fn primary_position(&self) -> SchemaShiftResult<String> {
        let row = self.query_first(queries::SELECT_PRIMARY_POSITION, ()).await?;
        Ok(row
            .map(|mut row| Self::take_string(&mut row, "pos"))
            .unwrap_or_default())
    }

    pub async fn is_preserve_foreign_key_supported(&self) -> SchemaShiftResult<bool> {
        let rows = self
            .query_rows(queries::SHOW_VARIABLES_LIKE_PRESERVE_FOREIGN_KEY, ())
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn server_version(&self) -> SchemaShiftResult<String> {
        let row = self.query_first("SELECT VERSION() AS version", ()).await?;
        Ok(row
            .map(|mut row| Self::take_string(&mut row, "version"))
            .unwrap_or_default())
    }

    /// Whether the table is either a parent or a child in at least one
    /// foreign key constraint.
    pub async fn table_participates_in_foreign_key(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaShiftResult<bool> {
        for template in [
            queries::SELECT_COUNT_FK_PARENT_CONSTRAINTS,
            queries::SELECT_COUNT_FK_CHILD_CONSTRAINTS,
        ] {
            let row = self
                .query_first(
                    template,
                    params! { "table_schema" => schema, "table_name" => table },
                )
                .await?
                .ok_or_else(|| {
                    SchemaShiftError::new(
                        Code::Unknown,
                        "unexpected result from INFORMATION_SCHEMA.KEY_COLUMN_USAGE query",
                    )
                })?;
            let mut row = row;
            if Self::take_i64(&mut row, "num_fk_constraints") > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn read_table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaShiftResult<Vec<ColumnInfo>> {
        let rows = self
            .query_rows(
                queries::SELECT_TABLE_COLUMNS,
                params! { "table_schema" => schema, "table_name" => table },
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| ColumnInfo {
                name: Self::take_string(&mut row, "COLUMN_NAME"),
                column_type: Self::take_string(&mut row, "COLUMN_TYPE"),
                charset: {
                    let charset = Self::take_string(&mut row, "CHARACTER_SET_NAME");
                    (!charset.is_empty()).then_some(charset)
                },
                is_nullable: Self::take_i64(&mut row, "is_nullable") != 0,
                has_default: Self::take_i64(&mut row, "has_default") != 0,
            })
            .collect())
    }

    pub async fn read_table_unique_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaShiftResult<Vec<UniqueKey>> {
        let rows = self
            .query_rows(
                queries::SELECT_TABLE_UNIQUE_KEYS,
                params! { "table_schema" => schema, "table_name" => table },
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut row| UniqueKey {
                name: Self::take_string(&mut row, "INDEX_NAME"),
                columns: Self::take_string(&mut row, "columns")
                    .split(',')
                    .map(|c| c.to_string())
                    .collect(),
            })
            .collect())
    }

    pub async fn read_table_auto_increment(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaShiftResult<Option<u64>> {
        let row = self
            .query_first(
                queries::SELECT_TABLE_AUTO_INCREMENT,
                params! { "table_schema" => schema, "table_name" => table },
            )
            .await?;
        Ok(row.and_then(|mut row| row.take::<Option<u64>, _>("AUTO_INCREMENT").flatten()))
    }

    pub async fn read_table_rows_estimate(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaShiftResult<i64> {
        let row = self
            .query_first(
                queries::SELECT_TABLE_ROWS_ESTIMATE,
                params! { "table_schema" => schema, "table_name" => table },
            )
            .await?;
        Ok(row
            .map(|mut row| Self::take_i64(&mut row, "table_rows"))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_sanitization() {
        assert_eq!(sanitize_message("short"), "short");

        let long = "x".repeat(MAX_MESSAGE_LEN + 100);
        assert_eq!(sanitize_message(&long).len(), MAX_MESSAGE_LEN);

        // multi-byte characters are not split
        let wide = "é".repeat(MAX_MESSAGE_LEN);
        let sanitized = sanitize_message(&wide);
        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(std::str::from_utf8(sanitized.as_bytes()).is_ok());
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("my_table"), "my\\_table");
        assert_eq!(like_pattern("it's"), "it''s");
    }

    #[test]
    fn sidecar_rewrite() {
        let pool = Pool::new("mysql://root@localhost:3306/test");
        let store = MigrationStore::new(pool.clone(), "_vt");
        assert_eq!(
            store.rewrite_sidecar("SELECT * FROM _vt.schema_migrations"),
            "SELECT * FROM _vt.schema_migrations"
        );
        let custom = MigrationStore::new(pool, "_sidecar");
        assert_eq!(
            custom.rewrite_sidecar("SELECT * FROM _vt.schema_migrations"),
            "SELECT * FROM _sidecar.schema_migrations"
        );
    }
}
