//! The lifecycle engine.
//!
//! One [`Executor`] runs per primary. It owns the metadata pool, the
//! in-memory ownership set, and the periodic check tick that drives every
//! migration through its lifecycle. All mutating operations funnel through
//! a single migration mutex; cross-task state lives in the metadata store,
//! not in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mysql_async::prelude::Queryable;
use mysql_async::{params, Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::contracts::{LagThrottler, SchemaDiff, TabletManagerClient, WriteBuffer};
use crate::error::{Code, SchemaShiftError, SchemaShiftResult};
use crate::last_error::LastError;
use crate::migration::{
    conflicts_with_running, Migration, MigrationStatus, OwnedMigration, TabletType,
};
use crate::shutdown::{self, ShutdownSender};
use crate::store::{queries, MigrationStore};
use crate::timer::Ticker;
use crate::{vrepl, classified_err};

mod api;
mod cutover;
mod handlers;
mod review;

pub use api::MigrationsFilter;
pub use cutover::{should_cut_over_according_to_backoff, CUTOVER_INTERVALS};

pub(crate) const STALE_MIGRATION_WARNING_MINUTES: i64 = 5;
pub(crate) const STALE_MIGRATION_FAIL_MINUTES: i64 = 180;
pub(crate) const PROGRESS_PCT_STARTED: f64 = 0.0;
pub(crate) const PROGRESS_PCT_FULL: f64 = 100.0;
pub(crate) const ETA_SECONDS_UNKNOWN: i64 = -1;
pub(crate) const ETA_SECONDS_NOW: i64 = 0;
pub(crate) const ROWS_COPIED_UNKNOWN: i64 = 0;
pub(crate) const EMPTY_HINT: &str = "";
pub(crate) const READY_TO_COMPLETE_HINT: &str = "ready_to_complete";
pub(crate) const QR_BUFFER_EXTRA_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const GRPC_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const VREPLICATION_TEST_SUITE_WAIT_SECONDS: i64 = 5;

const DATABASE_POOL_SIZE: usize = 3;
const MIGRATION_NEXT_CHECK_INTERVALS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// External collaborators, provided at construction.
pub struct Deps {
    pub tablet_manager: Arc<dyn TabletManagerClient>,
    pub lag_throttler: Arc<dyn LagThrottler>,
    pub write_buffer: Arc<dyn WriteBuffer>,
    pub schema_diff: Arc<dyn SchemaDiff>,
    /// The current role of the local server.
    pub tablet_type: Box<dyn Fn() -> TabletType + Send + Sync>,
    /// Whether any cross-shard prepared transaction references the table.
    pub is_prepared_pool_empty: Box<dyn Fn(&str) -> bool + Send + Sync>,
    /// Nudges the external table-GC component to run a check.
    pub request_gc_checks: Box<dyn Fn() + Send + Sync>,
}

/// A migration the running-reviewer decided must be cancelled.
pub(crate) struct CancellableMigration {
    pub uuid: String,
    pub message: String,
}

/// The state machine running migrations.
pub struct Executor {
    pub(crate) config: Config,
    pub(crate) store: MigrationStore,
    dba_opts: Opts,
    pub(crate) keyspace: String,
    pub(crate) shard: String,
    pub(crate) db_name: String,
    tablet_alias: String,
    pub(crate) deps: Deps,

    /// UUIDs this executor currently drives. Migrations found running but
    /// not listed here are either adopted or terminated.
    pub(crate) owned_running_migrations: DashMap<String, Arc<OwnedMigration>>,
    pub(crate) vreplication_last_error: parking_lot::Mutex<HashMap<String, LastError>>,
    tick_reentrance_flag: AtomicBool,
    pub(crate) reviewed_running_migrations_flag: AtomicBool,
    pub(crate) fix_completed_timestamp_done: AtomicBool,
    is_open: AtomicBool,

    pub(crate) migration_mutex: tokio::sync::Mutex<()>,
    pub(crate) submit_mutex: tokio::sync::Mutex<()>,
    pub(crate) ticks: Ticker,
    tick_task: parking_lot::Mutex<Option<(ShutdownSender, JoinHandle<()>)>>,
    weak_self: std::sync::Weak<Executor>,
}

impl Executor {
    /// Creates a new executor. `db_opts` carries the DBA credentials; the
    /// metadata pool is derived from it with a small connection cap.
    pub fn new(
        config: Config,
        db_opts: Opts,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        db_name: impl Into<String>,
        tablet_alias: impl Into<String>,
        deps: Deps,
    ) -> Arc<Self> {
        let constraints = PoolConstraints::new(1, DATABASE_POOL_SIZE)
            .expect("pool constraints are statically valid");
        let pool_opts = OptsBuilder::from_opts(db_opts.clone())
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        let pool = Pool::new(pool_opts);
        let store = MigrationStore::new(pool, config.sidecar_db_name.clone());
        let check_interval = config.migration_check_interval;

        let keyspace = keyspace.into();
        let shard = shard.into();
        let db_name = db_name.into();
        let tablet_alias = tablet_alias.into();
        Arc::new_cyclic(|weak_self| Executor {
            config,
            store,
            dba_opts: db_opts,
            keyspace,
            shard,
            db_name,
            tablet_alias,
            deps,
            owned_running_migrations: DashMap::new(),
            vreplication_last_error: parking_lot::Mutex::new(HashMap::new()),
            tick_reentrance_flag: AtomicBool::new(false),
            reviewed_running_migrations_flag: AtomicBool::new(false),
            fix_completed_timestamp_done: AtomicBool::new(false),
            is_open: AtomicBool::new(false),
            migration_mutex: tokio::sync::Mutex::new(()),
            submit_mutex: tokio::sync::Mutex::new(()),
            ticks: Ticker::new(check_interval),
            tick_task: parking_lot::Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// A strong reference to self, for spawning background work.
    pub(crate) fn arc(&self) -> Arc<Executor> {
        self.weak_self
            .upgrade()
            .expect("executor is only reachable through its Arc")
    }

    /// Starts the periodic check tick. Idempotent; a no-op when online DDL
    /// is disabled.
    pub fn open(&self) {
        if self.is_open() || !self.config.enable_online_ddl {
            return;
        }
        info!("online DDL executor open");

        self.reviewed_running_migrations_flag
            .store(false, Ordering::SeqCst);
        self.owned_running_migrations.clear();
        self.vreplication_last_error.lock().clear();

        let (shutdown_tx, mut shutdown_rx) = shutdown::channel();
        let executor = self.arc();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = executor.ticks.tick() => {
                        executor.on_migration_check_tick().await;
                    }
                }
            }
        });
        *self.tick_task.lock() = Some((shutdown_tx, handle));
        self.trigger_next_check_interval();
        self.is_open.store(true, Ordering::SeqCst);
    }

    /// Stops the periodic tick and frees resources.
    pub async fn close(&self) {
        if !self.is_open() {
            return;
        }
        info!("online DDL executor close");
        self.is_open.store(false, Ordering::SeqCst);
        if let Some((shutdown_tx, handle)) = self.tick_task.lock().take() {
            tokio::spawn(async move {
                shutdown_tx.shutdown().await;
                let _ = handle.await;
            });
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> SchemaShiftResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SchemaShiftError::OnlineDdlDisabled)
        }
    }

    /// This executor's tablet alias, recorded on migrations it owns.
    pub fn tablet_alias(&self) -> &str {
        &self.tablet_alias
    }

    /// Pulls the next check tick closer, at escalating short intervals.
    pub(crate) fn trigger_next_check_interval(&self) {
        for interval in MIGRATION_NEXT_CHECK_INTERVALS {
            self.ticks.trigger_after(interval);
        }
    }

    /// Whether a comma-delimited shards list includes this tablet's shard.
    /// An empty list implicitly means "all shards".
    pub(crate) fn matches_shards(&self, comma_delimited_shards: &str) -> bool {
        let shards = crate::migration::split_delimited_list(comma_delimited_shards);
        shards.is_empty() || shards.iter().any(|shard| *shard == self.shard)
    }

    pub(crate) fn count_owned_running_migrations(&self) -> usize {
        self.owned_running_migrations.len()
    }

    /// Checks if any owned running migration conflicts with the given one,
    /// such that they can't both run concurrently.
    pub(crate) fn conflicting_migration_running(&self, proposed: &Migration) -> Option<String> {
        for entry in self.owned_running_migrations.iter() {
            let owned = entry.value();
            if conflicts_with_running(&owned.migration, owned.was_ready_to_complete(), proposed) {
                return Some(owned.migration.uuid.clone());
            }
        }
        None
    }

    /// The retention deadline for a newly created GC table.
    pub(crate) fn new_gc_table_retain_time(&self) -> DateTime<Utc> {
        Utc::now()
            + chrono::Duration::from_std(self.config.retain_online_ddl_tables)
                .unwrap_or_else(|_| chrono::Duration::hours(24))
    }

    /// A dedicated, non-pooled connection for long-running DDL work.
    pub(crate) async fn dba_conn(&self) -> SchemaShiftResult<Conn> {
        Ok(Conn::new(self.dba_opts.clone()).await?)
    }

    pub(crate) async fn with_grpc_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = SchemaShiftResult<T>>,
    ) -> SchemaShiftResult<T> {
        tokio::time::timeout(GRPC_TIMEOUT, fut)
            .await
            .map_err(|_| classified_err!(Code::Aborted, "timeout waiting on tablet manager"))?
    }

    /// Runs a statement against the replication workflow registry via the
    /// tablet manager.
    pub(crate) async fn vreplication_exec(&self, query: &str) -> SchemaShiftResult<u64> {
        let query = self.store.rewrite_sidecar(query);
        self.with_grpc_timeout(
            self.deps
                .tablet_manager
                .vreplication_exec(&self.tablet_alias, &query),
        )
        .await
    }

    pub(crate) async fn reload_schema(&self) -> SchemaShiftResult<()> {
        self.with_grpc_timeout(self.deps.tablet_manager.reload_schema(&self.tablet_alias))
            .await
    }

    /// Removes the workflow registry entry for the given migration.
    pub(crate) async fn delete_vreplication_entry(&self, uuid: &str) -> SchemaShiftResult<()> {
        let query = vrepl::generate_delete_statement(&self.db_name, uuid);
        self.vreplication_exec(&query).await?;
        Ok(())
    }

    pub(crate) async fn start_vreplication(&self, workflow: &str) -> SchemaShiftResult<()> {
        let query = vrepl::generate_start_statement(&self.db_name, workflow);
        self.vreplication_exec(&query)
            .await
            .map_err(|e| e.wrap(&format!("failed starting workflow {workflow}")))?;
        Ok(())
    }

    /// Stops the workflow and optionally removes its registry entry.
    /// Stopping is best-effort; deleting matters more.
    pub(crate) async fn terminate_vrepl_migration(
        &self,
        uuid: &str,
        delete_entry: bool,
    ) -> SchemaShiftResult<()> {
        let stop = vrepl::generate_stop_statement(&self.db_name, uuid, "stopped by executor");
        if let Err(e) = self.vreplication_exec(&stop).await {
            error!(%uuid, error = %e, "failed stopping vreplication stream");
        }
        if delete_entry {
            self.delete_vreplication_entry(uuid).await?;
        }
        Ok(())
    }

    /// Attempts to interrupt and hard-stop a running migration. Whatever
    /// happens here, this executor stops owning it.
    pub(crate) async fn terminate_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<bool> {
        info!(uuid = %migration.uuid, "terminate migration requested");
        let mut found_running = false;
        if migration.strategy.strategy.is_workflow() {
            // the migration may have been started by a different tablet;
            // actively verify whether it is running
            let stream = self
                .store
                .read_vrepl_stream(&self.db_name, &migration.uuid, true)
                .await
                .unwrap_or(None);
            found_running = stream.map(|s| s.is_running()).unwrap_or(false);
            let terminated = self.terminate_vrepl_migration(&migration.uuid, false).await;
            self.owned_running_migrations.remove(&migration.uuid);
            terminated.map_err(|e| e.wrap("terminating migration"))?;
            return Ok(found_running);
        }
        self.owned_running_migrations.remove(&migration.uuid);
        Ok(found_running)
    }

    /// Marks a migration as failed (or cancelled, when the user issued a
    /// cancel), records the message, and releases ownership.
    pub(crate) async fn fail_migration(&self, uuid: &str, message: &str) {
        let _ = self
            .store
            .update_migration_status_failed_or_cancelled(uuid)
            .await;
        let _ = self.store.update_migration_message(uuid, message).await;
        self.owned_running_migrations.remove(uuid);
        self.trigger_next_check_interval();
    }

    /// Called when a status is set or changed for a migration; stamps the
    /// lifecycle timestamps matching the new status.
    pub(crate) async fn on_migration_status(
        &self,
        uuid: &str,
        status: MigrationStatus,
        progress_pct: f64,
        eta_seconds: i64,
        rows_copied: i64,
        hint: &str,
    ) -> SchemaShiftResult<()> {
        let mut progress_pct = progress_pct;
        match status {
            MigrationStatus::Ready => {
                self.store
                    .update_migration_timestamp("ready_timestamp", uuid)
                    .await?;
            }
            MigrationStatus::Running => {
                let _ = self.store.update_migration_started_timestamp(uuid).await;
                self.store
                    .update_migration_timestamp("liveness_timestamp", uuid)
                    .await?;
            }
            MigrationStatus::Complete => {
                progress_pct = PROGRESS_PCT_FULL;
                let _ = self.store.update_migration_started_timestamp(uuid).await;
                self.store
                    .update_migration_timestamp("completed_timestamp", uuid)
                    .await?;
            }
            MigrationStatus::Failed => {
                let _ = self.store.update_migration_started_timestamp(uuid).await;
                self.store
                    .update_migration_timestamp("completed_timestamp", uuid)
                    .await?;
            }
            MigrationStatus::Queued | MigrationStatus::Cancelled => {}
        }
        self.store.update_migration_status(uuid, status).await?;
        self.store.update_migration_progress(uuid, progress_pct).await?;
        self.store
            .update_migration_eta_seconds(uuid, eta_seconds)
            .await?;
        self.store.update_rows_copied(uuid, rows_copied).await?;
        if hint == READY_TO_COMPLETE_HINT {
            self.store
                .update_migration_ready_to_complete(uuid, true)
                .await?;
        }
        if matches!(status, MigrationStatus::Complete | MigrationStatus::Failed) {
            self.trigger_next_check_interval();
        }
        Ok(())
    }

    /// Sets the session `sql_mode` for migrations that require zero-in-date
    /// tolerance, returning the original mode to restore.
    pub(crate) async fn init_migration_sql_mode(
        &self,
        migration: &Migration,
        conn: &mut Conn,
    ) -> SchemaShiftResult<Option<String>> {
        if !migration.strategy.is_allow_zero_in_date() {
            return Ok(None);
        }
        let sql_mode: Option<String> = conn
            .query_first("SELECT @@session.sql_mode AS sql_mode")
            .await?;
        let sql_mode = sql_mode.ok_or_else(|| {
            classified_err!(Code::Unknown, "could not read sql_mode")
        })?;
        let changed = format!(
            "SET @@session.sql_mode=REPLACE(REPLACE('{sql_mode}', 'NO_ZERO_DATE', ''), 'NO_ZERO_IN_DATE', '')"
        );
        conn.query_drop(&changed).await?;
        Ok(Some(sql_mode))
    }

    pub(crate) async fn restore_sql_mode(&self, conn: &mut Conn, original: Option<String>) {
        if let Some(sql_mode) = original {
            let _ = conn
                .query_drop(format!("SET @@session.sql_mode='{sql_mode}'"))
                .await;
        }
    }

    /// Sets `lock_wait_timeout` on a dedicated connection, returning the
    /// original value to restore.
    pub(crate) async fn init_connection_lock_wait_timeout(
        &self,
        conn: &mut Conn,
        timeout: Duration,
    ) -> SchemaShiftResult<u64> {
        let original: Option<u64> = conn
            .query_first("SELECT @@session.lock_wait_timeout AS t")
            .await?;
        let original = original
            .ok_or_else(|| classified_err!(Code::Unknown, "could not read lock_wait_timeout"))?;
        conn.query_drop(format!(
            "SET @@session.lock_wait_timeout={}",
            timeout.as_secs()
        ))
        .await?;
        Ok(original)
    }

    pub(crate) async fn restore_connection_lock_wait_timeout(&self, conn: &mut Conn, original: u64) {
        let _ = conn
            .query_drop(format!("SET @@session.lock_wait_timeout={original}"))
            .await;
    }

    /// Runs a DDL statement directly on the backend MySQL server. Returns
    /// whether an acceptable error code was hit (and suppressed).
    pub(crate) async fn execute_directly(
        &self,
        migration: &Migration,
        sql: &str,
        acceptable_mysql_error_codes: &[u16],
    ) -> SchemaShiftResult<bool> {
        let mut conn = self.dba_conn().await?;
        let original_sql_mode = self.init_migration_sql_mode(migration, &mut conn).await?;

        let _ = self
            .on_migration_status(
                &migration.uuid,
                MigrationStatus::Running,
                PROGRESS_PCT_STARTED,
                ETA_SECONDS_UNKNOWN,
                ROWS_COPIED_UNKNOWN,
                EMPTY_HINT,
            )
            .await;

        let mut original_foreign_key_checks = None;
        if migration.strategy.is_allow_foreign_keys() {
            // The user takes responsibility for referential integrity; with
            // checks off they can create cyclic references without ordering
            // their statements.
            let current: Option<u64> = conn
                .query_first("SELECT @@session.foreign_key_checks AS foreign_key_checks")
                .await?;
            original_foreign_key_checks = Some(current.ok_or_else(|| {
                classified_err!(Code::Unknown, "could not read foreign_key_checks")
            })?);
            conn.query_drop("SET foreign_key_checks=0").await?;
        }

        let result = conn.query_drop(sql).await;
        let acceptable_error_code_found = match &result {
            Ok(()) => false,
            Err(mysql_async::Error::Server(server_error))
                if acceptable_mysql_error_codes.contains(&server_error.code) =>
            {
                true
            }
            Err(_) => false,
        };

        if let Some(original) = original_foreign_key_checks {
            let _ = conn
                .query_drop(format!("SET foreign_key_checks={original}"))
                .await;
        }
        self.restore_sql_mode(&mut conn, original_sql_mode).await;

        if !acceptable_error_code_found {
            result?;
        }

        let _ = self.reload_schema().await;
        let _ = self
            .on_migration_status(
                &migration.uuid,
                MigrationStatus::Complete,
                PROGRESS_PCT_FULL,
                ETA_SECONDS_NOW,
                ROWS_COPIED_UNKNOWN,
                EMPTY_HINT,
            )
            .await;

        Ok(acceptable_error_code_found)
    }

    /// Errors unless the cross-shard prepared transaction pool is empty for
    /// the table, polling briefly.
    pub(crate) async fn check_on_prepared_pool(
        &self,
        table: &str,
        wait_time: Duration,
    ) -> SchemaShiftResult<()> {
        if (self.deps.is_prepared_pool_empty)(table) {
            return Ok(());
        }
        tokio::time::sleep(wait_time).await;
        if (self.deps.is_prepared_pool_empty)(table) {
            return Ok(());
        }
        Err(classified_err!(
            Code::FailedPrecondition,
            "cannot force cut-over on non-empty prepared pool for table: {table}"
        ))
    }

    /// Whether a PROCESSLIST entry with the given connection id has info
    /// matching the given text.
    pub(crate) async fn does_connection_info_match(
        &self,
        conn: &mut Conn,
        connection_id: u32,
        submatch: &str,
    ) -> SchemaShiftResult<bool> {
        let rows: Vec<mysql_async::Row> = conn
            .exec(
                queries::FIND_PROCESS,
                params! {
                    "process_id" => connection_id,
                    "info_like" => format!("%{submatch}%"),
                },
            )
            .await?;
        Ok(rows.len() == 1)
    }

    /// Kills queries actively using the given table, and connections with
    /// transactions holding locks on it. Best effort: `KILL` offers no
    /// guarantee of timely termination.
    pub(crate) async fn kill_table_lock_holders_and_accessors(
        &self,
        uuid: &str,
        table: &str,
        exclude_ids: &[u32],
    ) -> SchemaShiftResult<()> {
        info!(%uuid, %table, "killing table lock holders and accessors");
        let mut conn = self.dba_conn().await?;

        {
            // PROCESSLIST first: find queries that might touch the table.
            // The LIKE match over-approximates; each candidate's query text
            // is parsed to confirm it actually references the table.
            let rows: Vec<mysql_async::Row> = conn
                .exec(
                    queries::FIND_PROCESSES_BY_INFO,
                    params! { "info_like" => format!("%{table}%") },
                )
                .await?;
            info!(%uuid, candidates = rows.len(), "found potential queries");
            for mut row in rows {
                let thread_id = row.take::<Option<u32>, _>("id").flatten().unwrap_or(0);
                if exclude_ids.contains(&thread_id) {
                    continue;
                }
                let process_info = row
                    .take::<Option<String>, _>("info")
                    .flatten()
                    .unwrap_or_default();
                if !schemashift_sql::ddl::statement_references_table(&process_info, table) {
                    continue;
                }
                info!(%uuid, thread_id, query = %process_info, "killing query");
                if let Err(e) = conn.query_drop(format!("KILL QUERY {thread_id}")).await {
                    error!(%uuid, thread_id, error = %e, "could not kill query, ignoring");
                }
            }
        }

        let version = self.store.server_version().await.unwrap_or_default();
        let caps = schemashift_sql::analysis::ServerCapabilities::from_version(&version);
        if caps.instant_ddl() {
            // performance_schema lock tables exist on 8.0+
            for (template, description) in [
                (queries::PROCESSES_WITH_DATA_LOCKS_ON_TABLE, "data"),
                (queries::PROCESSES_WITH_METADATA_LOCKS_ON_TABLE, "metadata"),
            ] {
                let rows: Vec<mysql_async::Row> = conn
                    .exec(template, params! { "table_name" => table })
                    .await?;
                info!(%uuid, %table, description, transactions = rows.len(), "found lock-holding transactions");
                for mut row in rows {
                    let thread_id = row
                        .take::<Option<u32>, _>("process_id")
                        .flatten()
                        .unwrap_or(0);
                    if thread_id == 0 || exclude_ids.contains(&thread_id) {
                        continue;
                    }
                    info!(%uuid, thread_id, description, "killing connection holding lock");
                    if let Err(e) = conn.query_drop(format!("KILL {thread_id}")).await {
                        error!(%uuid, thread_id, error = %e, "unable to kill lock-holding connection");
                    }
                }
            }
        }

        Ok(())
    }

    pub(crate) fn warn_and_log(step: &str, err: &SchemaShiftError) {
        error!(step, error = %err, "migration check step failed");
    }

    /// Prunes the ownership set of any UUIDs not present in either running
    /// or pending sets. Due to races, the set may list a migration that is
    /// just about to run but is still `ready`; those are left alone.
    pub(crate) fn prune_ownership(
        &self,
        running_uuids: &std::collections::HashSet<String>,
        pending_uuids: &[String],
    ) {
        self.owned_running_migrations.retain(|uuid, _| {
            let keep = running_uuids.contains(uuid) || pending_uuids.iter().any(|p| p == uuid);
            if !keep {
                info!(%uuid, "removing migration from ownership set: not running and not pending");
            }
            keep
        });
    }

    pub(crate) fn tablet_is_primary(&self) -> bool {
        (self.deps.tablet_type)() == TabletType::Primary
    }

    /// Tick-reentrance guard: at most one tick executes at a time, with a
    /// one-second cool-down after completion.
    pub(crate) fn enter_tick(&self) -> bool {
        self.tick_reentrance_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn exit_tick_after_cooldown(&self) {
        let executor = self.arc();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            executor.tick_reentrance_flag.store(false, Ordering::SeqCst);
        });
    }

    pub(crate) fn warn_if_stale(&self, uuid: &str, stale_minutes: i64, liveness: &str) {
        warn!(
            %uuid,
            stale_minutes,
            liveness,
            "stale migration: found running but indicates no liveness"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use async_trait::async_trait;
    use schemashift_sql::strategy::{DdlStrategy, StrategySetting};

    use super::*;
    use crate::contracts::ThrottledApp;
    use crate::migration::DEFAULT_CUT_OVER_THRESHOLD;

    struct StubTabletManager;

    #[async_trait]
    impl TabletManagerClient for StubTabletManager {
        async fn vreplication_exec(&self, _: &str, _: &str) -> SchemaShiftResult<u64> {
            Ok(0)
        }
        async fn vreplication_wait_for_pos(
            &self,
            _: &str,
            _: i32,
            _: &str,
        ) -> SchemaShiftResult<()> {
            Ok(())
        }
        async fn reload_schema(&self, _: &str) -> SchemaShiftResult<()> {
            Ok(())
        }
        async fn refresh_state(&self, _: &str) -> SchemaShiftResult<()> {
            Ok(())
        }
    }

    struct StubThrottler;

    impl LagThrottler for StubThrottler {
        fn check_is_open(&self) -> SchemaShiftResult<()> {
            Ok(())
        }
        fn throttle_app(&self, _: &str, _: SystemTime, _: f64) {}
        fn unthrottle_app(&self, _: &str) {}
        fn throttled_apps(&self) -> Vec<ThrottledApp> {
            Vec::new()
        }
    }

    struct StubBuffer;

    impl WriteBuffer for StubBuffer {
        fn toggle_buffering(&self, _: &str, _: Duration, _: bool) {}
    }

    struct StubDiff;

    impl SchemaDiff for StubDiff {
        fn diff_statements(
            &self,
            _: &str,
            _: &str,
            _: bool,
        ) -> SchemaShiftResult<Option<String>> {
            Ok(None)
        }
    }

    fn test_executor() -> Arc<Executor> {
        let deps = Deps {
            tablet_manager: Arc::new(StubTabletManager),
            lag_throttler: Arc::new(StubThrottler),
            write_buffer: Arc::new(StubBuffer),
            schema_diff: Arc::new(StubDiff),
            tablet_type: Box::new(|| TabletType::Primary),
            is_prepared_pool_empty: Box::new(|_| true),
            request_gc_checks: Box::new(|| {}),
        };
        Executor::new(
            Config::default(),
            Opts::from_url("mysql://root@localhost:3306/test").unwrap(),
            "ks",
            "40-80",
            "test",
            "zone1-0000000100",
            deps,
        )
    }

    fn migration(uuid: &str, table: &str) -> Migration {
        Migration {
            uuid: uuid.to_string(),
            keyspace: "ks".to_string(),
            shard: "40-80".to_string(),
            mysql_schema: "test".to_string(),
            mysql_table: table.to_string(),
            migration_statement: format!("ALTER TABLE {table} ADD COLUMN c INT"),
            strategy: StrategySetting::new(DdlStrategy::Vitess, ""),
            status: MigrationStatus::Running,
            ddl_action: "alter".to_string(),
            retries: 0,
            ready_to_complete: false,
            was_ready_to_complete: false,
            tablet: "zone1-0000000100".to_string(),
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

    #[tokio::test]
    async fn shard_matching() {
        let executor = test_executor();
        assert!(executor.matches_shards(""));
        assert!(executor.matches_shards("40-80"));
        assert!(executor.matches_shards("0-40, 40-80"));
        assert!(!executor.matches_shards("0-40, 80-c0"));
    }

    #[tokio::test]
    async fn ownership_conflicts_are_detected() {
        let executor = test_executor();
        let proposed = migration("00000000_0000_4000_8000_000000000002", "t1");
        assert!(executor.conflicting_migration_running(&proposed).is_none());

        let running = migration("00000000_0000_4000_8000_000000000001", "t1");
        executor.owned_running_migrations.insert(
            running.uuid.clone(),
            Arc::new(OwnedMigration::new(running)),
        );
        assert_eq!(executor.count_owned_running_migrations(), 1);
        assert!(executor.conflicting_migration_running(&proposed).is_some());

        // different table, neither concurrent: still a conflict
        let other_table = migration("00000000_0000_4000_8000_000000000003", "t2");
        assert!(executor.conflicting_migration_running(&other_table).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reentrance_guard() {
        let executor = test_executor();
        assert!(executor.enter_tick());
        assert!(!executor.enter_tick());
        executor.exit_tick_after_cooldown();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(executor.enter_tick());
    }

    #[tokio::test]
    async fn api_is_rejected_while_closed() {
        let executor = test_executor();
        let err = executor
            .submit_migration("/*migration: strategy=\"vitess\" */ ALTER TABLE t ADD COLUMN c INT")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);

        let err = executor
            .cleanup_all_migrations()
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
}
