//! The cut-over engine: atomically swaps a filled shadow table with the
//! live table.
//!
//! The protocol (production path):
//!
//! 1. create an empty sentry table, wait for the workflow to pass the
//!    creation point — proving it is applying recent binlogs;
//! 2. buffer client writes, then `LOCK TABLES sentry WRITE, live WRITE`;
//! 3. issue the three-pair atomic RENAME on a second connection. It blocks
//!    on the lock, and we *verify* it blocks by watching PROCESSLIST;
//! 4. read the primary position — no further writes can land on the live
//!    table — and wait for the workflow to reach it;
//! 5. stop the workflow, drop the sentry, `UNLOCK TABLES`. The RENAME
//!    unblocks and swaps: the old table takes the shadow's name (becoming
//!    an artifact), the shadow takes the live name.
//!
//! On any failure the cleanup path unlocks, kills a still-blocked RENAME,
//! restarts the workflow, re-enables writes and drops the sentry.

use std::time::{Duration, Instant};

use chrono::Utc;
use mysql_async::prelude::Queryable;
use mysql_async::Conn;
use schemashift_sql::names::{generate_gc_table_name, rename_tables_statement, GcState};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::classified_err;
use crate::error::{Code, SchemaShiftError, SchemaShiftResult};
use crate::migration::Migration;
use crate::store::queries;
use crate::vrepl::{self, VReplStream};

use super::{
    Executor, EMPTY_HINT, ETA_SECONDS_NOW, PROGRESS_PCT_FULL, QR_BUFFER_EXTRA_TIMEOUT,
};
use crate::migration::MigrationStatus;

/// Backoff intervals between cut-over attempts, indexed by the number of
/// attempts made so far; clamped at the last entry.
pub const CUTOVER_INTERVALS: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
];

/// Decides whether a generally-ready migration should attempt cut-over now,
/// and whether the attempt should forcibly KILL interfering queries and
/// connections.
pub fn should_cut_over_according_to_backoff(
    should_force_cut_over_indicator: bool,
    force_cut_over_after: Duration,
    since_ready_to_complete: Duration,
    since_last_cutover_attempt: Duration,
    cutover_attempts: i64,
) -> (bool, bool) {
    if should_force_cut_over_indicator {
        return (true, true);
    }
    if force_cut_over_after > Duration::ZERO {
        if since_ready_to_complete > force_cut_over_after {
            return (true, true);
        }
        if force_cut_over_after <= Duration::from_millis(1) {
            // so low it is effectively "now"
            return (true, true);
        }
    }
    let index = (cutover_attempts.max(0) as usize).min(CUTOVER_INTERVALS.len() - 1);
    let desired = CUTOVER_INTERVALS[index];
    if since_last_cutover_attempt >= desired {
        return (true, false);
    }
    (false, false)
}

/// Mutable resources of a cut-over attempt, threaded through the phases so
/// that the cleanup path can release whatever was acquired, on success and
/// failure alike.
struct CutOverState {
    migration: Migration,
    vrepl_table: String,
    stream: VReplStream,
    sentry_table_name: Option<String>,
    lock_conn: Option<Conn>,
    lock_conn_original_timeout: Option<u64>,
    rename_conn_id: Option<u32>,
    rename_task: Option<JoinHandle<Result<(), mysql_async::Error>>>,
    rename_was_successful: bool,
    buffering_enabled: bool,
    writes_reenabled: bool,
    vreplication_stopped: bool,
}

impl Executor {
    /// Whether the workflow has completed row copy and is up to date with
    /// the binlogs.
    pub(crate) async fn is_vrepl_migration_ready_to_cut_over(
        &self,
        migration: &Migration,
        stream: &VReplStream,
    ) -> SchemaShiftResult<bool> {
        if stream.pos.is_empty() {
            return Ok(false);
        }
        if stream.lag(Utc::now().timestamp()) > migration.cut_over_threshold {
            return Ok(false);
        }
        // copy_state rows present means row copy is still in progress
        let count = self.store.read_copy_state_count(stream.id).await?;
        Ok(count == 0)
    }

    async fn wait_for_pos(
        &self,
        stream: &VReplStream,
        pos: &str,
        timeout: Duration,
    ) -> SchemaShiftResult<()> {
        let wait = self.deps.tablet_manager.vreplication_wait_for_pos(
            self.tablet_alias(),
            stream.id,
            pos,
        );
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map_err(|e| e.wrap(&format!("failed waiting for position {pos}"))),
            Err(_) => Err(classified_err!(
                Code::Aborted,
                "timeout waiting for position {pos}"
            )),
        }
    }

    /// Waits until the RENAME shows up in PROCESSLIST, blocked on the table
    /// lock. The RENAME completing early is itself an error: nothing may
    /// proceed until we have positively observed it blocking.
    async fn wait_for_rename_process(
        &self,
        state: &CutOverState,
        timeout: Duration,
    ) -> SchemaShiftResult<()> {
        let rename_conn_id = state
            .rename_conn_id
            .ok_or_else(|| classified_err!(Code::Internal, "no rename connection"))?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = &state.rename_task {
                if task.is_finished() {
                    return Err(classified_err!(
                        Code::Aborted,
                        "rename returned unexpectedly"
                    ));
                }
            }
            let mut conn = self.store.pool_conn().await?;
            if self
                .does_connection_info_match(&mut conn, rename_conn_id, "rename")
                .await
                .map_err(|e| e.wrap("searching for rename process"))?
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(classified_err!(Code::Aborted, "timeout for rename query"));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn reenable_writes(&self, state: &mut CutOverState) {
        if !state.buffering_enabled || state.writes_reenabled {
            return;
        }
        info!(uuid = %state.migration.uuid, "re-enabling writes");
        let timeout = state.migration.cut_over_threshold + QR_BUFFER_EXTRA_TIMEOUT;
        self.deps
            .write_buffer
            .toggle_buffering(&state.migration.mysql_table, timeout, false);
        // force re-read of tables after the swap
        if let Err(e) = self
            .with_grpc_timeout(self.deps.tablet_manager.refresh_state(self.tablet_alias()))
            .await
        {
            error!(uuid = %state.migration.uuid, error = %e, "refreshing table state");
        }
        state.writes_reenabled = true;
    }

    /// Stops the workflow and swaps the shadow table into place.
    pub(crate) async fn cut_over_vrepl_migration(
        &self,
        stream: &VReplStream,
        should_force_cut_over: bool,
    ) -> SchemaShiftResult<()> {
        self.store
            .increment_cutover_attempts(&stream.workflow)
            .await
            .map_err(|e| e.wrap("cutover: failed incrementing cutover attempts"))?;

        let vrepl_table = stream
            .target_table()
            .map_err(|e| e.wrap("cutover: failed getting vreplication table"))?;
        let migration = self
            .store
            .read_migration(&stream.workflow)
            .await
            .map_err(|e| e.wrap("cutover: failed reading migration"))?;
        let is_test_suite = migration.strategy.is_test_suite();

        let _ = self
            .store
            .update_migration_stage(&migration.uuid, "starting cut-over")
            .await;

        let mut state = CutOverState {
            migration,
            vrepl_table,
            stream: stream.clone(),
            sentry_table_name: None,
            lock_conn: None,
            lock_conn_original_timeout: None,
            rename_conn_id: None,
            rename_task: None,
            rename_was_successful: false,
            buffering_enabled: false,
            writes_reenabled: false,
            vreplication_stopped: false,
        };

        let result = self
            .cut_over_phases(&mut state, should_force_cut_over, is_test_suite)
            .await;
        self.cut_over_cleanup(&mut state).await;
        result
    }

    async fn cut_over_phases(
        &self,
        state: &mut CutOverState,
        should_force_cut_over: bool,
        is_test_suite: bool,
    ) -> SchemaShiftResult<()> {
        let uuid = state.migration.uuid.clone();
        let table = state.migration.mysql_table.clone();
        let threshold = state.migration.cut_over_threshold;

        if !is_test_suite {
            // The sentry name is generated early, while nothing has
            // happened yet and an error is harmless. Once traffic is
            // blocked and tables renamed we want as little logic as
            // possible in the critical section.
            let sentry_table_name =
                generate_gc_table_name(GcState::Hold, self.new_gc_table_retain_time());
            self.store
                .update_artifacts(&uuid, &[&sentry_table_name])
                .await
                .map_err(|e| e.wrap("failed updating artifacts with sentry table name"))?;
            state.sentry_table_name = Some(sentry_table_name.clone());

            {
                let mut prep_conn = self
                    .dba_conn()
                    .await
                    .map_err(|e| e.wrap("failed getting preparation connection"))?;
                // Large enough lock_wait_timeout not to interfere with the
                // cut-over; everything that must be bounded by the cut-over
                // threshold is bounded explicitly below.
                let original_timeout = self
                    .init_connection_lock_wait_timeout(&mut prep_conn, 3 * threshold)
                    .await
                    .map_err(|e| e.wrap("failed setting lock_wait_timeout on preparation connection"))?;

                if state.migration.strategy.is_analyze_table() && !state.migration.shadow_analyzed {
                    // Fresh statistics at cut-over. The statement is
                    // replicated, so a promoted replica benefits too.
                    let analyze = queries::ANALYZE_TABLE.replace("{table}", &state.vrepl_table);
                    if prep_conn.query_drop(&analyze).await.is_err() {
                        let _ = self
                            .store
                            .update_migration_message(&uuid, "failed ANALYZE shadow table")
                            .await;
                    } else {
                        let _ = self
                            .store
                            .update_migration_timestamp("shadow_analyzed_timestamp", &uuid)
                            .await;
                    }
                }

                let create_sentry =
                    queries::CREATE_SENTRY_TABLE.replace("{table}", &sentry_table_name);
                let created = prep_conn.query_drop(&create_sentry).await;
                self.restore_connection_lock_wait_timeout(&mut prep_conn, original_timeout)
                    .await;
                created.map_err(|e| {
                    SchemaShiftError::from(e).wrap("failed creating sentry table")
                })?;
            }
            let _ = self
                .store
                .update_migration_stage(
                    &uuid,
                    &format!("sentry table created: {sentry_table_name}"),
                )
                .await;

            let post_sentry_pos = self
                .store
                .primary_position()
                .await
                .map_err(|e| e.wrap("failed getting primary pos after sentry creation"))?;
            let _ = self
                .store
                .update_migration_stage(&uuid, &format!("waiting for post-sentry pos: {post_sentry_pos}"))
                .await;
            // Nothing is locked yet and query serving is unaffected, so a
            // multiple of the threshold is acceptable here; the threshold
            // itself bounds the wait taken after access is blocked.
            self.wait_for_pos(&state.stream, &post_sentry_pos, 3 * threshold)
                .await
                .map_err(|e| e.wrap("failed waiting for pos after sentry creation"))?;
            let _ = self
                .store
                .update_migration_stage(&uuid, "post-sentry pos reached")
                .await;
        }

        let mut lock_conn = self
            .dba_conn()
            .await
            .map_err(|e| e.wrap("failed getting locking connection"))?;
        state.lock_conn_original_timeout = Some(
            self.init_connection_lock_wait_timeout(&mut lock_conn, 3 * threshold)
                .await
                .map_err(|e| e.wrap("failed setting lock_wait_timeout on locking connection"))?,
        );
        let lock_conn_id = lock_conn.id();
        state.lock_conn = Some(lock_conn);

        let mut rename_conn = self
            .dba_conn()
            .await
            .map_err(|e| e.wrap("failed getting rename connection"))?;
        self.init_connection_lock_wait_timeout(&mut rename_conn, 2 * threshold)
            .await
            .map_err(|e| e.wrap("failed setting lock_wait_timeout on rename connection"))?;
        let rename_conn_id = rename_conn.id();
        state.rename_conn_id = Some(rename_conn_id);

        if self
            .store
            .is_preserve_foreign_key_supported()
            .await
            .map_err(|e| e.wrap("failed checking for 'rename_table_preserve_foreign_key' support"))?
        {
            info!(%uuid, "rename_table_preserve_foreign_key supported");
        }

        let sentry = state.sentry_table_name.clone().unwrap_or_default();
        let rename_query = rename_tables_statement(&[
            (&table, &sentry),
            (&state.vrepl_table, &table),
            (&sentry, &state.vrepl_table),
        ]);

        // stop writes on source
        let _ = self.store.update_migration_stage(&uuid, "buffering queries").await;
        state.buffering_enabled = true;
        self.deps.write_buffer.toggle_buffering(
            &table,
            threshold + QR_BUFFER_EXTRA_TIMEOUT,
            true,
        );
        // A query that already passed ACLs and is about to execute gets to
        // complete before the rename, rather than briefly block only to
        // find the table gone.
        let _ = self
            .store
            .update_migration_stage(&uuid, "graceful wait for buffering")
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        if should_force_cut_over {
            // Atomicity of prepared transactions must not be broken by a
            // forced cut-over.
            self.check_on_prepared_pool(&table, Duration::from_millis(100))
                .await
                .map_err(|e| e.wrap("checking prepared pool for table"))?;
            self.kill_table_lock_holders_and_accessors(&uuid, &table, &[])
                .await
                .map_err(|e| e.wrap("failed killing table lock holders and accessors"))?;
        }

        if is_test_suite {
            // The test suite injects queries from within the server via
            // recurring events, which bypass query rules. The table is
            // hard-renamed into a void instead of being swapped.
            let before_table = format!("{table}_before");
            let rename = queries::RENAME_TABLE
                .replace("{from}", &table)
                .replace("{to}", &before_table);
            self.store.exec_raw(&rename).await?;
            let _ = self
                .store
                .update_migration_stage(&uuid, "test suite 'before' table renamed")
                .await;
        } else {
            let _ = self.store.update_migration_stage(&uuid, "locking tables").await;
            let lock_query = queries::LOCK_TWO_TABLES_WRITE
                .replace("{table1}", &sentry)
                .replace("{table2}", &table);
            {
                let lock_conn = state.lock_conn.as_mut().expect("lock connection acquired");
                tokio::time::timeout(threshold, lock_conn.query_drop(&lock_query))
                    .await
                    .map_err(|_| classified_err!(Code::Aborted, "timeout locking tables"))?
                    .map_err(|e| SchemaShiftError::from(e).wrap("failed locking tables"))?;
            }

            let _ = self.store.update_migration_stage(&uuid, "renaming tables").await;
            let rename_query_task = rename_query.clone();
            state.rename_task = Some(tokio::spawn(async move {
                let result = rename_conn.query_drop(&rename_query_task).await;
                drop(rename_conn);
                result
            }));

            // the RENAME must block on the lock; wait until it shows up
            let _ = self
                .store
                .update_migration_stage(&uuid, "waiting for RENAME to block")
                .await;
            self.wait_for_rename_process(state, threshold)
                .await
                .map_err(|e| e.wrap("failed waiting for rename process"))?;
            let _ = self.store.update_migration_stage(&uuid, "RENAME found").await;

            if should_force_cut_over {
                info!(%uuid, "force cut-over: killing lock holders while RENAME is in place");
                self.kill_table_lock_holders_and_accessors(
                    &uuid,
                    &table,
                    &[lock_conn_id, rename_conn_id],
                )
                .await
                .map_err(|e| e.wrap("failed killing table lock holders and accessors"))?;
            }
        }

        let _ = self
            .store
            .update_migration_stage(&uuid, "reading post-lock pos")
            .await;
        let post_writes_pos = self
            .store
            .primary_position()
            .await
            .map_err(|e| e.wrap("failed reading pos after locking"))?;

        // New queries are buffered and existing ones have executed; there
        // are definitely no more writes to the table. The position taken
        // now is final.
        let _ = self
            .store
            .update_migration_timestamp("liveness_timestamp", &uuid)
            .await;

        let fresh_stream = self
            .store
            .read_vrepl_stream(&self.db_name, &uuid, false)
            .await
            .map_err(|e| e.wrap("failed reading vreplication table after locking"))?
            .expect("workflow row exists during cut-over");
        state.stream = fresh_stream;

        let _ = self
            .store
            .update_migration_stage(&uuid, &format!("waiting for post-lock pos: {post_writes_pos}"))
            .await;
        if let Err(e) = self
            .wait_for_pos(&state.stream, &post_writes_pos, threshold)
            .await
        {
            let _ = self
                .store
                .update_migration_stage(&uuid, &format!("timeout while waiting for post-lock pos: {e}"))
                .await;
            return Err(e.wrap("failed waiting for pos after locking"));
        }

        let _ = self
            .store
            .update_migration_stage(&uuid, "stopping vreplication")
            .await;
        self.vreplication_exec(&vrepl::generate_stop_statement(
            &self.db_name,
            &uuid,
            "stopped for online DDL cutover",
        ))
        .await
        .map_err(|e| e.wrap("failed stopping vreplication"))?;
        state.vreplication_stopped = true;

        if is_test_suite {
            let after_table = format!("{table}_after");
            let rename = queries::RENAME_TABLE
                .replace("{from}", &state.vrepl_table)
                .replace("{to}", &after_table);
            self.store.exec_raw(&rename).await?;
            let _ = self
                .store
                .update_migration_stage(&uuid, "test suite 'after' table renamed")
                .await;
            state.rename_was_successful = true;
        } else {
            // the RENAME must still be in place before the sentry goes away
            self.wait_for_rename_process(state, threshold)
                .await
                .map_err(|e| e.wrap("failed waiting for rename process before dropping sentry table"))?;

            let _ = self
                .store
                .update_migration_stage(&uuid, "dropping sentry table")
                .await;
            {
                let drop_query = queries::DROP_TABLE.replace("{table}", &sentry);
                let lock_conn = state.lock_conn.as_mut().expect("lock connection acquired");
                tokio::time::timeout(threshold, lock_conn.query_drop(&drop_query))
                    .await
                    .map_err(|_| classified_err!(Code::Aborted, "timeout dropping sentry table"))?
                    .map_err(|e| SchemaShiftError::from(e).wrap("failed dropping sentry table"))?;
            }
            {
                let _ = self
                    .store
                    .update_migration_stage(&uuid, "unlocking tables")
                    .await;
                let lock_conn = state.lock_conn.as_mut().expect("lock connection acquired");
                tokio::time::timeout(threshold, lock_conn.query_drop(queries::UNLOCK_TABLES))
                    .await
                    .map_err(|_| classified_err!(Code::Aborted, "timeout unlocking tables"))?
                    .map_err(|e| SchemaShiftError::from(e).wrap("failed unlocking tables"))?;
            }
            {
                let _ = self
                    .store
                    .update_migration_stage(&uuid, "waiting for RENAME to complete")
                    .await;
                let mut rename_task = state
                    .rename_task
                    .take()
                    .expect("rename task spawned");
                match tokio::time::timeout(threshold, &mut rename_task).await {
                    Err(_) => {
                        // hand the task back so cleanup can kill it
                        state.rename_task = Some(rename_task);
                        return Err(classified_err!(
                            Code::Aborted,
                            "timeout waiting for rename to complete"
                        ))
                    }
                    Ok(Err(join_error)) => {
                        return Err(classified_err!(
                            Code::Internal,
                            "rename task failed: {join_error}"
                        ))
                    }
                    Ok(Ok(Err(e))) => {
                        return Err(
                            SchemaShiftError::from(e).wrap("failed waiting for rename to complete")
                        )
                    }
                    Ok(Ok(Ok(()))) => {
                        // migration effectively successful
                        state.rename_was_successful = true;
                    }
                }
            }
        }

        let _ = self.store.update_migration_stage(&uuid, "cut-over complete").await;
        self.owned_running_migrations.remove(&uuid);

        // Tables are swapped; reload the schema in the background. On a
        // schema with thousands of tables this takes a while and must not
        // delay the cut-over.
        let executor = self.arc();
        tokio::spawn(async move {
            if let Err(e) = executor.reload_schema().await {
                error!(error = %e, "schema reload after cut-over");
            }
        });

        let _ = self
            .store
            .update_migration_stage(&uuid, "re-enabling writes")
            .await;
        // resume writes before publishing the migration as complete
        self.reenable_writes(state).await;
        let _ = self
            .on_migration_status(
                &uuid,
                MigrationStatus::Complete,
                PROGRESS_PCT_FULL,
                ETA_SECONDS_NOW,
                state.stream.rows_copied,
                EMPTY_HINT,
            )
            .await;
        Ok(())
    }

    /// Releases whatever the cut-over acquired; runs on success and failure
    /// alike, and is safe to run after a partially-complete attempt.
    async fn cut_over_cleanup(&self, state: &mut CutOverState) {
        let uuid = state.migration.uuid.clone();

        if !state.rename_was_successful {
            if let Some(rename_task) = state.rename_task.take() {
                if let Some(rename_conn_id) = state.rename_conn_id {
                    if let Ok(mut conn) = self.dba_conn().await {
                        if let Err(e) = conn.query_drop(format!("KILL {rename_conn_id}")).await {
                            error!(%uuid, error = %e, "failed to kill rename connection");
                        }
                    }
                }
                rename_task.abort();
            }
            if state.vreplication_stopped {
                if let Err(e) = self.start_vreplication(&uuid).await {
                    error!(%uuid, error = %e, "failed restarting vreplication after cutover failure");
                } else {
                    info!(%uuid, "started vreplication after cutover failure");
                }
            }
        }

        if let Some(mut lock_conn) = state.lock_conn.take() {
            let _ = lock_conn.query_drop(queries::UNLOCK_TABLES).await;
            if let Some(original) = state.lock_conn_original_timeout.take() {
                self.restore_connection_lock_wait_timeout(&mut lock_conn, original)
                    .await;
            }
        }

        self.reenable_writes(state).await;

        // Cut-over attempts may fail, and each attempt creates a fresh
        // sentry table. The sentry is empty and of no further use either
        // way, so it is dropped right away rather than left for the GC to
        // find, keeping the schema and the artifacts column lean.
        if let Some(sentry_table_name) = state.sentry_table_name.take() {
            let drop_query = queries::DROP_TABLE_IF_EXISTS.replace("{table}", &sentry_table_name);
            if self.store.exec_raw(&drop_query).await.is_ok() {
                let _ = self
                    .store
                    .clear_single_artifact(&uuid, &sentry_table_name)
                    .await;
            }
            // on error the artifact record remains and gc_artifacts will
            // take care of the table later
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn user_forced_cut_over_overrides_backoff() {
        let (should, force) = should_cut_over_according_to_backoff(
            true,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
            0,
        );
        assert!(should);
        assert!(force);
    }

    #[test]
    fn force_cut_over_after_window() {
        // past the window: force
        let (should, force) = should_cut_over_according_to_backoff(
            false,
            Duration::from_secs(3600),
            Duration::from_secs(3601),
            Duration::ZERO,
            0,
        );
        assert!(should);
        assert!(force);

        // within the window: fall through to backoff
        let (should, force) = should_cut_over_according_to_backoff(
            false,
            Duration::from_secs(3600),
            Duration::from_secs(60),
            Duration::ZERO,
            0,
        );
        assert!(should);
        assert!(!force);
    }

    #[test]
    fn sub_millisecond_force_window_means_now() {
        let (should, force) = should_cut_over_according_to_backoff(
            false,
            Duration::from_millis(1),
            Duration::ZERO,
            Duration::ZERO,
            3,
        );
        assert!(should);
        assert!(force);
    }

    #[test]
    fn backoff_intervals_apply_by_attempt_count() {
        // first attempt: no wait required
        let (should, _) = should_cut_over_according_to_backoff(
            false,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
            0,
        );
        assert!(should);

        // second attempt requires a minute since the last one
        let (should, _) = should_cut_over_according_to_backoff(
            false,
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(30),
            1,
        );
        assert!(!should);
        let (should, _) = should_cut_over_according_to_backoff(
            false,
            Duration::ZERO,
            Duration::ZERO,
            MINUTE,
            1,
        );
        assert!(should);
    }

    #[test]
    fn attempt_count_clamps_at_last_interval() {
        for attempts in [4, 5, 100, i64::MAX] {
            let (should, _) = should_cut_over_according_to_backoff(
                false,
                Duration::ZERO,
                Duration::ZERO,
                30 * MINUTE,
                attempts,
            );
            assert!(should, "attempts={attempts}");
            let (should, _) = should_cut_over_according_to_backoff(
                false,
                Duration::ZERO,
                Duration::ZERO,
                29 * MINUTE,
                attempts,
            );
            assert!(!should, "attempts={attempts}");
        }
    }

    #[test]
    fn negative_attempts_do_not_panic() {
        let (should, force) = should_cut_over_according_to_backoff(
            false,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
            -1,
        );
        assert!(should);
        assert!(!force);
    }
}
