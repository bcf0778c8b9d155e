//! The periodic check tick and its pipeline: queued-migration review,
//! scheduling, running the next migration, running-migration review, stale
//! detection, and artifact GC.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use schemashift_sql::ddl::{strip_sql_comments, DdlAction};
use schemashift_sql::names::{generate_rename_statement_with_uuid, GcState};
use schemashift_sql::DdlStrategy;
use tracing::{error, info};

use crate::classified_err;
use crate::contracts::ONLINE_DDL_THROTTLER_APP;
use crate::error::{er, Code, SchemaShiftResult};
use crate::last_error::LastError;
use crate::migration::{split_delimited_list, Migration, MigrationStatus, OwnedMigration};
use crate::vrepl::VReplStream;

use super::{
    CancellableMigration, Executor, ETA_SECONDS_UNKNOWN, PROGRESS_PCT_STARTED,
    ROWS_COPIED_UNKNOWN, EMPTY_HINT, STALE_MIGRATION_FAIL_MINUTES,
    STALE_MIGRATION_WARNING_MINUTES, VREPLICATION_TEST_SUITE_WAIT_SECONDS,
};

/// Timestamps for renaming a migration's artifacts into the GC namespace.
/// All artifacts share the migration's UUID in their target names, so each
/// needs a distinct timestamp; running strictly backwards from `now` also
/// puts every one of them in the past, where table GC will reclaim them.
fn gc_artifact_timestamps(now: chrono::DateTime<Utc>, count: usize) -> Vec<chrono::DateTime<Utc>> {
    (0..count)
        .map(|i| now - chrono::Duration::seconds(i as i64))
        .collect()
}

impl Executor {
    /// Runs the whole migration lifecycle once. Non-reentrant; callers may
    /// fire it freely and extra invocations coalesce, with a one-second
    /// cool-down.
    pub(crate) async fn on_migration_check_tick(&self) {
        if !self.enter_tick() {
            return;
        }

        'tick: {
            if !self.tablet_is_primary() {
                break 'tick;
            }
            if self.keyspace.is_empty() {
                error!("migration check tick: empty keyspace");
                break 'tick;
            }

            if let Err(e) = self.retry_tablet_failure_migrations().await {
                Self::warn_and_log("retry_tablet_failure_migrations", &e);
            }
            if let Err(e) = self.review_queued_migrations().await {
                Self::warn_and_log("review_queued_migrations", &e);
            }
            if let Err(e) = self.schedule_next_migration().await {
                Self::warn_and_log("schedule_next_migration", &e);
            }
            if let Err(e) = self.run_next_migration().await {
                Self::warn_and_log("run_next_migration", &e);
            }
            match self.review_running_migrations().await {
                Ok(cancellable) => {
                    if let Err(e) = self.cancel_migrations(&cancellable, false).await {
                        Self::warn_and_log("cancel_migrations", &e);
                    }
                }
                Err(e) => Self::warn_and_log("review_running_migrations", &e),
            }
            if let Err(e) = self.monitor_stale_migrations().await {
                Self::warn_and_log("monitor_stale_migrations", &e);
            }
            if let Err(e) = self.review_stale_migrations().await {
                Self::warn_and_log("review_stale_migrations", &e);
            }
            if let Err(e) = self.gc_artifacts().await {
                Self::warn_and_log("gc_artifacts", &e);
            }
        }

        self.exit_tick_after_cooldown();
    }

    /// Re-queues migrations failed by tablet failure (e.g. a failover),
    /// giving the new primary a chance to run them.
    async fn retry_tablet_failure_migrations(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;
        self.store
            .retry_tablet_failure_migrations(self.tablet_alias())
            .await?;
        Ok(())
    }

    /// Iterates queued migrations and fills in the blanks: REVERT target
    /// details, the immediate-operation flag, strategy sanity. Marks each
    /// row reviewed.
    async fn review_queued_migrations(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;
        let uuids = self.store.queued_unreviewed_uuids().await?;
        for uuid in uuids {
            if let Err(e) = self.review_queued_migration(&uuid).await {
                self.fail_migration(&uuid, &e.to_string()).await;
            }
        }
        Ok(())
    }

    async fn review_queued_migration(&self, uuid: &str) -> SchemaShiftResult<()> {
        let mut migration = self.store.read_migration(uuid).await?;
        let mut is_revert = false;
        if migration.action() == Some(DdlAction::Revert) {
            is_revert = true;
            if self.review_empty_table_revert_migration(&migration).await? {
                // the row was backfilled; re-read it
                migration = self.store.read_migration(uuid).await?;
            }
        }

        let is_immediate = self
            .review_immediate_operations(&migration, is_revert)
            .await?;
        if is_immediate {
            self.store
                .update_migration_set_immediate_operation(uuid)
                .await?;
        }

        // conditions under which the migration cannot take place
        if migration.strategy.strategy == DdlStrategy::MySql {
            if migration.strategy.is_postpone_completion() {
                return Err(classified_err!(
                    Code::InvalidArgument,
                    "--postpone-completion not supported in 'mysql' strategy"
                ));
            }
            if migration.strategy.is_allow_zero_in_date() {
                return Err(classified_err!(
                    Code::InvalidArgument,
                    "--allow-zero-in-date not supported in 'mysql' strategy"
                ));
            }
        }

        self.store
            .update_migration_timestamp("reviewed_timestamp", uuid)
            .await?;
        Ok(())
    }

    /// A queued REVERT says nothing about its target: which table, table or
    /// view, which action is being reverted. Mirror those off the reverted
    /// migration's row.
    async fn review_empty_table_revert_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<bool> {
        if !migration.mysql_table.is_empty() {
            return Ok(false);
        }
        let revert_uuid = match schemashift_sql::parse_ddl(&migration.migration_statement)? {
            schemashift_sql::DdlStatement::Revert { uuid } => uuid,
            _ => {
                return Err(classified_err!(
                    Code::Internal,
                    "cannot analyze revert UUID for revert migration {}",
                    migration.uuid
                ))
            }
        };
        let reverted_migration = self.store.read_migration(&revert_uuid).await.map_err(|e| {
            e.wrap(&format!(
                "cannot read migration {revert_uuid} reverted by migration {}",
                migration.uuid
            ))
        })?;
        let mimicked_action = reverted_migration
            .action()
            .and_then(|action| action.inverse())
            .ok_or_else(|| {
                classified_err!(
                    Code::Internal,
                    "cannot run migration {} reverting {}: unexpected action {}",
                    migration.uuid,
                    reverted_migration.uuid,
                    reverted_migration.ddl_action
                )
            })?;
        self.store
            .update_ddl_action(&migration.uuid, &mimicked_action.to_string())
            .await?;
        self.store
            .update_migration_is_view(&migration.uuid, reverted_migration.is_view)
            .await?;
        self.store
            .update_mysql_table(&migration.uuid, &reverted_migration.mysql_table)
            .await?;
        Ok(true)
    }

    /// Whether the migration completes within a split second: CREATE, DROP,
    /// any view operation, or an ALTER admitting a special plan. A REVERT
    /// of a true ALTER is not immediate.
    async fn review_immediate_operations(
        &self,
        migration: &Migration,
        is_revert: bool,
    ) -> SchemaShiftResult<bool> {
        match migration.action() {
            Some(DdlAction::Create) | Some(DdlAction::Drop) => Ok(true),
            Some(DdlAction::Alter) => {
                if migration.is_view {
                    return Ok(true);
                }
                if is_revert {
                    return Ok(false);
                }
                let plan = self.analyze_special_alter_plan(migration).await?;
                Ok(plan.is_some())
            }
            _ => Ok(false),
        }
    }

    /// Promotes at most one reviewed `queued` migration to `ready` per
    /// tick.
    async fn schedule_next_migration(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;
        let mut scheduled_one = false;
        for row in self.store.queued_migrations().await? {
            if row.postpone_launch {
                // not even looked at until its postpone_launch flag clears
                continue;
            }
            if !row.ready_to_complete && row.is_immediate_operation {
                // CREATE, DROP and VIEW operations are inherently ready to
                // complete, postponed or not
                self.store
                    .update_migration_ready_to_complete(&row.uuid, true)
                    .await?;
            }
            if !(row.is_immediate_operation && row.postpone_completion) && !scheduled_one {
                // a postponed ALTER can still be scheduled; the workflow
                // postpones the cut-over instead
                scheduled_one = true;
                self.on_migration_status(
                    &row.uuid,
                    MigrationStatus::Ready,
                    PROGRESS_PCT_STARTED,
                    ETA_SECONDS_UNKNOWN,
                    ROWS_COPIED_UNKNOWN,
                    EMPTY_HINT,
                )
                .await?;
                info!(uuid = %row.uuid, "scheduled migration");
                self.trigger_next_check_interval();
            }
        }
        Ok(())
    }

    /// Fails an in-order migration when a prior migration in its context
    /// has failed or was cancelled. Returns whether it was failed.
    async fn validate_in_order_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<bool> {
        if !migration.strategy.is_in_order_completion() || migration.migration_context.is_empty() {
            return Ok(false);
        }
        let uuids = self
            .store
            .failed_cancelled_in_context_before(&migration.migration_context, &migration.uuid)
            .await?;
        let Some(first) = uuids.first() else {
            return Ok(false);
        };
        let err = classified_err!(
            Code::FailedPrecondition,
            "migration {} cannot run because prior migration {} in same context has failed/was cancelled",
            migration.uuid,
            first
        );
        self.fail_migration(&migration.uuid, &err.to_string()).await;
        Ok(true)
    }

    /// Finds a single `ready` migration that does not conflict with any
    /// running migration.
    async fn get_non_conflicting_migration(&self) -> SchemaShiftResult<Option<Migration>> {
        let pending_uuids = self.store.pending_migration_uuids().await?;
        for uuid in self.store.ready_migration_uuids().await? {
            let migration = self.store.read_migration(&uuid).await?;
            if let Some(conflicting) = self.conflicting_migration_running(&migration) {
                info!(%uuid, %conflicting, "ready migration conflicts with a running one");
                continue;
            }
            if self.count_owned_running_migrations() >= self.config.max_concurrent() {
                // too many running migrations
                return Ok(None);
            }
            if migration.is_immediate_operation && migration.strategy.is_in_order_completion() {
                // would complete within a second; only run when at the head
                // of the pending list
                if pending_uuids.first().map(String::as_str) != Some(uuid.as_str()) {
                    continue;
                }
            }
            if self.validate_in_order_migration(&migration).await? {
                continue;
            }
            return Ok(Some(migration));
        }
        Ok(None)
    }

    /// Picks up to one `ready` migration able to run and executes it. All
    /// ready migrations may be conflicting, in which case none runs.
    async fn run_next_migration(&self) -> SchemaShiftResult<()> {
        if !self.reviewed_running_migrations_flag.load(Ordering::SeqCst) {
            // Since open we have not once successfully reviewed running
            // migrations, so the picture of what is actually running may be
            // incomplete — say, a workflow surviving a failover. Hold off
            // on new migrations for a couple of seconds.
            return Ok(());
        }
        let _guard = self.migration_mutex.lock().await;
        let Some(mut migration) = self.get_non_conflicting_migration().await? else {
            return Ok(());
        };
        // attribute comments confuse no one past this point
        migration.migration_statement = strip_sql_comments(&migration.migration_statement);
        info!(uuid = %migration.uuid, "migration is non conflicting and will be executed next");
        let _ = self.execute_migration(&migration).await;
        Ok(())
    }

    fn user_throttle_ratio_for(&self, uuid: &str) -> f64 {
        let mut online_ddl_ratio: f64 = 0.0;
        let mut migration_ratio: f64 = 0.0;
        for app in self.deps.lag_throttler.throttled_apps() {
            let names = app.names();
            if names.contains(&ONLINE_DDL_THROTTLER_APP) {
                online_ddl_ratio = online_ddl_ratio.max(app.ratio);
            }
            if names.contains(&uuid) {
                migration_ratio = migration_ratio.max(app.ratio);
            }
        }
        online_ddl_ratio.max(migration_ratio)
    }

    /// Iterates migrations in `running` state: checks stream health,
    /// progress, liveness and readiness, adopts streams started by other
    /// tablets, and triggers cut-over when a migration is ready for it.
    /// Returns migrations that must be cancelled.
    async fn review_running_migrations(
        &self,
    ) -> SchemaShiftResult<Vec<CancellableMigration>> {
        if !self.is_open() {
            return Ok(Vec::new());
        }
        let mut cancellable: Vec<CancellableMigration> = Vec::new();
        let mut cut_over_candidates: Vec<(VReplStream, bool)> = Vec::new();

        {
            let _guard = self.migration_mutex.lock().await;
            let rows = self.store.running_migrations().await?;
            let pending_uuids = self.store.pending_migration_uuids().await?;
            let mut uuids_found_running = HashSet::new();

            for row in rows {
                let uuid = row.uuid.clone();
                uuids_found_running.insert(uuid.clone());
                let migration = self.store.read_migration(&uuid).await?;

                let user_throttle_ratio = self.user_throttle_ratio_for(&uuid);
                let _ = self
                    .store
                    .update_migration_user_throttle_ratio(&uuid, user_throttle_ratio)
                    .await;

                if !migration.strategy.strategy.is_workflow() {
                    continue;
                }

                let is_test_suite = migration.strategy.is_test_suite();
                if is_test_suite {
                    self.trigger_next_check_interval();
                }
                let Some(stream) = self
                    .store
                    .read_vrepl_stream(&self.db_name, &uuid, true)
                    .await?
                else {
                    continue;
                };

                // Many stream errors are recoverable and not worth failing
                // on at first sight; give the error time to persist before
                // giving up.
                let (is_terminal, stream_error) = stream.has_error();
                {
                    let mut last_errors = self.vreplication_last_error.lock();
                    let last_error = last_errors.entry(uuid.clone()).or_insert_with(|| {
                        LastError::new(
                            format!("online DDL migration {uuid}"),
                            Duration::from_secs(STALE_MIGRATION_FAIL_MINUTES as u64 * 60),
                        )
                    });
                    last_error.record(stream_error);
                    if is_terminal || !last_error.should_retry() {
                        cancellable.push(CancellableMigration {
                            uuid: uuid.clone(),
                            message: stream.message.clone(),
                        });
                    }
                }
                if !stream.is_running() {
                    info!(%uuid, state = ?stream.state, "migration 'running' but stream is not");
                    continue;
                }

                // The workflow may have been started by another tablet
                // (failover); workflow migrations are adoptable, so make
                // sure this executor owns it.
                let owned = std::sync::Arc::new(OwnedMigration::new(migration.clone()));
                self.owned_running_migrations
                    .insert(uuid.clone(), owned.clone());
                if row.liveness_indicator < stream.liveness_time_indicator() {
                    let _ = self
                        .store
                        .update_migration_timestamp("liveness_timestamp", &uuid)
                        .await;
                    let _ = self
                        .store
                        .update_vitess_liveness_indicator(&uuid, stream.liveness_time_indicator())
                        .await;
                }
                if migration.tablet != self.tablet_alias() {
                    let _ = self
                        .store
                        .update_migration_tablet(&uuid, self.tablet_alias())
                        .await;
                    info!(%uuid, tablet = %self.tablet_alias(), "migration adopted by tablet");
                }
                let _ = self.store.update_rows_copied(&uuid, stream.rows_copied).await;
                let _ = self
                    .store
                    .update_migration_progress_by_rows_copied(&uuid, stream.rows_copied)
                    .await;
                let _ = self
                    .store
                    .update_migration_vreplication_lag_seconds(
                        &uuid,
                        stream.lag(Utc::now().timestamp()).as_secs() as i64,
                    )
                    .await;
                let _ = self.store.update_migration_eta_seconds_by_progress(&uuid).await;
                if stream.time_throttled != 0 {
                    // a zero would materialize as a 0000-00-00 timestamp
                    let _ = self
                        .store
                        .update_migration_last_throttled(
                            &uuid,
                            stream.time_throttled,
                            &stream.component_throttled,
                            &stream.reason_throttled,
                        )
                        .await;
                }

                if self.validate_in_order_migration(&migration).await? {
                    continue;
                }

                let mut is_ready = match self
                    .is_vrepl_migration_ready_to_cut_over(&migration, &stream)
                    .await
                {
                    Ok(is_ready) => is_ready,
                    Err(e) => {
                        let _ = self
                            .store
                            .update_migration_message(&uuid, &e.to_string())
                            .await;
                        return Err(e);
                    }
                };
                if is_ready
                    && is_test_suite
                    && row.elapsed.as_secs() < VREPLICATION_TEST_SUITE_WAIT_SECONDS as u64
                {
                    // intentionally delayed under the test suite
                    is_ready = false;
                }
                // Tell outside observers whether "now is a good time", even
                // for a postponed migration that won't complete yet.
                let _ = self
                    .store
                    .update_migration_ready_to_complete(&uuid, is_ready)
                    .await;
                owned.set_ready_to_complete(is_ready);

                if !is_ready || row.postpone_completion {
                    continue;
                }
                if migration.strategy.is_in_order_completion()
                    && pending_uuids.first().map(String::as_str) != Some(uuid.as_str())
                {
                    // wait for earlier pending migrations to complete
                    continue;
                }
                let force_cut_over_after = migration
                    .strategy
                    .force_cut_over_after()
                    .unwrap_or(Duration::ZERO);
                let (should_cut_over, should_force_cut_over) = super::should_cut_over_according_to_backoff(
                    row.force_cutover,
                    force_cut_over_after,
                    row.since_ready_to_complete,
                    row.since_last_cutover_attempt,
                    row.cutover_attempts,
                );
                if should_cut_over {
                    cut_over_candidates.push((stream, should_force_cut_over));
                }
            }

            self.prune_ownership(&uuids_found_running, &pending_uuids);
            self.reviewed_running_migrations_flag
                .store(true, Ordering::SeqCst);
        }

        // The cut-over is long-running and deliberately happens outside the
        // migration mutex.
        for (stream, should_force_cut_over) in cut_over_candidates {
            let uuid = stream.workflow.clone();
            if let Err(e) = self
                .cut_over_vrepl_migration(&stream, should_force_cut_over)
                .await
            {
                let _ = self
                    .store
                    .update_migration_message(&uuid, &e.to_string())
                    .await;
                error!(%uuid, error = %e, "cut-over failed");
                if e.mysql_error_code() == Some(er::TOO_LONG_IDENT) {
                    // fire-and-forget; may race the next tick
                    let executor = self.arc();
                    let message = e.to_string();
                    tokio::spawn(async move {
                        let _ = executor.cancel_migration(&uuid, &message, false).await;
                    });
                }
                return Err(e);
            }
        }

        Ok(cancellable)
    }

    pub(crate) async fn cancel_migrations(
        &self,
        cancellable: &[CancellableMigration],
        issued_by_user: bool,
    ) -> SchemaShiftResult<()> {
        for migration in cancellable {
            info!(uuid = %migration.uuid, reason = %migration.message, "cancelling migration");
            self.cancel_migration(&migration.uuid, &migration.message, issued_by_user)
                .await?;
        }
        Ok(())
    }

    /// Warns on running migrations whose liveness timestamp has aged past
    /// the warning threshold, and publishes the worst staleness as a gauge.
    async fn monitor_stale_migrations(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;
        let mut max_stale_minutes = 0i64;
        for stale in self
            .store
            .stale_migrations(STALE_MIGRATION_WARNING_MINUTES)
            .await?
        {
            self.warn_if_stale(&stale.uuid, stale.stale_minutes, &stale.liveness_timestamp);
            max_stale_minutes = max_stale_minutes.max(stale.stale_minutes);
        }
        gauge!("schemashift_stale_migration_minutes", max_stale_minutes as f64);
        Ok(())
    }

    /// Fails migrations that have shown no liveness past the hard
    /// threshold, terminating their workflows.
    async fn review_stale_migrations(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;
        for stale in self
            .store
            .stale_migrations(STALE_MIGRATION_FAIL_MINUTES)
            .await?
        {
            let migration = self.store.read_migration(&stale.uuid).await?;
            info!(uuid = %migration.uuid, "stale migration found");
            let mut message = format!(
                "stale migration {}: found running but indicates no liveness in the past {} minutes",
                migration.uuid, STALE_MIGRATION_FAIL_MINUTES
            );
            if migration.tablet != self.tablet_alias() {
                // another tablet started this migration and went away
                self.store.update_tablet_failure(&migration.uuid).await?;
                message = format!(
                    "{message}; executed by different tablet {}",
                    migration.tablet
                );
            }
            if let Err(e) = self.terminate_migration(&migration).await {
                let message = format!("error terminating migration ({message}): {e}");
                let _ = self
                    .store
                    .update_migration_message(&migration.uuid, &message)
                    .await;
                continue; // still handle the rest of the migrations
            }
            self.store
                .update_migration_message(&migration.uuid, &message)
                .await?;
            self.store
                .update_migration_status(&migration.uuid, MigrationStatus::Failed)
                .await?;
            self.trigger_next_check_interval();
            let _ = self
                .store
                .update_migration_started_timestamp(&migration.uuid)
                .await;
            // A stale migration may never have stamped its completion; the
            // stamp is what lets artifact cleanup pick it up.
            self.store
                .update_migration_timestamp("completed_timestamp", &migration.uuid)
                .await?;
        }
        Ok(())
    }

    /// Renames a single artifact table into the GC namespace, returning the
    /// new name, or `None` when the table no longer exists.
    async fn gc_artifact_table(
        &self,
        artifact_table: &str,
        uuid: &str,
        t: chrono::DateTime<Utc>,
    ) -> SchemaShiftResult<Option<String>> {
        if !self.store.table_exists(artifact_table).await? {
            return Ok(None);
        }
        // Renamed with HOLD state and a timestamp in the past: this
        // executor loses all access to the table, and table GC finds it
        // having been on HOLD long enough to transition it onward.
        let (rename_statement, to_table_name) =
            generate_rename_statement_with_uuid(artifact_table, GcState::Hold, uuid, t);
        self.store.exec_raw(&rename_statement).await?;
        Ok(Some(to_table_name))
    }

    /// Collects artifacts of terminal migrations past their retention
    /// period.
    async fn gc_artifacts(&self) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;

        if !self.fix_completed_timestamp_done.load(Ordering::SeqCst) {
            // Historical rows were marked failed/cancelled without a
            // completion stamp; assign one retroactively, once.
            self.store.fix_completed_timestamp().await?;
            self.fix_completed_timestamp_done
                .store(true, Ordering::SeqCst);
        }

        for row in self
            .store
            .uncollected_artifacts(self.config.retain_online_ddl_tables)
            .await?
        {
            info!(uuid = %row.uuid, "collecting artifacts");
            let artifact_tables = split_delimited_list(&row.artifacts);
            let timestamps = gc_artifact_timestamps(Utc::now(), artifact_tables.len());
            for (artifact_table, timestamp_in_the_past) in
                artifact_tables.iter().zip(timestamps)
            {
                match self
                    .gc_artifact_table(artifact_table, &row.uuid, timestamp_in_the_past)
                    .await
                {
                    Ok(renamed) => {
                        let _ = self
                            .store
                            .clear_single_artifact(&row.uuid, artifact_table)
                            .await;
                        (self.deps.request_gc_checks)();
                        if let Some(to_table_name) = renamed {
                            info!(
                                uuid = %row.uuid,
                                from = %artifact_table,
                                to = %to_table_name,
                                "renamed away artifact"
                            );
                        }
                    }
                    Err(e) => {
                        return Err(e.wrap(&format!("in gc_artifacts() for {artifact_table}")))
                    }
                }
            }

            if !row.log_path.is_empty() {
                // log_path is in 'hostname:/path/to/logs' format
                let path = row
                    .log_path
                    .splitn(2, ':')
                    .last()
                    .unwrap_or(&row.log_path)
                    .to_string();
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(_) => {
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }

            // applies to workflow migrations; harmless for the rest
            self.delete_vreplication_entry(&row.uuid).await?;

            self.store
                .update_migration_timestamp("cleanup_timestamp", &row.uuid)
                .await?;
            info!(uuid = %row.uuid, "artifact collection done");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use schemashift_sql::names::{generate_gc_table_name_with_uuid, GcState};

    use super::*;

    #[test]
    fn gc_timestamps_are_strictly_decreasing() {
        let now = Utc.with_ymd_and_hms(2024, 9, 15, 12, 4, 10).unwrap();
        let timestamps = gc_artifact_timestamps(now, 4);
        assert_eq!(timestamps.len(), 4);
        assert_eq!(timestamps[0], now);
        for pair in timestamps.windows(2) {
            assert!(pair[1] < pair[0]);
            assert!(pair[1] <= now);
        }
    }

    #[test]
    fn gc_timestamps_yield_unique_table_names() {
        let now = Utc.with_ymd_and_hms(2024, 9, 15, 12, 4, 10).unwrap();
        let uuid = "2201058f_f266_41ea_bab4_0242c0a8b005";
        let names: Vec<String> = gc_artifact_timestamps(now, 3)
            .into_iter()
            .map(|t| generate_gc_table_name_with_uuid(GcState::Hold, uuid, t))
            .collect();
        assert_eq!(names.len(), 3);
        for pair in names.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }
}
