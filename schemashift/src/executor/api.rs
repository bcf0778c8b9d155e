//! The submission API: submit, cancel, retry, cleanup, complete, launch,
//! throttle, force-cut-over, and the singleton admission gate.

use std::time::{Duration, SystemTime};

use schemashift_sql::attrs::{online_ddl_from_commented_statement, OnlineDdl};
use schemashift_sql::ddl::{parse_ddl, DdlAction, DdlStatement};
use schemashift_sql::strategy::parse_duration;
use schemashift_sql::uuid::is_migration_uuid;
use tracing::info;

use crate::classified_err;
use crate::error::{Code, SchemaShiftError, SchemaShiftResult};
use crate::migration::{safe_cut_over_threshold, MigrationStatus};
use crate::store::InsertMigration;
use crate::vrepl::sql_quote;

use super::Executor;

/// Filter for [`Executor::show_migrations`].
#[derive(Clone, Debug)]
pub enum MigrationsFilter {
    All,
    /// Matches UUID, context or status.
    Like(String),
    /// A raw WHERE expression.
    Where(String),
}

fn allow_concurrent_for_submission(online_ddl: &OnlineDdl) -> bool {
    if !online_ddl.strategy.is_allow_concurrent() {
        return false;
    }
    match online_ddl.action {
        DdlAction::Create | DdlAction::Drop | DdlAction::Revert => true,
        DdlAction::Alter => online_ddl.strategy.strategy.is_workflow(),
    }
}

impl Executor {
    fn validate_migration_uuid(&self, uuid: &str, command: &str) -> SchemaShiftResult<()> {
        if is_migration_uuid(uuid) {
            Ok(())
        } else {
            Err(classified_err!(
                Code::Unknown,
                "not a valid migration ID in {command}: {uuid}"
            ))
        }
    }

    /// Rejects the submission when a singleton constraint conflicts with a
    /// pending migration. Holds the migration mutex only for the duration
    /// of the check.
    async fn check_singleton_conflicts(&self, online_ddl: &OnlineDdl) -> SchemaShiftResult<()> {
        let setting = &online_ddl.strategy;
        if !setting.is_singleton() && !setting.is_singleton_context() && !setting.is_singleton_table()
        {
            return Ok(());
        }
        let _guard = self.migration_mutex.lock().await;
        let pending = self.store.pending_migrations().await?;

        if setting.is_singleton() {
            if let Some(sample) = pending.first() {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "singleton migration rejected: found pending migrations [sample: {}]",
                    sample.uuid
                ));
            }
            return Ok(());
        }
        if setting.is_singleton_context() {
            for pending_migration in &pending {
                if pending_migration.migration_context == online_ddl.migration_context {
                    // same context is obviously allowed; skip the more
                    // expensive per-row read
                    continue;
                }
                let pending_row = self
                    .store
                    .read_migration(&pending_migration.uuid)
                    .await
                    .map_err(|e| {
                        e.wrap(&format!("validating singleton-context, migration: {}", pending_migration.uuid))
                    })?;
                // A REVERT without --singleton-context is allowed to
                // coexist; reverts should run as concurrently as possible.
                let pending_is_permissive_revert = matches!(
                    parse_ddl(&pending_row.migration_statement),
                    Ok(DdlStatement::Revert { .. })
                ) && !pending_row.strategy.is_singleton_context();
                if !pending_is_permissive_revert {
                    return Err(classified_err!(
                        Code::FailedPrecondition,
                        "singleton-context migration rejected: found pending migration: {} in different context: {}",
                        pending_migration.uuid,
                        pending_migration.migration_context
                    ));
                }
            }
            return Ok(());
        }
        // singleton-table
        for pending_migration in &pending {
            if pending_migration.mysql_table == online_ddl.table {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "singleton-table migration rejected: found pending migration: {} for the same table: {}",
                    pending_migration.uuid,
                    online_ddl.table
                ));
            }
        }
        Ok(())
    }

    /// Inserts a new migration request. Re-submitting an existing UUID with
    /// a matching context is idempotent: a terminal migration is retried, a
    /// pending one is left alone.
    pub async fn submit_migration(&self, statement: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;

        let online_ddl = online_ddl_from_commented_statement(statement).map_err(|e| {
            classified_err!(Code::InvalidArgument, "error submitting migration: {e}")
        })?;
        info!(
            uuid = %online_ddl.uuid,
            action = %online_ddl.action,
            table = %online_ddl.table,
            "submit migration"
        );

        // multiple steps below; serialized against other submissions
        let _submit_guard = self.submit_mutex.lock().await;

        match self.store.read_migration(&online_ddl.uuid).await {
            Ok(stored_migration) => {
                // A migration by this UUID exists: submission is
                // idempotent, but only within the same context.
                if stored_migration.migration_context != online_ddl.migration_context {
                    return Err(classified_err!(
                        Code::FailedPrecondition,
                        "migration rejected: found migration {} with different context: {} than submitted migration's context: {}",
                        online_ddl.uuid,
                        stored_migration.migration_context,
                        online_ddl.migration_context
                    ));
                }
                self.check_singleton_conflicts(&online_ddl).await?;
                self.retry_migration(&online_ddl.uuid).await
            }
            Err(SchemaShiftError::MigrationNotFound) => {
                let retain_artifacts_seconds = match online_ddl
                    .strategy
                    .retain_artifacts_duration()
                    .map_err(SchemaShiftError::from)?
                {
                    Some(retain) if retain > Duration::ZERO => retain.as_secs() as i64,
                    _ => self.config.retain_online_ddl_tables.as_secs() as i64,
                };
                let cutover_threshold = online_ddl
                    .strategy
                    .cut_over_threshold()
                    .map_err(SchemaShiftError::from)
                    .and_then(safe_cut_over_threshold)
                    .map_err(|e| {
                        e.wrap(&format!(
                            "validating cut-over threshold in migration {}",
                            online_ddl.uuid
                        ))
                    })?;

                self.check_singleton_conflicts(&online_ddl).await?;
                let insert = InsertMigration {
                    uuid: online_ddl.uuid.clone(),
                    keyspace: self.keyspace.clone(),
                    shard: self.shard.clone(),
                    mysql_schema: self.db_name.clone(),
                    mysql_table: online_ddl.table.clone(),
                    migration_statement: online_ddl.sql.clone(),
                    strategy: online_ddl.strategy.strategy.to_string(),
                    options: online_ddl.strategy.options.clone(),
                    ddl_action: online_ddl.action.to_string(),
                    migration_context: online_ddl.migration_context.clone(),
                    tablet: self.tablet_alias().to_string(),
                    retain_artifacts_seconds,
                    cutover_threshold_seconds: cutover_threshold.as_secs() as i64,
                    postpone_launch: online_ddl.strategy.is_postpone_launch(),
                    postpone_completion: online_ddl.strategy.is_postpone_completion(),
                    allow_concurrent: allow_concurrent_for_submission(&online_ddl),
                    reverted_uuid: online_ddl.revert_uuid().unwrap_or_default(),
                    is_view: online_ddl.is_view,
                };
                let rows_affected = self
                    .store
                    .insert_migration(&insert)
                    .await
                    .map_err(|e| e.wrap(&format!("submitting migration {}", online_ddl.uuid)))?;
                info!(uuid = %online_ddl.uuid, "migration submitted");
                self.trigger_next_check_interval();
                Ok(rows_affected)
            }
            Err(e) => Err(e.wrap(&format!(
                "while checking whether migration {} exists",
                online_ddl.uuid
            ))),
        }
    }

    /// Aborts a scheduled or running migration. A terminal migration is a
    /// noop. When issued by the user, the resulting terminal state is
    /// `cancelled` rather than `failed`.
    pub async fn cancel_migration(
        &self,
        uuid: &str,
        message: &str,
        issued_by_user: bool,
    ) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        info!(%uuid, message, "cancel migration requested");
        let _guard = self.migration_mutex.lock().await;

        let migration = self.store.read_migration(uuid).await?;
        if migration.status.is_terminal() {
            info!(%uuid, status = %migration.status, "migration is in non-cancellable status");
            return Ok(0);
        }
        if issued_by_user {
            // An internal state-machine cancellation (stale migration,
            // unrecoverable error) leaves this unset and the row
            // transitions to 'failed' instead.
            self.store
                .update_migration_timestamp("cancelled_timestamp", uuid)
                .await?;
        }

        let result = match migration.status {
            MigrationStatus::Queued | MigrationStatus::Ready => {
                info!(%uuid, status = %migration.status, "cancelling non-running migration");
                Ok(1)
            }
            _ => match self.terminate_migration(&migration).await {
                Ok(found_running) => {
                    if found_running {
                        info!(%uuid, "terminated running migration");
                    } else {
                        info!(%uuid, "migration wasn't found to be running");
                    }
                    Ok(found_running as u64)
                }
                Err(e) => Err(e),
            },
        };
        self.fail_migration(uuid, message).await;
        self.trigger_next_check_interval();
        result
    }

    /// Cancels all pending migrations.
    pub async fn cancel_pending_migrations(
        &self,
        message: &str,
        issued_by_user: bool,
    ) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let uuids = self.store.pending_migration_uuids().await?;
        info!(count = uuids.len(), "cancelling pending migrations");
        let mut rows_affected = 0;
        for uuid in &uuids {
            rows_affected += self.cancel_migration(uuid, message, issued_by_user).await?;
        }
        Ok(rows_affected)
    }

    /// Marks a terminal migration for retry.
    pub async fn retry_migration(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "RETRY")?;
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.retry_migration(uuid, self.tablet_alias()).await?;
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Marks a migration ready for artifact cleanup. Artifacts are not
    /// dropped immediately: the retention period collapses so the next GC
    /// pass picks the migration up.
    pub async fn cleanup_migration(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "CLEANUP")?;
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.update_ready_for_cleanup(uuid).await?;
        info!(%uuid, "migration marked as ready to clean up");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Marks all terminal migrations ready for artifact cleanup.
    pub async fn cleanup_all_migrations(&self) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.update_ready_for_cleanup_all().await?;
        info!(rows_affected, "migrations marked as ready to clean up");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Marks the migration for forced cut-over: no backoff, and the
    /// cut-over KILLs interfering queries and lock-holding connections.
    /// Idempotent; the flag, once set, remains set.
    pub async fn force_cutover_migration(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "FORCE_CUTOVER")?;
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.update_force_cutover(uuid).await?;
        info!(%uuid, "migration marked for forced cut-over");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Applies [`Self::force_cutover_migration`] to all pending migrations.
    pub async fn force_cutover_pending_migrations(&self) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let uuids = self.store.pending_migration_uuids().await?;
        let mut rows_affected = 0;
        for uuid in &uuids {
            rows_affected += self.force_cutover_migration(uuid).await?;
        }
        Ok(rows_affected)
    }

    /// Sets the migration's cut-over threshold. Zero means the default;
    /// out-of-range values are rejected.
    pub async fn set_migration_cut_over_threshold(
        &self,
        uuid: &str,
        threshold: Duration,
    ) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "CUTOVER_THRESHOLD")?;
        let _guard = self.migration_mutex.lock().await;
        let threshold = safe_cut_over_threshold(threshold)?;
        let rows_affected = self
            .store
            .update_cutover_threshold_seconds(uuid, threshold)
            .await?;
        info!(%uuid, ?threshold, "cut-over threshold set");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Clears the postpone-completion flag, letting the migration cut over
    /// (or complete) when ready.
    pub async fn complete_migration(&self, uuid: &str, shards_arg: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "COMPLETE")?;
        if !self.matches_shards(shards_arg) {
            // does not apply to this shard
            return Ok(0);
        }
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.clear_postpone_completion(uuid).await?;
        info!(%uuid, "migration marked as unpostponed");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Applies [`Self::complete_migration`] to all pending migrations.
    pub async fn complete_pending_migrations(&self) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let uuids = self.store.pending_migration_uuids().await?;
        let mut rows_affected = 0;
        for uuid in &uuids {
            rows_affected += self.complete_migration(uuid, "").await?;
        }
        Ok(rows_affected)
    }

    /// Sets the postpone-completion flag on a pending migration.
    pub async fn postpone_complete_migration(&self, uuid: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "POSTPONE COMPLETE")?;
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.set_postpone_completion(uuid).await?;
        info!(%uuid, "migration marked as postponed");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Applies [`Self::postpone_complete_migration`] to all pending
    /// migrations.
    pub async fn postpone_complete_pending_migrations(&self) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let uuids = self.store.pending_migration_uuids().await?;
        let mut rows_affected = 0;
        for uuid in &uuids {
            rows_affected += self.postpone_complete_migration(uuid).await?;
        }
        Ok(rows_affected)
    }

    /// Clears the postpone-launch flag on a queued migration.
    pub async fn launch_migration(&self, uuid: &str, shards_arg: &str) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        self.validate_migration_uuid(uuid, "LAUNCH")?;
        if !self.matches_shards(shards_arg) {
            return Ok(0);
        }
        let _guard = self.migration_mutex.lock().await;
        let rows_affected = self.store.update_launch_migration(uuid).await?;
        info!(%uuid, "migration launch unpostponed");
        self.trigger_next_check_interval();
        Ok(rows_affected)
    }

    /// Launches all launch-postponed queued migrations.
    pub async fn launch_migrations(&self) -> SchemaShiftResult<u64> {
        self.ensure_open()?;
        let queued = self.store.queued_migrations().await?;
        let mut rows_affected = 0;
        for row in &queued {
            rows_affected += self.launch_migration(&row.uuid, "").await?;
        }
        Ok(rows_affected)
    }

    fn validate_throttle_params(
        &self,
        expire: Option<&str>,
        ratio: Option<f64>,
    ) -> SchemaShiftResult<(Duration, f64)> {
        let duration = match expire {
            None | Some("") => Duration::from_secs(100 * 365 * 24 * 3600),
            Some(expire) => parse_duration(expire).map_err(|_| {
                classified_err!(
                    Code::InvalidArgument,
                    "invalid EXPIRE value: {expire}. Try '120s', '30m', '1h', etc. Allowed units are (s)ec, (m)in, (h)hour"
                )
            })?,
        };
        let ratio = ratio.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&ratio) {
            return Err(classified_err!(
                Code::InvalidArgument,
                "invalid RATIO value: {ratio}. Try any decimal number between '0.0' (no throttle) and '1.0' (fully throttled)"
            ));
        }
        Ok((duration, ratio))
    }

    /// Throttles a single migration's row copy.
    pub async fn throttle_migration(
        &self,
        uuid: &str,
        expire: Option<&str>,
        ratio: Option<f64>,
    ) -> SchemaShiftResult<()> {
        let (duration, ratio) = self.validate_throttle_params(expire, ratio)?;
        self.deps.lag_throttler.check_is_open()?;
        self.deps
            .lag_throttler
            .throttle_app(uuid, SystemTime::now() + duration, ratio);
        Ok(())
    }

    /// Throttles all online DDL migrations at once.
    pub async fn throttle_all_migrations(
        &self,
        expire: Option<&str>,
        ratio: Option<f64>,
    ) -> SchemaShiftResult<()> {
        let (duration, ratio) = self.validate_throttle_params(expire, ratio)?;
        self.deps.lag_throttler.check_is_open()?;
        self.deps.lag_throttler.throttle_app(
            crate::contracts::ONLINE_DDL_THROTTLER_APP,
            SystemTime::now() + duration,
            ratio,
        );
        Ok(())
    }

    pub async fn unthrottle_migration(&self, uuid: &str) -> SchemaShiftResult<()> {
        self.deps.lag_throttler.check_is_open()?;
        self.deps.lag_throttler.unthrottle_app(uuid);
        self.trigger_next_check_interval();
        Ok(())
    }

    pub async fn unthrottle_all_migrations(&self) -> SchemaShiftResult<()> {
        self.deps.lag_throttler.check_is_open()?;
        self.deps
            .lag_throttler
            .unthrottle_app(crate::contracts::ONLINE_DDL_THROTTLER_APP);
        self.trigger_next_check_interval();
        Ok(())
    }

    /// Lists migrations, optionally filtered.
    pub async fn show_migrations(
        &self,
        filter: MigrationsFilter,
    ) -> SchemaShiftResult<Vec<mysql_async::Row>> {
        self.ensure_open()?;
        let where_expr = match filter {
            MigrationsFilter::All => String::new(),
            MigrationsFilter::Like(like) => {
                let lit = sql_quote(&like);
                format!(
                    " WHERE migration_uuid LIKE {lit} OR migration_context LIKE {lit} OR migration_status LIKE {lit}"
                )
            }
            MigrationsFilter::Where(expr) => format!(" WHERE {expr}"),
        };
        self.store.show_migrations(&where_expr).await
    }

    /// Reads the migration's log file content.
    pub async fn show_migration_logs(&self, uuid: &str) -> SchemaShiftResult<String> {
        self.ensure_open()?;
        let log_file = self.store.migration_log_file(uuid).await?.ok_or_else(|| {
            classified_err!(Code::NotFound, "no log file for migration {uuid}")
        })?;
        tokio::fs::read_to_string(&log_file)
            .await
            .map_err(|e| classified_err!(Code::Internal, "reading migration log {log_file}: {e}"))
    }
}
