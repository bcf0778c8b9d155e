//! Strategy handlers: DROP, CREATE, ALTER (direct, view, special-plan and
//! workflow execution), REVERT, and declarative evaluation.

use itertools::Itertools;
use mysql_async::prelude::Queryable;
use schemashift_sql::analysis::{
    analyze_table_delta, analyze_special_alter_plan, is_auto_increment_change_requested,
    ServerCapabilities, SpecialOperation,
};
use schemashift_sql::constraints::{
    duplicate_create_table, edit_alter_table_constraints, edit_create_table_constraints,
    foreign_key_names,
};
use schemashift_sql::ddl::{
    create_or_replace_view_statement, parse_ddl, DdlAction, DdlStatement, ParsedDdl,
};
use schemashift_sql::names::{
    generate_gc_table_name, generate_internal_table_name, generate_rename_statement_with_uuid,
    generate_swap_tables_statement, is_gc_table_name, GcState, INTERNAL_TABLE_VREPLICATION_HINT,
};
use tracing::info;

use crate::classified_err;
use crate::error::{er, Code, SchemaShiftError, SchemaShiftResult};
use crate::migration::{Migration, MigrationStatus, OwnedMigration};
use crate::store::queries;
use crate::vrepl;

use super::{
    Executor, EMPTY_HINT, ETA_SECONDS_NOW, ETA_SECONDS_UNKNOWN, PROGRESS_PCT_FULL,
    PROGRESS_PCT_STARTED, QR_BUFFER_EXTRA_TIMEOUT, ROWS_COPIED_UNKNOWN,
};

const ACCEPTABLE_DROP_TABLE_IF_EXISTS_ERROR_CODES: [u16; 2] =
    [er::CANT_FIND_FILE, er::NO_SUCH_TABLE];

impl Executor {
    fn parse_migration_ddl(&self, migration: &Migration) -> SchemaShiftResult<DdlStatement> {
        Ok(parse_ddl(&migration.migration_statement)?)
    }

    fn parsed_ddl(&self, migration: &Migration) -> SchemaShiftResult<ParsedDdl> {
        match self.parse_migration_ddl(migration)? {
            DdlStatement::Parsed(parsed) => Ok(parsed),
            DdlStatement::Revert { .. } => Err(classified_err!(
                Code::Internal,
                "expected a SQL DDL statement, got a REVERT, in migration {}",
                migration.uuid
            )),
        }
    }

    /// Executes a single migration, dispatching by DDL action. Declarative
    /// migrations are first resolved into a concrete action.
    pub(crate) async fn execute_migration(&self, migration: &Migration) -> SchemaShiftResult<()> {
        let result = self.execute_migration_inner(migration).await;
        self.trigger_next_check_interval();
        result
    }

    async fn execute_migration_inner(&self, migration: &Migration) -> SchemaShiftResult<()> {
        let mut migration = migration.clone();
        let mut ddl_action = migration.action().ok_or_else(|| {
            classified_err!(
                Code::Internal,
                "unexpected ddl_action {} in migration {}",
                migration.ddl_action,
                migration.uuid
            )
        })?;

        // A duplicate submission — same context, same SQL — whose
        // predecessor completed is itself implicitly complete.
        if !migration.migration_context.is_empty() {
            if let Some(completed_uuid) = self
                .store
                .complete_migration_by_context_and_sql(
                    &self.keyspace,
                    &migration.migration_context,
                    &migration.migration_statement,
                )
                .await?
            {
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
                let _ = self
                    .store
                    .update_migration_message(
                        &migration.uuid,
                        &format!(
                            "duplicate DDL as {completed_uuid} for migration context {}",
                            migration.migration_context
                        ),
                    )
                    .await;
                return Ok(());
            }
        }

        if migration.strategy.is_declarative() {
            if let Some(resolved_action) = self
                .resolve_declarative_migration(&mut migration, ddl_action)
                .await?
            {
                ddl_action = resolved_action;
            } else {
                // implicitly complete; nothing to execute
                return Ok(());
            }
        }

        match ddl_action {
            DdlAction::Drop => {
                let executor = self.arc();
                let migration = migration.clone();
                tokio::spawn(async move {
                    let _ = executor.execute_drop_ddl_action_migration(&migration).await;
                });
            }
            DdlAction::Create => {
                let executor = self.arc();
                let migration = migration.clone();
                tokio::spawn(async move {
                    let _ = executor.execute_create_ddl_action_migration(&migration).await;
                });
            }
            DdlAction::Alter => {
                self.execute_alter_ddl_action_migration(&migration).await?;
            }
            DdlAction::Revert => {
                if let Err(e) = self.execute_revert(&migration).await {
                    self.fail_migration(&migration.uuid, &e.to_string()).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Resolves a declarative migration against the live schema. Returns
    /// the concrete action to run, or `None` when the migration is
    /// implicitly complete.
    async fn resolve_declarative_migration(
        &self,
        migration: &mut Migration,
        ddl_action: DdlAction,
    ) -> SchemaShiftResult<Option<DdlAction>> {
        match ddl_action {
            DdlAction::Revert => Ok(Some(ddl_action)),
            DdlAction::Alter => Err(classified_err!(
                Code::Unimplemented,
                "strategy is declarative. ALTER cannot run in declarative mode for migration {}",
                migration.uuid
            )),
            DdlAction::Drop => {
                let ddl = self.parsed_ddl(migration)?;
                if ddl.if_exists() {
                    return Err(classified_err!(
                        Code::Unimplemented,
                        "strategy is declarative. IF EXISTS does not work in declarative mode for migration {}",
                        migration.uuid
                    ));
                }
                if self.store.table_exists(&migration.mysql_table).await? {
                    // a real DROP after all
                    Ok(Some(DdlAction::Drop))
                } else {
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
                    let _ = self
                        .store
                        .update_migration_message(&migration.uuid, "no change")
                        .await;
                    Ok(None)
                }
            }
            DdlAction::Create => {
                let ddl = self.parsed_ddl(migration)?;
                if ddl.if_not_exists() {
                    return Err(classified_err!(
                        Code::Unimplemented,
                        "strategy is declarative. IF NOT EXISTS does not work in declarative mode for migration {}",
                        migration.uuid
                    ));
                }
                if ddl.is_replace() {
                    return Err(classified_err!(
                        Code::Unimplemented,
                        "strategy is declarative. OR REPLACE does not work in declarative mode for migration {}",
                        migration.uuid
                    ));
                }
                if !self.store.table_exists(&migration.mysql_table).await? {
                    // a real CREATE after all
                    return Ok(Some(DdlAction::Create));
                }
                let diff = self.evaluate_declarative_diff(migration, &ddl).await?;
                match diff {
                    None => {
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
                        let _ = self
                            .store
                            .update_migration_message(&migration.uuid, "no change")
                            .await;
                        Ok(None)
                    }
                    Some(diff_statement) => {
                        self.store
                            .update_ddl_action(&migration.uuid, &DdlAction::Alter.to_string())
                            .await?;
                        let _ = self
                            .store
                            .update_migration_message(&migration.uuid, &diff_statement)
                            .await;
                        if migration.is_view {
                            // rewritten as CREATE OR REPLACE; handled by
                            // the view path of the create handler
                            let mut create = ddl.clone();
                            if let schemashift_sql::sqlparser::ast::Statement::CreateView {
                                or_replace,
                                ..
                            } = &mut create.stmt
                            {
                                *or_replace = true;
                            }
                            migration.migration_statement = create.to_sql();
                            Ok(Some(DdlAction::Create))
                        } else {
                            migration.migration_statement = diff_statement;
                            Ok(Some(DdlAction::Alter))
                        }
                    }
                }
            }
        }
    }

    /// Creates a throwaway comparison table from the declarative CREATE and
    /// diffs it against the live table.
    async fn evaluate_declarative_diff(
        &self,
        migration: &Migration,
        ddl: &ParsedDdl,
    ) -> SchemaShiftResult<Option<String>> {
        let comparison_table_name =
            generate_gc_table_name(GcState::Hold, self.new_gc_table_retain_time());
        let mut comparison_ddl = ddl.clone();
        comparison_ddl.set_table(&comparison_table_name);

        let mut conn = self.dba_conn().await?;
        let original_sql_mode = self.init_migration_sql_mode(migration, &mut conn).await?;
        let created = conn.query_drop(comparison_ddl.to_sql()).await;
        self.restore_sql_mode(&mut conn, original_sql_mode).await;
        created.map_err(SchemaShiftError::from)?;

        let diff_result = async {
            let existing = self.store.show_create_table(&migration.mysql_table).await?;
            if existing.is_empty() {
                return Err(classified_err!(
                    Code::NotFound,
                    "cannot find table or view {}",
                    migration.mysql_table
                ));
            }
            let desired = self.store.show_create_table(&comparison_table_name).await?;
            if desired.is_empty() {
                return Err(classified_err!(
                    Code::Internal,
                    "cannot find table or view even as it was just created: {}",
                    comparison_table_name
                ));
            }
            self.deps
                .schema_diff
                .diff_statements(&existing, &desired, migration.is_view)
        }
        .await;

        // The comparison table is GC-named; if the drop fails now, table GC
        // collects it later.
        let drop_query = queries::DROP_TABLE_IF_EXISTS.replace("{table}", &comparison_table_name);
        let _ = conn.query_drop(&drop_query).await;

        diff_result
    }

    /// DROP handler. The table is renamed into the GC namespace rather than
    /// dropped, so the data remains recoverable until GC reclaims it.
    pub(crate) async fn execute_drop_ddl_action_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let result = self.drop_ddl_action(migration).await;
        if let Err(e) = &result {
            self.fail_migration(&migration.uuid, &e.to_string()).await;
        }
        result
    }

    async fn drop_ddl_action(&self, migration: &Migration) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;

        // A GC-lifecycle table does not go through yet another GC cycle; it
        // is dropped outright.
        if is_gc_table_name(&migration.mysql_table) {
            self.execute_directly(migration, &migration.migration_statement, &[])
                .await?;
            return Ok(());
        }

        let ddl = self.parsed_ddl(migration)?;
        self.analyze_drop_ddl_action_migration(migration).await?;

        let (rename_statement, to_table_name) = generate_rename_statement_with_uuid(
            &migration.mysql_table,
            GcState::Hold,
            &migration.uuid,
            self.new_gc_table_retain_time(),
        );
        self.store
            .update_artifacts(&migration.uuid, &[&to_table_name])
            .await?;

        let acceptable_error_codes: &[u16] = if ddl.if_exists() {
            &ACCEPTABLE_DROP_TABLE_IF_EXISTS_ERROR_CODES
        } else {
            &[]
        };
        let acceptable_error_code_found = self
            .execute_directly(migration, &rename_statement, acceptable_error_codes)
            .await?;
        if acceptable_error_code_found {
            // the table did not exist after all; there is no artifact
            self.store.clear_artifacts(&migration.uuid).await?;
        }
        Ok(())
    }

    /// Records the FOREIGN KEY constraints removed by dropping the table.
    /// A missing table is fine for analysis purposes.
    async fn analyze_drop_ddl_action_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let show_create = match self.store.show_create_table(&migration.mysql_table).await {
            Ok(show_create) => show_create,
            Err(e) if e.mysql_error_code() == Some(er::NO_SUCH_TABLE) => return Ok(()),
            Err(e) => {
                return Err(e.wrap(&format!(
                    "attempting to read definition of {}",
                    migration.mysql_table
                )))
            }
        };
        let mut removed_foreign_key_names = Vec::new();
        if let Ok(DdlStatement::Parsed(parsed)) = parse_ddl(&show_create) {
            removed_foreign_key_names = foreign_key_names(&parsed);
        }
        self.store
            .update_schema_analysis(
                &migration.uuid,
                0,
                0,
                "",
                &removed_foreign_key_names.join(","),
                "",
                "",
                "",
            )
            .await
    }

    /// CREATE handler.
    pub(crate) async fn execute_create_ddl_action_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let result = self.create_ddl_action(migration).await;
        if let Err(e) = &result {
            self.fail_migration(&migration.uuid, &e.to_string()).await;
        }
        result
    }

    async fn create_ddl_action(&self, migration: &Migration) -> SchemaShiftResult<()> {
        let _guard = self.migration_mutex.lock().await;

        let mut ddl = self.parsed_ddl(migration)?;
        if ddl.is_view() && ddl.is_replace() && self.store.table_exists(&migration.mysql_table).await? {
            // CREATE OR REPLACE VIEW over an existing view is actually an
            // ALTER
            return self.execute_alter_view_online(migration).await;
        }

        let mut sql = migration.migration_statement.clone();
        if !ddl.is_view() {
            // Edit CONSTRAINT names to be deterministic across shards and
            // drop any `<tablename>` prefix.
            edit_create_table_constraints(&mut ddl, &migration.mysql_table, &migration.uuid)?;
            sql = ddl.to_sql();
        }

        // A dummy sentry artifact: its existence later tells a REVERT that
        // a real table was created.
        let sentry_artifact_table_name =
            generate_gc_table_name(GcState::Hold, self.new_gc_table_retain_time());
        self.store
            .update_artifacts(&migration.uuid, &[&sentry_artifact_table_name])
            .await?;

        if ddl.if_not_exists() && self.store.table_exists(&migration.mysql_table).await? {
            // The CREATE TABLE IF NOT EXISTS is a noop; so will a revert
            // be. Clearing the artifact is the hint.
            self.store.clear_artifacts(&migration.uuid).await?;
        }

        self.execute_directly(migration, &sql, &[]).await?;
        Ok(())
    }

    /// ALTER VIEW handler: materialize the desired definition under an
    /// artifact name, then atomically swap it with the live view.
    pub(crate) async fn execute_alter_view_online(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let artifact_view_name =
            generate_gc_table_name(GcState::Hold, self.new_gc_table_retain_time());
        let ddl = self.parsed_ddl(migration)?;
        let artifact_view_create_sql = create_or_replace_view_statement(&ddl, &artifact_view_name)?;

        let mut conn = self.dba_conn().await?;
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

        conn.query_drop(&artifact_view_create_sql).await?;
        self.store.clear_artifacts(&migration.uuid).await?;
        self.store
            .update_artifacts(&migration.uuid, &[&artifact_view_name])
            .await?;

        // view created in requested form, under a different name; swap
        let (swap_query, _) = generate_swap_tables_statement(
            &migration.mysql_table,
            &artifact_view_name,
            self.new_gc_table_retain_time(),
        );
        conn.query_drop(&swap_query).await?;

        // Whether the user issued ALTER VIEW, or CREATE OR REPLACE over an
        // existing view, the effective action is ALTER.
        self.store
            .update_ddl_action(&migration.uuid, &DdlAction::Alter.to_string())
            .await?;

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
        Ok(())
    }

    /// Runs a special-plan ALTER directly, under brief query buffering.
    async fn execute_special_alter_direct_ddl_action_migration(
        &self,
        migration: &Migration,
        sql: &str,
    ) -> SchemaShiftResult<()> {
        let force_cut_over_after = migration.strategy.force_cut_over_after().unwrap_or_default();
        let timeout = migration.cut_over_threshold + QR_BUFFER_EXTRA_TIMEOUT;

        self.deps
            .write_buffer
            .toggle_buffering(&migration.mysql_table, timeout, true);
        let _ = self
            .store
            .update_migration_stage(&migration.uuid, "graceful wait for buffering")
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let result = async {
            if force_cut_over_after > std::time::Duration::ZERO {
                // With an INSTANT or quick partition operation there is no
                // repeated cut-over to bound; a nonzero window is taken as
                // a request to clear out interfering connections and
                // transactions up front.
                self.check_on_prepared_pool(
                    &migration.mysql_table,
                    std::time::Duration::from_millis(100),
                )
                .await
                .map_err(|e| e.wrap("checking prepared pool for table"))?;
                self.kill_table_lock_holders_and_accessors(
                    &migration.uuid,
                    &migration.mysql_table,
                    &[],
                )
                .await
                .map_err(|e| e.wrap("failed killing table lock holders and accessors"))?;
            }
            self.execute_directly(migration, sql, &[]).await?;
            Ok(())
        }
        .await;

        self.deps
            .write_buffer
            .toggle_buffering(&migration.mysql_table, timeout, false);
        result
    }

    /// Sees if the ALTER can run via a special execution path that skips
    /// the row-copy machinery entirely. Returns whether it did.
    pub(crate) async fn execute_special_alter_ddl_action_migration_if_applicable(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<bool> {
        let plan = match self.analyze_special_alter_plan(migration).await? {
            Some(plan) => plan,
            None => return Ok(false),
        };

        match plan.operation {
            SpecialOperation::InstantDdl | SpecialOperation::RangePartition => {
                self.execute_special_alter_direct_ddl_action_migration(migration, &plan.alter_sql)
                    .await?;
            }
        }
        self.store
            .update_migration_special_plan(&migration.uuid, &plan.operation.to_string())
            .await?;
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
        Ok(true)
    }

    /// Evaluates whether the migration's ALTER admits a special plan on
    /// this server, right now.
    pub(crate) async fn analyze_special_alter_plan(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<Option<schemashift_sql::analysis::SpecialAlterPlan>> {
        let ddl = match self.parse_migration_ddl(migration)? {
            DdlStatement::Parsed(parsed) => parsed,
            DdlStatement::Revert { .. } => return Ok(None),
        };
        if ddl.is_view() {
            return Ok(None);
        }
        let version = self.store.server_version().await?;
        let caps = ServerCapabilities::from_version(&version);
        let show_create = self
            .store
            .show_create_table(&migration.mysql_table)
            .await
            .unwrap_or_default();
        let table_is_range_partitioned = show_create.to_ascii_uppercase().contains("PARTITION BY RANGE");
        Ok(analyze_special_alter_plan(&ddl, &caps, table_is_range_partitioned))
    }

    /// ALTER handler.
    pub(crate) async fn execute_alter_ddl_action_migration(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let ddl = match self.parsed_ddl(migration) {
            Ok(ddl) => ddl,
            Err(e) => {
                self.fail_migration(&migration.uuid, &e.to_string()).await;
                return Err(e);
            }
        };

        if ddl.is_view() {
            let result = async {
                if !self.store.table_exists(&migration.mysql_table).await? {
                    // ALTER VIEW on a missing view: run the statement
                    // directly so MySQL returns the authentic error
                    self.execute_directly(migration, &migration.migration_statement, &[])
                        .await?;
                    return Ok(());
                }
                self.execute_alter_view_online(migration).await
            }
            .await;
            if let Err(e) = &result {
                self.fail_migration(&migration.uuid, &e.to_string()).await;
            }
            return result;
        }

        // A real TABLE. Some ALTERs can be optimized without a full online
        // schema change process.
        match self
            .execute_special_alter_ddl_action_migration_if_applicable(migration)
            .await
        {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                self.fail_migration(&migration.uuid, &e.to_string()).await;
                return Err(e);
            }
        }

        let result = if migration.strategy.strategy.is_workflow() {
            self.execute_with_vreplication(migration, None).await
        } else if migration.strategy.strategy == schemashift_sql::DdlStrategy::MySql {
            self.execute_directly(migration, &migration.migration_statement, &[])
                .await
                .map(|_| ())
        } else {
            Err(classified_err!(
                Code::Unimplemented,
                "unsupported strategy: {}",
                migration.strategy.strategy
            ))
        };
        if let Err(e) = &result {
            self.fail_migration(&migration.uuid, &e.to_string()).await;
        }
        result.map(|_| ())
    }

    /// REVERT handler.
    pub(crate) async fn execute_revert(&self, migration: &Migration) -> SchemaShiftResult<()> {
        let revert_uuid = match self.parse_migration_ddl(migration)? {
            DdlStatement::Revert { uuid } => uuid,
            DdlStatement::Parsed(_) => {
                return Err(classified_err!(
                    Code::Internal,
                    "cannot run a revert migration {}: not a REVERT statement",
                    migration.uuid
                ))
            }
        };

        let revert_migration = self.store.read_migration(&revert_uuid).await?;
        self.validate_migration_revertible(&revert_migration, &migration.uuid)
            .await?;

        let reverted_action = revert_migration.action().ok_or_else(|| {
            classified_err!(
                Code::Internal,
                "cannot run migration {} reverting {}: unexpected action {}",
                migration.uuid,
                revert_migration.uuid,
                revert_migration.ddl_action
            )
        })?;

        let artifact_tables = revert_migration.artifact_tables();
        match reverted_action {
            DdlAction::Create => {
                // Reverting a CREATE means dropping — by renaming away. A
                // CREATE TABLE IF NOT EXISTS that found the table already
                // present left no artifact, and the revert is a noop.
                if artifact_tables.len() > 1 {
                    return Err(classified_err!(
                        Code::FailedPrecondition,
                        "cannot run migration {} reverting {}: found {} artifact tables, expected maximum 1",
                        migration.uuid,
                        revert_migration.uuid,
                        artifact_tables.len()
                    ));
                }
                if artifact_tables.is_empty() {
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
                }
                for artifact_table in &artifact_tables {
                    self.store
                        .update_artifacts(&migration.uuid, &[artifact_table])
                        .await?;
                    let rename = queries::RENAME_TABLE
                        .replace("{from}", &revert_migration.mysql_table)
                        .replace("{to}", artifact_table);
                    self.execute_directly(migration, &rename, &[]).await?;
                }
            }
            DdlAction::Drop => {
                // The table was never really dropped, only renamed away;
                // rename it back.
                if artifact_tables.len() > 1 {
                    return Err(classified_err!(
                        Code::FailedPrecondition,
                        "cannot run migration {} reverting {}: found {} artifact tables, expected maximum 1",
                        migration.uuid,
                        revert_migration.uuid,
                        artifact_tables.len()
                    ));
                }
                if artifact_tables.is_empty() {
                    // DROP TABLE IF EXISTS on a missing table
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
                }
                for artifact_table in &artifact_tables {
                    self.store
                        .update_artifacts(&migration.uuid, &[artifact_table])
                        .await?;
                    let rename = queries::RENAME_TABLE
                        .replace("{from}", artifact_table)
                        .replace("{to}", &revert_migration.mysql_table);
                    self.execute_directly(migration, &rename, &[]).await?;
                }
            }
            DdlAction::Alter => {
                if revert_migration.is_view {
                    if artifact_tables.len() != 1 {
                        return Err(classified_err!(
                            Code::FailedPrecondition,
                            "cannot run migration {} reverting {}: found {} artifact tables, expected 1",
                            migration.uuid,
                            revert_migration.uuid,
                            artifact_tables.len()
                        ));
                    }
                    let artifact_table = &artifact_tables[0];
                    self.store
                        .update_artifacts(&migration.uuid, &[artifact_table])
                        .await?;
                    let (swap_query, _) = generate_swap_tables_statement(
                        &revert_migration.mysql_table,
                        artifact_table,
                        self.new_gc_table_retain_time(),
                    );
                    self.execute_directly(migration, &swap_query, &[]).await?;
                    return Ok(());
                }
                // a real table: replay the prior workflow backwards
                self.execute_with_vreplication(migration, Some(&revert_migration))
                    .await?;
            }
            DdlAction::Revert => {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "cannot run migration {} reverting {}: unexpected action revert",
                    migration.uuid,
                    revert_migration.uuid
                ));
            }
        }
        Ok(())
    }

    async fn validate_migration_revertible(
        &self,
        revert_migration: &Migration,
        reverting_migration_uuid: &str,
    ) -> SchemaShiftResult<()> {
        match revert_migration.action() {
            Some(DdlAction::Alter) => {
                if !revert_migration.strategy.strategy.is_workflow() {
                    return Err(classified_err!(
                        Code::FailedPrecondition,
                        "can only revert a workflow-strategy migration. Migration {} has {} strategy",
                        revert_migration.uuid,
                        revert_migration.strategy.strategy
                    ));
                }
            }
            Some(DdlAction::Create) | Some(DdlAction::Drop) | Some(DdlAction::Revert) => {}
            None => {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "cannot revert migration {}: unexpected action {}",
                    revert_migration.uuid,
                    revert_migration.ddl_action
                ))
            }
        }
        if revert_migration.status != MigrationStatus::Complete {
            return Err(classified_err!(
                Code::FailedPrecondition,
                "can only revert a migration in a 'complete' state. Migration {} is in '{}' state",
                revert_migration.uuid,
                revert_migration.status
            ));
        }
        // no pending migration on this table by another UUID
        for pending in self.store.pending_migrations().await? {
            if pending.uuid == reverting_migration_uuid {
                continue;
            }
            if pending.keyspace == self.keyspace
                && pending.mysql_table == revert_migration.mysql_table
            {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "can not revert migration {} on table {} because migration {} is in {} status. May only revert if all migrations on this table are completed or failed",
                    revert_migration.uuid,
                    revert_migration.mysql_table,
                    pending.uuid,
                    pending.status
                ));
            }
        }
        // only the last successful migration on the table may be reverted
        if let Some(last_complete_uuid) = self
            .store
            .last_complete_migration_on_table(&self.keyspace, &revert_migration.mysql_table)
            .await?
        {
            if last_complete_uuid != revert_migration.uuid {
                return Err(classified_err!(
                    Code::FailedPrecondition,
                    "can not revert migration {} on table {} because it is not the last migration to complete on that table. The last migration to complete was {}",
                    revert_migration.uuid,
                    revert_migration.mysql_table,
                    last_complete_uuid
                ));
            }
        }
        Ok(())
    }

    async fn validate_table_for_alter_action(
        &self,
        migration: &Migration,
    ) -> SchemaShiftResult<()> {
        let participates = self
            .store
            .table_participates_in_foreign_key(&migration.mysql_schema, &migration.mysql_table)
            .await
            .map_err(|e| {
                e.wrap(&format!(
                    "error while attempting to validate whether table {} participates in FOREIGN KEY constraint",
                    migration.mysql_table
                ))
            })?;
        if !participates {
            return Ok(());
        }
        if !migration.strategy.is_allow_foreign_keys() {
            return Err(classified_err!(
                Code::InvalidArgument,
                "table {} participates in a FOREIGN KEY constraint and FOREIGN KEY constraints are not supported in Online DDL unless the *experimental and unsafe* --unsafe-allow-foreign-keys strategy flag is specified",
                migration.mysql_table
            ));
        }
        if !self.store.is_preserve_foreign_key_supported().await? {
            return Err(classified_err!(
                Code::InvalidArgument,
                "table {} participates in a FOREIGN KEY constraint and underlying database server does not support `rename_table_preserve_foreign_key`",
                migration.mysql_table
            ));
        }
        Ok(())
    }

    /// Sets up the grounds for a workflow-driven migration: shadow table,
    /// analysis, workflow registration, stream start.
    pub(crate) async fn execute_with_vreplication(
        &self,
        migration: &Migration,
        revert_from: Option<&Migration>,
    ) -> SchemaShiftResult<()> {
        // make sure there's no workflow running under the same name
        let _ = self.terminate_vrepl_migration(&migration.uuid, true).await;

        if !self.tablet_is_primary() {
            return Err(SchemaShiftError::NotWritableTablet);
        }

        let mut conn = self.dba_conn().await?;

        self.owned_running_migrations.insert(
            migration.uuid.clone(),
            std::sync::Arc::new(OwnedMigration::new(migration.clone())),
        );
        self.on_migration_status(
            &migration.uuid,
            MigrationStatus::Running,
            PROGRESS_PCT_STARTED,
            ETA_SECONDS_UNKNOWN,
            ROWS_COPIED_UNKNOWN,
            EMPTY_HINT,
        )
        .await?;

        let (source_table, shadow_table, start_pos) = match revert_from {
            None => {
                let shadow_table = self
                    .init_vreplication_original_migration(migration, &mut conn)
                    .await?;
                (migration.mysql_table.clone(), shadow_table, String::new())
            }
            Some(revert_migration) => {
                let (shadow_table, pos) = self
                    .init_vreplication_revert_migration(migration, revert_migration)
                    .await?;
                (revert_migration.mysql_table.clone(), shadow_table, pos)
            }
        };

        // schema analysis over both sides of the stream
        let table_rows = self
            .store
            .read_table_rows_estimate(&migration.mysql_schema, &source_table)
            .await?;
        self.store
            .update_migration_table_rows(&migration.uuid, table_rows)
            .await?;
        let source_columns = self
            .store
            .read_table_columns(&migration.mysql_schema, &source_table)
            .await?;
        let target_columns = self
            .store
            .read_table_columns(&migration.mysql_schema, &shadow_table)
            .await?;
        let source_unique_keys = self
            .store
            .read_table_unique_keys(&migration.mysql_schema, &source_table)
            .await?;
        let target_unique_keys = self
            .store
            .read_table_unique_keys(&migration.mysql_schema, &shadow_table)
            .await?;
        let delta = analyze_table_delta(
            &source_columns,
            &target_columns,
            &source_unique_keys,
            &target_unique_keys,
        );
        self.store
            .update_schema_analysis(
                &migration.uuid,
                delta.added_unique_keys.len() as i64,
                delta.removed_unique_keys.len() as i64,
                &delta
                    .removed_unique_keys
                    .iter()
                    .map(|k| k.name.as_str())
                    .join(","),
                "",
                &delta.dropped_no_default_columns.join(","),
                &delta.expanded_columns.join(","),
                &delta.revertible_notes.join("\n"),
            )
            .await?;

        if revert_from.is_none() {
            self.validate_table_for_alter_action(migration).await?;
            self.propagate_auto_increment(migration, &source_table, &shadow_table, &mut conn)
                .await?;
        }

        // reload schema before the stream starts
        self.reload_schema().await?;

        // register the workflow, then start the stream
        let insert_query = vrepl::generate_insert_statement(
            &self.db_name,
            &migration.uuid,
            &source_table,
            &shadow_table,
            &start_pos,
        );
        self.vreplication_exec(&insert_query).await?;
        self.start_vreplication(&migration.uuid).await?;

        info!(uuid = %migration.uuid, %shadow_table, "vreplication migration started");
        Ok(())
    }

    /// Builds the shadow table for an original (non-revert) ALTER: clone
    /// the source structure, then apply the ALTER to the clone.
    async fn init_vreplication_original_migration(
        &self,
        migration: &Migration,
        conn: &mut mysql_async::Conn,
    ) -> SchemaShiftResult<String> {
        let original_sql_mode = self.init_migration_sql_mode(migration, conn).await?;

        let result = async {
            let shadow_table = generate_internal_table_name(
                INTERNAL_TABLE_VREPLICATION_HINT,
                &migration.uuid,
                chrono::Utc::now(),
            );
            self.store
                .update_artifacts(&migration.uuid, &[&shadow_table])
                .await?;

            let show_create = self.store.show_create_table(&migration.mysql_table).await?;
            if show_create.is_empty() {
                return Err(classified_err!(
                    Code::NotFound,
                    "cannot find table {}",
                    migration.mysql_table
                ));
            }
            let (shadow_create, constraint_map) = duplicate_create_table(
                &show_create,
                &migration.uuid,
                &shadow_table,
                migration.strategy.is_allow_foreign_keys(),
            )?;
            conn.query_drop(shadow_create.to_sql()).await?;

            // the ALTER applies to the shadow table
            let mut alter = self.parsed_ddl(migration)?;
            alter.set_table(&shadow_table);
            edit_alter_table_constraints(
                &mut alter,
                &migration.mysql_table,
                &migration.uuid,
                &constraint_map,
            )?;
            conn.query_drop(alter.to_sql()).await?;

            Ok(shadow_table)
        }
        .await;

        self.restore_sql_mode(conn, original_sql_mode).await;
        result
    }

    /// A revert replays the prior workflow from its stored position; the
    /// "shadow" is the pre-alter table left behind by the cut-over swap.
    async fn init_vreplication_revert_migration(
        &self,
        migration: &Migration,
        revert_migration: &Migration,
    ) -> SchemaShiftResult<(String, String)> {
        let revert_stream = self
            .store
            .read_vrepl_stream(&self.db_name, &revert_migration.uuid, true)
            .await?
            .ok_or_else(|| {
                classified_err!(
                    Code::FailedPrecondition,
                    "can not revert vreplication migration {} because vreplication stream {} was not found",
                    revert_migration.uuid,
                    revert_migration.uuid
                )
            })?;

        self.store
            .update_mysql_table(&migration.uuid, &revert_migration.mysql_table)
            .await?;
        let shadow_table = revert_stream.target_table()?;
        self.store
            .update_artifacts(&migration.uuid, &[&shadow_table])
            .await?;
        Ok((shadow_table, revert_stream.pos))
    }

    /// If the source carries an AUTO_INCREMENT value the user didn't
    /// change, propagate it onto the shadow.
    async fn propagate_auto_increment(
        &self,
        migration: &Migration,
        source_table: &str,
        shadow_table: &str,
        conn: &mut mysql_async::Conn,
    ) -> SchemaShiftResult<()> {
        if is_auto_increment_change_requested(&migration.migration_statement) {
            return Ok(());
        }
        let auto_increment = match self
            .store
            .read_table_auto_increment(&migration.mysql_schema, source_table)
            .await?
        {
            Some(value) if value > 0 => value,
            _ => return Ok(()),
        };
        let original_sql_mode = self.init_migration_sql_mode(migration, conn).await?;
        let alter = queries::ALTER_TABLE_AUTO_INCREMENT
            .replace("{table}", shadow_table)
            .replace("{value}", &auto_increment.to_string());
        let result = conn.query_drop(&alter).await;
        self.restore_sql_mode(conn, original_sql_mode).await;
        result.map_err(SchemaShiftError::from)
    }
}
