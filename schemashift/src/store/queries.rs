//! SQL templates for the metadata store.
//!
//! Templates use `mysql_async` named parameters (`:name`). Sidecar table
//! qualifiers are written as `_vt.` and rewritten at execution time when a
//! custom sidecar database name is configured.

pub const MIGRATION_COLUMNS: &str = "\
    migration_uuid, keyspace, shard, mysql_schema, mysql_table, migration_statement, \
    strategy, options, ddl_action, migration_context, migration_status, tablet, \
    retries, ready_to_complete, was_ready_to_complete, cutover_threshold_seconds, \
    is_view, is_immediate_operation, postpone_launch, postpone_completion, artifacts, \
    (shadow_analyzed_timestamp IS NOT NULL) AS shadow_analyzed";

pub const INSERT_MIGRATION: &str = "\
    INSERT INTO _vt.schema_migrations (\
        migration_uuid, keyspace, shard, mysql_schema, mysql_table, migration_statement, \
        strategy, options, ddl_action, migration_context, migration_status, tablet, \
        retain_artifacts_seconds, cutover_threshold_seconds, postpone_launch, \
        postpone_completion, allow_concurrent, reverted_uuid, is_view, requested_timestamp\
    ) VALUES (\
        :migration_uuid, :keyspace, :shard, :mysql_schema, :mysql_table, :migration_statement, \
        :strategy, :options, :ddl_action, :migration_context, :migration_status, :tablet, \
        :retain_artifacts_seconds, :cutover_threshold_seconds, :postpone_launch, \
        :postpone_completion, :allow_concurrent, :reverted_uuid, :is_view, NOW()\
    )";

pub const SELECT_MIGRATION: &str = "\
    SELECT {columns} FROM _vt.schema_migrations WHERE migration_uuid = :migration_uuid";

pub const SELECT_PENDING_MIGRATIONS: &str = "\
    SELECT migration_uuid, keyspace, mysql_table, migration_context, migration_status \
    FROM _vt.schema_migrations \
    WHERE migration_status IN ('queued', 'ready', 'running') \
    ORDER BY id";

pub const SELECT_QUEUED_UNREVIEWED_MIGRATIONS: &str = "\
    SELECT migration_uuid FROM _vt.schema_migrations \
    WHERE migration_status = 'queued' AND reviewed_timestamp IS NULL \
    ORDER BY id";

pub const SELECT_QUEUED_MIGRATIONS: &str = "\
    SELECT migration_uuid, postpone_launch, postpone_completion, ready_to_complete, \
        is_immediate_operation \
    FROM _vt.schema_migrations \
    WHERE migration_status = 'queued' AND reviewed_timestamp IS NOT NULL \
    ORDER BY id";

pub const SELECT_READY_MIGRATIONS: &str = "\
    SELECT migration_uuid FROM _vt.schema_migrations \
    WHERE migration_status = 'ready' \
    ORDER BY id";

pub const SELECT_RUNNING_MIGRATIONS: &str = "\
    SELECT migration_uuid, postpone_completion, force_cutover, cutover_attempts, \
        vitess_liveness_indicator, \
        IFNULL(TIMESTAMPDIFF(SECOND, last_cutover_attempt_timestamp, NOW()), 0) \
            AS seconds_since_last_cutover_attempt, \
        IFNULL(TIMESTAMPDIFF(MICROSECOND, ready_to_complete_timestamp, NOW()), 0) \
            AS microseconds_since_ready_to_complete, \
        IFNULL(TIMESTAMPDIFF(SECOND, started_timestamp, NOW()), 0) AS elapsed_seconds \
    FROM _vt.schema_migrations \
    WHERE migration_status = 'running' \
    ORDER BY id";

pub const SELECT_STALE_MIGRATIONS: &str = "\
    SELECT migration_uuid, \
        TIMESTAMPDIFF(MINUTE, liveness_timestamp, NOW()) AS stale_minutes, \
        DATE_FORMAT(liveness_timestamp, '%Y-%m-%d %H:%i:%s') AS liveness \
    FROM _vt.schema_migrations \
    WHERE migration_status = 'running' \
        AND liveness_timestamp < NOW() - INTERVAL :stale_minutes MINUTE";

pub const SELECT_COMPLETE_MIGRATIONS_ON_TABLE: &str = "\
    SELECT migration_uuid FROM _vt.schema_migrations \
    WHERE migration_status = 'complete' \
        AND keyspace = :keyspace AND mysql_table = :mysql_table \
    ORDER BY completed_timestamp DESC \
    LIMIT 1";

pub const SELECT_COMPLETE_MIGRATIONS_BY_CONTEXT_AND_SQL: &str = "\
    SELECT migration_uuid FROM _vt.schema_migrations \
    WHERE migration_status = 'complete' \
        AND keyspace = :keyspace \
        AND migration_context = :migration_context \
        AND migration_statement = :migration_statement";

pub const SELECT_FAILED_CANCELLED_MIGRATIONS_IN_CONTEXT_BEFORE: &str = "\
    SELECT migration_uuid FROM _vt.schema_migrations \
    WHERE migration_context = :migration_context \
        AND migration_status IN ('failed', 'cancelled') \
        AND id < (SELECT id FROM _vt.schema_migrations WHERE migration_uuid = :migration_uuid) \
    ORDER BY id";

pub const SELECT_UNCOLLECTED_ARTIFACTS: &str = "\
    SELECT migration_uuid, artifacts, log_path FROM _vt.schema_migrations \
    WHERE migration_status IN ('complete', 'failed', 'cancelled') \
        AND cleanup_timestamp IS NULL \
        AND completed_timestamp <= IF(retain_artifacts_seconds = 0, \
            NOW() - INTERVAL :retain_seconds SECOND, \
            NOW() - INTERVAL retain_artifacts_seconds SECOND)";

pub const FIX_COMPLETED_TIMESTAMP: &str = "\
    UPDATE _vt.schema_migrations SET completed_timestamp = NOW() \
    WHERE migration_status IN ('failed', 'cancelled') AND completed_timestamp IS NULL";

pub const SELECT_MIGRATION_LOG_FILE: &str = "\
    SELECT log_file FROM _vt.schema_migrations WHERE migration_uuid = :migration_uuid";

pub const SHOW_MIGRATIONS_WHERE: &str = "\
    SELECT * FROM _vt.schema_migrations {where_expr} ORDER BY id";

// -- single-row updates ------------------------------------------------------

pub const UPDATE_MIGRATION_STATUS: &str = "\
    UPDATE _vt.schema_migrations SET migration_status = :migration_status \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_STATUS_FAILED_OR_CANCELLED: &str = "\
    UPDATE _vt.schema_migrations \
    SET migration_status = IF(cancelled_timestamp IS NULL, 'failed', 'cancelled') \
    WHERE migration_uuid = :migration_uuid";

/// `{column}` is substituted with a timestamp column name known at compile
/// time; never with user input.
pub const UPDATE_MIGRATION_TIMESTAMP: &str = "\
    UPDATE _vt.schema_migrations SET {column} = NOW() WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_STARTED_TIMESTAMP: &str = "\
    UPDATE _vt.schema_migrations SET started_timestamp = IFNULL(started_timestamp, NOW()) \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_ARTIFACTS: &str = "\
    UPDATE _vt.schema_migrations SET artifacts = CONCAT(:artifacts, ',', artifacts) \
    WHERE migration_uuid = :migration_uuid";

pub const CLEAR_ARTIFACTS: &str = "\
    UPDATE _vt.schema_migrations SET artifacts = '' WHERE migration_uuid = :migration_uuid";

pub const CLEAR_SINGLE_ARTIFACT: &str = "\
    UPDATE _vt.schema_migrations \
    SET artifacts = REPLACE(artifacts, CONCAT(:artifact, ','), '') \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MYSQL_TABLE: &str = "\
    UPDATE _vt.schema_migrations SET mysql_table = :mysql_table \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_DDL_ACTION: &str = "\
    UPDATE _vt.schema_migrations SET ddl_action = :ddl_action \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_IS_VIEW: &str = "\
    UPDATE _vt.schema_migrations SET is_view = :is_view WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_SET_IMMEDIATE_OPERATION: &str = "\
    UPDATE _vt.schema_migrations SET is_immediate_operation = 1 \
    WHERE migration_uuid = :migration_uuid";

pub const SET_MIGRATION_READY_TO_COMPLETE: &str = "\
    UPDATE _vt.schema_migrations \
    SET ready_to_complete = 1, \
        was_ready_to_complete = 1, \
        ready_to_complete_timestamp = IFNULL(ready_to_complete_timestamp, NOW()) \
    WHERE migration_uuid = :migration_uuid";

pub const CLEAR_MIGRATION_READY_TO_COMPLETE: &str = "\
    UPDATE _vt.schema_migrations \
    SET ready_to_complete = 0, ready_to_complete_timestamp = NULL \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_MESSAGE: &str = "\
    UPDATE _vt.schema_migrations SET message = :message WHERE migration_uuid = :migration_uuid";

pub const UPDATE_SPECIAL_PLAN: &str = "\
    UPDATE _vt.schema_migrations SET special_plan = :special_plan \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_STAGE: &str = "\
    UPDATE _vt.schema_migrations SET stage = :stage WHERE migration_uuid = :migration_uuid";

pub const INCREMENT_CUTOVER_ATTEMPTS: &str = "\
    UPDATE _vt.schema_migrations \
    SET cutover_attempts = cutover_attempts + 1, last_cutover_attempt_timestamp = NOW() \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_FORCE_CUTOVER: &str = "\
    UPDATE _vt.schema_migrations SET force_cutover = 1 WHERE migration_uuid = :migration_uuid";

pub const UPDATE_CUTOVER_THRESHOLD_SECONDS: &str = "\
    UPDATE _vt.schema_migrations SET cutover_threshold_seconds = :cutover_threshold_seconds \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_READY_FOR_CLEANUP: &str = "\
    UPDATE _vt.schema_migrations SET retain_artifacts_seconds = -1 \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_READY_FOR_CLEANUP_ALL: &str = "\
    UPDATE _vt.schema_migrations SET retain_artifacts_seconds = -1 \
    WHERE migration_status IN ('complete', 'failed', 'cancelled') \
        AND cleanup_timestamp IS NULL";

pub const CLEAR_POSTPONE_COMPLETION: &str = "\
    UPDATE _vt.schema_migrations SET postpone_completion = 0 \
    WHERE migration_uuid = :migration_uuid";

pub const SET_POSTPONE_COMPLETION: &str = "\
    UPDATE _vt.schema_migrations SET postpone_completion = 1 \
    WHERE migration_uuid = :migration_uuid AND migration_status IN ('queued', 'ready', 'running')";

pub const UPDATE_LAUNCH_MIGRATION: &str = "\
    UPDATE _vt.schema_migrations SET postpone_launch = 0 \
    WHERE migration_uuid = :migration_uuid AND migration_status = 'queued'";

pub const UPDATE_TABLET: &str = "\
    UPDATE _vt.schema_migrations SET tablet = :tablet WHERE migration_uuid = :migration_uuid";

pub const UPDATE_TABLET_FAILURE: &str = "\
    UPDATE _vt.schema_migrations SET tablet_failed = 1 WHERE migration_uuid = :migration_uuid";

pub const RETRY_MIGRATION: &str = "\
    UPDATE _vt.schema_migrations \
    SET migration_status = 'queued', tablet = :tablet, retries = retries + 1, \
        tablet_failed = 0, message = '', cancelled_timestamp = NULL, \
        ready_timestamp = NULL, started_timestamp = NULL, liveness_timestamp = NULL, \
        completed_timestamp = NULL, cleanup_timestamp = NULL \
    WHERE migration_status IN ('failed', 'cancelled') AND migration_uuid = :migration_uuid";

pub const RETRY_TABLET_FAILURE_MIGRATIONS: &str = "\
    UPDATE _vt.schema_migrations \
    SET migration_status = 'queued', tablet = :tablet, retries = retries + 1, \
        tablet_failed = 0, message = '', cancelled_timestamp = NULL, \
        ready_timestamp = NULL, started_timestamp = NULL, liveness_timestamp = NULL, \
        completed_timestamp = NULL, cleanup_timestamp = NULL \
    WHERE migration_status = 'failed' AND tablet_failed = 1 \
        AND completed_timestamp > NOW() - INTERVAL 10 MINUTE";

pub const UPDATE_MIGRATION_ROWS_COPIED: &str = "\
    UPDATE _vt.schema_migrations SET rows_copied = :rows_copied \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_TABLE_ROWS: &str = "\
    UPDATE _vt.schema_migrations SET table_rows = :table_rows \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_PROGRESS: &str = "\
    UPDATE _vt.schema_migrations SET progress = :progress WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_PROGRESS_BY_ROWS_COPIED: &str = "\
    UPDATE _vt.schema_migrations \
    SET progress = CASE \
        WHEN table_rows = 0 THEN 100 \
        ELSE LEAST(100, 100 * :rows_copied / table_rows) \
    END \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_ETA_SECONDS: &str = "\
    UPDATE _vt.schema_migrations SET eta_seconds = :eta_seconds \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_ETA_SECONDS_BY_PROGRESS: &str = "\
    UPDATE _vt.schema_migrations \
    SET eta_seconds = CASE \
        WHEN progress = 0 THEN -1 \
        WHEN progress = 100 THEN 0 \
        ELSE GREATEST(0, \
            TIMESTAMPDIFF(SECOND, started_timestamp, NOW()) * (100 - progress) / progress) \
    END \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_VREPLICATION_LAG_SECONDS: &str = "\
    UPDATE _vt.schema_migrations SET vreplication_lag_seconds = :vreplication_lag_seconds \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_VITESS_LIVENESS_INDICATOR: &str = "\
    UPDATE _vt.schema_migrations SET vitess_liveness_indicator = :liveness_indicator \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_LAST_THROTTLED: &str = "\
    UPDATE _vt.schema_migrations \
    SET last_throttled_timestamp = FROM_UNIXTIME(:last_throttled), \
        component_throttled = :component_throttled, \
        reason_throttled = :reason_throttled \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_MIGRATION_USER_THROTTLE_RATIO: &str = "\
    UPDATE _vt.schema_migrations SET user_throttle_ratio = :ratio \
    WHERE migration_uuid = :migration_uuid";

pub const UPDATE_SCHEMA_ANALYSIS: &str = "\
    UPDATE _vt.schema_migrations \
    SET added_unique_keys = :added_unique_keys, \
        removed_unique_keys = :removed_unique_keys, \
        removed_unique_key_names = :removed_unique_key_names, \
        removed_foreign_key_names = :removed_foreign_key_names, \
        dropped_no_default_column_names = :dropped_no_default_column_names, \
        expanded_column_names = :expanded_column_names, \
        revertible_notes = :revertible_notes \
    WHERE migration_uuid = :migration_uuid";

// -- replication registry reads ---------------------------------------------

pub const READ_VREPL_STREAM: &str = "\
    SELECT id, workflow, source, pos, time_updated, time_heartbeat, time_throttled, \
        component_throttled, reason_throttled, transaction_timestamp, state, message, \
        rows_copied \
    FROM _vt.vreplication \
    WHERE workflow = :workflow AND db_name = :db_name";

pub const READ_VREPL_LOG_ERRORS: &str = "\
    SELECT message FROM _vt.vreplication_log \
    WHERE vrepl_id = :stream_id AND message LIKE CONCAT('%', :indicator, '%') \
    ORDER BY id DESC \
    LIMIT 1";

pub const READ_COUNT_COPY_STATE: &str = "\
    SELECT COUNT(*) AS cnt FROM _vt.copy_state WHERE vrepl_id = :stream_id";

// -- server-side inspection --------------------------------------------------

pub const SHOW_TABLES_LIKE: &str = "SHOW TABLES LIKE '{pattern}'";

pub const SHOW_CREATE_TABLE: &str = "SHOW CREATE TABLE `{table}`";

pub const SHOW_VARIABLES_LIKE_PRESERVE_FOREIGN_KEY: &str =
    "SHOW GLOBAL VARIABLES LIKE 'rename_table_preserve_foreign_key'";

pub const SELECT_PRIMARY_POSITION: &str = "SELECT @@global.gtid_executed AS pos";

pub const SELECT_COUNT_FK_PARENT_CONSTRAINTS: &str = "\
    SELECT COUNT(*) AS num_fk_constraints \
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
    WHERE REFERENCED_TABLE_SCHEMA = :table_schema AND REFERENCED_TABLE_NAME = :table_name";

pub const SELECT_COUNT_FK_CHILD_CONSTRAINTS: &str = "\
    SELECT COUNT(*) AS num_fk_constraints \
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
    WHERE TABLE_SCHEMA = :table_schema AND TABLE_NAME = :table_name \
        AND REFERENCED_TABLE_NAME IS NOT NULL";

pub const SELECT_TABLE_COLUMNS: &str = "\
    SELECT COLUMN_NAME, COLUMN_TYPE, CHARACTER_SET_NAME, \
        (IS_NULLABLE = 'YES') AS is_nullable, \
        (COLUMN_DEFAULT IS NOT NULL) AS has_default \
    FROM INFORMATION_SCHEMA.COLUMNS \
    WHERE TABLE_SCHEMA = :table_schema AND TABLE_NAME = :table_name \
    ORDER BY ORDINAL_POSITION";

pub const SELECT_TABLE_UNIQUE_KEYS: &str = "\
    SELECT INDEX_NAME, GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS columns \
    FROM INFORMATION_SCHEMA.STATISTICS \
    WHERE TABLE_SCHEMA = :table_schema AND TABLE_NAME = :table_name AND NON_UNIQUE = 0 \
    GROUP BY INDEX_NAME";

pub const SELECT_TABLE_AUTO_INCREMENT: &str = "\
    SELECT AUTO_INCREMENT FROM INFORMATION_SCHEMA.TABLES \
    WHERE TABLE_SCHEMA = :table_schema AND TABLE_NAME = :table_name";

pub const SELECT_TABLE_ROWS_ESTIMATE: &str = "\
    SELECT IFNULL(TABLE_ROWS, 0) AS table_rows FROM INFORMATION_SCHEMA.TABLES \
    WHERE TABLE_SCHEMA = :table_schema AND TABLE_NAME = :table_name";

pub const FIND_PROCESS: &str = "\
    SELECT id, info FROM INFORMATION_SCHEMA.PROCESSLIST \
    WHERE id = :process_id AND info LIKE :info_like";

pub const FIND_PROCESSES_BY_INFO: &str = "\
    SELECT id, info FROM INFORMATION_SCHEMA.PROCESSLIST WHERE info LIKE :info_like";

pub const PROCESSES_WITH_DATA_LOCKS_ON_TABLE: &str = "\
    SELECT DISTINCT trx.trx_mysql_thread_id AS process_id \
    FROM performance_schema.data_locks dl \
    JOIN INFORMATION_SCHEMA.INNODB_TRX trx ON trx.trx_id = dl.ENGINE_TRANSACTION_ID \
    WHERE dl.OBJECT_NAME = :table_name";

pub const PROCESSES_WITH_METADATA_LOCKS_ON_TABLE: &str = "\
    SELECT DISTINCT t.PROCESSLIST_ID AS process_id \
    FROM performance_schema.metadata_locks ml \
    JOIN performance_schema.threads t ON t.THREAD_ID = ml.OWNER_THREAD_ID \
    WHERE ml.OBJECT_TYPE = 'TABLE' AND ml.OBJECT_NAME = :table_name";

// -- cut-over statements (run on dedicated connections) ----------------------

pub const CREATE_SENTRY_TABLE: &str = "CREATE TABLE `{table}` (id INT PRIMARY KEY)";

pub const DROP_TABLE: &str = "DROP TABLE `{table}`";

pub const DROP_TABLE_IF_EXISTS: &str = "DROP TABLE IF EXISTS `{table}`";

pub const LOCK_TWO_TABLES_WRITE: &str = "LOCK TABLES `{table1}` WRITE, `{table2}` WRITE";

pub const UNLOCK_TABLES: &str = "UNLOCK TABLES";

pub const ANALYZE_TABLE: &str = "ANALYZE TABLE `{table}`";

pub const RENAME_TABLE: &str = "RENAME TABLE `{from}` TO `{to}`";

pub const ALTER_TABLE_AUTO_INCREMENT: &str = "ALTER TABLE `{table}` AUTO_INCREMENT = {value}";
