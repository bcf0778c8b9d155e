//! Replication workflow records and statements.
//!
//! A shadow-table migration is driven by a long-running row-copy +
//! binlog-follow stream, registered in the `vreplication` table and
//! identified by a workflow name (the migration UUID) and an integer
//! stream id. The replication runtime itself is out of scope; this module
//! knows how to read the registry row, how to compose the registry
//! statements, and how to interpret stream health.

use std::time::Duration;

use mysql_async::Row;

use crate::error::{Code, SchemaShiftError, SchemaShiftResult};

/// Marker string distinguishing unrecoverable stream errors in
/// `vreplication_log`.
pub const TERMINAL_ERROR_INDICATOR: &str = "terminal error";

/// Numeric workflow type tag for online DDL streams in the registry.
pub const ONLINE_DDL_WORKFLOW_TYPE: i32 = 5;

/// State of a replication stream, as stored in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VReplState {
    Init,
    Copying,
    Running,
    Stopped,
    Error,
}

impl VReplState {
    fn parse(state: &str) -> Self {
        match state {
            "Init" => VReplState::Init,
            "Copying" => VReplState::Copying,
            "Running" => VReplState::Running,
            "Stopped" => VReplState::Stopped,
            _ => VReplState::Error,
        }
    }
}

/// A row of the `vreplication` registry for one workflow.
#[derive(Clone, Debug)]
pub struct VReplStream {
    pub id: i32,
    pub workflow: String,
    pub source: String,
    pub pos: String,
    pub time_updated: i64,
    pub time_heartbeat: i64,
    pub time_throttled: i64,
    pub component_throttled: String,
    pub reason_throttled: String,
    pub transaction_timestamp: i64,
    pub state: VReplState,
    pub message: String,
    pub rows_copied: i64,
}

impl VReplStream {
    pub fn from_row(row: &mut Row) -> Self {
        let take_string = |row: &mut Row, column: &str| -> String {
            row.take::<Option<String>, _>(column).flatten().unwrap_or_default()
        };
        let take_i64 = |row: &mut Row, column: &str| -> i64 {
            row.take::<Option<i64>, _>(column).flatten().unwrap_or(0)
        };
        let state = take_string(row, "state");
        VReplStream {
            id: take_i64(row, "id") as i32,
            workflow: take_string(row, "workflow"),
            source: take_string(row, "source"),
            pos: take_string(row, "pos"),
            time_updated: take_i64(row, "time_updated"),
            time_heartbeat: take_i64(row, "time_heartbeat"),
            time_throttled: take_i64(row, "time_throttled"),
            component_throttled: take_string(row, "component_throttled"),
            reason_throttled: take_string(row, "reason_throttled"),
            transaction_timestamp: take_i64(row, "transaction_timestamp"),
            state: VReplState::parse(&state),
            message: take_string(row, "message"),
            rows_copied: take_i64(row, "rows_copied"),
        }
    }

    /// How far behind the binlog this stream is, measured at `now_unix`.
    /// Both the update time and the last applied transaction timestamp must
    /// be fresh for the stream to count as caught up.
    pub fn lag(&self, now_unix: i64) -> Duration {
        let behind = |t: i64| (now_unix - t).max(0) as u64;
        Duration::from_secs(behind(self.time_updated).max(behind(self.transaction_timestamp)))
    }

    /// A monotonically increasing indicator of stream liveness, suitable
    /// for persisting on the migration row.
    pub fn liveness_time_indicator(&self) -> i64 {
        self.time_updated.max(self.transaction_timestamp)
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            VReplState::Init | VReplState::Copying | VReplState::Running
        )
    }

    /// Inspects the stream for an error condition. Returns whether the
    /// error is terminal (no retry will help) and the error message, if
    /// any.
    pub fn has_error(&self) -> (bool, Option<&str>) {
        let lowered = self.message.to_ascii_lowercase();
        if lowered.contains(TERMINAL_ERROR_INDICATOR) {
            return (true, Some(&self.message));
        }
        if self.state == VReplState::Error {
            return (false, Some(&self.message));
        }
        if lowered.contains("error") {
            return (false, Some(&self.message));
        }
        (false, None)
    }

    /// The shadow table this stream populates, parsed from the stream's
    /// source description.
    pub fn target_table(&self) -> SchemaShiftResult<String> {
        parse_target_table(&self.source).ok_or_else(|| {
            SchemaShiftError::new(
                Code::Internal,
                format!(
                    "no target table in vreplication source for workflow {}",
                    self.workflow
                ),
            )
        })
    }
}

fn parse_target_table(source: &str) -> Option<String> {
    let start = source.find("match:\"")? + "match:\"".len();
    let end = source[start..].find('"')? + start;
    let table = &source[start..end];
    (!table.is_empty()).then(|| table.to_string())
}

/// Escapes and quotes a string literal for direct embedding in a registry
/// statement (those run through the tablet manager, which accepts no bind
/// parameters).
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// The source description stored on the registry row: which table is read
/// and which table is written.
pub fn generate_source(source_table: &str, target_table: &str) -> String {
    format!("filter:{{rules:{{match:\"{target_table}\" filter:\"select * from `{source_table}`\"}}}}")
}

/// The INSERT registering a new workflow. `pos` is empty for a fresh
/// migration and carries the prior workflow's stored position for a
/// revert.
pub fn generate_insert_statement(
    db_name: &str,
    workflow: &str,
    source_table: &str,
    target_table: &str,
    pos: &str,
) -> String {
    format!(
        "INSERT INTO _vt.vreplication \
         (workflow, db_name, source, pos, max_tps, max_replication_lag, time_updated, \
          transaction_timestamp, state, workflow_type) \
         VALUES ({}, {}, {}, {}, 9223372036854775807, 9223372036854775807, UNIX_TIMESTAMP(), 0, 'Init', {})",
        sql_quote(workflow),
        sql_quote(db_name),
        sql_quote(&generate_source(source_table, target_table)),
        sql_quote(pos),
        ONLINE_DDL_WORKFLOW_TYPE,
    )
}

/// The UPDATE starting (or restarting) a registered workflow.
pub fn generate_start_statement(db_name: &str, workflow: &str) -> String {
    format!(
        "UPDATE _vt.vreplication SET state = 'Running', stop_pos = NULL, message = '' \
         WHERE db_name = {} AND workflow = {}",
        sql_quote(db_name),
        sql_quote(workflow),
    )
}

/// The UPDATE stopping a workflow with a reason.
pub fn generate_stop_statement(db_name: &str, workflow: &str, message: &str) -> String {
    format!(
        "UPDATE _vt.vreplication SET state = 'Stopped', message = {} \
         WHERE db_name = {} AND workflow = {}",
        sql_quote(message),
        sql_quote(db_name),
        sql_quote(workflow),
    )
}

/// The DELETE removing a workflow registry row.
pub fn generate_delete_statement(db_name: &str, workflow: &str) -> String {
    format!(
        "DELETE FROM _vt.vreplication WHERE db_name = {} AND workflow = {}",
        sql_quote(db_name),
        sql_quote(workflow),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(state: VReplState, message: &str) -> VReplStream {
        VReplStream {
            id: 1,
            workflow: "2201058f_f266_41ea_bab4_0242c0a8b005".to_string(),
            source: generate_source("customers", "_vt_vrp_x_"),
            pos: "source-bin.000001:1234".to_string(),
            time_updated: 1000,
            time_heartbeat: 1000,
            time_throttled: 0,
            component_throttled: String::new(),
            reason_throttled: String::new(),
            transaction_timestamp: 990,
            state,
            message: message.to_string(),
            rows_copied: 42,
        }
    }

    #[test]
    fn lag_takes_the_worse_of_update_and_transaction() {
        let s = stream(VReplState::Running, "");
        assert_eq!(s.lag(1000), Duration::from_secs(10));
        assert_eq!(s.lag(990), Duration::from_secs(0));
        assert_eq!(s.liveness_time_indicator(), 1000);
    }

    #[test]
    fn running_states() {
        assert!(stream(VReplState::Init, "").is_running());
        assert!(stream(VReplState::Copying, "").is_running());
        assert!(stream(VReplState::Running, "").is_running());
        assert!(!stream(VReplState::Stopped, "").is_running());
        assert!(!stream(VReplState::Error, "x").is_running());
    }

    #[test]
    fn error_classification() {
        assert_eq!(stream(VReplState::Running, "").has_error(), (false, None));

        let s1 = stream(VReplState::Error, "duplicate entry");
        let (terminal, message) = s1.has_error();
        assert!(!terminal);
        assert_eq!(message, Some("duplicate entry"));

        let s2 = stream(VReplState::Error, "vreplication: terminal error: unrecoverable");
        let (terminal, _) = s2.has_error();
        assert!(terminal);

        let s3 = stream(VReplState::Running, "transient error: lock wait");
        let (terminal, message) = s3.has_error();
        assert!(!terminal);
        assert!(message.is_some());
    }

    #[test]
    fn target_table_round_trips_through_source() {
        let s = stream(VReplState::Running, "");
        assert_eq!(s.target_table().unwrap(), "_vt_vrp_x_");

        let mut broken = s;
        broken.source = "garbage".to_string();
        assert!(broken.target_table().is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(sql_quote("plain"), "'plain'");
        assert_eq!(sql_quote("o'brien"), "'o''brien'");
    }

    #[test]
    fn statement_generation() {
        let insert =
            generate_insert_statement("db", "wf", "customers", "_vt_vrp_x_", "");
        assert!(insert.contains("INSERT INTO _vt.vreplication"));
        assert!(insert.contains("'Init'"));
        assert!(insert.contains("select * from `customers`"));

        assert!(generate_start_statement("db", "wf").contains("state = 'Running'"));
        let stop = generate_stop_statement("db", "wf", "stopped for online DDL cutover");
        assert!(stop.contains("state = 'Stopped'"));
        assert!(stop.contains("stopped for online DDL cutover"));
        assert!(generate_delete_statement("db", "wf").starts_with("DELETE FROM _vt.vreplication"));
    }
}
