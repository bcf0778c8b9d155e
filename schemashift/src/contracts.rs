//! Contracts of the executor's external collaborators.
//!
//! The executor coordinates several subsystems it does not own: the tablet
//! manager (workflow operation, schema reload, routing refresh), the lag
//! throttler, the query-rule subsystem that buffers writes during cut-over,
//! and the schema-diff library used by declarative migrations. Only their
//! contracts are named here.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::error::SchemaShiftResult;

/// RPC surface of the tablet manager, bounded by the executor's gRPC
/// timeout.
#[async_trait]
pub trait TabletManagerClient: Send + Sync {
    /// Runs a statement against the replication workflow registry.
    async fn vreplication_exec(&self, tablet: &str, query: &str) -> SchemaShiftResult<u64>;

    /// Waits until the identified workflow stream has reached `pos`.
    async fn vreplication_wait_for_pos(
        &self,
        tablet: &str,
        stream_id: i32,
        pos: &str,
    ) -> SchemaShiftResult<()>;

    /// Reloads the schema on the given tablet.
    async fn reload_schema(&self, tablet: &str) -> SchemaShiftResult<()>;

    /// Refreshes query routing state on the given tablet.
    async fn refresh_state(&self, tablet: &str) -> SchemaShiftResult<()>;
}

/// An app throttled via the lag throttler.
#[derive(Clone, Debug)]
pub struct ThrottledApp {
    pub app_name: String,
    pub ratio: f64,
}

impl ThrottledApp {
    /// App names may be slash-concatenated; this checks membership.
    pub fn names(&self) -> Vec<&str> {
        self.app_name.split('/').collect()
    }
}

/// App-scoped throttle control used during row copy.
pub trait LagThrottler: Send + Sync {
    /// Errors when the throttler is not enabled and open.
    fn check_is_open(&self) -> SchemaShiftResult<()>;

    fn throttle_app(&self, app_name: &str, expires_at: SystemTime, ratio: f64);

    fn unthrottle_app(&self, app_name: &str);

    fn throttled_apps(&self) -> Vec<ThrottledApp>;
}

/// Query-rule subsystem: briefly buffers client writes to a table during
/// cut-over. Disabling also releases any queries still buffered.
pub trait WriteBuffer: Send + Sync {
    fn toggle_buffering(&self, table: &str, timeout: Duration, buffer: bool);
}

/// Schema-diff library used by declarative migrations: given the current
/// and the desired `SHOW CREATE` outputs, returns the ALTER statement that
/// transforms one into the other, or `None` when they are equivalent.
pub trait SchemaDiff: Send + Sync {
    fn diff_statements(
        &self,
        existing_create: &str,
        desired_create: &str,
        is_view: bool,
    ) -> SchemaShiftResult<Option<String>>;
}

/// Throttler app name covering all online DDL migrations at once.
pub const ONLINE_DDL_THROTTLER_APP: &str = "online-ddl";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_app_names_split() {
        let app = ThrottledApp {
            app_name: "online-ddl/2201058f_f266_41ea_bab4_0242c0a8b005".to_string(),
            ratio: 0.5,
        };
        assert!(app.names().contains(&"online-ddl"));
        assert!(app
            .names()
            .contains(&"2201058f_f266_41ea_bab4_0242c0a8b005"));
    }
}
