//! Auxiliary table naming.
//!
//! Tables owned by the executor live in two namespaces:
//!
//! * the GC namespace, `_vt_<STATE>_<uuid>_<timestamp>`, for tables awaiting
//!   background reclamation (renamed-away originals, sentry tables, swap
//!   temporaries);
//! * the internal namespace, `_vt_vrp_<uuid>_<timestamp>_`, for shadow
//!   tables being filled by a replication workflow.
//!
//! Timestamps are UTC, second resolution, formatted as 14 digits so that
//! names sort chronologically. The UUID component is the condensed form of
//! either the owning migration's UUID or a fresh one.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::uuid::{condensed_uuid, create_uuid};

lazy_static! {
    static ref GC_TABLE_NAME_RE: Regex =
        Regex::new(r"^_vt_(HOLD|PURGE|EVAC|DROP)_[0-9a-f]{32}_[0-9]{14}$").unwrap();
    static ref INTERNAL_TABLE_NAME_RE: Regex =
        Regex::new(r"^_vt_[a-z]{3}_[0-9a-f]{32}_[0-9]{14}_$").unwrap();
}

/// Lifecycle state encoded into a GC table name. The executor only ever
/// creates `HOLD` tables; the external table-GC component transitions them
/// through the remaining states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcState {
    Hold,
    Purge,
    Evac,
    Drop,
}

impl GcState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcState::Hold => "HOLD",
            GcState::Purge => "PURGE",
            GcState::Evac => "EVAC",
            GcState::Drop => "DROP",
        }
    }
}

/// Hint component of shadow table names created for replication workflows.
pub const INTERNAL_TABLE_VREPLICATION_HINT: &str = "vrp";

/// Formats a timestamp the way table names embed it: `YYYYMMDDhhmmss`, UTC.
pub fn format_table_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M%S").to_string()
}

/// Generates a GC-namespace table name for the given state, UUID and
/// timestamp. The UUID may be in underscore or condensed form.
pub fn generate_gc_table_name_with_uuid(state: GcState, uuid: &str, t: DateTime<Utc>) -> String {
    format!(
        "_vt_{}_{}_{}",
        state.as_str(),
        condensed_uuid(uuid),
        format_table_timestamp(t)
    )
}

/// Generates a GC-namespace table name with a fresh random UUID. Used for
/// sentry tables and swap temporaries, where no migration UUID applies.
pub fn generate_gc_table_name(state: GcState, t: DateTime<Utc>) -> String {
    generate_gc_table_name_with_uuid(state, &create_uuid(), t)
}

/// Generates a `RENAME TABLE` statement moving `table` into the GC
/// namespace, returning the statement and the target name.
pub fn generate_rename_statement_with_uuid(
    table: &str,
    state: GcState,
    uuid: &str,
    t: DateTime<Utc>,
) -> (String, String) {
    let to_table = generate_gc_table_name_with_uuid(state, uuid, t);
    (
        format!("RENAME TABLE `{table}` TO `{to_table}`"),
        to_table,
    )
}

/// Generates the name of a shadow table for the given migration UUID.
pub fn generate_internal_table_name(hint: &str, uuid: &str, t: DateTime<Utc>) -> String {
    format!(
        "_vt_{}_{}_{}_",
        hint,
        condensed_uuid(uuid),
        format_table_timestamp(t)
    )
}

/// Whether the given table name belongs to the GC namespace.
pub fn is_gc_table_name(name: &str) -> bool {
    GC_TABLE_NAME_RE.is_match(name)
}

/// Whether the given table name is an internal operation table (e.g. a
/// shadow table).
pub fn is_internal_operation_table_name(name: &str) -> bool {
    INTERNAL_TABLE_NAME_RE.is_match(name)
}

/// Builds the atomic three-pair `RENAME TABLE` statement used by swaps and
/// by the cut-over protocol. Pairs are applied left to right within a single
/// atomic statement.
pub fn rename_tables_statement(pairs: &[(&str, &str); 3]) -> String {
    format!(
        "RENAME TABLE `{}` TO `{}`, `{}` TO `{}`, `{}` TO `{}`",
        pairs[0].0, pairs[0].1, pairs[1].0, pairs[1].1, pairs[2].0, pairs[2].1
    )
}

/// Generates a statement swapping `table1` and `table2` via a temporary
/// third name, returning the statement and the temporary name. The
/// temporary only exists mid-statement.
pub fn generate_swap_tables_statement(
    table1: &str,
    table2: &str,
    t: DateTime<Utc>,
) -> (String, String) {
    let swap_table = generate_gc_table_name(GcState::Hold, t);
    let query = rename_tables_statement(&[
        (table1, &swap_table),
        (table2, table1),
        (&swap_table, table2),
    ]);
    (query, swap_table)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 15, 12, 4, 10).unwrap()
    }

    #[test]
    fn gc_table_name_round_trip() {
        let name = generate_gc_table_name_with_uuid(
            GcState::Hold,
            "2201058f_f266_41ea_bab4_0242c0a8b005",
            t0(),
        );
        assert_eq!(
            name,
            "_vt_HOLD_2201058ff26641eabab40242c0a8b005_20240915120410"
        );
        assert!(is_gc_table_name(&name));
        assert!(!is_internal_operation_table_name(&name));
    }

    #[test]
    fn fresh_gc_names_are_distinct() {
        let a = generate_gc_table_name(GcState::Hold, t0());
        let b = generate_gc_table_name(GcState::Hold, t0());
        assert_ne!(a, b);
        assert!(is_gc_table_name(&a));
        assert!(is_gc_table_name(&b));
    }

    #[test]
    fn internal_table_name() {
        let name = generate_internal_table_name(
            INTERNAL_TABLE_VREPLICATION_HINT,
            "2201058f_f266_41ea_bab4_0242c0a8b005",
            t0(),
        );
        assert_eq!(
            name,
            "_vt_vrp_2201058ff26641eabab40242c0a8b005_20240915120410_"
        );
        assert!(is_internal_operation_table_name(&name));
        assert!(!is_gc_table_name(&name));
    }

    #[test]
    fn plain_names_are_not_gc_names() {
        assert!(!is_gc_table_name("customers"));
        assert!(!is_gc_table_name("_vt_HOLD_nothex_20240915120410"));
        assert!(!is_gc_table_name(
            "_vt_KEEP_2201058ff26641eabab40242c0a8b005_20240915120410"
        ));
    }

    #[test]
    fn rename_statement() {
        let (stmt, to_table) = generate_rename_statement_with_uuid(
            "customers",
            GcState::Hold,
            "2201058f_f266_41ea_bab4_0242c0a8b005",
            t0(),
        );
        assert_eq!(
            stmt,
            "RENAME TABLE `customers` TO `_vt_HOLD_2201058ff26641eabab40242c0a8b005_20240915120410`"
        );
        assert!(is_gc_table_name(&to_table));
    }

    #[test]
    fn swap_statement_shape() {
        let (query, swap) = generate_swap_tables_statement("v1", "v2", t0());
        assert!(query.starts_with(&format!("RENAME TABLE `v1` TO `{swap}`")));
        assert!(query.contains("`v2` TO `v1`"));
        assert!(query.ends_with(&format!("`{swap}` TO `v2`")));
    }
}
