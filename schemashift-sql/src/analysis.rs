//! ALTER analysis: special execution plans and column deltas.
//!
//! Two independent analyses live here. The special-plan analysis decides
//! whether an ALTER can skip the row-copy machinery entirely (INSTANT DDL,
//! pure range-partition maintenance). The delta analysis compares source
//! and shadow table metadata, as read from INFORMATION_SCHEMA, to produce
//! the revertibility notes stored on the migration row.

use sqlparser::ast::{AlterColumnOperation, AlterTableOperation, Statement};
use strum::Display;

use crate::ddl::ParsedDdl;

/// MySQL server capabilities relevant to DDL execution, derived from the
/// server version string.
#[derive(Clone, Copy, Debug)]
pub struct ServerCapabilities {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ServerCapabilities {
    /// Parses a version string such as `8.0.32` or `8.0.32-0ubuntu0.22.04.1`.
    pub fn from_version(version: &str) -> Self {
        let mut parts = version
            .split(|c: char| !c.is_ascii_digit())
            .map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }

    fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }

    /// `ALGORITHM=INSTANT` exists at all.
    pub fn instant_ddl(&self) -> bool {
        self.at_least(8, 0, 0)
    }

    /// Adding a column in last position is instant.
    pub fn instant_add_last_column(&self) -> bool {
        self.at_least(8, 0, 0)
    }

    /// Adding a column anywhere, and dropping a column, are instant.
    pub fn instant_add_drop_column(&self) -> bool {
        self.at_least(8, 0, 29)
    }

    /// Changing or dropping a column default is instant.
    pub fn instant_change_column_default(&self) -> bool {
        self.at_least(8, 0, 0)
    }
}

/// A shortcut execution plan for an ALTER.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SpecialOperation {
    #[strum(serialize = "instant-ddl")]
    InstantDdl,
    #[strum(serialize = "range-partition")]
    RangePartition,
}

/// The plan and the statement to execute for it.
#[derive(Clone, Debug)]
pub struct SpecialAlterPlan {
    pub operation: SpecialOperation,
    pub alter_sql: String,
}

/// Appends `ALGORITHM=INSTANT` to an ALTER statement. MySQL then refuses
/// the statement outright if it cannot run instantaneously.
pub fn add_instant_algorithm(alter_sql: &str) -> String {
    format!(
        "{}, ALGORITHM=INSTANT",
        alter_sql.trim().trim_end_matches(';')
    )
}

/// Whether the ALTER itself sets an AUTO_INCREMENT value; if so the shadow
/// table must not inherit the source's counter.
pub fn is_auto_increment_change_requested(alter_sql: &str) -> bool {
    alter_sql.to_ascii_lowercase().contains("auto_increment")
}

fn operation_is_instant_capable(op: &AlterTableOperation, caps: &ServerCapabilities) -> bool {
    match op {
        AlterTableOperation::AddColumn { .. } => {
            // FIRST/AFTER positioning needs the full add/drop capability
            let rendered = op.to_string().to_ascii_uppercase();
            let positioned = rendered.ends_with(" FIRST") || rendered.contains(" AFTER ");
            if positioned {
                caps.instant_add_drop_column()
            } else {
                caps.instant_add_last_column() || caps.instant_add_drop_column()
            }
        }
        AlterTableOperation::DropColumn { .. } => caps.instant_add_drop_column(),
        AlterTableOperation::AlterColumn { op, .. } => matches!(
            op,
            AlterColumnOperation::SetDefault { .. } | AlterColumnOperation::DropDefault
        ) && caps.instant_change_column_default(),
        _ => false,
    }
}

/// Inspects an ALTER TABLE and the server's capabilities, and returns a
/// special plan when the statement can bypass the row-copy path.
///
/// `table_is_range_partitioned` reflects the live table's structure; pure
/// partition maintenance is only a special plan on a RANGE-partitioned
/// table.
pub fn analyze_special_alter_plan(
    ddl: &ParsedDdl,
    caps: &ServerCapabilities,
    table_is_range_partitioned: bool,
) -> Option<SpecialAlterPlan> {
    let operations = match &ddl.stmt {
        Statement::AlterTable { operations, .. } => operations,
        _ => return None,
    };
    if operations.is_empty() {
        return None;
    }

    let all_partition_ops = operations.iter().all(|op| {
        matches!(
            op,
            AlterTableOperation::AddPartitions { .. } | AlterTableOperation::DropPartitions { .. }
        )
    });
    if all_partition_ops && table_is_range_partitioned {
        return Some(SpecialAlterPlan {
            operation: SpecialOperation::RangePartition,
            alter_sql: ddl.to_sql(),
        });
    }

    if caps.instant_ddl()
        && operations
            .iter()
            .all(|op| operation_is_instant_capable(op, caps))
    {
        return Some(SpecialAlterPlan {
            operation: SpecialOperation::InstantDdl,
            alter_sql: add_instant_algorithm(&ddl.to_sql()),
        });
    }

    None
}

/// One column's metadata, as read from INFORMATION_SCHEMA.COLUMNS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// The full MySQL column type, e.g. `int unsigned` or `varchar(64)`.
    pub column_type: String,
    pub charset: Option<String>,
    pub is_nullable: bool,
    pub has_default: bool,
}

/// A unique key (including the primary key), as read from
/// INFORMATION_SCHEMA.STATISTICS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueKey {
    pub name: String,
    pub columns: Vec<String>,
}

/// The outcome of comparing a source table to its shadow.
#[derive(Clone, Debug, Default)]
pub struct TableDelta {
    pub added_unique_keys: Vec<UniqueKey>,
    pub removed_unique_keys: Vec<UniqueKey>,
    pub dropped_no_default_columns: Vec<String>,
    pub expanded_columns: Vec<String>,
    pub revertible_notes: Vec<String>,
}

/// Compares source and shadow metadata. Unique keys are matched by column
/// list, not by name: a renamed-but-identical key is neither added nor
/// removed.
pub fn analyze_table_delta(
    source_columns: &[ColumnInfo],
    target_columns: &[ColumnInfo],
    source_unique_keys: &[UniqueKey],
    target_unique_keys: &[UniqueKey],
) -> TableDelta {
    let mut delta = TableDelta::default();

    let covered_by = |key: &UniqueKey, others: &[UniqueKey]| {
        others.iter().any(|other| other.columns == key.columns)
    };
    for key in source_unique_keys {
        if !covered_by(key, target_unique_keys) {
            delta.removed_unique_keys.push(key.clone());
        }
    }
    for key in target_unique_keys {
        if !covered_by(key, source_unique_keys) {
            delta.added_unique_keys.push(key.clone());
        }
    }

    for source in source_columns {
        match target_columns.iter().find(|t| t.name == source.name) {
            None => {
                if !source.is_nullable && !source.has_default {
                    delta.dropped_no_default_columns.push(source.name.clone());
                }
            }
            Some(target) => {
                if let Some(reason) = expanded_column_reason(source, target) {
                    delta.expanded_columns.push(source.name.clone());
                    delta
                        .revertible_notes
                        .push(format!("column {} expanded: {}", source.name, reason));
                }
            }
        }
    }
    delta
}

fn integer_rank(base: &str) -> Option<u8> {
    match base {
        "tinyint" => Some(1),
        "smallint" => Some(2),
        "mediumint" => Some(3),
        "int" | "integer" => Some(4),
        "bigint" => Some(5),
        _ => None,
    }
}

fn text_rank(base: &str) -> Option<u8> {
    match base {
        "char" => Some(1),
        "varchar" => Some(2),
        "tinytext" => Some(3),
        "text" => Some(4),
        "mediumtext" => Some(5),
        "longtext" => Some(6),
        _ => None,
    }
}

struct ParsedColumnType {
    base: String,
    length: Option<u32>,
    unsigned: bool,
    values: Vec<String>,
}

fn parse_column_type(column_type: &str) -> ParsedColumnType {
    let lower = column_type.trim().to_ascii_lowercase();
    let (head, rest) = match lower.find('(') {
        Some(open) => {
            let close = lower.rfind(')').unwrap_or(lower.len());
            (&lower[..open], &lower[open + 1..close])
        }
        None => (lower.as_str(), ""),
    };
    let base = head.trim().to_string();
    let unsigned = lower.contains("unsigned");
    let length = rest.split(',').next().and_then(|v| v.trim().parse().ok());
    let values = if base == "enum" || base == "set" {
        rest.split(',')
            .map(|v| v.trim().trim_matches('\'').to_string())
            .collect()
    } else {
        Vec::new()
    };
    ParsedColumnType {
        base,
        length,
        unsigned,
        values,
    }
}

/// Returns the reason a target column type "expands" the source type, i.e.
/// can hold values the source cannot — which makes the change
/// non-revertible without data loss.
fn expanded_column_reason(source: &ColumnInfo, target: &ColumnInfo) -> Option<String> {
    let s = parse_column_type(&source.column_type);
    let t = parse_column_type(&target.column_type);

    if let (Some(s_rank), Some(t_rank)) = (integer_rank(&s.base), integer_rank(&t.base)) {
        if t_rank > s_rank {
            return Some("extended integer range".to_string());
        }
        if s.unsigned && !t.unsigned {
            return Some("changed signedness to signed".to_string());
        }
        return None;
    }

    if let (Some(s_rank), Some(t_rank)) = (text_rank(&s.base), text_rank(&t.base)) {
        if t_rank > s_rank {
            return Some("extended text storage".to_string());
        }
        if s.base == t.base {
            if let (Some(s_len), Some(t_len)) = (s.length, t.length) {
                if t_len > s_len {
                    return Some("increased length".to_string());
                }
            }
        }
        if source.charset.is_some() && target.charset.is_some() && source.charset != target.charset
        {
            return Some("character set change".to_string());
        }
        return None;
    }

    if s.base == "float" && t.base == "double" {
        return Some("extended floating point range".to_string());
    }
    if s.base == "decimal" && t.base == "decimal" {
        if let (Some(s_len), Some(t_len)) = (s.length, t.length) {
            if t_len > s_len {
                return Some("extended decimal precision".to_string());
            }
        }
        return None;
    }

    if (s.base == "enum" || s.base == "set") && s.base == t.base {
        if t.values.len() >= s.values.len() && t.values[..s.values.len()] == s.values[..] {
            // appended values only; the original values keep their ordinals
            return None;
        }
        return Some("enum or set values reordered or removed".to_string());
    }

    if s.base == "timestamp" && t.base == "datetime" {
        return Some("extended time range".to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use crate::ddl::{parse_ddl, DdlStatement};

    use super::*;

    fn parsed(sql: &str) -> ParsedDdl {
        match parse_ddl(sql).unwrap() {
            DdlStatement::Parsed(parsed) => parsed,
            other => panic!("expected parsed DDL, got {other:?}"),
        }
    }

    fn caps_modern() -> ServerCapabilities {
        ServerCapabilities::from_version("8.0.32")
    }

    fn col(name: &str, column_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            column_type: column_type.to_string(),
            charset: None,
            is_nullable: true,
            has_default: false,
        }
    }

    #[test]
    fn version_parsing() {
        let caps = ServerCapabilities::from_version("8.0.32-0ubuntu0.22.04.1");
        assert!(caps.instant_ddl());
        assert!(caps.instant_add_drop_column());

        let old = ServerCapabilities::from_version("5.7.44");
        assert!(!old.instant_ddl());

        let mid = ServerCapabilities::from_version("8.0.21");
        assert!(mid.instant_ddl());
        assert!(!mid.instant_add_drop_column());
    }

    #[test]
    fn add_column_is_instant_on_modern_servers() {
        let plan = analyze_special_alter_plan(
            &parsed("ALTER TABLE t ADD COLUMN c INT"),
            &caps_modern(),
            false,
        )
        .unwrap();
        assert_eq!(plan.operation, SpecialOperation::InstantDdl);
        assert!(plan.alter_sql.ends_with(", ALGORITHM=INSTANT"));
    }

    #[test]
    fn drop_column_needs_8_0_29() {
        let ddl = parsed("ALTER TABLE t DROP COLUMN c");
        assert!(analyze_special_alter_plan(&ddl, &caps_modern(), false).is_some());
        assert!(analyze_special_alter_plan(
            &ddl,
            &ServerCapabilities::from_version("8.0.21"),
            false
        )
        .is_none());
    }

    #[test]
    fn modify_column_is_not_instant() {
        let ddl = parsed("ALTER TABLE t MODIFY COLUMN c BIGINT");
        assert!(analyze_special_alter_plan(&ddl, &caps_modern(), false).is_none());
    }

    #[test]
    fn no_plan_on_old_servers() {
        let ddl = parsed("ALTER TABLE t ADD COLUMN c INT");
        assert!(analyze_special_alter_plan(
            &ddl,
            &ServerCapabilities::from_version("5.7.44"),
            false
        )
        .is_none());
    }

    #[test]
    fn instant_algorithm_suffix() {
        assert_eq!(
            add_instant_algorithm("ALTER TABLE t ADD COLUMN c INT;"),
            "ALTER TABLE t ADD COLUMN c INT, ALGORITHM=INSTANT"
        );
    }

    #[test]
    fn auto_increment_detection() {
        assert!(is_auto_increment_change_requested(
            "ALTER TABLE t AUTO_INCREMENT = 100"
        ));
        assert!(!is_auto_increment_change_requested(
            "ALTER TABLE t ADD COLUMN c INT"
        ));
    }

    #[test]
    fn unique_keys_matched_by_columns() {
        let source = vec![
            UniqueKey {
                name: "PRIMARY".to_string(),
                columns: vec!["id".to_string()],
            },
            UniqueKey {
                name: "u_email".to_string(),
                columns: vec!["email".to_string()],
            },
        ];
        let target = vec![
            UniqueKey {
                name: "PRIMARY".to_string(),
                columns: vec!["id".to_string()],
            },
            UniqueKey {
                name: "u_name".to_string(),
                columns: vec!["name".to_string()],
            },
        ];
        let delta = analyze_table_delta(&[], &[], &source, &target);
        assert_eq!(delta.removed_unique_keys.len(), 1);
        assert_eq!(delta.removed_unique_keys[0].name, "u_email");
        assert_eq!(delta.added_unique_keys.len(), 1);
        assert_eq!(delta.added_unique_keys[0].name, "u_name");
    }

    #[test]
    fn renamed_identical_key_is_not_a_change() {
        let source = vec![UniqueKey {
            name: "u_old".to_string(),
            columns: vec!["email".to_string()],
        }];
        let target = vec![UniqueKey {
            name: "u_new".to_string(),
            columns: vec!["email".to_string()],
        }];
        let delta = analyze_table_delta(&[], &[], &source, &target);
        assert!(delta.removed_unique_keys.is_empty());
        assert!(delta.added_unique_keys.is_empty());
    }

    #[test]
    fn dropped_no_default_columns() {
        let mut strict = col("c", "int");
        strict.is_nullable = false;
        strict.has_default = false;
        let mut with_default = col("d", "int");
        with_default.is_nullable = false;
        with_default.has_default = true;
        let delta = analyze_table_delta(&[strict, with_default], &[], &[], &[]);
        assert_eq!(delta.dropped_no_default_columns, vec!["c".to_string()]);
    }

    #[test]
    fn expansion_rules() {
        let cases = [
            ("int", "bigint", true),
            ("bigint", "int", false),
            ("int unsigned", "int", true),
            ("int", "int unsigned", false),
            ("varchar(32)", "varchar(64)", true),
            ("varchar(64)", "varchar(32)", false),
            ("varchar(32)", "text", true),
            ("float", "double", true),
            ("decimal(10,2)", "decimal(12,2)", true),
            ("enum('a','b')", "enum('a','b','c')", false),
            ("enum('a','b')", "enum('b','a')", true),
            ("timestamp", "datetime", true),
            ("int", "int", false),
        ];
        for (source, target, expanded) in cases {
            let delta = analyze_table_delta(&[col("c", source)], &[col("c", target)], &[], &[]);
            assert_eq!(
                !delta.expanded_columns.is_empty(),
                expanded,
                "{source} -> {target}"
            );
        }
    }

    #[test]
    fn charset_change_is_expansion() {
        let mut source = col("c", "varchar(32)");
        source.charset = Some("latin1".to_string());
        let mut target = col("c", "varchar(32)");
        target.charset = Some("utf8mb4".to_string());
        let delta = analyze_table_delta(&[source], &[target], &[], &[]);
        assert_eq!(delta.expanded_columns, vec!["c".to_string()]);
        assert!(delta.revertible_notes[0].contains("character set change"));
    }
}
