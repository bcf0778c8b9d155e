//! Coarse DDL classification.
//!
//! The executor needs to know *what kind* of change a statement is — which
//! action, which table, table or view, and a handful of modifier flags. It
//! never validates column definitions or expressions; MySQL does that.

use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{Ident, ObjectName, ObjectType, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use strum::{Display, EnumString};

use crate::uuid::is_migration_uuid;
use crate::{DdlError, DdlResult};

lazy_static! {
    static ref REVERT_RE: Regex =
        Regex::new(r#"(?i)^\s*revert\s+(?:migration\s+)?['"]?([0-9a-f_-]+)['"]?\s*;?\s*$"#)
            .unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

/// The kind of schema change a migration performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DdlAction {
    Create,
    Drop,
    Alter,
    Revert,
}

impl DdlAction {
    /// The action a REVERT of this action performs.
    pub fn inverse(&self) -> Option<DdlAction> {
        match self {
            DdlAction::Create => Some(DdlAction::Drop),
            DdlAction::Drop => Some(DdlAction::Create),
            DdlAction::Alter => Some(DdlAction::Alter),
            DdlAction::Revert => None,
        }
    }
}

/// A submitted DDL statement: either a REVERT pseudo-statement or a parsed
/// SQL DDL.
#[derive(Clone, Debug)]
pub enum DdlStatement {
    Revert { uuid: String },
    Parsed(ParsedDdl),
}

impl DdlStatement {
    pub fn action(&self) -> DdlAction {
        match self {
            DdlStatement::Revert { .. } => DdlAction::Revert,
            DdlStatement::Parsed(parsed) => parsed.action(),
        }
    }

    pub fn table(&self) -> String {
        match self {
            DdlStatement::Revert { .. } => String::new(),
            DdlStatement::Parsed(parsed) => parsed.table(),
        }
    }

    pub fn is_view(&self) -> bool {
        match self {
            DdlStatement::Revert { .. } => false,
            DdlStatement::Parsed(parsed) => parsed.is_view(),
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            DdlStatement::Revert { uuid } => format!("REVERT MIGRATION '{uuid}'"),
            DdlStatement::Parsed(parsed) => parsed.to_sql(),
        }
    }
}

/// A parsed CREATE / DROP / ALTER statement with typed accessors.
#[derive(Clone, Debug)]
pub struct ParsedDdl {
    pub stmt: Statement,
}

impl ParsedDdl {
    pub fn action(&self) -> DdlAction {
        match &self.stmt {
            Statement::CreateTable { .. } | Statement::CreateView { .. } => DdlAction::Create,
            Statement::AlterTable { .. } | Statement::AlterView { .. } => DdlAction::Alter,
            Statement::Drop { .. } => DdlAction::Drop,
            _ => unreachable!("ParsedDdl holds only DDL statements"),
        }
    }

    /// The unqualified name of the statement's target table or view.
    pub fn table(&self) -> String {
        let name = match &self.stmt {
            Statement::CreateTable { name, .. }
            | Statement::CreateView { name, .. }
            | Statement::AlterTable { name, .. }
            | Statement::AlterView { name, .. } => name,
            Statement::Drop { names, .. } => &names[0],
            _ => unreachable!("ParsedDdl holds only DDL statements"),
        };
        name.0
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default()
    }

    pub fn is_view(&self) -> bool {
        match &self.stmt {
            Statement::CreateView { .. } | Statement::AlterView { .. } => true,
            Statement::Drop { object_type, .. } => *object_type == ObjectType::View,
            _ => false,
        }
    }

    /// `IF EXISTS`, on DROP statements.
    pub fn if_exists(&self) -> bool {
        matches!(&self.stmt, Statement::Drop { if_exists: true, .. })
    }

    /// `IF NOT EXISTS`, on CREATE TABLE statements.
    pub fn if_not_exists(&self) -> bool {
        matches!(
            &self.stmt,
            Statement::CreateTable {
                if_not_exists: true,
                ..
            }
        )
    }

    /// `OR REPLACE`, on CREATE VIEW statements.
    pub fn is_replace(&self) -> bool {
        matches!(
            &self.stmt,
            Statement::CreateView {
                or_replace: true,
                ..
            }
        )
    }

    /// Retargets the statement at a different, unqualified table name.
    pub fn set_table(&mut self, table: &str) {
        let target = ObjectName(vec![Ident::new(table)]);
        match &mut self.stmt {
            Statement::CreateTable { name, .. }
            | Statement::CreateView { name, .. }
            | Statement::AlterTable { name, .. }
            | Statement::AlterView { name, .. } => *name = target,
            Statement::Drop { names, .. } => names[0] = target,
            _ => unreachable!("ParsedDdl holds only DDL statements"),
        }
    }

    pub fn to_sql(&self) -> String {
        self.stmt.to_string()
    }
}

/// Parses a submitted statement into a classified DDL.
///
/// `REVERT MIGRATION '<uuid>'` is recognized before SQL parsing; everything
/// else must be a single CREATE / DROP / ALTER statement over a table or a
/// view. Multi-table DROPs are rejected: a migration owns exactly one table.
pub fn parse_ddl(sql: &str) -> DdlResult<DdlStatement> {
    if let Some(captures) = REVERT_RE.captures(sql) {
        let uuid = captures[1].to_string();
        if !is_migration_uuid(&uuid) {
            return Err(DdlError::Invalid(format!(
                "not a valid migration UUID in REVERT: {uuid}"
            )));
        }
        return Ok(DdlStatement::Revert { uuid });
    }

    let statements = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|e| DdlError::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(DdlError::Unsupported(format!(
            "expected a single statement, got {}",
            statements.len()
        )));
    }
    let stmt = statements.into_iter().next().unwrap();
    match &stmt {
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. } => {}
        Statement::Drop {
            object_type, names, ..
        } => {
            if !matches!(object_type, ObjectType::Table | ObjectType::View) {
                return Err(DdlError::Unsupported(format!("DROP {object_type}")));
            }
            if names.len() != 1 {
                return Err(DdlError::Unsupported(
                    "online DDL does not support multi-table DROP statements".to_string(),
                ));
            }
        }
        other => {
            return Err(DdlError::Unsupported(format!(
                "not a DDL statement: {other}"
            )))
        }
    }
    Ok(DdlStatement::Parsed(ParsedDdl { stmt }))
}

/// Removes `/* ... */` comments from a statement. Used before re-parsing
/// statements that carry attribute comments.
pub fn strip_sql_comments(sql: &str) -> String {
    COMMENT_RE.replace_all(sql, "").trim().to_string()
}

/// Whether the given statement references the given table anywhere — in its
/// FROM clause, joins, or subqueries. Used to decide which server processes
/// actually touch a table before killing them; a bare substring match over
/// PROCESSLIST info has too many false positives.
///
/// A statement that cannot be parsed is reported as not referencing the
/// table.
pub fn statement_references_table(sql: &str, table: &str) -> bool {
    use core::ops::ControlFlow;
    use sqlparser::ast::visit_relations;

    let statements = match Parser::parse_sql(&MySqlDialect {}, sql) {
        Ok(statements) => statements,
        Err(_) => return false,
    };
    for stmt in &statements {
        let flow = visit_relations(stmt, |relation: &ObjectName| {
            if relation
                .0
                .last()
                .map(|ident| ident.value == table)
                .unwrap_or(false)
            {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if flow.is_break() {
            return true;
        }
    }
    false
}

/// Materializes the desired definition of an ALTER VIEW (or CREATE [OR
/// REPLACE] VIEW) statement as a `CREATE OR REPLACE VIEW` over the given
/// artifact name.
pub fn create_or_replace_view_statement(ddl: &ParsedDdl, artifact_name: &str) -> DdlResult<String> {
    match &ddl.stmt {
        Statement::CreateView { .. } => {
            let mut create = ddl.clone();
            create.set_table(artifact_name);
            if let Statement::CreateView { or_replace, .. } = &mut create.stmt {
                *or_replace = true;
            }
            Ok(create.to_sql())
        }
        Statement::AlterView { columns, query, .. } => {
            let columns = if columns.is_empty() {
                String::new()
            } else {
                format!(
                    "({}) ",
                    columns
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            Ok(format!(
                "CREATE OR REPLACE VIEW `{artifact_name}` {columns}AS {query}"
            ))
        }
        other => Err(DdlError::Unsupported(format!(
            "expected a view statement, got: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(sql: &str) -> ParsedDdl {
        match parse_ddl(sql).unwrap() {
            DdlStatement::Parsed(parsed) => parsed,
            other => panic!("expected parsed DDL, got {other:?}"),
        }
    }

    #[test]
    fn classify_create_table() {
        let ddl = parsed("CREATE TABLE IF NOT EXISTS customers (id INT, name TEXT)");
        assert_eq!(ddl.action(), DdlAction::Create);
        assert_eq!(ddl.table(), "customers");
        assert!(!ddl.is_view());
        assert!(ddl.if_not_exists());
        assert!(!ddl.if_exists());
    }

    #[test]
    fn classify_drop() {
        let ddl = parsed("DROP TABLE IF EXISTS customers");
        assert_eq!(ddl.action(), DdlAction::Drop);
        assert_eq!(ddl.table(), "customers");
        assert!(ddl.if_exists());

        let view = parsed("DROP VIEW v1");
        assert!(view.is_view());
        assert!(!view.if_exists());
    }

    #[test]
    fn classify_alter() {
        let ddl = parsed("ALTER TABLE customers ADD COLUMN ts TIMESTAMP");
        assert_eq!(ddl.action(), DdlAction::Alter);
        assert_eq!(ddl.table(), "customers");
        assert!(!ddl.is_view());
    }

    #[test]
    fn classify_views() {
        let create = parsed("CREATE OR REPLACE VIEW v1 AS SELECT id FROM customers");
        assert_eq!(create.action(), DdlAction::Create);
        assert!(create.is_view());
        assert!(create.is_replace());

        let alter = parsed("ALTER VIEW v1 AS SELECT id, name FROM customers");
        assert_eq!(alter.action(), DdlAction::Alter);
        assert!(alter.is_view());
        assert_eq!(alter.table(), "v1");
    }

    #[test]
    fn qualified_names_are_stripped() {
        let ddl = parsed("ALTER TABLE mydb.customers ADD COLUMN c INT");
        assert_eq!(ddl.table(), "customers");
    }

    #[test]
    fn revert_statement() {
        let revert = parse_ddl("REVERT MIGRATION '2201058f_f266_41ea_bab4_0242c0a8b005'").unwrap();
        match &revert {
            DdlStatement::Revert { uuid } => {
                assert_eq!(uuid, "2201058f_f266_41ea_bab4_0242c0a8b005")
            }
            other => panic!("expected revert, got {other:?}"),
        }
        assert_eq!(revert.action(), DdlAction::Revert);
        assert_eq!(revert.table(), "");

        assert!(parse_ddl("REVERT MIGRATION 'not-a-uuid'").is_err());
    }

    #[test]
    fn rejects_non_ddl() {
        assert!(matches!(
            parse_ddl("SELECT * FROM t"),
            Err(DdlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_ddl("DROP TABLE t1, t2"),
            Err(DdlError::Unsupported(_))
        ));
        assert!(parse_ddl("CREATE TABLE ((((").is_err());
    }

    #[test]
    fn set_table_retargets() {
        let mut ddl = parsed("ALTER TABLE customers ADD COLUMN c INT");
        ddl.set_table("_vt_vrp_0000_shadow_");
        assert!(ddl.to_sql().contains("_vt_vrp_0000_shadow_"));
        assert_eq!(ddl.table(), "_vt_vrp_0000_shadow_");
    }

    #[test]
    fn inverse_actions() {
        assert_eq!(DdlAction::Create.inverse(), Some(DdlAction::Drop));
        assert_eq!(DdlAction::Drop.inverse(), Some(DdlAction::Create));
        assert_eq!(DdlAction::Alter.inverse(), Some(DdlAction::Alter));
        assert_eq!(DdlAction::Revert.inverse(), None);
    }

    #[test]
    fn comment_stripping() {
        assert_eq!(
            strip_sql_comments("/*migration: uuid=\"x\" */ DROP TABLE t"),
            "DROP TABLE t"
        );
        assert_eq!(strip_sql_comments("DROP TABLE t"), "DROP TABLE t");
    }

    #[test]
    fn table_reference_detection() {
        assert!(statement_references_table("SELECT * FROM customers", "customers"));
        assert!(statement_references_table(
            "SELECT o.id FROM orders o JOIN customers c ON c.id = o.customer_id",
            "customers"
        ));
        assert!(statement_references_table(
            "SELECT id FROM (SELECT id FROM customers) sub",
            "customers"
        ));
        assert!(!statement_references_table(
            "SELECT * FROM orders WHERE note = 'customers'",
            "customers"
        ));
        assert!(!statement_references_table("not sql at all", "customers"));
    }

    #[test]
    fn alter_view_materializes_as_create_or_replace() {
        let alter = parsed("ALTER VIEW v1 AS SELECT id FROM customers");
        let sql = create_or_replace_view_statement(&alter, "_vt_HOLD_x_1").unwrap();
        assert!(sql.starts_with("CREATE OR REPLACE VIEW `_vt_HOLD_x_1` AS SELECT"));

        let create = parsed("CREATE VIEW v1 AS SELECT id FROM customers");
        let sql = create_or_replace_view_statement(&create, "artifact").unwrap();
        assert!(sql.contains("OR REPLACE"));
        assert!(sql.contains("artifact"));

        let table = parsed("ALTER TABLE t ADD COLUMN c INT");
        assert!(create_or_replace_view_statement(&table, "a").is_err());
    }
}
