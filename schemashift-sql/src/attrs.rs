//! Comment-embedded migration attributes.
//!
//! Schema-change requests arrive as a single DDL statement with a leading
//! attribute comment:
//!
//! ```sql
//! /*migration: uuid="..." strategy="vitess" options="--allow-concurrent" context="deploy-42" */
//! ALTER TABLE customers ADD COLUMN note TEXT
//! ```
//!
//! `strategy` is required; `uuid` is generated when absent; `options` and
//! `context` default to empty. The comment is stripped before the statement
//! is stored on the migration row.

use lazy_static::lazy_static;
use regex::Regex;

use crate::ddl::{parse_ddl, strip_sql_comments, DdlAction, DdlStatement};
use crate::strategy::StrategySetting;
use crate::uuid::{create_uuid, is_migration_uuid};
use crate::{DdlError, DdlResult};

lazy_static! {
    static ref ATTR_COMMENT_RE: Regex = Regex::new(r"(?s)/\*migration:(.*?)\*/").unwrap();
    static ref ATTR_PAIR_RE: Regex = Regex::new(r#"([a-z_]+)="([^"]*)""#).unwrap();
}

/// A fully-resolved schema-change request, ready for admission.
#[derive(Clone, Debug)]
pub struct OnlineDdl {
    pub uuid: String,
    pub table: String,
    /// The statement with the attribute comment stripped.
    pub sql: String,
    pub strategy: StrategySetting,
    pub migration_context: String,
    pub action: DdlAction,
    pub is_view: bool,
}

impl OnlineDdl {
    /// The UUID of the migration this one reverts, if it is a REVERT.
    pub fn revert_uuid(&self) -> Option<String> {
        match parse_ddl(&self.sql) {
            Ok(DdlStatement::Revert { uuid }) => Some(uuid),
            _ => None,
        }
    }
}

/// Builds an [`OnlineDdl`] from a commented statement, the submission entry
/// point for the executor.
pub fn online_ddl_from_commented_statement(sql: &str) -> DdlResult<OnlineDdl> {
    let captures = ATTR_COMMENT_RE.captures(sql).ok_or_else(|| {
        DdlError::Invalid("no migration attribute comment found in statement".to_string())
    })?;
    let body = captures.get(1).unwrap().as_str();

    let mut uuid = None;
    let mut strategy = None;
    let mut options = String::new();
    let mut context = String::new();
    for pair in ATTR_PAIR_RE.captures_iter(body) {
        let value = pair[2].to_string();
        match &pair[1] {
            "uuid" => uuid = Some(value),
            "strategy" => strategy = Some(value),
            "options" => options = value,
            "context" => context = value,
            other => {
                return Err(DdlError::Invalid(format!(
                    "unknown migration attribute: {other}"
                )))
            }
        }
    }

    let uuid = match uuid {
        Some(uuid) => {
            if !is_migration_uuid(&uuid) {
                return Err(DdlError::Invalid(format!("not a valid migration UUID: {uuid}")));
            }
            uuid
        }
        None => create_uuid(),
    };
    let strategy = strategy
        .ok_or_else(|| DdlError::Invalid("missing migration attribute: strategy".to_string()))?;
    let strategy = StrategySetting::parse(&strategy, &options)?;

    let stripped = strip_sql_comments(sql);
    let ddl = parse_ddl(&stripped)?;

    Ok(OnlineDdl {
        uuid,
        table: ddl.table(),
        sql: ddl.to_sql(),
        strategy,
        migration_context: context,
        action: ddl.action(),
        is_view: ddl.is_view(),
    })
}

#[cfg(test)]
mod tests {
    use crate::strategy::DdlStrategy;

    use super::*;

    #[test]
    fn full_attribute_comment() {
        let sql = r#"/*migration: uuid="2201058f_f266_41ea_bab4_0242c0a8b005" strategy="vitess" options="--allow-concurrent --postpone-completion" context="deploy-42" */ ALTER TABLE customers ADD COLUMN note TEXT"#;
        let ddl = online_ddl_from_commented_statement(sql).unwrap();
        assert_eq!(ddl.uuid, "2201058f_f266_41ea_bab4_0242c0a8b005");
        assert_eq!(ddl.table, "customers");
        assert_eq!(ddl.strategy.strategy, DdlStrategy::Vitess);
        assert!(ddl.strategy.is_allow_concurrent());
        assert_eq!(ddl.migration_context, "deploy-42");
        assert_eq!(ddl.action, DdlAction::Alter);
        assert!(!ddl.is_view);
        assert!(!ddl.sql.contains("/*"));
    }

    #[test]
    fn uuid_is_generated_when_absent() {
        let sql = r#"/*migration: strategy="online" */ CREATE TABLE t (id INT)"#;
        let ddl = online_ddl_from_commented_statement(sql).unwrap();
        assert!(is_migration_uuid(&ddl.uuid));
        assert_eq!(ddl.migration_context, "");
    }

    #[test]
    fn strategy_is_required() {
        let sql = r#"/*migration: context="x" */ CREATE TABLE t (id INT)"#;
        assert!(online_ddl_from_commented_statement(sql).is_err());
    }

    #[test]
    fn missing_comment_is_rejected() {
        assert!(online_ddl_from_commented_statement("CREATE TABLE t (id INT)").is_err());
    }

    #[test]
    fn bad_uuid_is_rejected() {
        let sql = r#"/*migration: uuid="zzz" strategy="online" */ CREATE TABLE t (id INT)"#;
        assert!(online_ddl_from_commented_statement(sql).is_err());
    }

    #[test]
    fn revert_statement_resolves_target() {
        let sql = r#"/*migration: strategy="online" */ REVERT MIGRATION '2201058f_f266_41ea_bab4_0242c0a8b005'"#;
        let ddl = online_ddl_from_commented_statement(sql).unwrap();
        assert_eq!(ddl.action, DdlAction::Revert);
        assert_eq!(
            ddl.revert_uuid().as_deref(),
            Some("2201058f_f266_41ea_bab4_0242c0a8b005")
        );
        assert_eq!(ddl.table, "");
    }
}
