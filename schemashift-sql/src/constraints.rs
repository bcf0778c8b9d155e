//! Deterministic CONSTRAINT renaming.
//!
//! MySQL requires constraint names to be unique per schema, so a shadow
//! table cannot reuse the names of its source table. Names also must come
//! out identical on every shard running the same migration, so randomness
//! is out. We derive a new name from the migration UUID and the original
//! name: strip any `<tablename>_` prefix (MySQL auto-generates names like
//! `t_chk_1`, which would collide after the table is renamed), then append
//! a short digest.
//!
//! Only FOREIGN KEY and CHECK constraints are renamed; index names are
//! scoped per table and survive renames untouched.

use std::collections::HashMap;

use sha1::{Digest, Sha1};
use sqlparser::ast::{AlterTableOperation, Ident, Statement, TableConstraint};

use crate::ddl::{parse_ddl, DdlStatement, ParsedDdl};
use crate::{DdlError, DdlResult};

const DIGEST_LEN: usize = 8;
const MAX_IDENTIFIER_LEN: usize = 64;

/// Derives the replacement name for a constraint.
pub fn deterministic_constraint_name(
    uuid: &str,
    table: &str,
    original_name: &str,
    kind: &str,
    seq: usize,
) -> String {
    let base = if original_name.is_empty() {
        kind.to_string()
    } else {
        original_name
            .strip_prefix(&format!("{table}_"))
            .unwrap_or(original_name)
            .to_string()
    };

    let mut hasher = Sha1::new();
    hasher.update(uuid.as_bytes());
    hasher.update(original_name.as_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();
    let suffix: String = digest
        .iter()
        .take(DIGEST_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();

    let max_base = MAX_IDENTIFIER_LEN - DIGEST_LEN - 1;
    let base = if base.len() > max_base {
        base[..max_base].to_string()
    } else {
        base
    };
    format!("{base}_{suffix}")
}

fn rename_constraint(
    constraint: &mut TableConstraint,
    uuid: &str,
    table: &str,
    seq: usize,
    map: &mut HashMap<String, String>,
) {
    let (name, kind) = match constraint {
        TableConstraint::ForeignKey { name, .. } => (name, "fk"),
        TableConstraint::Check { name, .. } => (name, "chk"),
        _ => return,
    };
    let original = name.as_ref().map(|n| n.value.clone()).unwrap_or_default();
    let new_name = deterministic_constraint_name(uuid, table, &original, kind, seq);
    if !original.is_empty() {
        map.insert(original, new_name.clone());
    }
    *name = Some(Ident::new(new_name));
}

/// Rewrites FOREIGN KEY and CHECK constraint names of a CREATE TABLE
/// statement in place, returning a map of original name → new name.
pub fn edit_create_table_constraints(
    ddl: &mut ParsedDdl,
    table: &str,
    uuid: &str,
) -> DdlResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    match &mut ddl.stmt {
        Statement::CreateTable { constraints, .. } => {
            for (seq, constraint) in constraints.iter_mut().enumerate() {
                rename_constraint(constraint, uuid, table, seq, &mut map);
            }
            Ok(map)
        }
        other => Err(DdlError::Unsupported(format!(
            "expected CREATE TABLE, got: {other}"
        ))),
    }
}

/// Builds the shadow-table CREATE statement from a `SHOW CREATE TABLE`
/// output: retargets the statement at `new_name`, optionally drops FOREIGN
/// KEY constraints, and renames the remaining FK/CHECK constraints
/// deterministically.
pub fn duplicate_create_table(
    show_create: &str,
    uuid: &str,
    new_name: &str,
    allow_foreign_keys: bool,
) -> DdlResult<(ParsedDdl, HashMap<String, String>)> {
    let mut ddl = match parse_ddl(show_create)? {
        DdlStatement::Parsed(parsed) => parsed,
        DdlStatement::Revert { .. } => {
            return Err(DdlError::Unsupported(
                "expected CREATE TABLE, got REVERT".to_string(),
            ))
        }
    };
    let table = ddl.table();
    ddl.set_table(new_name);
    if let Statement::CreateTable { constraints, .. } = &mut ddl.stmt {
        if !allow_foreign_keys {
            constraints.retain(|c| !matches!(c, TableConstraint::ForeignKey { .. }));
        }
    }
    let map = edit_create_table_constraints(&mut ddl, &table, uuid)?;
    Ok((ddl, map))
}

/// Lists the FOREIGN KEY constraint names of a CREATE TABLE statement.
pub fn foreign_key_names(ddl: &ParsedDdl) -> Vec<String> {
    match &ddl.stmt {
        Statement::CreateTable { constraints, .. } => constraints
            .iter()
            .filter_map(|c| match c {
                TableConstraint::ForeignKey { name, .. } => {
                    Some(name.as_ref().map(|n| n.value.clone()).unwrap_or_default())
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Rewrites constraint references of an ALTER TABLE statement in place:
/// added constraints get deterministic names, dropped constraints are
/// remapped through the rename map produced when the shadow table was
/// created.
pub fn edit_alter_table_constraints(
    ddl: &mut ParsedDdl,
    table: &str,
    uuid: &str,
    constraint_map: &HashMap<String, String>,
) -> DdlResult<()> {
    match &mut ddl.stmt {
        Statement::AlterTable { operations, .. } => {
            for (seq, op) in operations.iter_mut().enumerate() {
                match op {
                    AlterTableOperation::AddConstraint(constraint) => {
                        let mut scratch = HashMap::new();
                        rename_constraint(constraint, uuid, table, seq, &mut scratch);
                    }
                    AlterTableOperation::DropConstraint { name, .. } => {
                        if let Some(new_name) = constraint_map.get(&name.value) {
                            *name = Ident::new(new_name.clone());
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        other => Err(DdlError::Unsupported(format!(
            "expected ALTER TABLE, got: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "2201058f_f266_41ea_bab4_0242c0a8b005";

    const CREATE: &str = "CREATE TABLE t (\
        id INT, \
        parent_id INT, \
        CONSTRAINT t_chk_1 CHECK (id > 0), \
        CONSTRAINT myfk FOREIGN KEY (parent_id) REFERENCES parent (id))";

    fn parsed(sql: &str) -> ParsedDdl {
        match parse_ddl(sql).unwrap() {
            DdlStatement::Parsed(parsed) => parsed,
            other => panic!("expected parsed DDL, got {other:?}"),
        }
    }

    #[test]
    fn names_are_deterministic() {
        let a = deterministic_constraint_name(UUID, "t", "t_chk_1", "chk", 0);
        let b = deterministic_constraint_name(UUID, "t", "t_chk_1", "chk", 0);
        assert_eq!(a, b);

        let other_uuid = deterministic_constraint_name(
            "00000000_0000_0000_0000_000000000000",
            "t",
            "t_chk_1",
            "chk",
            0,
        );
        assert_ne!(a, other_uuid);
    }

    #[test]
    fn table_prefix_is_stripped() {
        let name = deterministic_constraint_name(UUID, "t", "t_chk_1", "chk", 0);
        assert!(name.starts_with("chk_1_"), "got {name}");
        assert!(!name.starts_with("t_chk"));
    }

    #[test]
    fn anonymous_constraints_get_kind_names() {
        let name = deterministic_constraint_name(UUID, "t", "", "fk", 3);
        assert!(name.starts_with("fk_"), "got {name}");
    }

    #[test]
    fn names_fit_mysql_identifier_limit() {
        let long = "x".repeat(100);
        let name = deterministic_constraint_name(UUID, "t", &long, "chk", 0);
        assert!(name.len() <= 64);
    }

    #[test]
    fn create_table_constraints_are_renamed() {
        let mut ddl = parsed(CREATE);
        let map = edit_create_table_constraints(&mut ddl, "t", UUID).unwrap();
        assert_eq!(map.len(), 2);
        assert_ne!(map["t_chk_1"], "t_chk_1");
        assert_ne!(map["myfk"], "myfk");
        let rendered = ddl.to_sql();
        assert!(!rendered.contains("t_chk_1"));
        assert!(rendered.contains(&map["t_chk_1"]));
        assert!(rendered.contains(&map["myfk"]));
    }

    #[test]
    fn duplicate_drops_foreign_keys_unless_allowed() {
        let (shadow, map) = duplicate_create_table(CREATE, UUID, "shadow", false).unwrap();
        assert_eq!(shadow.table(), "shadow");
        assert!(!shadow.to_sql().contains("FOREIGN KEY"));
        assert!(!map.contains_key("myfk"));

        let (shadow, map) = duplicate_create_table(CREATE, UUID, "shadow", true).unwrap();
        assert!(shadow.to_sql().contains("FOREIGN KEY"));
        assert!(map.contains_key("myfk"));
    }

    #[test]
    fn foreign_key_inventory() {
        let ddl = parsed(CREATE);
        assert_eq!(foreign_key_names(&ddl), vec!["myfk".to_string()]);
        assert!(foreign_key_names(&parsed("CREATE TABLE t (id INT)")).is_empty());
    }

    #[test]
    fn alter_drop_constraint_is_remapped() {
        let mut map = HashMap::new();
        map.insert("t_chk_1".to_string(), "chk_1_abcd1234".to_string());
        let mut alter = parsed("ALTER TABLE t DROP CONSTRAINT t_chk_1");
        edit_alter_table_constraints(&mut alter, "t", UUID, &map).unwrap();
        let rendered = alter.to_sql();
        assert!(rendered.contains("chk_1_abcd1234"), "got {rendered}");
    }
}
