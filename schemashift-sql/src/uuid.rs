//! Migration UUIDs.
//!
//! A migration is identified by a 128-bit UUID formatted with underscores
//! instead of hyphens, e.g. `2201058f_f266_41ea_bab4_0242c0a8b005`. The
//! underscore form is safe to embed in MySQL table names, which is exactly
//! where the condensed form ends up (see [`crate::names`]).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MIGRATION_UUID_RE: Regex =
        Regex::new(r"^[0-9a-f]{8}_[0-9a-f]{4}_[0-9a-f]{4}_[0-9a-f]{4}_[0-9a-f]{12}$").unwrap();
}

/// Generate a fresh migration UUID in underscore form.
pub fn create_uuid() -> String {
    ::uuid::Uuid::new_v4().to_string().replace('-', "_")
}

/// Check whether the given string is a well-formed migration UUID.
pub fn is_migration_uuid(uuid: &str) -> bool {
    MIGRATION_UUID_RE.is_match(uuid)
}

/// The condensed, 32-hex-character form of a migration UUID, usable inside
/// table names.
pub fn condensed_uuid(uuid: &str) -> String {
    uuid.chars().filter(|c| *c != '_' && *c != '-').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_uuids_are_valid() {
        for _ in 0..8 {
            let uuid = create_uuid();
            assert!(is_migration_uuid(&uuid), "bad uuid: {uuid}");
        }
    }

    #[test]
    fn validity() {
        assert!(is_migration_uuid("2201058f_f266_41ea_bab4_0242c0a8b005"));
        // hyphens are not the storage form
        assert!(!is_migration_uuid("2201058f-f266-41ea-bab4-0242c0a8b005"));
        assert!(!is_migration_uuid("2201058f_f266_41ea_bab4"));
        assert!(!is_migration_uuid(""));
        assert!(!is_migration_uuid("2201058F_F266_41EA_BAB4_0242C0A8B005"));
    }

    #[test]
    fn condensed() {
        assert_eq!(
            condensed_uuid("2201058f_f266_41ea_bab4_0242c0a8b005"),
            "2201058ff26641eabab40242c0a8b005"
        );
        assert_eq!(condensed_uuid(&create_uuid()).len(), 32);
    }
}
