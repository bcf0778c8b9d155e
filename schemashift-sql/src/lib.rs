//! SQL-side support for the schemashift online DDL executor.
//!
//! This crate owns everything that can be decided by looking at statements
//! and names alone, without touching a live server:
//!
//! * coarse DDL classification ([`ddl`]): CREATE / DROP / ALTER / REVERT,
//!   table vs view, `IF EXISTS` / `IF NOT EXISTS` / `OR REPLACE`;
//! * comment-embedded migration attributes on submitted statements
//!   ([`attrs`]);
//! * DDL strategies and their option flags ([`strategy`]);
//! * migration UUIDs ([`uuid`]) and auxiliary table naming ([`names`]);
//! * deterministic CONSTRAINT renaming ([`constraints`]);
//! * special-plan and column-delta analysis ([`analysis`]).
//!
//! Parsing is deliberately coarse: user SQL semantics are validated by the
//! MySQL server, never here.

use thiserror::Error;

pub use sqlparser;

pub mod analysis;
pub mod attrs;
pub mod constraints;
pub mod ddl;
pub mod names;
pub mod strategy;
pub mod uuid;

pub use attrs::{online_ddl_from_commented_statement, OnlineDdl};
pub use ddl::{parse_ddl, DdlAction, DdlStatement, ParsedDdl};
pub use strategy::{DdlStrategy, StrategySetting};

/// Errors produced while parsing or rewriting DDL statements.
#[derive(Debug, Error)]
pub enum DdlError {
    /// The statement could not be parsed at all.
    #[error("failed to parse statement: {0}")]
    Parse(String),

    /// The statement parsed, but is not a DDL statement this executor
    /// accepts.
    #[error("unsupported statement: {0}")]
    Unsupported(String),

    /// Well-formed input carrying an invalid value (bad UUID, bad duration,
    /// malformed attribute comment).
    #[error("{0}")]
    Invalid(String),
}

/// Convenience alias used throughout this crate.
pub type DdlResult<T> = Result<T, DdlError>;
