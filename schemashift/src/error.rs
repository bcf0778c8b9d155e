//! Error taxonomy.
//!
//! A small set of sentinel errors is kept as distinct variants so callers
//! can match on them; everything else carries a [`Code`] preserving the
//! caller-facing classification.

use thiserror::Error;

/// Classification of non-sentinel errors, mirroring the RPC status codes
/// surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    FailedPrecondition,
    InvalidArgument,
    Unavailable,
    Aborted,
    Unknown,
    Internal,
    NotFound,
    Unimplemented,
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::Unavailable => "UNAVAILABLE",
            Code::Aborted => "ABORTED",
            Code::Unknown => "UNKNOWN",
            Code::Internal => "INTERNAL",
            Code::NotFound => "NOT_FOUND",
            Code::Unimplemented => "UNIMPLEMENTED",
        };
        f.write_str(s)
    }
}

/// General error type for the executor.
#[derive(Debug, Error)]
pub enum SchemaShiftError {
    /// The executor was asked to run a migration on a read-only server.
    #[error("cannot run migration on non-writable tablet")]
    NotWritableTablet,

    /// An operation conflicts with a migration that is already running.
    #[error("cannot run migration since a migration is already running")]
    MigrationAlreadyRunning,

    /// The given UUID has no migration row.
    #[error("migration not found")]
    MigrationNotFound,

    /// Online DDL is disabled by configuration, or the executor is closed.
    #[error("online DDL is disabled")]
    OnlineDdlDisabled,

    /// An underlying MySQL error.
    #[error(transparent)]
    MySql(#[from] mysql_async::Error),

    /// A statement-level parse/classification error.
    #[error(transparent)]
    Ddl(#[from] schemashift_sql::DdlError),

    /// Any other error, classified.
    #[error("{code}: {message}")]
    Classified { code: Code, message: String },
}

impl SchemaShiftError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        SchemaShiftError::Classified {
            code,
            message: message.into(),
        }
    }

    /// The classification of this error, as surfaced to callers.
    pub fn code(&self) -> Code {
        match self {
            SchemaShiftError::NotWritableTablet => Code::FailedPrecondition,
            SchemaShiftError::MigrationAlreadyRunning => Code::FailedPrecondition,
            SchemaShiftError::MigrationNotFound => Code::NotFound,
            SchemaShiftError::OnlineDdlDisabled => Code::Unavailable,
            SchemaShiftError::MySql(_) => Code::Unknown,
            SchemaShiftError::Ddl(_) => Code::InvalidArgument,
            SchemaShiftError::Classified { code, .. } => *code,
        }
    }

    /// The MySQL server error number, if this wraps a server error.
    pub fn mysql_error_code(&self) -> Option<u16> {
        match self {
            SchemaShiftError::MySql(mysql_async::Error::Server(e)) => Some(e.code),
            _ => None,
        }
    }

    /// Wraps this error with additional context, preserving the
    /// classification and MySQL error number where present.
    pub fn wrap(self, context: &str) -> Self {
        match self {
            SchemaShiftError::MySql(_) => self,
            other => SchemaShiftError::Classified {
                code: other.code(),
                message: format!("{context}: {other}"),
            },
        }
    }
}

/// MySQL error numbers the executor inspects.
pub mod er {
    /// `ER_CANT_FIND_FILE`
    pub const CANT_FIND_FILE: u16 = 1017;
    /// `ER_TOO_LONG_IDENT`
    pub const TOO_LONG_IDENT: u16 = 1059;
    /// `ER_NO_SUCH_TABLE`
    pub const NO_SUCH_TABLE: u16 = 1146;
}

/// Convenience alias used across the crate.
pub type SchemaShiftResult<T> = Result<T, SchemaShiftError>;

/// Constructs a classified [`SchemaShiftError`] from a format string.
#[macro_export]
macro_rules! classified_err {
    ($code:expr, $($format_args:tt)*) => {
        $crate::error::SchemaShiftError::new($code, format!($($format_args)*))
    };
}

/// Shorthand for a `FAILED_PRECONDITION` error.
#[macro_export]
macro_rules! precondition_err {
    ($($format_args:tt)*) => {
        $crate::classified_err!($crate::error::Code::FailedPrecondition, $($format_args)*)
    };
}

/// Shorthand for an `INVALID_ARGUMENT` error.
#[macro_export]
macro_rules! invalid_err {
    ($($format_args:tt)*) => {
        $crate::classified_err!($crate::error::Code::InvalidArgument, $($format_args)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_codes() {
        assert_eq!(
            SchemaShiftError::NotWritableTablet.code(),
            Code::FailedPrecondition
        );
        assert_eq!(SchemaShiftError::MigrationNotFound.code(), Code::NotFound);
        assert_eq!(
            SchemaShiftError::OnlineDdlDisabled.code(),
            Code::Unavailable
        );
    }

    #[test]
    fn classified_display_includes_code() {
        let err = precondition_err!("singleton migration rejected: found pending migrations");
        assert_eq!(err.code(), Code::FailedPrecondition);
        assert!(err.to_string().starts_with("FAILED_PRECONDITION: "));
    }

    #[test]
    fn wrap_preserves_code() {
        let err = invalid_err!("bad threshold").wrap("validating migration");
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.to_string().contains("validating migration"));
        assert!(err.to_string().contains("bad threshold"));
    }
}
