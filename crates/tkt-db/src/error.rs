//! Error types for the data-access core.
//!
//! Every operation returns [`DbError`]. Nothing in the core retries: errors
//! unwind to the transactional wrapper, which rolls the transaction back
//! before handing the error to its caller.

use crate::value::ScalarKind;

/// Errors that can occur in the data-access core.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A statement could not be prepared (bad SQL or lost connectivity).
    #[error("failed to prepare statement `{sql}`: {source}")]
    Preparation {
        /// The SQL text that failed to prepare.
        sql: String,
        /// The driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A query returns more columns than the record type maps.
    #[error("result set has {columns} columns but `{record}` maps only {fields} fields")]
    ColumnCountMismatch {
        /// Record type being hydrated or bound.
        record: &'static str,
        /// Number of columns (or values) observed.
        columns: usize,
        /// Number of flattened fields of the record type.
        fields: usize,
    },

    /// An update or delete was requested for a record without an identifier field.
    #[error("identifier field not found for `{record}`")]
    MissingIdentifierField {
        /// Record type lacking an identifier.
        record: &'static str,
    },

    /// A column value could not be read into its record field.
    #[error("failed to scan column {column} (`{field}`): {reason}")]
    Scan {
        /// Zero-based result column position.
        column: usize,
        /// Flattened field name the column was destined for.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Query execution, commit or rollback failed.
    #[error("PostgreSQL error: {0}")]
    Database(#[from] sqlx::Error),

    /// A sequence could not produce its next value.
    #[error("sequence `{name}` failed: {reason}")]
    Sequence {
        /// Sequence name.
        name: String,
        /// Description of the failure.
        reason: String,
    },

    /// A name used as a SQL identifier contains characters outside `[A-Za-z0-9_.]`.
    #[error("invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    /// The database configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors converting between [`SqlValue`](crate::value::SqlValue) and Rust values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// A NULL was read into a non-optional field.
    #[error("unexpected NULL")]
    UnexpectedNull,

    /// The scanned value has a different kind than the field expects.
    #[error("expected {expected:?}, found {found:?}")]
    KindMismatch {
        /// Kind the field maps to.
        expected: ScalarKind,
        /// Kind that was scanned.
        found: ScalarKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_count_mismatch_display() {
        let err = DbError::ColumnCountMismatch {
            record: "person",
            columns: 4,
            fields: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("person"));
        assert!(msg.contains("4 columns"));
    }

    #[test]
    fn missing_identifier_display() {
        let err = DbError::MissingIdentifierField { record: "audit" };
        assert_eq!(format!("{err}"), "identifier field not found for `audit`");
    }

    #[test]
    fn value_error_display() {
        let err = ValueError::KindMismatch {
            expected: ScalarKind::BigInt,
            found: ScalarKind::Text,
        };
        assert_eq!(format!("{err}"), "expected BigInt, found Text");
    }
}
