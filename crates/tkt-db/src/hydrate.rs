//! Row hydration and record binding over prepared statements.
//!
//! Reading: each result row is scanned into a buffer holding one
//! [`SqlValue`] per flattened field, then distributed into a fresh record by
//! [`Record::read_values`] through a [`RowReader`]. Writing: a record's values
//! are collected by [`Record::write_values`] through a [`ParamWriter`] and
//! bound positionally.

use sqlx::postgres::{PgConnection, PgRow, PgStatement};
use sqlx::{Executor, Row, Statement};

use crate::error::DbError;
use crate::record::{flattened, FieldDescriptor, Record};
use crate::value::{ColumnValue, ScalarKind, SqlValue};

/// Collects a record's values in flattened order.
#[derive(Debug, Default)]
pub struct ParamWriter {
    values: Vec<SqlValue>,
}

impl ParamWriter {
    /// Create an empty writer.
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Push one scalar value.
    pub fn push<T: ColumnValue>(&mut self, value: &T) {
        self.values.push(value.to_sql());
    }

    /// Push every value of a mandatory sub-record.
    pub fn nested<T: Record>(&mut self, value: &T) {
        value.write_values(self);
    }

    /// Push every value of an optional sub-record, or one typed NULL per
    /// flattened field when it is absent.
    pub fn optional<T: Record>(&mut self, value: Option<&T>) {
        match value {
            Some(inner) => inner.write_values(self),
            None => self.values.extend(
                flattened::<T>()
                    .fields
                    .iter()
                    .map(|f| SqlValue::null(f.kind)),
            ),
        }
    }

    /// The collected values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

/// Flatten a record's values, checking they line up with its field list.
///
/// # Errors
///
/// Returns [`DbError::ColumnCountMismatch`] if `write_values` produced a
/// different number of values than the type's flattened field count.
pub fn record_values<T: Record>(record: &T) -> Result<Vec<SqlValue>, DbError> {
    let fields = flattened::<T>();
    let mut writer = ParamWriter::new();
    record.write_values(&mut writer);
    let values = writer.into_values();
    if values.len() != fields.len() {
        return Err(DbError::ColumnCountMismatch {
            record: fields.record,
            columns: values.len(),
            fields: fields.len(),
        });
    }
    Ok(values)
}

/// Distributes one scanned row into a record.
///
/// Holds one slot per flattened field. A slot is empty when the result set
/// did not select that column; reading an empty slot leaves the field at its
/// default.
#[derive(Debug)]
pub struct RowReader<'a> {
    values: Vec<Option<SqlValue>>,
    fields: &'a [FieldDescriptor],
    position: usize,
}

impl<'a> RowReader<'a> {
    /// Wrap a scanned buffer.
    pub const fn new(values: Vec<Option<SqlValue>>, fields: &'a [FieldDescriptor]) -> Self {
        Self {
            values,
            fields,
            position: 0,
        }
    }

    /// Read the next slot into `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Scan`] if the value cannot be converted, or if the
    /// record reads past its flattened field list.
    pub fn read<T: ColumnValue>(&mut self, slot: &mut T) -> Result<(), DbError> {
        let column = self.position;
        self.position = column.saturating_add(1);
        let Some(entry) = self.values.get_mut(column) else {
            return Err(self.scan_error(column, "no scan target for column"));
        };
        let Some(value) = entry.take() else {
            return Ok(());
        };
        *slot = T::from_sql(value).map_err(|e| self.scan_error(column, e))?;
        Ok(())
    }

    /// Read a mandatory sub-record.
    ///
    /// # Errors
    ///
    /// Propagates the sub-record's scan errors.
    pub fn nested<T: Record>(&mut self, slot: &mut T) -> Result<(), DbError> {
        slot.read_values(self)
    }

    /// Read an optional sub-record.
    ///
    /// The sub-record is present when any of its columns is non-null.
    /// Otherwise `slot` is cleared and the sub-record's columns are skipped.
    ///
    /// # Errors
    ///
    /// Propagates the sub-record's scan errors.
    pub fn optional<T: Record>(&mut self, slot: &mut Option<T>) -> Result<(), DbError> {
        let start = self.position;
        let width = flattened::<T>().len();
        let end = start.saturating_add(width);
        let present = self
            .values
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .flatten()
            .any(|value| !value.is_null());

        if !present {
            self.position = end;
            *slot = None;
            return Ok(());
        }

        let mut inner = T::default();
        inner.read_values(self)?;
        if self.position != end {
            return Err(self.scan_error(
                start,
                format!("sub-record read {} columns, expected {width}", self.position.saturating_sub(start)),
            ));
        }
        *slot = Some(inner);
        Ok(())
    }

    fn scan_error(&self, column: usize, reason: impl std::fmt::Display) -> DbError {
        DbError::Scan {
            column,
            field: self.fields.get(column).map_or("?", |f| f.name),
            reason: reason.to_string(),
        }
    }
}

/// Build a record from a scanned buffer.
///
/// # Errors
///
/// Propagates [`DbError::Scan`] from the record's `read_values`.
pub fn hydrate<T: Record>(
    values: Vec<Option<SqlValue>>,
    fields: &[FieldDescriptor],
) -> Result<T, DbError> {
    let mut record = T::default();
    let mut reader = RowReader::new(values, fields);
    record.read_values(&mut reader)?;
    Ok(record)
}

/// Scan a result row into one slot per flattened field.
///
/// # Errors
///
/// Returns [`DbError::Scan`] if a column's type is incompatible with its field.
pub fn scan_row(row: &PgRow, fields: &[FieldDescriptor]) -> Result<Vec<Option<SqlValue>>, DbError> {
    let columns = row.len();
    fields
        .iter()
        .map(|field| {
            if field.position >= columns {
                return Ok(None);
            }
            SqlValue::decode(row, field.position, field.kind)
                .map(Some)
                .map_err(|e| DbError::Scan {
                    column: field.position,
                    field: field.name,
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Identifier generated by the store, when the statement returns one.
    pub generated_id: Option<SqlValue>,
}

impl ExecOutcome {
    /// The generated identifier as an integer, when it is one.
    pub fn generated_i64(&self) -> Option<i64> {
        match self.generated_id.as_ref()? {
            SqlValue::SmallInt(v) => v.map(i64::from),
            SqlValue::Int(v) => v.map(i64::from),
            SqlValue::BigInt(v) => *v,
            _ => None,
        }
    }
}

/// Prepare `sql` on `conn`.
///
/// # Errors
///
/// Returns [`DbError::Preparation`] on bad SQL or lost connectivity.
pub async fn prepare(conn: &mut PgConnection, sql: &str) -> Result<PgStatement<'static>, DbError> {
    let statement = Executor::prepare(&mut *conn, sql)
        .await
        .map_err(|source| DbError::Preparation {
            sql: sql.to_owned(),
            source,
        })?;
    tracing::debug!(sql, "Prepared statement");
    Ok(Statement::to_owned(&statement))
}

/// Run a query and hydrate one `T` per row, in row order.
///
/// # Errors
///
/// Returns [`DbError::ColumnCountMismatch`] before executing if the statement
/// selects more columns than `T` maps, [`DbError::Database`] if the query
/// fails, and [`DbError::Scan`] if a row cannot be distributed.
pub async fn query_records<T: Record>(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    params: &[SqlValue],
) -> Result<Vec<T>, DbError> {
    check_selected_columns::<T>(statement)?;
    let fields = flattened::<T>();

    let mut query = statement.query();
    for param in params {
        query = param.clone().bind(query);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| hydrate::<T>(scan_row(row, &fields.fields)?, &fields.fields))
        .collect()
}

fn check_selected_columns<T: Record>(statement: &PgStatement<'_>) -> Result<(), DbError> {
    let fields = flattened::<T>();
    let columns = statement.columns().len();
    if columns > fields.len() {
        return Err(DbError::ColumnCountMismatch {
            record: fields.record,
            columns,
            fields: fields.len(),
        });
    }
    Ok(())
}

/// Run a query and hydrate only its first row.
///
/// An empty result is `Ok(None)`, never an error.
///
/// # Errors
///
/// Same as [`query_records`].
pub async fn find_single_record<T: Record>(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    params: &[SqlValue],
) -> Result<Option<T>, DbError> {
    check_selected_columns::<T>(statement)?;
    let fields = flattened::<T>();

    let mut query = statement.query();
    for param in params {
        query = param.clone().bind(query);
    }
    let Some(row) = query.fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    hydrate::<T>(scan_row(&row, &fields.fields)?, &fields.fields).map(Some)
}

/// Execute a mutating statement bound from `record`'s values, skipping the
/// first `offset` flattened fields.
///
/// # Errors
///
/// Returns [`DbError::ColumnCountMismatch`] if the record's values do not
/// line up with its field list, or [`DbError::Database`] on failure.
pub async fn exec_record<T: Record>(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    record: &T,
    offset: usize,
) -> Result<ExecOutcome, DbError> {
    let values = record_values(record)?;
    execute(conn, statement, values.into_iter().skip(offset)).await
}

/// Execute a mutating statement with positional parameters.
///
/// # Errors
///
/// Returns [`DbError::Database`] if execution fails.
pub async fn execute(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    params: impl IntoIterator<Item = SqlValue>,
) -> Result<ExecOutcome, DbError> {
    let mut query = statement.query();
    for param in params {
        query = param.bind(query);
    }
    let result = query.execute(&mut *conn).await?;
    Ok(ExecOutcome {
        rows_affected: result.rows_affected(),
        generated_id: None,
    })
}

/// Execute an `INSERT ... RETURNING <column>` statement and report the
/// returned value as the generated identifier.
///
/// # Errors
///
/// Returns [`DbError::Database`] if execution fails, or [`DbError::Scan`] if
/// the returned value does not decode as `kind`.
pub async fn execute_returning(
    conn: &mut PgConnection,
    statement: &PgStatement<'_>,
    params: impl IntoIterator<Item = SqlValue>,
    kind: ScalarKind,
) -> Result<ExecOutcome, DbError> {
    let mut query = statement.query();
    for param in params {
        query = param.bind(query);
    }
    let Some(row) = query.fetch_optional(&mut *conn).await? else {
        return Ok(ExecOutcome::default());
    };
    let generated = SqlValue::decode(&row, 0, kind).map_err(|e| DbError::Scan {
        column: 0,
        field: "returning",
        reason: e.to_string(),
    })?;
    Ok(ExecOutcome {
        rows_affected: 1,
        generated_id: Some(generated),
    })
}
