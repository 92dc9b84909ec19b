//! Typed, nullable column values.
//!
//! [`SqlValue`] is the unit of both directions of the mapping: rows are
//! scanned into a buffer of `SqlValue`s before being distributed into a
//! record, and records are flattened into `SqlValue`s before being bound as
//! statement parameters. Every variant carries its own `Option` so that a
//! NULL still knows which `PostgreSQL` type it must be bound as.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

use crate::error::ValueError;

/// The scalar storage kind of a flattened field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// `BOOLEAN`
    Bool,
    /// `SMALLINT`
    SmallInt,
    /// `INTEGER`
    Int,
    /// `BIGINT`
    BigInt,
    /// `REAL`
    Real,
    /// `DOUBLE PRECISION`
    Double,
    /// `TEXT` / `VARCHAR`
    Text,
    /// `BYTEA`
    Bytes,
    /// `TIMESTAMPTZ`
    Timestamp,
    /// `DATE`
    Date,
    /// `UUID`
    Uuid,
    /// `JSONB`
    Json,
}

impl ScalarKind {
    /// Whether this kind holds a point in time.
    pub const fn is_time_value(self) -> bool {
        matches!(self, Self::Timestamp | Self::Date)
    }

    /// Whether this kind holds a raw byte sequence.
    pub const fn is_raw_byte_value(self) -> bool {
        matches!(self, Self::Bytes)
    }
}

/// A single nullable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Boolean value.
    Bool(Option<bool>),
    /// 16-bit integer.
    SmallInt(Option<i16>),
    /// 32-bit integer.
    Int(Option<i32>),
    /// 64-bit integer.
    BigInt(Option<i64>),
    /// 32-bit float.
    Real(Option<f32>),
    /// 64-bit float.
    Double(Option<f64>),
    /// Text.
    Text(Option<String>),
    /// Raw bytes.
    Bytes(Option<Vec<u8>>),
    /// Timestamp with time zone.
    Timestamp(Option<DateTime<Utc>>),
    /// Calendar date.
    Date(Option<NaiveDate>),
    /// UUID.
    Uuid(Option<Uuid>),
    /// JSON document.
    Json(Option<serde_json::Value>),
}

impl SqlValue {
    /// A typed NULL of the given kind.
    pub const fn null(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(None),
            ScalarKind::SmallInt => Self::SmallInt(None),
            ScalarKind::Int => Self::Int(None),
            ScalarKind::BigInt => Self::BigInt(None),
            ScalarKind::Real => Self::Real(None),
            ScalarKind::Double => Self::Double(None),
            ScalarKind::Text => Self::Text(None),
            ScalarKind::Bytes => Self::Bytes(None),
            ScalarKind::Timestamp => Self::Timestamp(None),
            ScalarKind::Date => Self::Date(None),
            ScalarKind::Uuid => Self::Uuid(None),
            ScalarKind::Json => Self::Json(None),
        }
    }

    /// The kind of this value.
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::SmallInt(_) => ScalarKind::SmallInt,
            Self::Int(_) => ScalarKind::Int,
            Self::BigInt(_) => ScalarKind::BigInt,
            Self::Real(_) => ScalarKind::Real,
            Self::Double(_) => ScalarKind::Double,
            Self::Text(_) => ScalarKind::Text,
            Self::Bytes(_) => ScalarKind::Bytes,
            Self::Timestamp(_) => ScalarKind::Timestamp,
            Self::Date(_) => ScalarKind::Date,
            Self::Uuid(_) => ScalarKind::Uuid,
            Self::Json(_) => ScalarKind::Json,
        }
    }

    /// Whether this value is NULL.
    pub const fn is_null(&self) -> bool {
        match self {
            Self::Bool(v) => v.is_none(),
            Self::SmallInt(v) => v.is_none(),
            Self::Int(v) => v.is_none(),
            Self::BigInt(v) => v.is_none(),
            Self::Real(v) => v.is_none(),
            Self::Double(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::Bytes(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::Uuid(v) => v.is_none(),
            Self::Json(v) => v.is_none(),
        }
    }

    /// Scan column `index` of `row` as a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the column is missing or its `PostgreSQL`
    /// type is incompatible with `kind`.
    pub fn decode(row: &PgRow, index: usize, kind: ScalarKind) -> Result<Self, sqlx::Error> {
        Ok(match kind {
            ScalarKind::Bool => Self::Bool(row.try_get(index)?),
            ScalarKind::SmallInt => Self::SmallInt(row.try_get(index)?),
            ScalarKind::Int => Self::Int(row.try_get(index)?),
            ScalarKind::BigInt => Self::BigInt(row.try_get(index)?),
            ScalarKind::Real => Self::Real(row.try_get(index)?),
            ScalarKind::Double => Self::Double(row.try_get(index)?),
            ScalarKind::Text => Self::Text(row.try_get(index)?),
            ScalarKind::Bytes => Self::Bytes(row.try_get(index)?),
            ScalarKind::Timestamp => Self::Timestamp(row.try_get(index)?),
            ScalarKind::Date => Self::Date(row.try_get(index)?),
            ScalarKind::Uuid => Self::Uuid(row.try_get(index)?),
            ScalarKind::Json => Self::Json(row.try_get(index)?),
        })
    }

    /// Bind this value as the next positional parameter of `query`.
    pub fn bind(self, query: Query<'_, Postgres, PgArguments>) -> Query<'_, Postgres, PgArguments> {
        match self {
            Self::Bool(v) => query.bind(v),
            Self::SmallInt(v) => query.bind(v),
            Self::Int(v) => query.bind(v),
            Self::BigInt(v) => query.bind(v),
            Self::Real(v) => query.bind(v),
            Self::Double(v) => query.bind(v),
            Self::Text(v) => query.bind(v),
            Self::Bytes(v) => query.bind(v),
            Self::Timestamp(v) => query.bind(v),
            Self::Date(v) => query.bind(v),
            Self::Uuid(v) => query.bind(v),
            Self::Json(v) => query.bind(v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_owned()))
    }
}

/// A Rust type stored in exactly one column.
///
/// Implemented for every supported scalar and for `Option` of each, which
/// maps NULL to `None`. Non-optional implementations reject NULL.
pub trait ColumnValue: Sized {
    /// Storage kind of the column.
    const KIND: ScalarKind;

    /// Convert to a bindable value.
    fn to_sql(&self) -> SqlValue;

    /// Convert from a scanned value.
    fn from_sql(value: SqlValue) -> Result<Self, ValueError>;
}

macro_rules! column_value {
    ($ty:ty, $variant:ident) => {
        impl ColumnValue for $ty {
            const KIND: ScalarKind = ScalarKind::$variant;

            fn to_sql(&self) -> SqlValue {
                SqlValue::$variant(Some(self.clone()))
            }

            fn from_sql(value: SqlValue) -> Result<Self, ValueError> {
                match value {
                    SqlValue::$variant(Some(v)) => Ok(v),
                    SqlValue::$variant(None) => Err(ValueError::UnexpectedNull),
                    other => Err(ValueError::KindMismatch {
                        expected: Self::KIND,
                        found: other.kind(),
                    }),
                }
            }
        }

        impl From<$ty> for SqlValue {
            fn from(value: $ty) -> Self {
                Self::$variant(Some(value))
            }
        }

        impl From<Option<$ty>> for SqlValue {
            fn from(value: Option<$ty>) -> Self {
                Self::$variant(value)
            }
        }
    };
}

column_value!(bool, Bool);
column_value!(i16, SmallInt);
column_value!(i32, Int);
column_value!(i64, BigInt);
column_value!(f32, Real);
column_value!(f64, Double);
column_value!(String, Text);
column_value!(Vec<u8>, Bytes);
column_value!(DateTime<Utc>, Timestamp);
column_value!(NaiveDate, Date);
column_value!(Uuid, Uuid);
column_value!(serde_json::Value, Json);

impl<T: ColumnValue> ColumnValue for Option<T> {
    const KIND: ScalarKind = T::KIND;

    fn to_sql(&self) -> SqlValue {
        self.as_ref()
            .map_or_else(|| SqlValue::null(T::KIND), ColumnValue::to_sql)
    }

    fn from_sql(value: SqlValue) -> Result<Self, ValueError> {
        if value.kind() != T::KIND {
            return Err(ValueError::KindMismatch {
                expected: T::KIND,
                found: value.kind(),
            });
        }
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql(value).map(Some)
        }
    }
}

/// Build a `Vec<SqlValue>` of statement parameters.
///
/// ```rust,ignore
/// let people: Vec<Person> = ctx
///     .query_records("select id, name from app.person where name = $1 and age > $2", &sql_params!["Ada", 30_i32])
///     .await?;
/// ```
#[macro_export]
macro_rules! sql_params {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::SqlValue::from($value)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_keeps_its_kind() {
        let v = SqlValue::null(ScalarKind::Timestamp);
        assert!(v.is_null());
        assert_eq!(v.kind(), ScalarKind::Timestamp);
    }

    #[test]
    fn time_and_bytes_flags() {
        assert!(ScalarKind::Timestamp.is_time_value());
        assert!(ScalarKind::Date.is_time_value());
        assert!(!ScalarKind::Text.is_time_value());
        assert!(ScalarKind::Bytes.is_raw_byte_value());
        assert!(!ScalarKind::Json.is_raw_byte_value());
    }

    #[test]
    fn non_optional_rejects_null() {
        let err = i64::from_sql(SqlValue::BigInt(None));
        assert_eq!(err, Err(ValueError::UnexpectedNull));
    }

    #[test]
    fn optional_maps_null_to_none() {
        assert_eq!(Option::<String>::from_sql(SqlValue::Text(None)), Ok(None));
        assert_eq!(
            Option::<String>::from_sql(SqlValue::Text(Some("NY".to_owned()))),
            Ok(Some("NY".to_owned()))
        );
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let err = String::from_sql(SqlValue::Int(Some(3)));
        assert_eq!(
            err,
            Err(ValueError::KindMismatch {
                expected: ScalarKind::Text,
                found: ScalarKind::Int,
            })
        );
        let err = Option::<i32>::from_sql(SqlValue::Text(None));
        assert!(err.is_err());
    }

    #[test]
    fn optional_none_binds_typed_null() {
        let v: Option<Uuid> = None;
        assert_eq!(v.to_sql(), SqlValue::Uuid(None));
    }

    #[test]
    fn params_macro_converts_each_value() {
        let params = sql_params!["Ada", 7_i64, Some(true), Option::<i32>::None];
        assert_eq!(
            params,
            vec![
                SqlValue::Text(Some("Ada".to_owned())),
                SqlValue::BigInt(Some(7)),
                SqlValue::Bool(Some(true)),
                SqlValue::Int(None),
            ]
        );
    }
}
