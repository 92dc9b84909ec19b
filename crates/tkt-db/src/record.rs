//! Record type descriptors and field flattening.
//!
//! A mappable type implements [`Record`]: it describes its fields in
//! declaration order and knows how to push its values into a
//! [`ParamWriter`] and pull them back from a [`RowReader`], in that same
//! order. [`flatten`] turns a descriptor into the ordered list of scalar
//! columns that both directions agree on:
//!
//! ```text
//! person { id, name, home: Address { city, zip }, office: Option<Address>, tags: Vec<_> }
//!
//!   position  0    1     2     3     4     5
//!   column    id   name  city  zip   city  zip      (tags skipped)
//!                        \__home__/  \_office__/
//! ```
//!
//! Mandatory and optional sub-records both expand in place. List fields are
//! never part of a row; they are loaded by separate queries.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::error::DbError;
use crate::hydrate::{ParamWriter, RowReader};
use crate::value::{ColumnValue, ScalarKind};

/// A type that maps onto a relational row.
///
/// The three methods must agree on field order: `write_values` pushes and
/// `read_values` consumes exactly one value per flattened field of
/// `descriptor()`.
///
/// ```rust,ignore
/// #[derive(Debug, Default)]
/// struct Person { id: i64, name: String, address: Option<Address> }
///
/// impl Record for Person {
///     fn descriptor() -> RecordDescriptor {
///         RecordDescriptor::new("person")
///             .field::<i64>("id")
///             .field::<String>("name")
///             .optional::<Address>("address")
///     }
///
///     fn write_values(&self, out: &mut ParamWriter) {
///         out.push(&self.id);
///         out.push(&self.name);
///         out.optional(self.address.as_ref());
///     }
///
///     fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError> {
///         row.read(&mut self.id)?;
///         row.read(&mut self.name)?;
///         row.optional(&mut self.address)
///     }
/// }
/// ```
pub trait Record: Default + Send + Sync + 'static {
    /// Describe this type's fields in declaration order.
    fn descriptor() -> RecordDescriptor;

    /// Push every mapped value, in flattened order.
    fn write_values(&self, out: &mut ParamWriter);

    /// Fill this instance from a scanned row, in flattened order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Scan`] if a column cannot be converted into its field.
    fn read_values(&mut self, row: &mut RowReader<'_>) -> Result<(), DbError>;
}

/// Function producing a sub-record's descriptor.
pub type DescriptorFn = fn() -> RecordDescriptor;

/// How a declared field participates in row mapping.
#[derive(Debug, Clone, Copy)]
pub enum FieldShape {
    /// A single column.
    Scalar(ScalarKind),
    /// A mandatory sub-record, expanded in place.
    Nested(DescriptorFn),
    /// An optional sub-record, expanded in place; present only when one of
    /// its columns is non-null.
    Optional(DescriptorFn),
    /// A list, never mapped inline.
    List,
}

/// A field as declared on a record type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name.
    pub name: &'static str,
    /// Column name override.
    pub column: Option<&'static str>,
    /// Mapping shape.
    pub shape: FieldShape,
}

/// Compile-time description of a record type.
#[derive(Debug, Clone)]
pub struct RecordDescriptor {
    /// Type name, also the table name for entity operations.
    pub name: &'static str,
    /// Identifier field override. Defaults to the field named `id`.
    pub identifier: Option<&'static str>,
    /// Fields in declaration order.
    pub fields: Vec<FieldDef>,
}

impl RecordDescriptor {
    /// Start describing a record type.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            identifier: None,
            fields: Vec::new(),
        }
    }

    /// Declare a scalar field stored in a column of the same name.
    #[must_use]
    pub fn field<T: ColumnValue>(self, name: &'static str) -> Self {
        self.push(name, None, FieldShape::Scalar(T::KIND))
    }

    /// Declare a scalar field stored in a differently named column.
    #[must_use]
    pub fn column<T: ColumnValue>(self, name: &'static str, column: &'static str) -> Self {
        self.push(name, Some(column), FieldShape::Scalar(T::KIND))
    }

    /// Declare a mandatory sub-record.
    #[must_use]
    pub fn nested<T: Record>(self, name: &'static str) -> Self {
        self.push(name, None, FieldShape::Nested(T::descriptor))
    }

    /// Declare an optional sub-record.
    #[must_use]
    pub fn optional<T: Record>(self, name: &'static str) -> Self {
        self.push(name, None, FieldShape::Optional(T::descriptor))
    }

    /// Declare a list field. It is skipped by the mapping.
    #[must_use]
    pub fn list(self, name: &'static str) -> Self {
        self.push(name, None, FieldShape::List)
    }

    /// Use `field` instead of `id` as the identifier for update and delete.
    #[must_use]
    pub const fn identifier(mut self, field: &'static str) -> Self {
        self.identifier = Some(field);
        self
    }

    fn push(mut self, name: &'static str, column: Option<&'static str>, shape: FieldShape) -> Self {
        self.fields.push(FieldDef { name, column, shape });
        self
    }
}

/// One scalar column of a flattened record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: &'static str,
    /// Column name override.
    pub column: Option<&'static str>,
    /// Zero-based position in rows and parameter lists.
    pub position: usize,
    /// Storage kind.
    pub kind: ScalarKind,
    /// Nesting depth; top-level fields are at depth 0.
    pub depth: usize,
    /// Whether the field lives inside an optional sub-record.
    pub optional: bool,
}

impl FieldDescriptor {
    /// The column name: the override when present, otherwise the field name.
    pub fn column_name(&self) -> &'static str {
        self.column.unwrap_or(self.name)
    }

    /// Whether the field holds a point in time.
    pub const fn is_time_value(&self) -> bool {
        self.kind.is_time_value()
    }

    /// Whether the field holds a raw byte sequence.
    pub const fn is_raw_byte_value(&self) -> bool {
        self.kind.is_raw_byte_value()
    }
}

/// The flattened field list of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedFields {
    /// Type name the list was built from.
    pub record: &'static str,
    /// Identifier field override declared by the type.
    pub identifier: Option<&'static str>,
    /// Scalar columns in row order.
    pub fields: Vec<FieldDescriptor>,
}

impl FlattenedFields {
    /// Number of flattened columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record maps no columns at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The top-level identifier field: the declared override, or the field
    /// named `id` compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingIdentifierField`] if no such field exists.
    pub fn identifier_field(&self) -> Result<&FieldDescriptor, DbError> {
        let wanted = self.identifier.unwrap_or("id");
        self.fields
            .iter()
            .filter(|f| f.depth == 0)
            .find(|f| f.name.eq_ignore_ascii_case(wanted))
            .ok_or(DbError::MissingIdentifierField {
                record: self.record,
            })
    }
}

/// Flatten a descriptor into its ordered scalar columns.
pub fn flatten(descriptor: &RecordDescriptor) -> FlattenedFields {
    let mut fields = Vec::new();
    expand(descriptor, 0, false, &mut fields);
    FlattenedFields {
        record: descriptor.name,
        identifier: descriptor.identifier,
        fields,
    }
}

fn expand(
    descriptor: &RecordDescriptor,
    depth: usize,
    optional: bool,
    out: &mut Vec<FieldDescriptor>,
) {
    for def in &descriptor.fields {
        match def.shape {
            FieldShape::Scalar(kind) => out.push(FieldDescriptor {
                name: def.name,
                column: def.column,
                position: out.len(),
                kind,
                depth,
                optional,
            }),
            FieldShape::Nested(inner) => expand(&inner(), depth.saturating_add(1), optional, out),
            FieldShape::Optional(inner) => expand(&inner(), depth.saturating_add(1), true, out),
            FieldShape::List => {}
        }
    }
}

static FIELD_LISTS: LazyLock<RwLock<HashMap<TypeId, Arc<FlattenedFields>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The flattened field list of `T`, built on first use and shared afterwards.
pub fn flattened<T: Record>() -> Arc<FlattenedFields> {
    let key = TypeId::of::<T>();
    {
        let lists = FIELD_LISTS.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = lists.get(&key) {
            return Arc::clone(list);
        }
    }
    let built = Arc::new(flatten(&T::descriptor()));
    let mut lists = FIELD_LISTS.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(lists.entry(key).or_insert(built))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::fixtures::{Address, Customer, Person};

    #[test]
    fn scalar_fields_keep_declaration_order() {
        let list = flatten(&Address::descriptor());
        let names: Vec<_> = list.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, ["city", "zip"]);
        assert_eq!(list.fields[1].position, 1);
    }

    #[test]
    fn nested_records_expand_in_place_and_lists_are_skipped() {
        let list = flatten(&Customer::descriptor());
        let columns: Vec<_> = list.fields.iter().map(FieldDescriptor::column_name).collect();
        assert_eq!(
            columns,
            ["id", "full_name", "city", "zip", "city", "zip", "created_at", "avatar"]
        );
        let positions: Vec<_> = list.fields.iter().map(|f| f.position).collect();
        assert_eq!(positions, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn optional_sub_record_fields_are_flagged() {
        let list = flatten(&Customer::descriptor());
        let flags: Vec<_> = list.fields.iter().map(|f| f.optional).collect();
        assert_eq!(flags, [false, false, false, false, true, true, false, false]);
        assert_eq!(list.fields[2].depth, 1);
    }

    #[test]
    fn time_and_bytes_are_terminal_scalars() {
        let list = flatten(&Customer::descriptor());
        assert!(list.fields[6].is_time_value());
        assert!(list.fields[7].is_raw_byte_value());
        assert!(!list.fields[0].is_time_value());
    }

    #[test]
    fn identifier_defaults_to_id() {
        let list = flatten(&Person::descriptor());
        let id = list.identifier_field().unwrap();
        assert_eq!(id.position, 0);
    }

    #[test]
    fn identifier_override_is_honored() {
        let descriptor = RecordDescriptor::new("ticket")
            .field::<String>("code")
            .column::<i64>("number", "ticket_no")
            .identifier("number");
        let list = flatten(&descriptor);
        let id = list.identifier_field().unwrap();
        assert_eq!(id.column_name(), "ticket_no");
        assert_eq!(id.position, 1);
    }

    #[test]
    fn nested_id_is_not_an_identifier() {
        let descriptor = RecordDescriptor::new("audit")
            .field::<DateTime<Utc>>("at")
            .nested::<Person>("actor");
        let err = flatten(&descriptor).identifier_field().unwrap_err();
        assert!(matches!(err, DbError::MissingIdentifierField { record: "audit" }));
    }

    #[test]
    fn cached_list_is_shared() {
        let a = flattened::<Customer>();
        let b = flattened::<Customer>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 8);
    }
}
