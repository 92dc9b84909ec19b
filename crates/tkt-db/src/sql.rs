//! SQL fragment rendering from flattened field lists.
//!
//! Pure string building, no I/O. Every fragment takes an `offset` that drops
//! that many leading fields (typically an auto-generated identifier).
//! Placeholders are `PostgreSQL` positional parameters (`$1`, `$2`, ...).

use crate::error::DbError;
use crate::record::{flattened, FieldDescriptor, Record};

/// `(col1, col2, ...) values ($1, $2, ...)` for the fields after `offset`.
pub fn render_insert(fields: &[FieldDescriptor], offset: usize) -> String {
    let columns = render_select(fields, offset, None);
    let placeholders = (1..=fields.len().saturating_sub(offset))
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("({columns}) values ({placeholders})")
}

/// `col1 = $N, col2 = $N+1, ...` for the fields after `offset`, numbering
/// placeholders from `first_placeholder`.
pub fn render_update(fields: &[FieldDescriptor], offset: usize, first_placeholder: usize) -> String {
    fields
        .iter()
        .skip(offset)
        .zip(first_placeholder..)
        .map(|(field, n)| format!("{} = ${n}", field.column_name()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Comma-joined column list for the fields after `offset`, each prefixed
/// with `alias.` when an alias is given.
pub fn render_select(fields: &[FieldDescriptor], offset: usize, alias: Option<&str>) -> String {
    fields
        .iter()
        .skip(offset)
        .map(|field| match alias {
            Some(alias) => format!("{alias}.{}", field.column_name()),
            None => field.column_name().to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// [`render_insert`] over the flattened fields of `T`.
pub fn insert_fragment<T: Record>(offset: usize) -> String {
    render_insert(&flattened::<T>().fields, offset)
}

/// [`render_update`] over the flattened fields of `T`.
pub fn update_fragment<T: Record>(offset: usize, first_placeholder: usize) -> String {
    render_update(&flattened::<T>().fields, offset, first_placeholder)
}

/// [`render_select`] over the flattened fields of `T`.
pub fn select_fragment<T: Record>(offset: usize, alias: Option<&str>) -> String {
    render_select(&flattened::<T>().fields, offset, alias)
}

/// Check that `name` is usable as a bare SQL identifier.
///
/// Schema, table and sequence names are spliced into statement text, so
/// they are limited to ASCII letters, digits, `_` and `.`.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] otherwise.
pub fn validate_identifier(name: &str) -> Result<&str, DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_owned()))
    }
}

/// `schema.table`, validated.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] if either part is invalid.
pub fn qualified_table(schema: &str, table: &str) -> Result<String, DbError> {
    Ok(format!(
        "{}.{}",
        validate_identifier(schema)?,
        validate_identifier(table)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Customer, Person};
    use crate::record::{flatten, RecordDescriptor};

    #[test]
    fn insert_numbers_placeholders_from_one() {
        let descriptor = RecordDescriptor::new("point")
            .field::<i32>("x")
            .field::<i32>("y")
            .field::<i32>("z");
        let fields = flatten(&descriptor).fields;
        assert_eq!(render_insert(&fields, 0), "(x, y, z) values ($1, $2, $3)");
    }

    #[test]
    fn insert_offset_drops_leading_identifier() {
        assert_eq!(
            insert_fragment::<Person>(1),
            "(name, city, zip) values ($1, $2, $3)"
        );
    }

    #[test]
    fn update_reserves_leading_placeholders() {
        assert_eq!(
            update_fragment::<Person>(1, 2),
            "name = $2, city = $3, zip = $4"
        );
    }

    #[test]
    fn select_uses_column_overrides_and_alias() {
        assert_eq!(
            select_fragment::<Customer>(0, Some("c")),
            "c.id, c.full_name, c.city, c.zip, c.city, c.zip, c.created_at, c.avatar"
        );
        assert_eq!(select_fragment::<Person>(2, None), "city, zip");
    }

    #[test]
    fn offset_past_end_renders_empty_lists() {
        let fields = flatten(&RecordDescriptor::new("empty").field::<i64>("id")).fields;
        assert_eq!(render_insert(&fields, 3), "() values ()");
        assert_eq!(render_update(&fields, 1, 2), "");
    }

    #[test]
    fn identifiers_are_validated() {
        assert_eq!(qualified_table("app", "person").unwrap(), "app.person");
        assert!(validate_identifier("orders; drop table x").is_err());
        assert!(validate_identifier("").is_err());
    }
}
