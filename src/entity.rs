//! Mapping between a record type and its table.

use crate::sqlite::{TableDefinition, Value};

/// A record type stored one row per value in its own table.
///
/// The primary key columns of [`Entity::table`] are the record's identity:
/// `update` and `delete` address rows by them, and `add` replaces a row that
/// shares them. Whole-value equality, as used by `contains` and `add_unique`,
/// compares every column.
///
/// ```
/// use rust_datastore::{ColumnDefinition, DataType, Entity, TableDefinition, Value};
///
/// struct Person {
///     id: i64,
///     name: String,
/// }
///
/// impl Entity for Person {
///     fn table() -> TableDefinition {
///         TableDefinition::new("person")
///             .with_column(ColumnDefinition::new("id", DataType::Integer).primary_key())
///             .with_column(ColumnDefinition::new("name", DataType::Text).not_null())
///     }
///
///     fn to_values(&self) -> Vec<Value> {
///         vec![self.id.into(), self.name.as_str().into()]
///     }
///
///     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
///         Ok(Person { id: row.get(0)?, name: row.get(1)? })
///     }
/// }
/// ```
pub trait Entity: Sized + Send + 'static {
    /// Table definition; the table is created from it on open if absent.
    fn table() -> TableDefinition;

    /// Column values in the order of [`TableDefinition::columns`].
    fn to_values(&self) -> Vec<Value>;

    /// Decodes a row selected with every column, in column order.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}
