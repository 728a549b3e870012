use crate::error::{Error, Result};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
            // SQLite has no boolean storage class
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(_) => Value::Text(value.as_str()?.to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

/// SQL statement with positional parameters, in binding order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Vec<Value>,
}

impl SqlQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Vec::new(),
        }
    }
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// Query operators for building advanced queries
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    /// `Equal(Value::Null)` tests for NULL.
    Equal(Value),
    /// Null-safe: a NULL column is not equal to any non-null value.
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    /// An empty list matches nothing.
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

/// One term of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field(String, QueryOperator),
    AnyOf(Vec<Query>),
    Not(Box<Query>),
}

/// Filter over an entity's columns.
///
/// A query is the conjunction of its conditions. Disjunction and negation are
/// expressed with [`Query::any_of`] and [`Query::not`], so any boolean
/// expression over the columns can be built. An empty query matches every row.
///
/// ```
/// use rust_datastore::{Query, QueryOperator};
///
/// let adults_named_a = Query::new()
///     .with_condition("age", QueryOperator::GreaterThanOrEqual(18.into()))
///     .with_condition("name", QueryOperator::Like("A%".into()));
/// let either = Query::new().any_of(vec![
///     adults_named_a,
///     Query::eq("id", 1),
/// ]);
/// assert_eq!(either.conditions.len(), 1);
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<(String, bool)>, // (field, is_ascending)
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single equality test.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new().with_condition(field, QueryOperator::Equal(value.into()))
    }

    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions
            .push(Condition::Field(field.to_string(), op));
        self
    }

    /// Adds a condition that holds when at least one of `queries` matches.
    pub fn any_of(mut self, queries: Vec<Query>) -> Self {
        self.conditions.push(Condition::AnyOf(queries));
        self
    }

    /// Adds a condition that holds when `query` does not match.
    pub fn not(mut self, query: Query) -> Self {
        self.conditions.push(Condition::Not(Box::new(query)));
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order_by.push((field.to_string(), ascending));
        self
    }

    /// Renders the boolean expression and appends its parameters.
    pub(crate) fn render_predicate(
        &self,
        table: &TableDefinition,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        if self.conditions.is_empty() {
            return Ok("1".to_string());
        }
        let mut terms = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let term = match condition {
                Condition::Field(field, op) => {
                    let column = table.checked_column(field)?;
                    render_operator(&column, op, params)
                }
                Condition::AnyOf(queries) if queries.is_empty() => "0".to_string(),
                Condition::AnyOf(queries) => {
                    let mut alternatives = Vec::with_capacity(queries.len());
                    for query in queries {
                        let inner = query.render_predicate(table, params)?;
                        if query.conditions.len() > 1 {
                            alternatives.push(format!("({})", inner));
                        } else {
                            alternatives.push(inner);
                        }
                    }
                    alternatives.join(" OR ")
                }
                Condition::Not(query) => {
                    format!("NOT ({})", query.render_predicate(table, params)?)
                }
            };
            terms.push(format!("({})", term));
        }
        Ok(terms.join(" AND "))
    }

    pub(crate) fn render_order(&self, table: &TableDefinition) -> Result<String> {
        if self.order_by.is_empty() {
            return Ok(String::new());
        }
        let mut keys = Vec::with_capacity(self.order_by.len());
        for (field, ascending) in &self.order_by {
            let column = table.checked_column(field)?;
            keys.push(format!("{} {}", column, if *ascending { "ASC" } else { "DESC" }));
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }
}

fn render_operator(column: &str, op: &QueryOperator, params: &mut Vec<Value>) -> String {
    let (sql_op, value) = match op {
        QueryOperator::Equal(Value::Null) | QueryOperator::IsNull => {
            return format!("{} IS NULL", column)
        }
        QueryOperator::NotEqual(Value::Null) | QueryOperator::IsNotNull => {
            return format!("{} IS NOT NULL", column)
        }
        QueryOperator::In(values) if values.is_empty() => return "0".to_string(),
        QueryOperator::In(values) => {
            params.extend(values.iter().cloned());
            let slots = vec!["?"; values.len()].join(", ");
            return format!("{} IN ({})", column, slots);
        }
        QueryOperator::Equal(v) => ("=", v.clone()),
        QueryOperator::NotEqual(v) => ("IS NOT", v.clone()),
        QueryOperator::GreaterThan(v) => (">", v.clone()),
        QueryOperator::GreaterThanOrEqual(v) => (">=", v.clone()),
        QueryOperator::LessThan(v) => ("<", v.clone()),
        QueryOperator::LessThanOrEqual(v) => ("<=", v.clone()),
        QueryOperator::Like(pattern) => ("LIKE", Value::Text(pattern.clone())),
    };
    params.push(value);
    format!("{} {} ?", column, sql_op)
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table backing one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Primary key columns: the explicit key if one was given, otherwise the
    /// columns carrying [`ColumnConstraint::PrimaryKey`].
    pub fn primary_key_columns(&self) -> Vec<&str> {
        if !self.primary_key.is_empty() {
            return self.primary_key.iter().map(String::as_str).collect();
        }
        self.columns
            .iter()
            .filter(|c| c.constraints.contains(&ColumnConstraint::PrimaryKey))
            .map(|c| c.name.as_str())
            .collect()
    }

    fn checked_column(&self, field: &str) -> Result<String> {
        match self.column_index(field) {
            Some(_) => Ok(quote_ident(field)),
            None => Err(Error::UnknownColumn {
                table: self.name.clone(),
                column: field.to_string(),
            }),
        }
    }

    /// Checks that every column referenced by the key and indexes exists.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::InvalidSchema(format!("table `{}` has no columns", self.name)));
        }
        for key in self.primary_key.iter() {
            self.checked_column(key)?;
        }
        for index in &self.indexes {
            for column in &index.columns {
                self.checked_column(column)?;
            }
        }
        Ok(())
    }

    pub fn create_table_statement(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDefinition::render).collect();
        let key = self.primary_key_columns();
        if !key.is_empty() {
            let key: Vec<String> = key.into_iter().map(quote_ident).collect();
            parts.push(format!("PRIMARY KEY ({})", key.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            parts.join(", ")
        )
    }

    pub fn create_index_statements(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|index| index.render(&self.name))
            .collect()
    }

    fn quoted_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn count_statement(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", quote_ident(&self.name))
    }

    pub fn insert_or_replace_statement(&self) -> String {
        let slots = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            self.quoted_columns(),
            slots
        )
    }

    /// Select statement for `query`, with an optional row limit.
    pub fn select_statement(&self, query: &Query, limit: Option<u32>) -> Result<SqlQuery> {
        let mut params = Vec::new();
        let predicate = query.render_predicate(self, &mut params)?;
        let mut statement = format!(
            "SELECT {} FROM {} WHERE {}{}",
            self.quoted_columns(),
            quote_ident(&self.name),
            predicate,
            query.render_order(self)?
        );
        if let Some(limit) = limit {
            statement.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(SqlQuery::new(statement).with_params(params))
    }

    /// Delete statement keyed by primary key; parameters are the key values.
    pub fn delete_statement(&self) -> Result<String> {
        Ok(format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&self.name),
            self.key_predicate()?
        ))
    }

    /// Update statement keyed by primary key; parameters are every column
    /// value in order, then the key values.
    pub fn update_statement(&self) -> Result<String> {
        let assignments: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} = ?", quote_ident(&c.name)))
            .collect();
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(&self.name),
            assignments.join(", "),
            self.key_predicate()?
        ))
    }

    fn key_predicate(&self) -> Result<String> {
        let key = self.primary_key_columns();
        if key.is_empty() {
            return Err(Error::MissingPrimaryKey(self.name.clone()));
        }
        Ok(key
            .into_iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" AND "))
    }

    /// Picks the primary key values out of a full row of values.
    pub fn key_values(&self, values: &[Value]) -> Result<Vec<Value>> {
        let key = self.primary_key_columns();
        if key.is_empty() {
            return Err(Error::MissingPrimaryKey(self.name.clone()));
        }
        key.into_iter()
            .map(|column| {
                self.column_index(column)
                    .and_then(|i| values.get(i).cloned())
                    .ok_or_else(|| Error::UnknownColumn {
                        table: self.name.clone(),
                        column: column.to_string(),
                    })
            })
            .collect()
    }

    /// Query matching rows equal to `values` in every column.
    pub fn whole_value_query(&self, values: &[Value]) -> Query {
        self.columns
            .iter()
            .zip(values)
            .fold(Query::new(), |query, (column, value)| {
                query.with_condition(&column.name, QueryOperator::Equal(value.clone()))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
    pub default_value: Option<DefaultValue>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
            default_value: None,
        }
    }

    pub fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn primary_key(self) -> Self {
        self.with_constraint(ColumnConstraint::PrimaryKey)
    }

    pub fn not_null(self) -> Self {
        self.with_constraint(ColumnConstraint::NotNull)
    }

    pub fn with_default(mut self, value: DefaultValue) -> Self {
        self.default_value = Some(value);
        self
    }

    fn render(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.as_sql());
        for constraint in &self.constraints {
            match constraint {
                // rendered as a table constraint
                ColumnConstraint::PrimaryKey => {}
                ColumnConstraint::NotNull => sql.push_str(" NOT NULL"),
                ColumnConstraint::Unique => sql.push_str(" UNIQUE"),
            }
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.as_sql());
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
}

impl DataType {
    pub fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(String),
    Real(f64),
    Null,
    CurrentTimestamp,
}

impl DefaultValue {
    fn as_sql(&self) -> String {
        match self {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::Real(f) => format!("{:?}", f),
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn render(&self, table: &str) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(&self.name),
            quote_ident(table),
            columns.join(", ")
        )
    }
}
