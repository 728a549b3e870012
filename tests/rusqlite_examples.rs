// Runs the SQL rendered from table definitions and queries against plain
// rusqlite connections, without a Datastore in between.

use rusqlite::{params_from_iter, Connection, Result};
use rust_datastore::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, IndexDefinition, Query,
    QueryOperator, TableDefinition, Value,
};
use tempfile::NamedTempFile;

fn users_table() -> TableDefinition {
    TableDefinition::new("users")
        .with_column(ColumnDefinition::new("id", DataType::Integer))
        .with_column(ColumnDefinition::new("name", DataType::Text).not_null())
        .with_column(
            ColumnDefinition::new("email", DataType::Text)
                .not_null()
                .with_constraint(ColumnConstraint::Unique),
        )
        .with_column(ColumnDefinition::new("age", DataType::Integer))
        .with_column(
            ColumnDefinition::new("active", DataType::Integer)
                .with_default(DefaultValue::Integer(1)),
        )
        .with_primary_key(&["id"])
        .with_index(IndexDefinition::new("idx_users_email", &["email"]).unique())
}

// Helper function to create an in-memory database for testing
fn create_test_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    initialize_schema(&conn)?;
    Ok(conn)
}

// Helper function to create a temporary file-based database
fn create_temp_db() -> Result<(Connection, NamedTempFile)> {
    let temp_file = NamedTempFile::new().unwrap();
    let conn = Connection::open(temp_file.path())?;
    initialize_schema(&conn)?;
    Ok((conn, temp_file))
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    let table = users_table();
    conn.execute(&table.create_table_statement(), [])?;
    for statement in table.create_index_statements() {
        conn.execute(&statement, [])?;
    }
    Ok(())
}

fn insert_user(conn: &Connection, id: i64, name: &str, email: &str, age: Option<i64>) -> Result<usize> {
    let values: Vec<Value> = vec![
        id.into(),
        name.into(),
        email.into(),
        age.into(),
        true.into(),
    ];
    conn.execute(
        &users_table().insert_or_replace_statement(),
        params_from_iter(values.iter()),
    )
}

fn select_ids(conn: &Connection, query: &Query) -> Result<Vec<i64>> {
    let sql = users_table().select_statement(query, None).unwrap();
    let mut stmt = conn.prepare(&sql.statement)?;
    let rows = stmt.query_map(params_from_iter(sql.params.iter()), |row| row.get(0))?;
    rows.collect()
}

#[tokio::test]
async fn test_schema_and_basic_operations() {
    test_schema_and_basic_operations_impl().unwrap();
}

fn test_schema_and_basic_operations_impl() -> Result<()> {
    let conn = create_test_db()?;
    // creating again is a no-op
    initialize_schema(&conn)?;

    insert_user(&conn, 1, "John Doe", "john@example.com", Some(30))?;
    insert_user(&conn, 2, "Jane Roe", "jane@example.com", None)?;

    let table = users_table();
    let count: i64 = conn.query_row(&table.count_statement(), [], |row| row.get(0))?;
    assert_eq!(count, 2);

    // update by key: every column, then the key
    let params: Vec<Value> = vec![
        1.into(),
        "John Doe".into(),
        "john@example.com".into(),
        31.into(),
        false.into(),
        1.into(),
    ];
    let changed = conn.execute(&table.update_statement().unwrap(), params_from_iter(params.iter()))?;
    assert_eq!(changed, 1);
    let (age, active): (Option<i64>, bool) = conn.query_row(
        "SELECT age, active FROM users WHERE id = ?",
        [1],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(age, Some(31));
    assert!(!active);

    let deleted = conn.execute(&table.delete_statement().unwrap(), [1])?;
    assert_eq!(deleted, 1);
    let deleted_again = conn.execute(&table.delete_statement().unwrap(), [1])?;
    assert_eq!(deleted_again, 0);

    Ok(())
}

#[tokio::test]
async fn test_rendered_filters() {
    test_rendered_filters_impl().unwrap();
}

fn test_rendered_filters_impl() -> Result<()> {
    let (conn, _file) = create_temp_db()?;
    insert_user(&conn, 1, "Ann", "ann@example.com", Some(22))?;
    insert_user(&conn, 2, "Ben", "ben@example.com", Some(41))?;
    insert_user(&conn, 3, "Cat", "cat@example.com", None)?;
    insert_user(&conn, 4, "Dan", "dan@example.org", Some(17))?;

    let by_domain = Query::new()
        .with_condition("email", QueryOperator::Like("%@example.com".into()))
        .order_by("id", true);
    assert_eq!(select_ids(&conn, &by_domain)?, vec![1, 2, 3]);

    let no_age = Query::new().with_condition("age", QueryOperator::Equal(Value::Null));
    assert_eq!(select_ids(&conn, &no_age)?, vec![3]);

    // NotEqual keeps rows whose column is NULL
    let not_41 = Query::new()
        .with_condition("age", QueryOperator::NotEqual(41.into()))
        .order_by("id", true);
    assert_eq!(select_ids(&conn, &not_41)?, vec![1, 3, 4]);

    let picked = Query::new()
        .with_condition("id", QueryOperator::In(vec![2.into(), 4.into(), 9.into()]))
        .order_by("id", false);
    assert_eq!(select_ids(&conn, &picked)?, vec![4, 2]);

    let teen_or_senior = Query::new()
        .any_of(vec![
            Query::new()
                .with_condition("age", QueryOperator::GreaterThanOrEqual(13.into()))
                .with_condition("age", QueryOperator::LessThan(20.into())),
            Query::new().with_condition("age", QueryOperator::GreaterThan(40.into())),
        ])
        .order_by("id", true);
    assert_eq!(select_ids(&conn, &teen_or_senior)?, vec![2, 4]);

    let everyone_else = Query::new().not(teen_or_senior.clone()).order_by("id", true);
    // NOT over a NULL comparison is NULL, so Cat matches neither side
    assert_eq!(select_ids(&conn, &everyone_else)?, vec![1]);

    assert_eq!(select_ids(&conn, &Query::new())?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_unique_index_is_created() {
    let conn = create_test_db().unwrap();
    insert_user(&conn, 1, "John", "same@example.com", None).unwrap();

    // OR REPLACE resolves the unique email by dropping the older row
    insert_user(&conn, 2, "Johnny", "same@example.com", None).unwrap();
    let ids = select_ids(&conn, &Query::new()).unwrap();
    assert_eq!(ids, vec![2]);

    let index_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_users_email'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(index_count, 1);
}
