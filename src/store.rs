//! Typed datastore: one SQLite file, one table, one entity type.

use crate::config::DatastoreConfig;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::sqlite::{Query, SqlQuery, TableDefinition, Value};
use rusqlite::{params_from_iter, Connection, TransactionBehavior};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn, Span};

/// Outcome of [`Datastore::delete_range`]. Items that failed are listed by
/// their position in the input; the rest were deleted.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failures: Vec<(usize, Error)>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Persistent collection of `T` records backed by a SQLite file.
///
/// Nothing touches the filesystem until [`open`](Self::open). Every
/// operation is async and runs its SQLite work on the blocking pool, so it
/// must be awaited inside a Tokio runtime. Calls on one store are serialized
/// on its connection; failures are logged in the store's span and returned.
pub struct Datastore<T> {
    config: DatastoreConfig,
    path: PathBuf,
    table: Arc<TableDefinition>,
    conn: Arc<Mutex<Option<Connection>>>,
    open: Arc<AtomicBool>,
    span: Span,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Datastore<T> {
    /// Store at `folder/name.db`.
    pub fn new(folder: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self> {
        Self::from_config(DatastoreConfig::new(folder, name))
    }

    /// Store at `folder/sub/.../name.db`.
    pub fn with_subfolders<I, S>(
        folder: impl Into<PathBuf>,
        subfolders: I,
        name: impl Into<String>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(DatastoreConfig::new(folder, name).with_subfolders(subfolders))
    }

    pub fn from_config(config: DatastoreConfig) -> Result<Self> {
        let table = T::table();
        let span = tracing::info_span!("datastore", name = %config.name, table = %table.name);
        if let Err(err) = config.validate() {
            span.in_scope(|| error!(error = %err, "invalid datastore location"));
            return Err(err);
        }
        Ok(Self {
            path: config.db_path(),
            config,
            table: Arc::new(table),
            conn: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            span,
            _entity: PhantomData,
        })
    }

    /// Replaces the span every log event of this store is recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// File name of the database, e.g. `people.db`
    pub fn db_name(&self) -> String {
        self.config.file_name()
    }

    /// Folder holding the database file
    pub fn folder(&self) -> PathBuf {
        self.config.folder_path()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Creates the folder, opens the database file and creates the table and
    /// its indexes if absent. Reopening replaces the current connection.
    pub async fn open(&self) -> Result<()> {
        let result = self.open_connection().await;
        if result.is_ok() {
            self.span
                .in_scope(|| debug!(path = %self.path.display(), "datastore opened"));
        }
        self.logged("open", result)
    }

    async fn open_connection(&self) -> Result<()> {
        self.table.validate()?;
        let folder = self.config.folder_path();
        let path = self.path.clone();
        let busy_timeout = Duration::from_millis(self.config.busy_timeout_ms);
        let table = Arc::clone(&self.table);
        let slot = Arc::clone(&self.conn);
        let open = Arc::clone(&self.open);
        let stale = tokio::task::spawn_blocking(move || -> Result<Option<rusqlite::Error>> {
            std::fs::create_dir_all(&folder)?;
            let conn = Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            conn.execute(&table.create_table_statement(), [])?;
            for statement in table.create_index_statements() {
                conn.execute(&statement, [])?;
            }
            let mut slot = slot.lock().map_err(|_| Error::Poisoned)?;
            let previous = slot.replace(conn);
            open.store(true, Ordering::Release);
            // the new connection is already live; a failed close of the old
            // one only leaks that handle
            Ok(previous.and_then(|previous| previous.close().err().map(|(_, err)| err)))
        })
        .await??;
        if let Some(err) = stale {
            self.span
                .in_scope(|| warn!(error = %err, "previous connection did not close cleanly"));
        }
        Ok(())
    }

    /// Releases the connection. Closing a store that is not open does nothing.
    pub async fn close(&self) -> Result<()> {
        let slot = Arc::clone(&self.conn);
        let open = Arc::clone(&self.open);
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut slot = slot.lock().map_err(|_| Error::Poisoned)?;
            open.store(false, Ordering::Release);
            match slot.take() {
                Some(conn) => conn.close().map_err(|(_, err)| Error::from(err)),
                None => Ok(()),
            }
        })
        .await
        .map_err(Error::from)
        .and_then(|inner| inner);
        if result.is_ok() {
            self.span.in_scope(|| debug!("datastore closed"));
        }
        self.logged("close", result)
    }

    pub async fn count(&self) -> Result<usize> {
        let result = self
            .with_connection(|conn, table| {
                let count: i64 = conn.query_row(&table.count_statement(), [], |row| row.get(0))?;
                Ok(usize::try_from(count).unwrap_or_default())
            })
            .await;
        self.logged("count", result)
    }

    /// Inserts `item`, replacing any row with the same primary key.
    pub async fn add(&self, item: &T) -> Result<()> {
        let result = match self.row_values(item) {
            Ok(values) => {
                self.with_connection(move |conn, table| insert(conn, table, &values))
                    .await
            }
            Err(err) => Err(err),
        };
        self.logged("add", result)
    }

    /// Inserts `item` unless a row equal to it in every column exists.
    /// Returns whether a row was inserted.
    pub async fn add_unique(&self, item: &T) -> Result<bool> {
        let result = match self.row_values(item) {
            Ok(values) => {
                self.with_connection(move |conn, table| insert_unless_present(conn, table, &values))
                    .await
            }
            Err(err) => Err(err),
        };
        self.logged("add_unique", result)
    }

    /// Inserts every item in order, replacing on key collision. The first
    /// failure stops the batch; rows inserted before it stay. Returns the
    /// number of rows written.
    pub async fn add_range(&self, items: &[T]) -> Result<usize> {
        let rows = self.batch_values(items);
        let result = self
            .with_connection(move |conn, table| {
                let mut written = 0;
                for (index, values) in rows.into_iter().enumerate() {
                    values
                        .and_then(|values| insert(conn, table, &values))
                        .map_err(|err| Error::Batch {
                            index,
                            source: Box::new(err),
                        })?;
                    written += 1;
                }
                Ok(written)
            })
            .await;
        if let Ok(written) = &result {
            self.span.in_scope(|| debug!(written, "add_range finished"));
        }
        self.logged("add_range", result)
    }

    /// Like [`add_unique`](Self::add_unique) for each item in order. Each
    /// item is committed before the next is checked, so repeats inside
    /// `items` are skipped as well. The first failure stops the batch, as in
    /// [`add_range`](Self::add_range). Returns the number of rows inserted.
    pub async fn add_range_unique(&self, items: &[T]) -> Result<usize> {
        let rows = self.batch_values(items);
        let result = self
            .with_connection(move |conn, table| {
                let mut inserted = 0;
                for (index, values) in rows.into_iter().enumerate() {
                    let added = values
                        .and_then(|values| insert_unless_present(conn, table, &values))
                        .map_err(|err| Error::Batch {
                            index,
                            source: Box::new(err),
                        })?;
                    if added {
                        inserted += 1;
                    }
                }
                Ok(inserted)
            })
            .await;
        if let Ok(inserted) = &result {
            self.span
                .in_scope(|| debug!(inserted, requested = items.len(), "add_range_unique finished"));
        }
        self.logged("add_range_unique", result)
    }

    /// Deletes the row with `item`'s primary key; `NotFound` if none exists.
    pub async fn delete(&self, item: &T) -> Result<()> {
        let result = match self.key_values(item) {
            Ok(key) => {
                self.with_connection(move |conn, table| delete_by_key(conn, table, &key))
                    .await
            }
            Err(err) => Err(err),
        };
        self.logged("delete", result)
    }

    /// Deletes every item in order. A failing item is logged and recorded in
    /// the report, and the remaining items are still deleted.
    pub async fn delete_range(&self, items: &[T]) -> Result<DeleteReport> {
        let keys: Vec<Result<Vec<Value>>> = items.iter().map(|item| self.key_values(item)).collect();
        let result = self
            .with_connection(move |conn, table| {
                let mut report = DeleteReport::default();
                for (index, key) in keys.into_iter().enumerate() {
                    match key.and_then(|key| delete_by_key(conn, table, &key)) {
                        Ok(()) => report.deleted += 1,
                        Err(err) => report.failures.push((index, err)),
                    }
                }
                Ok(report)
            })
            .await;
        if let Ok(report) = &result {
            self.span.in_scope(|| {
                for (index, err) in &report.failures {
                    log_failure("delete_range", err, Some(*index));
                }
                debug!(
                    deleted = report.deleted,
                    failed = report.failures.len(),
                    "delete_range finished"
                );
            });
        }
        self.logged("delete_range", result)
    }

    /// Overwrites the row with `item`'s primary key; `NotFound` if none exists.
    pub async fn update(&self, item: &T) -> Result<()> {
        let result = match self.row_values(item) {
            Ok(values) => {
                self.with_connection(move |conn, table| {
                    let key = table.key_values(&values)?;
                    let mut params = values;
                    params.extend(key);
                    let changed = conn
                        .prepare_cached(&table.update_statement()?)?
                        .execute(params_from_iter(params.iter()))?;
                    if changed == 0 {
                        return Err(Error::NotFound {
                            table: table.name.clone(),
                        });
                    }
                    Ok(())
                })
                .await
            }
            Err(err) => Err(err),
        };
        self.logged("update", result)
    }

    /// True if a row equal to `item` in every column exists.
    pub async fn contains(&self, item: &T) -> Result<bool> {
        let result = match self.row_values(item) {
            Ok(values) => {
                let query = self.table.whole_value_query(&values);
                self.exists(&query).await
            }
            Err(err) => Err(err),
        };
        self.logged("contains", result)
    }

    /// True if any row matches `query`.
    pub async fn contains_where(&self, query: &Query) -> Result<bool> {
        let result = self.exists(query).await;
        self.logged("contains_where", result)
    }

    /// First row matching `query`, in the query's order or else rowid order.
    /// `Ok(None)` means nothing matched.
    pub async fn find_one(&self, query: &Query) -> Result<Option<T>> {
        let result = match self.table.select_statement(query, Some(1)) {
            Ok(sql) => self
                .with_connection(move |conn, _| select::<T>(conn, &sql))
                .await
                .map(|rows| rows.into_iter().next()),
            Err(err) => Err(err),
        };
        self.logged("find_one", result)
    }

    /// Every row matching `query`.
    pub async fn find_all(&self, query: &Query) -> Result<Vec<T>> {
        let result = match self.table.select_statement(query, None) {
            Ok(sql) => {
                self.with_connection(move |conn, _| select::<T>(conn, &sql))
                    .await
            }
            Err(err) => Err(err),
        };
        self.logged("find_all", result)
    }

    async fn exists(&self, query: &Query) -> Result<bool> {
        let sql = self.table.select_statement(query, Some(1))?;
        self.with_connection(move |conn, _| exists(conn, &sql))
            .await
    }

    /// Runs `op` against the open connection on the blocking pool.
    async fn with_connection<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut Connection, &TableDefinition) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::clone(&self.conn);
        let table = Arc::clone(&self.table);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<R> {
            let mut slot = slot.lock().map_err(|_| Error::Poisoned)?;
            let conn = slot.as_mut().ok_or(Error::NotOpen(path))?;
            op(conn, &table)
        })
        .await?
    }

    fn row_values(&self, item: &T) -> Result<Vec<Value>> {
        let values = item.to_values();
        if values.len() != self.table.columns.len() {
            return Err(Error::ColumnMismatch {
                table: self.table.name.clone(),
                expected: self.table.columns.len(),
                actual: values.len(),
            });
        }
        Ok(values)
    }

    fn key_values(&self, item: &T) -> Result<Vec<Value>> {
        self.table.key_values(&self.row_values(item)?)
    }

    /// Row values per item. A malformed item only fails once the batch
    /// reaches it.
    fn batch_values(&self, items: &[T]) -> Vec<Result<Vec<Value>>> {
        items.iter().map(|item| self.row_values(item)).collect()
    }

    fn logged<R>(&self, operation: &'static str, result: Result<R>) -> Result<R> {
        if let Err(err) = &result {
            self.span.in_scope(|| log_failure(operation, err, None));
        }
        result
    }
}

fn log_failure(operation: &'static str, err: &Error, index: Option<usize>) {
    if err.is_not_found() {
        warn!(operation, index, error = %err, "datastore operation found no row");
    } else {
        error!(operation, index, error = %err, "datastore operation failed");
    }
}

fn insert(conn: &Connection, table: &TableDefinition, values: &[Value]) -> Result<()> {
    conn.prepare_cached(&table.insert_or_replace_statement())?
        .execute(params_from_iter(values.iter()))?;
    Ok(())
}

/// Check and insert run in one IMMEDIATE transaction, so no other writer can
/// add the same row in between.
fn insert_unless_present(
    conn: &mut Connection,
    table: &TableDefinition,
    values: &[Value],
) -> Result<bool> {
    let sql = table.select_statement(&table.whole_value_query(values), Some(1))?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if exists(&tx, &sql)? {
        return Ok(false);
    }
    insert(&tx, table, values)?;
    tx.commit()?;
    Ok(true)
}

fn delete_by_key(conn: &Connection, table: &TableDefinition, key: &[Value]) -> Result<()> {
    let deleted = conn
        .prepare_cached(&table.delete_statement()?)?
        .execute(params_from_iter(key.iter()))?;
    if deleted == 0 {
        return Err(Error::NotFound {
            table: table.name.clone(),
        });
    }
    Ok(())
}

fn exists(conn: &Connection, sql: &SqlQuery) -> Result<bool> {
    let mut stmt = conn.prepare_cached(&sql.statement)?;
    Ok(stmt.exists(params_from_iter(sql.params.iter()))?)
}

fn select<T: Entity>(conn: &Connection, sql: &SqlQuery) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(&sql.statement)?;
    let rows = stmt
        .query_map(params_from_iter(sql.params.iter()), |row| T::from_row(row))?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(rows)
}
