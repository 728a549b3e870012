//! Typed SQLite datastores for the Runar ecosystem.
//!
//! # Intention
//!
//! - Give each record type a named, path-scoped persistent collection with a
//!   small vocabulary: add, delete, update, count, contains, find.
//! - Keep SQL out of callers: tables are described once per type through
//!   [`Entity`], filters are built with [`Query`].
//! - Every operation is awaitable and returns a [`Result`] that tells
//!   "nothing matched" apart from a failure. Failures are also logged through
//!   `tracing` in the store's span.
//!
//! # Architectural Boundaries
//!
//! - Storage, locking and query execution belong to SQLite.
//! - Only datastore code belongs here; no UI or application logic.

pub mod config;
pub mod entity;
pub mod error;
pub mod sqlite;
pub mod store;

pub use config::DatastoreConfig;
pub use entity::Entity;
pub use error::{Error, Result};
pub use sqlite::{
    ColumnConstraint, ColumnDefinition, Condition, DataType, DefaultValue, IndexDefinition, Query,
    QueryOperator, SqlQuery, TableDefinition, Value,
};
pub use store::{Datastore, DeleteReport};

pub use rusqlite;
