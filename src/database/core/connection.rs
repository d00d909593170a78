//! Database connection management
//!
//! [`Connection`] is the only place that talks to SQLite. It is built from a
//! [`DatabaseConfig`] without touching the engine; the native handle is opened
//! on first use and kept for the lifetime of the value.

use std::cell::{Cell, OnceCell, RefCell};
use std::time::Instant;

use rusqlite::params_from_iter;
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::database::core::value::{Attributes, Row, Value};
use crate::database::query::Builder;
use crate::database::schema::Schema;
use crate::error::{DbError, Result};

/// One executed statement, recorded while the query log is enabled
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLogEntry {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub time_ms: f64,
}

/// Lazily-opened SQLite connection
///
/// A `Connection` without a configured database name is inert: it can be
/// constructed and passed around, but every query returns
/// [`DbError::NoConnection`].
#[derive(Debug)]
pub struct Connection {
    config: DatabaseConfig,
    handle: OnceCell<rusqlite::Connection>,
    transactions: Cell<u32>,
    logging_queries: Cell<bool>,
    query_log: RefCell<Vec<QueryLogEntry>>,
}

impl Connection {
    pub fn new(config: DatabaseConfig) -> Self {
        Connection {
            config,
            handle: OnceCell::new(),
            transactions: Cell::new(0),
            logging_queries: Cell::new(false),
            query_log: RefCell::new(Vec::new()),
        }
    }

    /// Create an in-memory database connection
    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::in_memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Credential-free DSN for this connection
    pub fn dsn(&self) -> String {
        self.config.dsn()
    }

    /// Whether a database is configured at all
    pub fn is_available(&self) -> bool {
        self.config.is_configured()
    }

    /// Whether the native handle has been opened yet
    pub fn is_open(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Open the native handle now instead of on first query
    pub fn open(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    /// The native handle, opened on first access
    pub fn handle(&self) -> Result<&rusqlite::Connection> {
        if let Some(conn) = self.handle.get() {
            return Ok(conn);
        }
        if !self.is_available() {
            return Err(DbError::NoConnection);
        }

        let conn = self.connect()?;
        // single-threaded: the cell cannot have been filled in between
        let _ = self.handle.set(conn);
        self.handle.get().ok_or(DbError::NoConnection)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        let dsn = self.dsn();
        let fail = |reason: String| {
            error!(dsn = %dsn, reason = %reason, "database connection failed");
            DbError::Connection {
                dsn: dsn.clone(),
                reason,
            }
        };

        if !self.config.driver.eq_ignore_ascii_case("sqlite") {
            return Err(fail(format!(
                "unsupported driver '{}', only 'sqlite' is available",
                self.config.driver
            )));
        }

        let in_memory = self.config.database == ":memory:";
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&self.config.database)
        }
        .map_err(|e| fail(e.to_string()))?;

        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(|e| fail(format!("failed to enable foreign keys: {}", e)))?;

        if !in_memory && self.config.charset.to_ascii_lowercase().starts_with("utf8") {
            conn.execute_batch("PRAGMA encoding = 'UTF-8'")
                .map_err(|e| fail(format!("failed to set encoding: {}", e)))?;
        }

        for (key, value) in &self.config.options {
            conn.pragma_update(None, key, value.as_str())
                .map_err(|e| fail(format!("failed to apply option {}: {}", key, e)))?;
        }

        info!(dsn = %dsn, "database connection established");
        Ok(conn)
    }

    // =========================================================================
    // Statement execution
    // =========================================================================

    fn run<T>(
        &self,
        sql: &str,
        bindings: &[Value],
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.handle()?;
        debug!(sql = %sql, bindings = ?bindings, "executing statement");

        let started = Instant::now();
        match f(conn) {
            Ok(v) => {
                if self.logging_queries.get() {
                    self.query_log.borrow_mut().push(QueryLogEntry {
                        sql: sql.to_string(),
                        bindings: bindings.to_vec(),
                        time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                Ok(v)
            }
            Err(e) => {
                error!(sql = %sql, bindings = ?bindings, error = %e, "statement failed");
                Err(DbError::QueryExecution {
                    sql: sql.to_string(),
                    bindings: bindings.to_vec(),
                    source: e,
                })
            }
        }
    }

    /// Run a statement and return the number of affected rows
    pub fn execute(&self, sql: &str, bindings: &[Value]) -> Result<usize> {
        self.run(sql, bindings, |conn| {
            conn.execute(sql, params_from_iter(bindings.iter()))
        })
    }

    /// Run an INSERT and return the id of the inserted row
    pub fn insert(&self, sql: &str, bindings: &[Value]) -> Result<i64> {
        self.run(sql, bindings, |conn| {
            conn.execute(sql, params_from_iter(bindings.iter()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Run a query and collect every row
    pub fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Row>> {
        self.run(sql, bindings, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

            let rows = stmt.query_map(params_from_iter(bindings.iter()), |row| {
                let mut attrs = Attributes::new();
                for (idx, name) in names.iter().enumerate() {
                    attrs.set(name.clone(), row.get::<_, Value>(idx)?);
                }
                Ok(attrs)
            })?;
            rows.collect()
        })
    }

    /// Run one or more statements without bindings
    pub fn statement(&self, sql: &str) -> Result<()> {
        self.run(sql, &[], |conn| conn.execute_batch(sql))
    }

    /// Id of the most recently inserted row on this connection
    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.handle()?.last_insert_rowid())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Current transaction nesting depth
    pub fn transaction_level(&self) -> u32 {
        self.transactions.get()
    }

    /// Whether the handle is inside a transaction this connection did not open,
    /// e.g. a `BEGIN` issued from a raw script
    pub fn in_raw_transaction(&self) -> Result<bool> {
        Ok(self.transactions.get() == 0 && !self.handle()?.is_autocommit())
    }

    /// Start a transaction, or a savepoint when one is already open
    pub fn begin_transaction(&self) -> Result<()> {
        let level = self.transactions.get();
        if level == 0 {
            self.statement("BEGIN")?;
        } else {
            self.statement(&format!("SAVEPOINT trans{}", level + 1))?;
        }
        self.transactions.set(level + 1);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        match self.transactions.get() {
            0 => Err(DbError::InvalidQuery(
                "commit called without an active transaction".to_string(),
            )),
            1 => {
                self.statement("COMMIT")?;
                self.transactions.set(0);
                Ok(())
            }
            level => {
                self.statement(&format!("RELEASE SAVEPOINT trans{}", level))?;
                self.transactions.set(level - 1);
                Ok(())
            }
        }
    }

    pub fn rollback(&self) -> Result<()> {
        match self.transactions.get() {
            0 => Err(DbError::InvalidQuery(
                "rollback called without an active transaction".to_string(),
            )),
            1 => {
                self.transactions.set(0);
                self.statement("ROLLBACK")
            }
            level => {
                self.transactions.set(level - 1);
                self.statement(&format!(
                    "ROLLBACK TO SAVEPOINT trans{level}; RELEASE SAVEPOINT trans{level}"
                ))
            }
        }
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(v) => {
                self.commit()?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = self.rollback() {
                    error!(error = %rb, "failed to roll back transaction");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// Start a fluent query against `table`
    pub fn table(&self, table: &str) -> Builder<'_> {
        Builder::new(self).from(table)
    }

    /// Fluent query without a table yet
    pub fn query(&self) -> Builder<'_> {
        Builder::new(self)
    }

    pub fn schema(&self) -> Schema<'_> {
        Schema::new(self)
    }

    // =========================================================================
    // Query log
    // =========================================================================

    pub fn enable_query_log(&self) {
        self.logging_queries.set(true);
    }

    pub fn disable_query_log(&self) {
        self.logging_queries.set(false);
    }

    pub fn logging_queries(&self) -> bool {
        self.logging_queries.get()
    }

    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        self.query_log.borrow().clone()
    }

    pub fn flush_query_log(&self) {
        self.query_log.borrow_mut().clear();
    }
}
