//! Batch-tracked schema migrations
//!
//! Migration units live in a [`MigrationRegistry`], filled by explicit
//! registration and by scanning a directory for `<name>.up.sql` /
//! `<name>.down.sql` pairs. The [`Migrator`] records every applied unit in a
//! ledger table together with the batch it ran in, so a rollback reverts
//! exactly the most recent batch.
//!
//! Each unit runs in its own transaction together with its ledger write. A
//! failure part-way through a batch leaves the earlier units of that batch
//! applied and recorded.

mod generator;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::database::core::{Attributes, Connection, Value};
use crate::database::query::Direction;
use crate::error::{DbError, Result};
use crate::filesystem::Filesystem;

pub use generator::{GeneratedMigration, MigrationGenerator, MigrationKind};

pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// A reversible schema change
pub trait Migration {
    fn up(&self, conn: &Connection) -> Result<()>;
    fn down(&self, conn: &Connection) -> Result<()>;
}

/// A migration backed by a pair of SQL scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    up_sql: String,
    down_sql: String,
}

impl SqlMigration {
    pub fn new(up_sql: impl Into<String>, down_sql: impl Into<String>) -> Self {
        SqlMigration {
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        }
    }

    fn run(conn: &Connection, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        conn.statement(sql)
    }
}

impl Migration for SqlMigration {
    fn up(&self, conn: &Connection) -> Result<()> {
        Self::run(conn, &self.up_sql)
    }

    fn down(&self, conn: &Connection) -> Result<()> {
        Self::run(conn, &self.down_sql)
    }
}

/// Named migration units, ordered by name
#[derive(Default)]
pub struct MigrationRegistry {
    units: BTreeMap<String, Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit; a later registration under the same name replaces it
    pub fn register(&mut self, name: &str, migration: impl Migration + 'static) -> &mut Self {
        if self
            .units
            .insert(name.to_string(), Box::new(migration))
            .is_some()
        {
            warn!(migration = name, "migration registered twice, keeping the last one");
        }
        self
    }

    /// Register every `*.up.sql` / `*.down.sql` pair found in `dir`
    ///
    /// Returns the number of units found. An up script without its down
    /// script is rejected.
    pub fn discover(&mut self, fs: &dyn Filesystem, dir: &Path) -> Result<usize> {
        let ups = fs.glob(&dir.join(format!("*{}", UP_SUFFIX)))?;
        for up_path in &ups {
            let file_name = up_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = file_name.trim_end_matches(UP_SUFFIX).to_string();

            let down_path = dir.join(format!("{}{}", name, DOWN_SUFFIX));
            if !fs.exists(&down_path) {
                return Err(DbError::MigrationUnitInvalid {
                    name,
                    reason: format!("missing down script {}", down_path.display()),
                });
            }

            let unit = SqlMigration::new(fs.read_to_string(up_path)?, fs.read_to_string(&down_path)?);
            self.register(&name, unit);
        }
        info!(path = %dir.display(), count = ups.len(), "discovered migrations");
        Ok(ups.len())
    }

    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Migration> {
        self.units.get(name).map(|m| m.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Whether a discovered migration has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    Ran { batch: i64 },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub migration: String,
    pub state: MigrationState,
}

/// Names rolled back and re-applied by [`Migrator::refresh`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub rolled_back: Vec<String>,
    pub migrated: Vec<String>,
}

/// Applies and reverts migrations, keeping the ledger table current
pub struct Migrator<'c> {
    conn: &'c Connection,
    registry: MigrationRegistry,
    table: String,
}

impl<'c> Migrator<'c> {
    pub fn new(conn: &'c Connection, registry: MigrationRegistry) -> Self {
        Migrator {
            conn,
            registry,
            table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Use a different ledger table
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MigrationRegistry {
        &mut self.registry
    }

    /// Create the ledger table if it does not exist yet
    pub fn ensure_ledger(&self) -> Result<()> {
        let schema = self.conn.schema();
        if schema.has_table(&self.table)? {
            return Ok(());
        }
        schema.create(&self.table, |t| {
            t.id();
            t.string("migration", 255);
            t.integer("batch");
            t.timestamp("created_at");
        })
    }

    /// Every known migration, in name order
    pub fn get_migrations(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Applied migrations by batch, then name
    pub fn get_run_migrations(&self) -> Result<Vec<String>> {
        self.ensure_ledger()?;
        let names = self
            .conn
            .table(&self.table)
            .order_by("batch", Direction::Asc)
            .order_by("migration", Direction::Asc)
            .pluck("migration")?;
        Ok(names.iter().map(|v| v.to_string()).collect())
    }

    /// Highest batch number in the ledger, 0 when empty
    pub fn last_batch_number(&self) -> Result<i64> {
        self.ensure_ledger()?;
        Ok(self
            .conn
            .table(&self.table)
            .max("batch")?
            .as_i64()
            .unwrap_or(0))
    }

    /// Known migrations not in the ledger yet, in name order
    pub fn pending(&self) -> Result<Vec<String>> {
        let ran = self.get_run_migrations()?;
        Ok(self
            .get_migrations()
            .into_iter()
            .filter(|name| !ran.contains(name))
            .collect())
    }

    /// Apply every pending migration as one new batch
    pub fn run_pending(&self) -> Result<Vec<String>> {
        let pending = self.pending()?;
        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(Vec::new());
        }

        let batch = self.last_batch_number()? + 1;
        let mut applied = Vec::with_capacity(pending.len());
        for name in pending {
            let unit = self
                .registry
                .get(&name)
                .ok_or_else(|| DbError::MigrationNotFound(name.clone()))?;

            self.conn
                .transaction(|conn| {
                    unit.up(conn)?;
                    conn.table(&self.table)
                        .insert(
                            Attributes::new()
                                .with("migration", name.as_str())
                                .with("batch", batch)
                                .with("created_at", chrono::Utc::now().naive_utc()),
                        )
                        .execute()?;
                    Ok(())
                })
                .inspect_err(|e| error!(migration = %name, error = %e, "migration failed"))?;

            info!(migration = %name, batch = batch, "migrated");
            applied.push(name);
        }
        Ok(applied)
    }

    /// Revert the most recent batch, newest unit first
    ///
    /// Foreign keys are switched off while the down scripts run, which SQLite
    /// only honours outside a transaction, so this refuses to run inside one.
    pub fn rollback(&self) -> Result<Vec<String>> {
        if self.conn.transaction_level() > 0 {
            return Err(DbError::InvalidQuery(
                "migrations cannot be rolled back inside an open transaction".to_string(),
            ));
        }

        let batch = self.last_batch_number()?;
        if batch == 0 {
            info!("Nothing to rollback");
            return Ok(Vec::new());
        }

        let names: Vec<String> = self
            .conn
            .table(&self.table)
            .where_("batch", batch)
            .order_by_desc("id")
            .pluck("migration")?
            .iter()
            .map(|v| v.to_string())
            .collect();

        if let Some(missing) = names.iter().find(|n| !self.registry.contains(n)) {
            return Err(DbError::MigrationNotFound(missing.clone()));
        }

        let schema = self.conn.schema();
        schema.disable_foreign_key_constraints()?;
        let result = self.revert_all(&names);
        let enabled = schema.enable_foreign_key_constraints();

        let reverted = result?;
        enabled?;
        Ok(reverted)
    }

    fn revert_all(&self, names: &[String]) -> Result<Vec<String>> {
        let mut reverted = Vec::with_capacity(names.len());
        for name in names {
            let unit = self
                .registry
                .get(name)
                .ok_or_else(|| DbError::MigrationNotFound(name.clone()))?;

            self.conn
                .transaction(|conn| {
                    unit.down(conn)?;
                    conn.table(&self.table)
                        .where_("migration", name.as_str())
                        .delete()
                        .execute()?;
                    Ok(())
                })
                .inspect_err(|e| error!(migration = %name, error = %e, "rollback failed"))?;

            info!(migration = %name, "rolled back");
            reverted.push(name.clone());
        }
        Ok(reverted)
    }

    /// Ledger grouped by batch, newest batch first, newest unit first
    pub fn get_migration_batches(&self) -> Result<Vec<(i64, Vec<String>)>> {
        self.ensure_ledger()?;
        let rows = self
            .conn
            .table(&self.table)
            .order_by_desc("batch")
            .order_by_desc("id")
            .get()?;

        let mut batches: Vec<(i64, Vec<String>)> = Vec::new();
        for row in rows {
            let batch = row.get("batch").and_then(Value::as_i64).unwrap_or(0);
            let name = row.get("migration").map(|v| v.to_string()).unwrap_or_default();
            match batches.last_mut() {
                Some((b, names)) if *b == batch => names.push(name),
                _ => batches.push((batch, vec![name])),
            }
        }
        Ok(batches)
    }

    /// Roll back every batch, newest first
    pub fn reset(&self) -> Result<Vec<String>> {
        let mut reverted = Vec::new();
        loop {
            let batch = self.rollback()?;
            if batch.is_empty() {
                break;
            }
            reverted.extend(batch);
        }
        Ok(reverted)
    }

    /// Reset, then run everything again as a single batch
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        let rolled_back = self.reset()?;
        let migrated = self.run_pending()?;
        Ok(RefreshOutcome {
            rolled_back,
            migrated,
        })
    }

    /// Ran/pending state of every known migration
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.ensure_ledger()?;
        let rows = self.conn.table(&self.table).get()?;
        let ran: HashMap<String, i64> = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("migration")?.to_string();
                let batch = row.get("batch").and_then(Value::as_i64)?;
                Some((name, batch))
            })
            .collect();

        Ok(self
            .get_migrations()
            .into_iter()
            .map(|migration| {
                let state = match ran.get(&migration) {
                    Some(batch) => MigrationState::Ran { batch: *batch },
                    None => MigrationState::Pending,
                };
                MigrationStatus { migration, state }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFilesystem;

    fn create_table(table: &str) -> SqlMigration {
        SqlMigration::new(
            format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", table),
            format!("DROP TABLE {}", table),
        )
    }

    fn registry(names: &[&str]) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for name in names {
            registry.register(name, create_table(&format!("t_{}", name)));
        }
        registry
    }

    fn ledger(conn: &Connection) -> Vec<(String, i64)> {
        conn.table("migrations")
            .order_by("id", Direction::Asc)
            .get()
            .unwrap()
            .iter()
            .map(|r| {
                (
                    r.get("migration").unwrap().to_string(),
                    r.get("batch").and_then(Value::as_i64).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_run_pending_records_batch() {
        let conn = Connection::in_memory();
        let migrator = Migrator::new(&conn, registry(&["001_a", "002_b"]));

        let applied = migrator.run_pending().unwrap();
        assert_eq!(applied, vec!["001_a", "002_b"]);
        assert_eq!(
            ledger(&conn),
            vec![("001_a".to_string(), 1), ("002_b".to_string(), 1)]
        );
        assert!(conn.schema().has_table("t_001_a").unwrap());
        assert_eq!(migrator.get_run_migrations().unwrap(), vec!["001_a", "002_b"]);
    }

    #[test]
    fn test_run_pending_is_idempotent() {
        let conn = Connection::in_memory();
        let migrator = Migrator::new(&conn, registry(&["001_a"]));
        migrator.run_pending().unwrap();

        conn.enable_query_log();
        assert!(migrator.run_pending().unwrap().is_empty());
        assert!(conn
            .query_log()
            .iter()
            .all(|q| q.sql.starts_with("SELECT")));
        assert_eq!(migrator.last_batch_number().unwrap(), 1);
    }

    #[test]
    fn test_rollback_only_last_batch_in_reverse() {
        let conn = Connection::in_memory();
        let mut migrator = Migrator::new(&conn, registry(&["001_a", "002_b"]));
        migrator.run_pending().unwrap();

        migrator
            .registry_mut()
            .register("003_c", create_table("t_003_c"))
            .register("004_d", create_table("t_004_d"));
        migrator.run_pending().unwrap();
        assert_eq!(
            migrator.get_migration_batches().unwrap(),
            vec![
                (2, vec!["004_d".to_string(), "003_c".to_string()]),
                (1, vec!["002_b".to_string(), "001_a".to_string()]),
            ]
        );

        let reverted = migrator.rollback().unwrap();
        assert_eq!(reverted, vec!["004_d", "003_c"]);
        assert_eq!(
            ledger(&conn),
            vec![("001_a".to_string(), 1), ("002_b".to_string(), 1)]
        );
        assert!(!conn.schema().has_table("t_003_c").unwrap());
        assert!(conn.schema().has_table("t_002_b").unwrap());
    }

    #[test]
    fn test_failure_keeps_earlier_units() {
        let conn = Connection::in_memory();
        let mut registry = registry(&["001_a"]);
        registry.register("002_bad", SqlMigration::new("CREATE TABLE (", ""));
        registry.register("003_c", create_table("t_003_c"));
        let migrator = Migrator::new(&conn, registry);

        assert!(migrator.run_pending().is_err());
        assert_eq!(ledger(&conn), vec![("001_a".to_string(), 1)]);
        assert!(!conn.schema().has_table("t_003_c").unwrap());
        assert_eq!(conn.transaction_level(), 0);
    }

    #[test]
    fn test_rollback_unknown_unit() {
        let conn = Connection::in_memory();
        Migrator::new(&conn, registry(&["001_a"]))
            .run_pending()
            .unwrap();

        let migrator = Migrator::new(&conn, MigrationRegistry::new());
        assert!(matches!(
            migrator.rollback(),
            Err(DbError::MigrationNotFound(name)) if name == "001_a"
        ));
        // foreign keys stay enabled
        let fk = conn.select("PRAGMA foreign_keys", &[]).unwrap();
        assert_eq!(fk[0].values().next(), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_reset_refresh_status() {
        let conn = Connection::in_memory();
        let mut migrator = Migrator::new(&conn, registry(&["001_a"]));
        migrator.run_pending().unwrap();
        migrator.registry_mut().register("002_b", create_table("t_002_b"));

        let status = migrator.status().unwrap();
        assert_eq!(status[0].state, MigrationState::Ran { batch: 1 });
        assert_eq!(status[1].state, MigrationState::Pending);

        migrator.run_pending().unwrap();
        let outcome = migrator.refresh().unwrap();
        assert_eq!(outcome.rolled_back, vec!["002_b", "001_a"]);
        assert_eq!(outcome.migrated, vec!["001_a", "002_b"]);
        assert_eq!(migrator.last_batch_number().unwrap(), 1);

        assert_eq!(migrator.reset().unwrap().len(), 2);
        assert!(migrator.get_run_migrations().unwrap().is_empty());
        assert!(migrator.rollback().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_refused_inside_transaction() {
        let conn = Connection::in_memory();
        let migrator = Migrator::new(&conn, registry(&["001_a"]));
        migrator.run_pending().unwrap();

        conn.begin_transaction().unwrap();
        assert!(matches!(migrator.rollback(), Err(DbError::InvalidQuery(_))));
        assert!(matches!(migrator.reset(), Err(DbError::InvalidQuery(_))));
        assert!(matches!(migrator.refresh(), Err(DbError::InvalidQuery(_))));
        conn.rollback().unwrap();

        assert_eq!(migrator.get_run_migrations().unwrap(), vec!["001_a"]);
        assert_eq!(migrator.rollback().unwrap(), vec!["001_a"]);
    }

    #[test]
    fn test_custom_ledger_table() {
        let conn = Connection::in_memory();
        let migrator = Migrator::new(&conn, registry(&["001_a"])).with_table("schema_history");
        migrator.run_pending().unwrap();
        assert!(conn.schema().has_table("schema_history").unwrap());
        assert!(!conn.schema().has_table("migrations").unwrap());
    }

    #[test]
    fn test_discover_sql_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        fs.write(
            &dir.path().join("2024_01_01_000000_create_users_table.up.sql"),
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);",
        )
        .unwrap();
        fs.write(
            &dir.path().join("2024_01_01_000000_create_users_table.down.sql"),
            "DROP TABLE users;",
        )
        .unwrap();

        let mut registry = MigrationRegistry::new();
        assert_eq!(registry.discover(&fs, dir.path()).unwrap(), 1);
        assert_eq!(registry.names(), vec!["2024_01_01_000000_create_users_table"]);

        let conn = Connection::in_memory();
        let migrator = Migrator::new(&conn, registry);
        migrator.run_pending().unwrap();
        assert!(conn.schema().has_table("users").unwrap());
        migrator.rollback().unwrap();
        assert!(!conn.schema().has_table("users").unwrap());
    }

    #[test]
    fn test_discover_requires_down_script() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        fs.write(&dir.path().join("001_orphan.up.sql"), "SELECT 1;")
            .unwrap();

        let mut registry = MigrationRegistry::new();
        match registry.discover(&fs, dir.path()) {
            Err(DbError::MigrationUnitInvalid { name, .. }) => assert_eq!(name, "001_orphan"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
