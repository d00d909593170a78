//! SQL text dumps and restores
//!
//! A dump holds the stored DDL of every user table followed by one `INSERT`
//! per row, wrapped in a single transaction with foreign key checks off. A
//! restore runs such a file as one batch of statements; when it fails part
//! way, the open transaction is rolled back and foreign keys are switched on
//! again.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::database::core::grammar::{columnize, wrap};
use crate::database::core::Connection;
use crate::error::{DbError, Result};
use crate::filesystem::Filesystem;

pub const DUMP_FILE_PREFIX: &str = "quarry_dump_";

pub struct DatabaseManager<'c, F: Filesystem> {
    conn: &'c Connection,
    fs: F,
    dump_path: PathBuf,
}

impl<'c, F: Filesystem> DatabaseManager<'c, F> {
    pub fn new(conn: &'c Connection, fs: F, dump_path: impl Into<PathBuf>) -> Self {
        DatabaseManager {
            conn,
            fs,
            dump_path: dump_path.into(),
        }
    }

    pub fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    /// Render the whole database as SQL text
    pub fn dump_to_string(&self) -> Result<String> {
        let schema = self.conn.schema();
        let mut out = String::new();
        out.push_str("PRAGMA foreign_keys = OFF;\n");
        out.push_str("BEGIN TRANSACTION;\n");

        for table in schema.tables()? {
            let Some(ddl) = schema.table_sql(&table)? else {
                continue;
            };
            out.push('\n');
            out.push_str(&ddl);
            out.push_str(";\n");

            let rows = self.conn.table(&table).get()?;
            for row in rows.iter() {
                let columns: Vec<&str> = row.keys().collect();
                let values: Vec<String> = row.values().map(|v| v.to_sql_literal()).collect();
                out.push_str(&format!(
                    "INSERT INTO {} ({}) VALUES ({});\n",
                    wrap(&table),
                    columnize(&columns),
                    values.join(", ")
                ));
            }

            for index in schema.index_sql(&table)? {
                out.push_str(&index);
                out.push_str(";\n");
            }
        }

        out.push_str("\nCOMMIT;\n");
        out.push_str("PRAGMA foreign_keys = ON;\n");
        Ok(out)
    }

    /// Write a timestamped dump file and return its path
    pub fn dump(&self) -> Result<PathBuf> {
        let file_name = format!(
            "{}{}.sql",
            DUMP_FILE_PREFIX,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        self.dump_to(&self.dump_path.join(file_name))
    }

    pub fn dump_to(&self, path: &Path) -> Result<PathBuf> {
        let sql = self.dump_to_string()?;
        self.fs.write(path, &sql)?;
        info!(path = %path.display(), bytes = sql.len(), "database dumped");
        Ok(path.to_path_buf())
    }

    /// Run a dump file against the connection
    ///
    /// Relative paths are looked up in the dump directory first.
    pub fn restore(&self, file: &Path) -> Result<()> {
        let path = if file.is_relative() && self.fs.exists(&self.dump_path.join(file)) {
            self.dump_path.join(file)
        } else {
            file.to_path_buf()
        };

        if !self.fs.exists(&path) {
            return Err(DbError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "dump file not found"),
            ));
        }

        if self.conn.transaction_level() > 0 {
            return Err(DbError::InvalidQuery(
                "cannot restore a dump inside an open transaction".to_string(),
            ));
        }

        let sql = self.fs.read_to_string(&path)?;
        if let Err(e) = self.conn.statement(&sql) {
            self.recover();
            error!(path = %path.display(), error = %e, "restore failed");
            return Err(e);
        }
        info!(path = %path.display(), "database restored");
        Ok(())
    }

    /// Undo what a half-run dump leaves behind: its open transaction and
    /// disabled foreign keys
    fn recover(&self) {
        match self.conn.in_raw_transaction() {
            Ok(true) => {
                if let Err(e) = self.conn.statement("ROLLBACK") {
                    warn!(error = %e, "failed to roll back partial restore");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not inspect connection after failed restore"),
        }
        if let Err(e) = self.conn.schema().enable_foreign_key_constraints() {
            warn!(error = %e, "failed to re-enable foreign keys after failed restore");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{Attributes, Value};
    use crate::database::query::Direction;
    use crate::filesystem::LocalFilesystem;

    fn seeded() -> Connection {
        let conn = Connection::in_memory();
        conn.schema()
            .create("users", |t| {
                t.id();
                t.string("name", 100).nullable();
                t.index("name");
            })
            .unwrap();
        conn.table("users")
            .insert(Attributes::new().with("name", "O'Brien"))
            .execute()
            .unwrap();
        conn.table("users")
            .insert(Attributes::new().with("name", Value::Null))
            .execute()
            .unwrap();
        conn
    }

    #[test]
    fn test_dump_to_string() {
        let conn = seeded();
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(&conn, LocalFilesystem, dir.path());

        let sql = manager.dump_to_string().unwrap();
        assert!(sql.contains("CREATE TABLE `users`"));
        assert!(sql.contains("INSERT INTO `users` (`id`, `name`) VALUES (1, 'O''Brien');"));
        assert!(sql.contains("INSERT INTO `users` (`id`, `name`) VALUES (2, NULL);"));
        assert!(sql.contains("CREATE INDEX"));
    }

    #[test]
    fn test_dump_then_restore() {
        let conn = seeded();
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(&conn, LocalFilesystem, dir.path());

        let path = manager.dump().unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with(DUMP_FILE_PREFIX));
        assert!(file_name.ends_with(".sql"));

        let target = Connection::in_memory();
        let restorer = DatabaseManager::new(&target, LocalFilesystem, dir.path());
        restorer.restore(Path::new(&file_name)).unwrap();

        assert_eq!(target.table("users").count().unwrap(), 2);
        assert_eq!(
            target.table("users").where_("id", 1).value("name").unwrap(),
            Some(Value::from("O'Brien"))
        );
    }

    #[test]
    fn test_dump_non_finite_reals() {
        let conn = Connection::in_memory();
        conn.statement("CREATE TABLE readings (id INTEGER PRIMARY KEY, level REAL)")
            .unwrap();
        for level in [1.5, f64::INFINITY, f64::NEG_INFINITY] {
            conn.table("readings")
                .insert(Attributes::new().with("level", level))
                .execute()
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let path = DatabaseManager::new(&conn, LocalFilesystem, dir.path())
            .dump()
            .unwrap();

        let target = Connection::in_memory();
        DatabaseManager::new(&target, LocalFilesystem, dir.path())
            .restore(&path)
            .unwrap();
        let levels: Vec<Value> = target
            .table("readings")
            .order_by("id", Direction::Asc)
            .pluck("level")
            .unwrap();
        assert_eq!(
            levels,
            vec![
                Value::Real(1.5),
                Value::Real(f64::INFINITY),
                Value::Real(f64::NEG_INFINITY)
            ]
        );
    }

    #[test]
    fn test_failed_restore_leaves_connection_usable() {
        let source = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = DatabaseManager::new(&source, LocalFilesystem, dir.path())
            .dump()
            .unwrap();

        // `users` already exists in the target
        let target = seeded();
        let restorer = DatabaseManager::new(&target, LocalFilesystem, dir.path());
        assert!(matches!(
            restorer.restore(&path),
            Err(DbError::QueryExecution { .. })
        ));

        assert!(!target.in_raw_transaction().unwrap());
        let fk = target.select("PRAGMA foreign_keys", &[]).unwrap();
        assert_eq!(fk[0].values().next(), Some(&Value::Integer(1)));

        target
            .transaction(|conn| {
                conn.table("users")
                    .insert(Attributes::new().with("name", "after"))
                    .execute()
            })
            .unwrap();
        assert_eq!(target.table("users").count().unwrap(), 3);
    }

    #[test]
    fn test_partial_restore_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.sql");
        LocalFilesystem
            .write(
                &path,
                "PRAGMA foreign_keys = OFF;\nBEGIN TRANSACTION;\n\
                 CREATE TABLE `a` (`id` INTEGER PRIMARY KEY);\n\
                 INSERT INTO `missing` (`id`) VALUES (1);\nCOMMIT;\n",
            )
            .unwrap();

        let conn = Connection::in_memory();
        let manager = DatabaseManager::new(&conn, LocalFilesystem, dir.path());
        assert!(manager.restore(&path).is_err());
        assert!(!conn.schema().has_table("a").unwrap());
        assert!(conn.transaction(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_restore_inside_transaction_is_rejected() {
        let conn = seeded();
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(&conn, LocalFilesystem, dir.path());
        let path = manager.dump().unwrap();

        conn.begin_transaction().unwrap();
        assert!(matches!(
            manager.restore(&path),
            Err(DbError::InvalidQuery(_))
        ));
        conn.rollback().unwrap();
    }

    #[test]
    fn test_restore_missing_file() {
        let conn = Connection::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(&conn, LocalFilesystem, dir.path());
        assert!(matches!(
            manager.restore(Path::new("nope.sql")),
            Err(DbError::Io { .. })
        ));
    }
}
