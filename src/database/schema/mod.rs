//! Schema builder
//!
//! [`Schema`] compiles [`Blueprint`]s into DDL and runs it on a
//! [`Connection`]; it also answers introspection questions (tables, columns,
//! stored DDL) from `sqlite_master` and `pragma_table_info`.
//!
//! ```rust,ignore
//! conn.schema().create("posts", |table| {
//!     table.id();
//!     table.foreign_id("user_id");
//!     table.string("title", 200);
//!     table.text("body").nullable();
//!     table.timestamps();
//!     table.foreign("user_id").on("users").on_delete("cascade");
//! })?;
//! ```

mod blueprint;

use tracing::info;

use crate::database::core::grammar::wrap;
use crate::database::core::{Connection, Value};
use crate::error::{DbError, Result};

pub use blueprint::{
    Blueprint, ColumnDefinition, ColumnType, ForeignKeyDefinition, IndexDefinition, IndexKind,
};

/// Statement failures from DDL are reported as schema errors
fn schema_error(err: DbError) -> DbError {
    match err {
        DbError::QueryExecution { sql, source, .. } => {
            DbError::Schema(format!("{} (SQL: {})", source, sql))
        }
        other => other,
    }
}

pub struct Schema<'c> {
    conn: &'c Connection,
}

impl<'c> Schema<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Schema { conn }
    }

    fn run(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.conn.statement(sql).map_err(schema_error)?;
        }
        Ok(())
    }

    fn strings(&self, sql: &str, bindings: &[Value]) -> Result<Vec<String>> {
        let rows = self.conn.select(sql, bindings).map_err(schema_error)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.values().next().and_then(Value::as_str).map(String::from))
            .collect())
    }

    /// Statements `create` would run, without running them
    pub fn create_sql<F>(&self, table: &str, define: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::new(table);
        define(&mut blueprint);
        blueprint.to_create_sql(&self.conn.config().table_options)
    }

    pub fn create<F>(&self, table: &str, define: F) -> Result<()>
    where
        F: FnOnce(&mut Blueprint),
    {
        let statements = self.create_sql(table, define)?;
        self.run(&statements)?;
        info!(table = table, "created table");
        Ok(())
    }

    /// Alter an existing table: add or drop columns, add indexes
    pub fn table<F>(&self, table: &str, define: F) -> Result<()>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::new(table);
        define(&mut blueprint);
        self.run(&blueprint.to_alter_sql()?)?;
        info!(table = table, "altered table");
        Ok(())
    }

    pub fn drop(&self, table: &str) -> Result<()> {
        self.drop_if_exists(table)
    }

    pub fn drop_if_exists(&self, table: &str) -> Result<()> {
        self.run(&[format!("DROP TABLE IF EXISTS {}", wrap(table))])?;
        info!(table = table, "dropped table");
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.run(&[format!("ALTER TABLE {} RENAME TO {}", wrap(from), wrap(to))])
    }

    /// Check if a table exists in the database
    pub fn has_table(&self, table: &str) -> Result<bool> {
        let found = self.strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )?;
        Ok(!found.is_empty())
    }

    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self
            .column_listing(table)?
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Column names of `table`, in declaration order
    pub fn column_listing(&self, table: &str) -> Result<Vec<String>> {
        self.strings(
            "SELECT name FROM pragma_table_info(?) ORDER BY cid",
            &[Value::from(table)],
        )
    }

    /// Declared type of a column, e.g. `VARCHAR(100)`
    pub fn column_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        let found = self.strings(
            "SELECT type FROM pragma_table_info(?) WHERE name = ?",
            &[Value::from(table), Value::from(column)],
        )?;
        Ok(found.into_iter().next())
    }

    /// User tables, sorted by name
    pub fn tables(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
    }

    /// Stored `CREATE TABLE` statement of `table`
    pub fn table_sql(&self, table: &str) -> Result<Option<String>> {
        let found = self.strings(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )?;
        Ok(found.into_iter().next())
    }

    /// Stored `CREATE INDEX` statements of `table` (explicit indexes only)
    pub fn index_sql(&self, table: &str) -> Result<Vec<String>> {
        self.strings(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY name",
            &[Value::from(table)],
        )
    }

    pub fn disable_foreign_key_constraints(&self) -> Result<()> {
        self.run(&["PRAGMA foreign_keys = OFF".to_string()])
    }

    pub fn enable_foreign_key_constraints(&self) -> Result<()> {
        self.run(&["PRAGMA foreign_keys = ON".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_introspect() {
        let conn = Connection::in_memory();
        let schema = conn.schema();
        assert!(!schema.has_table("widgets").unwrap());

        let sql = schema
            .create_sql("widgets", |t| {
                t.id();
                t.string("name", 100);
            })
            .unwrap();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].starts_with("CREATE TABLE `widgets`"));
        assert!(!schema.has_table("widgets").unwrap());

        schema
            .create("widgets", |t| {
                t.id();
                t.string("name", 100);
            })
            .unwrap();
        assert!(schema.has_table("widgets").unwrap());
        assert_eq!(schema.column_listing("widgets").unwrap(), vec!["id", "name"]);
        assert!(schema.has_column("widgets", "NAME").unwrap());
        assert_eq!(
            schema.column_type("widgets", "name").unwrap(),
            Some("VARCHAR(100)".to_string())
        );
        assert_eq!(schema.tables().unwrap(), vec!["widgets"]);
    }

    #[test]
    fn test_alter_rename_drop() {
        let conn = Connection::in_memory();
        let schema = conn.schema();
        schema
            .create("notes", |t| {
                t.id();
                t.string("title", 50);
                t.string("legacy", 10).nullable();
            })
            .unwrap();

        schema
            .table("notes", |t| {
                t.integer("rank").default(0);
                t.drop_column("legacy");
                t.index("rank");
            })
            .unwrap();
        assert_eq!(
            schema.column_listing("notes").unwrap(),
            vec!["id", "title", "rank"]
        );
        assert_eq!(schema.index_sql("notes").unwrap().len(), 1);

        schema.rename("notes", "memos").unwrap();
        assert!(schema.has_table("memos").unwrap());
        schema.drop("memos").unwrap();
        schema.drop_if_exists("memos").unwrap();
        assert!(schema.tables().unwrap().is_empty());
    }

    #[test]
    fn test_alter_table_with_rows() {
        let conn = Connection::in_memory();
        let schema = conn.schema();
        schema
            .create("t", |t| {
                t.id();
            })
            .unwrap();
        conn.table("t")
            .insert(crate::database::Attributes::new().with("id", 1))
            .execute()
            .unwrap();

        schema
            .table("t", |t| {
                t.string("email", 100);
                t.integer("rank");
                t.string("code", 10).nullable().unique();
            })
            .unwrap();

        let row = conn.table("t").first().unwrap().unwrap();
        assert_eq!(row.get("email"), Some(&Value::from("")));
        assert_eq!(row.get("rank"), Some(&Value::Integer(0)));
        assert_eq!(row.get("code"), Some(&Value::Null));
        assert_eq!(schema.index_sql("t").unwrap().len(), 1);

        conn.table("t")
            .where_("id", 1)
            .update(crate::database::Attributes::new().with("code", "A"))
            .execute()
            .unwrap();
        let duplicate = conn
            .table("t")
            .insert(crate::database::Attributes::new().with("code", "A"))
            .execute();
        assert!(duplicate.is_err());

        // nothing runs when a column cannot be added
        let err = schema
            .table("t", |t| {
                t.string("nickname", 20).nullable();
                t.date("born_on");
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
        assert!(!schema.has_column("t", "nickname").unwrap());
    }

    #[test]
    fn test_duplicate_create_is_schema_error() {
        let conn = Connection::in_memory();
        let schema = conn.schema();
        schema.create("a", |t| {
            t.id();
        }).unwrap();
        let err = schema
            .create("a", |t| {
                t.id();
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn test_foreign_key_toggle() {
        let conn = Connection::in_memory();
        let schema = conn.schema();
        schema
            .create("users", |t| {
                t.id();
            })
            .unwrap();
        schema
            .create("posts", |t| {
                t.id();
                t.foreign_id("user_id");
                t.foreign("user_id").on("users").on_delete("cascade");
            })
            .unwrap();

        let insert_orphan = || {
            conn.table("posts")
                .insert(crate::database::Attributes::new().with("user_id", 42))
                .execute()
        };
        assert!(insert_orphan().is_err());

        schema.disable_foreign_key_constraints().unwrap();
        assert!(insert_orphan().is_ok());
        schema.enable_foreign_key_constraints().unwrap();
    }
}
