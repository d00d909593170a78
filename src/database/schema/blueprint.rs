//! Table definitions and their DDL

use crate::database::core::grammar::{columnize, wrap};
use crate::database::core::{quote_string, Value};
use crate::error::{DbError, Result};

/// Logical column types
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    BigInteger,
    Integer,
    String(u32),
    Text,
    Boolean,
    Date,
    DateTime,
    Timestamp,
    Decimal { precision: u8, scale: u8 },
    Float,
    Json,
    Enum(Vec<String>),
    /// Any type name the blueprint does not know
    Other(String),
}

impl ColumnType {
    /// Map a logical type name (`string`, `bigInteger`, `date_time`, ...) to a type
    pub fn from_name(name: &str) -> ColumnType {
        match name.to_ascii_lowercase().replace('_', "").as_str() {
            "id" | "biginteger" | "bigint" => ColumnType::BigInteger,
            "integer" | "int" => ColumnType::Integer,
            "string" | "varchar" => ColumnType::String(255),
            "text" => ColumnType::Text,
            "boolean" | "bool" | "tinyint" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "datetime" => ColumnType::DateTime,
            "timestamp" => ColumnType::Timestamp,
            "decimal" => ColumnType::Decimal {
                precision: 8,
                scale: 2,
            },
            "float" => ColumnType::Float,
            "json" => ColumnType::Json,
            _ => ColumnType::Other(name.to_string()),
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::Integer => "INT".to_string(),
            ColumnType::String(len) => format!("VARCHAR({})", len),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Json => "JSON".to_string(),
            ColumnType::Enum(_) => "VARCHAR(255)".to_string(),
            ColumnType::Other(_) => "VARCHAR".to_string(),
        }
    }

    /// Value existing rows receive when a `NOT NULL` column without a default
    /// is added to a table; `None` for temporal types, which have no neutral value
    fn fill_value(&self) -> Option<Value> {
        match self {
            ColumnType::BigInteger
            | ColumnType::Integer
            | ColumnType::Boolean
            | ColumnType::Decimal { .. }
            | ColumnType::Float => Some(Value::Integer(0)),
            ColumnType::String(_) | ColumnType::Text | ColumnType::Json | ColumnType::Other(_) => {
                Some(Value::Text(String::new()))
            }
            ColumnType::Enum(allowed) => allowed.first().map(|v| Value::Text(v.clone())),
            ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp => None,
        }
    }
}

/// One column of a blueprint; modifiers chain on the returned reference
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub unsigned: bool,
    pub auto_increment: bool,
    pub unique: bool,
}

impl ColumnDefinition {
    fn new(name: &str, column_type: ColumnType) -> Self {
        ColumnDefinition {
            name: name.to_string(),
            column_type,
            nullable: false,
            default: None,
            unsigned: false,
            auto_increment: false,
            unique: false,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn default(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    pub fn unsigned(&mut self) -> &mut Self {
        self.unsigned = true;
        self
    }

    /// Inline `UNIQUE` on this column
    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    /// Column definition as it appears inside `CREATE TABLE`
    pub fn to_sql(&self) -> String {
        self.compile(self.default.as_ref(), self.unique)
    }

    /// Column definition for `ALTER TABLE ... ADD COLUMN`
    ///
    /// SQLite refuses to add a `UNIQUE` column, so uniqueness is left to a
    /// separate index. A `NOT NULL` column without a default gets the type's
    /// fill value so that existing rows stay valid.
    fn to_add_sql(&self, table: &str, references: bool) -> Result<String> {
        if self.auto_increment {
            return Err(DbError::Schema(format!(
                "cannot add auto-increment column '{}' to existing table '{}'",
                self.name, table
            )));
        }
        if self.nullable || self.default.is_some() {
            return Ok(self.compile(self.default.as_ref(), false));
        }
        // a REFERENCES column added with foreign keys on must default to NULL
        let fill = if references {
            None
        } else {
            self.column_type.fill_value()
        };
        match fill {
            Some(fill) => Ok(self.compile(Some(&fill), false)),
            None => Err(DbError::Schema(format!(
                "cannot add NOT NULL column '{}' to existing table '{}' without a default; \
                 make it nullable or give it a default",
                self.name, table
            ))),
        }
    }

    fn compile(&self, default: Option<&Value>, unique: bool) -> String {
        let name = wrap(&self.name);

        // SQLite only auto-increments an INTEGER PRIMARY KEY
        if self.auto_increment {
            return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name);
        }

        let mut sql = format!("{} {}", name, self.column_type.to_sql());
        if self.unsigned {
            sql.push_str(" UNSIGNED");
        }
        sql.push_str(if self.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_literal());
        }
        if unique {
            sql.push_str(" UNIQUE");
        }
        if let ColumnType::Enum(allowed) = &self.column_type {
            let allowed = allowed
                .iter()
                .map(|v| quote_string(v))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" CHECK ({} IN ({}))", name, allowed));
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Index,
    Unique,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

impl IndexDefinition {
    pub fn name(&self, table: &str) -> String {
        let suffix = match self.kind {
            IndexKind::Index => "index",
            IndexKind::Unique => "unique",
        };
        format!("{}_{}_{}", table, self.columns.join("_"), suffix).replace(['.', '-'], "_")
    }

    fn to_create_sql(&self, table: &str) -> String {
        let keyword = match self.kind {
            IndexKind::Index => "CREATE INDEX",
            IndexKind::Unique => "CREATE UNIQUE INDEX",
        };
        format!(
            "{} {} ON {} ({})",
            keyword,
            wrap(&self.name(table)),
            wrap(table),
            columnize(&self.columns)
        )
    }
}

/// Referential action for `ON DELETE` / `ON UPDATE`
fn referential_action(action: &str) -> Result<&'static str> {
    match action.trim().to_ascii_uppercase().as_str() {
        "CASCADE" => Ok("CASCADE"),
        "SET NULL" => Ok("SET NULL"),
        "SET DEFAULT" => Ok("SET DEFAULT"),
        "RESTRICT" => Ok("RESTRICT"),
        "NO ACTION" => Ok("NO ACTION"),
        other => Err(DbError::Schema(format!(
            "unsupported referential action '{}'",
            other
        ))),
    }
}

/// `FOREIGN KEY (col) REFERENCES table (col)` under construction
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    pub column: String,
    pub references: String,
    pub on: Option<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

impl ForeignKeyDefinition {
    fn new(column: &str) -> Self {
        ForeignKeyDefinition {
            column: column.to_string(),
            references: "id".to_string(),
            on: None,
            on_delete: None,
            on_update: None,
        }
    }

    /// Referenced column, `id` unless set
    pub fn references(&mut self, column: &str) -> &mut Self {
        self.references = column.to_string();
        self
    }

    /// Referenced table
    pub fn on(&mut self, table: &str) -> &mut Self {
        self.on = Some(table.to_string());
        self
    }

    pub fn on_delete(&mut self, action: &str) -> &mut Self {
        self.on_delete = Some(action.to_string());
        self
    }

    pub fn on_update(&mut self, action: &str) -> &mut Self {
        self.on_update = Some(action.to_string());
        self
    }

    /// `REFERENCES ...` tail shared by table constraints and inline column references
    fn references_sql(&self) -> Result<String> {
        let table = self.on.as_deref().ok_or_else(|| {
            DbError::Schema(format!(
                "foreign key on '{}' has no referenced table",
                self.column
            ))
        })?;
        let mut sql = format!("REFERENCES {} ({})", wrap(table), wrap(&self.references));
        if let Some(action) = &self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(referential_action(action)?);
        }
        if let Some(action) = &self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(referential_action(action)?);
        }
        Ok(sql)
    }

    pub fn to_sql(&self) -> Result<String> {
        Ok(format!(
            "FOREIGN KEY ({}) {}",
            wrap(&self.column),
            self.references_sql()?
        ))
    }
}

/// Accumulates a table definition, consumed once to emit DDL
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    table: String,
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexDefinition>,
    foreign_keys: Vec<ForeignKeyDefinition>,
    drop_columns: Vec<String>,
}

impl Blueprint {
    pub fn new(table: &str) -> Self {
        Blueprint {
            table: table.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            drop_columns: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDefinition] {
        &self.foreign_keys
    }

    // ===== Columns =====

    /// Add a column by logical type name
    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDefinition {
        self.columns.push(ColumnDefinition::new(name, column_type));
        let idx = self.columns.len() - 1;
        &mut self.columns[idx]
    }

    /// Auto-incrementing `id` primary key
    pub fn id(&mut self) -> &mut ColumnDefinition {
        self.increments("id")
    }

    /// Auto-incrementing primary key with a custom name
    pub fn increments(&mut self, name: &str) -> &mut ColumnDefinition {
        let column = self.add_column(name, ColumnType::BigInteger);
        column.unsigned = true;
        column.auto_increment = true;
        column
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::BigInteger)
    }

    pub fn unsigned_big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.big_integer(name).unsigned()
    }

    /// Unsigned big integer meant to hold another table's id
    pub fn foreign_id(&mut self, name: &str) -> &mut ColumnDefinition {
        self.unsigned_big_integer(name)
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Integer)
    }

    pub fn string(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::String(length))
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Text)
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Boolean)
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Date)
    }

    pub fn date_time(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::DateTime)
    }

    /// Nullable timestamp
    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Timestamp).nullable()
    }

    /// Nullable `created_at` and `updated_at`
    pub fn timestamps(&mut self) {
        self.timestamp("created_at");
        self.timestamp("updated_at");
    }

    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Decimal { precision, scale })
    }

    pub fn float(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Float)
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.add_column(name, ColumnType::Json)
    }

    /// `VARCHAR(255)` restricted to `allowed` by a CHECK constraint
    pub fn enumeration<S: AsRef<str>>(&mut self, name: &str, allowed: &[S]) -> &mut ColumnDefinition {
        let allowed = allowed.iter().map(|s| s.as_ref().to_string()).collect();
        self.add_column(name, ColumnType::Enum(allowed))
    }

    // ===== Constraints =====

    pub fn unique(&mut self, column: &str) -> &mut Self {
        self.indexes.push(IndexDefinition {
            kind: IndexKind::Unique,
            columns: vec![column.to_string()],
        });
        self
    }

    pub fn index(&mut self, column: &str) -> &mut Self {
        self.indexes.push(IndexDefinition {
            kind: IndexKind::Index,
            columns: vec![column.to_string()],
        });
        self
    }

    pub fn foreign(&mut self, column: &str) -> &mut ForeignKeyDefinition {
        self.foreign_keys.push(ForeignKeyDefinition::new(column));
        let idx = self.foreign_keys.len() - 1;
        &mut self.foreign_keys[idx]
    }

    /// Drop a column (alter mode)
    pub fn drop_column(&mut self, column: &str) -> &mut Self {
        self.drop_columns.push(column.to_string());
        self
    }

    // ===== Compilation =====

    /// `CREATE TABLE` followed by one `CREATE INDEX` per plain index
    pub fn to_create_sql(&self, table_options: &str) -> Result<Vec<String>> {
        if self.columns.is_empty() {
            return Err(DbError::Schema(format!(
                "table '{}' has no columns",
                self.table
            )));
        }

        let mut definitions: Vec<String> = self.columns.iter().map(|c| c.to_sql()).collect();
        for index in self.indexes.iter().filter(|i| i.kind == IndexKind::Unique) {
            definitions.push(format!("UNIQUE ({})", columnize(&index.columns)));
        }
        for foreign in &self.foreign_keys {
            definitions.push(foreign.to_sql()?);
        }

        let mut create = format!(
            "CREATE TABLE {} ({})",
            wrap(&self.table),
            definitions.join(", ")
        );
        if !table_options.trim().is_empty() {
            create.push(' ');
            create.push_str(table_options.trim());
        }

        let mut statements = vec![create];
        statements.extend(
            self.indexes
                .iter()
                .filter(|i| i.kind == IndexKind::Index)
                .map(|i| i.to_create_sql(&self.table)),
        );
        Ok(statements)
    }

    /// `ALTER TABLE` statements for added and dropped columns, then indexes
    ///
    /// SQLite cannot add table constraints to an existing table: foreign keys
    /// are folded into the added column as an inline `REFERENCES`, and unique
    /// constraints, column-level ones included, become unique indexes.
    pub fn to_alter_sql(&self) -> Result<Vec<String>> {
        let table = wrap(&self.table);
        let mut statements = Vec::new();
        let mut unique_columns = Vec::new();

        for column in &self.columns {
            let foreign = self.foreign_keys.iter().find(|f| f.column == column.name);
            let mut sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                table,
                column.to_add_sql(&self.table, foreign.is_some())?
            );
            if let Some(foreign) = foreign {
                sql.push(' ');
                sql.push_str(&foreign.references_sql()?);
            }
            statements.push(sql);

            if column.unique {
                unique_columns.push(IndexDefinition {
                    kind: IndexKind::Unique,
                    columns: vec![column.name.clone()],
                });
            }
        }

        if let Some(orphan) = self
            .foreign_keys
            .iter()
            .find(|f| !self.columns.iter().any(|c| c.name == f.column))
        {
            return Err(DbError::Schema(format!(
                "cannot add a foreign key to existing column '{}' of '{}'",
                orphan.column, self.table
            )));
        }

        for column in &self.drop_columns {
            statements.push(format!("ALTER TABLE {} DROP COLUMN {}", table, wrap(column)));
        }

        statements.extend(
            unique_columns
                .iter()
                .chain(self.indexes.iter().filter(|i| !unique_columns.contains(*i)))
                .map(|i| i.to_create_sql(&self.table)),
        );
        Ok(statements)
    }
}
