//! Scaffolding for new migration files

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use tracing::info;

use crate::error::{DbError, Result};
use crate::filesystem::Filesystem;

/// Which stub a new migration starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationKind {
    #[default]
    Blank,
    Create,
    Update,
    Delete,
}

impl FromStr for MigrationKind {
    type Err = DbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "default" | "blank" => Ok(MigrationKind::Blank),
            "create" => Ok(MigrationKind::Create),
            "update" => Ok(MigrationKind::Update),
            "delete" => Ok(MigrationKind::Delete),
            other => Err(DbError::InvalidQuery(format!(
                "unknown migration type '{}', expected one of default, create, update, delete",
                other
            ))),
        }
    }
}

/// Paths of a freshly generated migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMigration {
    pub name: String,
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Writes timestamped `.up.sql` / `.down.sql` pairs into a directory
pub struct MigrationGenerator<F: Filesystem> {
    fs: F,
    path: PathBuf,
}

impl<F: Filesystem> MigrationGenerator<F> {
    pub fn new(fs: F, path: impl Into<PathBuf>) -> Self {
        MigrationGenerator {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generate(&self, name: &str, kind: MigrationKind) -> Result<GeneratedMigration> {
        self.generate_at(name, kind, chrono::Local::now().naive_local())
    }

    pub fn generate_at(
        &self,
        name: &str,
        kind: MigrationKind,
        timestamp: NaiveDateTime,
    ) -> Result<GeneratedMigration> {
        let snake = snake_case(name);
        if snake.is_empty() {
            return Err(DbError::MigrationUnitInvalid {
                name: name.to_string(),
                reason: "migration name is empty".to_string(),
            });
        }

        let full_name = format!("{}_{}", timestamp.format("%Y_%m_%d_%H%M%S"), snake);
        let up = self.path.join(format!("{}.up.sql", full_name));
        let down = self.path.join(format!("{}.down.sql", full_name));

        for path in [&up, &down] {
            if self.fs.exists(path) {
                return Err(DbError::io(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "migration file already exists",
                    ),
                ));
            }
        }

        let table = infer_table(&snake);
        let (up_sql, down_sql) = stubs(kind, &table);

        self.fs.create_dir_all(&self.path)?;
        self.fs.write(&up, &up_sql)?;
        self.fs.write(&down, &down_sql)?;
        info!(migration = %full_name, path = %self.path.display(), "created migration");

        Ok(GeneratedMigration {
            name: full_name,
            up,
            down,
        })
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = true;
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
            prev_lower = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// `create_users_table` and `add_email_to_users_table` both target `users`
fn infer_table(snake: &str) -> String {
    let stem = snake.strip_suffix("_table").unwrap_or(snake);
    if let Some(table) = stem.strip_prefix("create_") {
        return table.to_string();
    }
    if let Some(idx) = stem.rfind("_to_") {
        return stem[idx + 4..].to_string();
    }
    if let Some(idx) = stem.rfind("_from_") {
        return stem[idx + 6..].to_string();
    }
    stem.to_string()
}

fn stubs(kind: MigrationKind, table: &str) -> (String, String) {
    match kind {
        MigrationKind::Blank => (
            "-- Write the forward migration here\n".to_string(),
            "-- Write the reverse migration here\n".to_string(),
        ),
        MigrationKind::Create => (
            format!(
                "CREATE TABLE `{table}` (\n    `id` INTEGER PRIMARY KEY AUTOINCREMENT,\n    `created_at` TIMESTAMP NULL,\n    `updated_at` TIMESTAMP NULL\n);\n"
            ),
            format!("DROP TABLE IF EXISTS `{table}`;\n"),
        ),
        MigrationKind::Update => (
            format!("-- ALTER TABLE `{table}` ADD COLUMN `name` VARCHAR(255) NULL;\n"),
            format!("-- ALTER TABLE `{table}` DROP COLUMN `name`;\n"),
        ),
        MigrationKind::Delete => (
            format!("DROP TABLE IF EXISTS `{table}`;\n"),
            format!("-- Recreate `{table}` here\n"),
        ),
    }
}
