use anyhow::{anyhow, Result};
use config::{Config, FileFormat};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const EMPTY_CONFIG: &str = r#"### quarry configuration file

[database]
### only the sqlite driver is supported
# driver = "sqlite"
# host = "localhost"

### database file path, or ":memory:"; leave empty to run without a database
# database = "data/app.sqlite3"
# username = ""
# password = ""
# charset = "utf8mb4"

### appended to every CREATE TABLE statement, e.g. "STRICT"
# table_options = ""

### migrations and dumps
# migrations_path = "migrations"
# migrations_table = "migrations"
# dump_path = "data/database/dumps"

### extra PRAGMAs applied when the connection opens
# [database.options]
# journal_mode = "WAL"
# busy_timeout = "5000"
"#;

/// Connection parameters for a single database.
///
/// `Debug` output redacts the password.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub driver: String,
    pub host: String,
    /// File path or `:memory:`. Empty means no database is configured.
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub charset: String,
    /// Suffix appended to `CREATE TABLE` statements.
    pub table_options: String,
    /// Extra `PRAGMA key = value` pairs applied on open.
    pub options: BTreeMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            host: "localhost".to_string(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8mb4".to_string(),
            table_options: String::new(),
            options: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { "***" };
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &password)
            .field("charset", &self.charset)
            .field("table_options", &self.table_options)
            .field("options", &self.options)
            .finish()
    }
}

impl DatabaseConfig {
    /// An in-memory SQLite database (for testing)
    pub fn in_memory() -> Self {
        Self::sqlite(":memory:")
    }

    /// A SQLite database at the given path
    pub fn sqlite(path: &str) -> Self {
        Self {
            database: path.to_string(),
            ..Default::default()
        }
    }

    /// DSN describing this connection; never contains credentials.
    pub fn dsn(&self) -> String {
        format!(
            "{}:host={};dbname={};charset={}",
            self.driver, self.host, self.database, self.charset
        )
    }

    pub fn is_configured(&self) -> bool {
        !self.database.trim().is_empty()
    }
}

/// Layered configuration: TOML file, then `.env`, then `QUARRY_*` variables.
///
/// Keys are dotted paths such as `database.host`. Environment variables take
/// the `QUARRY_` prefix and a double underscore between segments, e.g.
/// `QUARRY_DATABASE__DATABASE=app.db` sets `database.database`.
pub struct QuarryConfig {
    settings: Config,

    /// The file the configuration was read from, if any
    pub config_file: Option<String>,
}

impl QuarryConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<QuarryConfig> {
        // Values from a local .env file become regular environment variables
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();
        let mut config_file = None;

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if !path.exists() {
                    if let Some(parent) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| anyhow!("Unable to create config directory: {}", e))?;
                    }
                    std::fs::write(path, EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file {}: {}", p, e))?;
                }
                builder = builder.add_source(config::File::from(path).format(FileFormat::Toml));
                config_file = Some(p.clone());
            }
            None => {
                if let Some(p) = Self::default_config_files().into_iter().find(|p| p.exists()) {
                    builder = builder.add_source(config::File::from(p.as_path()));
                    config_file = Some(p.to_string_lossy().to_string());
                }
            }
        }

        // Add in settings from the environment (with a prefix of QUARRY)
        // E.g., `QUARRY_DATABASE__DATABASE=app.db quarry migrate` selects the database file
        builder = builder.add_source(
            config::Environment::with_prefix("QUARRY")
                .prefix_separator("_")
                .separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        Ok(QuarryConfig {
            settings,
            config_file,
        })
    }

    /// Build a configuration from an inline TOML document
    pub fn from_toml_str(toml: &str) -> Result<QuarryConfig> {
        let settings = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| anyhow!("Failed to parse configuration: {}", e))?;
        Ok(QuarryConfig {
            settings,
            config_file: None,
        })
    }

    /// `./quarry.toml` first, then `$HOME/.quarry/quarry.toml`
    fn default_config_files() -> Vec<PathBuf> {
        let mut files = vec![PathBuf::from("quarry.toml")];
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(".quarry").join("quarry.toml"));
        }
        files
    }

    /// Look up a dotted key as a string, falling back to `default`
    pub fn get(&self, key: &str, default: &str) -> String {
        self.settings
            .get_string(key)
            .unwrap_or_else(|_| default.to_string())
    }

    /// Look up a dotted key as an integer, falling back to `default`
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.settings.get_int(key).unwrap_or(default)
    }

    /// Connection parameters from the `[database]` table
    pub fn database(&self) -> DatabaseConfig {
        let defaults = DatabaseConfig::default();

        let options = self
            .settings
            .get_table("database.options")
            .map(|table| {
                table
                    .into_iter()
                    .filter_map(|(k, v)| v.into_string().ok().map(|v| (k, v)))
                    .collect()
            })
            .unwrap_or_default();

        DatabaseConfig {
            driver: self.get("database.driver", &defaults.driver),
            host: self.get("database.host", &defaults.host),
            database: self.get("database.database", ""),
            username: self.get("database.username", ""),
            password: self.get("database.password", ""),
            charset: self.get("database.charset", &defaults.charset),
            table_options: self.get("database.table_options", ""),
            options,
        }
    }

    /// Directory holding `*.up.sql` / `*.down.sql` migration files
    pub fn migrations_path(&self) -> PathBuf {
        PathBuf::from(self.get("database.migrations_path", "migrations"))
    }

    /// Name of the migration ledger table
    pub fn migrations_table(&self) -> String {
        self.get("database.migrations_table", "migrations")
    }

    /// Directory receiving database dumps
    pub fn dump_path(&self) -> PathBuf {
        PathBuf::from(self.get("database.dump_path", "data/database/dumps"))
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let db = self.database();
        let mut lines = vec![
            format!(
                "Config File:        {}",
                self.config_file.as_deref().unwrap_or("(none)")
            ),
            format!("DSN:                {}", db.dsn()),
            format!("Migrations Path:    {}", self.migrations_path().display()),
            format!("Migrations Table:   {}", self.migrations_table()),
            format!("Dump Path:          {}", self.dump_path().display()),
        ];
        if !db.is_configured() {
            lines.push("Database:           not configured".to_string());
        }
        lines.join("\n")
    }
}
