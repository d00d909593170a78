#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Quarry - An active-record data-access layer on SQLite
//!
//! Quarry provides a fluent query builder, active-record models with
//! relations and eager loading, schema blueprints, and a batch-tracked
//! migration engine. It can be used as a library and, with the `cli`
//! feature, as a migration runner on the command line.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | `quarry` binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! quarry = { version = "0.3", default-features = false }
//!
//! # Default (CLI binary)
//! quarry = "0.3"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: connection, query builder, models, schema, migrations, dumps
//! - **[`config`]**: configuration loading (TOML file, `.env`, `QUARRY_*` variables)
//! - **[`filesystem`]**: file access used by migrations and dumps
//! - **[`error`]**: the [`DbError`] type shared by all of the above
//!
//! # Quick Start
//!
//! ## Queries
//!
//! ```rust,ignore
//! use quarry::{Attributes, Connection, Operator};
//!
//! let conn = Connection::in_memory();
//! let id = conn
//!     .table("users")
//!     .insert(Attributes::new().with("name", "Ada").with("votes", 120))
//!     .execute()?;
//!
//! let popular = conn
//!     .table("users")
//!     .where_op("votes", Operator::Gt, 100)
//!     .order_by_desc("votes")
//!     .get()?;
//! ```
//!
//! ## Models
//!
//! ```rust,ignore
//! use quarry::{ModelDefinition, RelationDef, Repository};
//!
//! struct User;
//! impl ModelDefinition for User {
//!     const NAME: &'static str = "User";
//!     const TABLE: &'static str = "users";
//!     fn relations() -> Vec<(&'static str, RelationDef)> {
//!         vec![("posts", RelationDef::has_many::<Post>())]
//!     }
//! }
//!
//! let users = Repository::<User>::new(&conn);
//! let all = users.with(&["posts"]).get()?;
//! ```
//!
//! ## Migrations
//!
//! ```rust,ignore
//! use quarry::{LocalFilesystem, MigrationRegistry, Migrator};
//!
//! let mut registry = MigrationRegistry::new();
//! registry.discover(&LocalFilesystem, "migrations".as_ref())?;
//! let applied = Migrator::new(&conn, registry).run_pending()?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod filesystem;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{DatabaseConfig, QuarryConfig};

// =============================================================================
// Errors
// =============================================================================

pub use error::{DbError, Result};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

pub use database::{AttributeSource, Attributes, Connection, FromValue, Row, Value};

pub use database::{Builder, Collection, Direction, Operator};

pub use database::{Model, ModelDefinition, ModelInfo, ModelQuery, Related, RelationDef, Repository};

pub use database::{Blueprint, Schema};

pub use database::{
    DatabaseManager, Migration, MigrationGenerator, MigrationKind, MigrationRegistry, Migrator,
    SqlMigration,
};

pub use filesystem::{Filesystem, LocalFilesystem};
