//! Database module
//!
//! This module provides the whole data-access layer, organized into:
//!
//! - **core**: Connection handling, values and identifier quoting
//! - **query**: Fluent query builder compiling to parameterised SQL
//! - **model**: Active-record models, relations and eager loading
//! - **schema**: Table blueprints compiled to DDL, plus introspection
//! - **migrations**: Batch-tracked migrations and file scaffolding
//! - **dump**: SQL text dumps and restores
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # Lazy SQLite handle, transactions, query log
//! │   ├── grammar     # Identifier quoting
//! │   └── value       # Value, Attributes, Row
//! │
//! ├── query/          # Builder, operators, compiled queries
//! ├── collection      # Ordered result sets
//! ├── model/          # Model, Repository, relations
//! ├── schema/         # Schema, Blueprint
//! ├── migrations/     # Migrator, registry, generator
//! └── dump            # DatabaseManager
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use quarry::database::{Connection, Operator};
//!
//! let conn = Connection::new(config.database());
//!
//! let active = conn
//!     .table("users")
//!     .where_op("votes", Operator::Gt, 100)
//!     .or_where("name", "John")
//!     .get()?;
//! ```

pub mod collection;
pub mod core;
pub mod dump;
pub mod migrations;
pub mod model;
pub mod query;
pub mod schema;

// =============================================================================
// Core
// =============================================================================

pub use core::{
    quote_string, AttributeSource, Attributes, Connection, FromValue, QueryLogEntry, Row, Value,
};

// =============================================================================
// Queries
// =============================================================================

pub use collection::Collection;
pub use query::{Boolean, Builder, CompiledQuery, Direction, Operator};

// =============================================================================
// Models
// =============================================================================

pub use model::{
    eager_load, Model, ModelDefinition, ModelInfo, ModelQuery, Paginator, Related, Relation,
    RelationDef, RelationKind, Repository,
};

// =============================================================================
// Schema and migrations
// =============================================================================

pub use schema::{
    Blueprint, ColumnDefinition, ColumnType, ForeignKeyDefinition, IndexDefinition, IndexKind,
    Schema,
};

pub use migrations::{
    GeneratedMigration, Migration, MigrationGenerator, MigrationKind, MigrationRegistry,
    MigrationState, MigrationStatus, Migrator, RefreshOutcome, SqlMigration,
    DEFAULT_MIGRATIONS_TABLE,
};

pub use dump::{DatabaseManager, DUMP_FILE_PREFIX};
