//! Core database infrastructure
//!
//! - `Connection`: lazily-opened SQLite connection, transactions and query log
//! - `Value` / `Attributes`: cell values and ordered column maps
//! - `grammar`: identifier quoting shared by the query and schema compilers

mod connection;
pub mod grammar;
mod value;

pub use connection::{Connection, QueryLogEntry};
pub use value::{quote_string, AttributeSource, Attributes, FromValue, Row, Value};
