//! Fluent SQL query builder
//!
//! A [`Builder`] accumulates the parts of a query (columns, table, joins,
//! predicates, grouping, ordering, paging, row data) and compiles it into a
//! [`CompiledQuery`]: SQL with `?` placeholders plus the positional bindings
//! that fill them, in the same order.
//!
//! ```rust,ignore
//! use quarry::database::{Connection, Operator};
//!
//! let conn = Connection::in_memory();
//! let recent = conn
//!     .table("posts")
//!     .where_("user_id", 7)
//!     .where_op("votes", Operator::Gt, 10)
//!     .order_by_desc("id")
//!     .limit(5)
//!     .get()?;
//! ```

mod builder;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::database::core::Value;
use crate::error::DbError;

pub use builder::Builder;

/// SQL text plus its positional bindings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl CompiledQuery {
    /// Number of `?` markers in the SQL
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

/// Comparison operators accepted by `where_op` and `having`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    LtGt,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::LtGt => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }

    fn is_negation(&self) -> bool {
        matches!(self, Operator::NotEq | Operator::LtGt)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" => Ok(Operator::NotEq),
            "<>" => Ok(Operator::LtGt),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            other => Err(DbError::InvalidQuery(format!(
                "unsupported operator '{}'",
                other
            ))),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(DbError::InvalidQuery(format!(
                "unsupported sort direction '{}'",
                other
            ))),
        }
    }
}

/// Connector placed before a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    fn as_sql(&self) -> &'static str {
        match self {
            Boolean::And => "AND",
            Boolean::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Basic { operator: Operator, value: Value },
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Null,
    NotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WhereClause {
    pub column: String,
    pub predicate: Predicate,
    pub boolean: Boolean,
}

impl WhereClause {
    /// Values this predicate binds, in placeholder order
    fn bound_values(&self) -> Vec<Value> {
        match &self.predicate {
            Predicate::Basic { value, .. } if !value.is_null() => vec![value.clone()],
            Predicate::In(values) | Predicate::NotIn(values) => values.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Column {
    Named(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum QueryKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}
