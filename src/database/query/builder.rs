use crate::database::collection::Collection;
use crate::database::core::grammar::{columnize, parameterize, wrap};
use crate::database::core::{Attributes, Connection, Row, Value};
use crate::database::query::{
    Boolean, Column, CompiledQuery, Direction, JoinClause, JoinKind, Operator, Predicate,
    QueryKind, WhereClause,
};
use crate::error::{DbError, Result};

/// Fluent query builder bound to a [`Connection`]
///
/// Every clause method consumes the builder and returns it. Predicate values
/// are appended to the binding list in the call that introduces them; WHERE
/// bindings always precede HAVING bindings, and for UPDATE the SET values come
/// first of all.
#[derive(Debug, Clone)]
pub struct Builder<'c> {
    conn: &'c Connection,
    kind: QueryKind,
    columns: Vec<Column>,
    table: Option<String>,
    joins: Vec<JoinClause>,
    wheres: Vec<WhereClause>,
    groups: Vec<String>,
    havings: Vec<WhereClause>,
    orders: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
    data: Attributes,
    where_bindings: Vec<Value>,
    having_bindings: Vec<Value>,
}

impl<'c> Builder<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Builder {
            conn,
            kind: QueryKind::Select,
            columns: Vec::new(),
            table: None,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            data: Attributes::new(),
            where_bindings: Vec::new(),
            having_bindings: Vec::new(),
        }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    // =========================================================================
    // Clauses
    // =========================================================================

    /// Replace the selected columns
    pub fn select<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = columns
            .iter()
            .map(|c| Column::Named(c.as_ref().to_string()))
            .collect();
        self
    }

    /// Add a raw select expression, emitted verbatim
    pub fn select_raw(mut self, expression: &str) -> Self {
        self.columns.push(Column::Raw(expression.to_string()));
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn table(self, table: &str) -> Self {
        self.from(table)
    }

    fn push_where(mut self, column: &str, predicate: Predicate, boolean: Boolean) -> Self {
        let clause = WhereClause {
            column: column.to_string(),
            predicate,
            boolean,
        };
        self.where_bindings.extend(clause.bound_values());
        self.wheres.push(clause);
        self
    }

    /// `column = value`, or `column IS NULL` for a null value
    pub fn where_(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    pub fn where_op(self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.push_where(column, Predicate::Basic { operator, value }, Boolean::And)
    }

    pub fn or_where(self, column: &str, value: impl Into<Value>) -> Self {
        self.or_where_op(column, Operator::Eq, value)
    }

    pub fn or_where_op(self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.push_where(column, Predicate::Basic { operator, value }, Boolean::Or)
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_where(column, Predicate::In(values), Boolean::And)
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_where(column, Predicate::NotIn(values), Boolean::And)
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push_where(column, Predicate::Null, Boolean::And)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push_where(column, Predicate::NotNull, Boolean::And)
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: &str,
        first: &str,
        operator: Operator,
        second: &str,
    ) -> Self {
        self.joins.push(JoinClause {
            kind,
            table: table.to_string(),
            first: first.to_string(),
            operator,
            second: second.to_string(),
        });
        self
    }

    pub fn join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.push_join(JoinKind::Inner, table, first, operator, second)
    }

    pub fn left_join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.push_join(JoinKind::Left, table, first, operator, second)
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.groups.push(column.to_string());
        self
    }

    pub fn having(mut self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        let clause = WhereClause {
            column: column.to_string(),
            predicate: Predicate::Basic {
                operator,
                value: value.into(),
            },
            boolean: Boolean::And,
        };
        self.having_bindings.extend(clause.bound_values());
        self.havings.push(clause);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.orders.push((column.to_string(), direction));
        self
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, Direction::Desc)
    }

    /// Newest first by `created_at`
    pub fn latest(self) -> Self {
        self.order_by_desc("created_at")
    }

    /// Oldest first by `created_at`
    pub fn oldest(self) -> Self {
        self.order_by("created_at", Direction::Asc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Limit and offset for a 1-based page number
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        self.offset((page - 1) * per_page).limit(per_page)
    }

    /// Turn this into an INSERT of `data`
    pub fn insert(mut self, data: Attributes) -> Self {
        self.kind = QueryKind::Insert;
        self.data = data;
        self
    }

    /// Turn this into an UPDATE setting `data`, keeping the predicates
    pub fn update(mut self, data: Attributes) -> Self {
        self.kind = QueryKind::Update;
        self.data = data;
        self
    }

    /// Turn this into a DELETE, keeping the predicates
    pub fn delete(mut self) -> Self {
        self.kind = QueryKind::Delete;
        self
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    /// Bindings in placeholder order
    pub fn bindings(&self) -> Vec<Value> {
        let mut bindings = Vec::new();
        if matches!(self.kind, QueryKind::Insert | QueryKind::Update) {
            bindings.extend(self.data.values().cloned());
        }
        if self.kind != QueryKind::Insert {
            bindings.extend(self.where_bindings.iter().cloned());
        }
        if self.kind == QueryKind::Select {
            bindings.extend(self.having_bindings.iter().cloned());
        }
        bindings
    }

    pub fn to_sql(&self) -> Result<String> {
        self.compile().map(|c| c.sql)
    }

    pub fn compile(&self) -> Result<CompiledQuery> {
        let table = self
            .table
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| DbError::InvalidQuery("no table specified".to_string()))?;

        let sql = match self.kind {
            QueryKind::Select => self.compile_select(table),
            QueryKind::Insert => self.compile_insert(table)?,
            QueryKind::Update => self.compile_update(table)?,
            QueryKind::Delete => self.compile_delete(table),
        };

        Ok(CompiledQuery {
            sql,
            bindings: self.bindings(),
        })
    }

    fn compile_select(&self, table: &str) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| match c {
                    Column::Named(name) => wrap(name),
                    Column::Raw(expr) => expr.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, wrap(table));

        for join in &self.joins {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            sql.push_str(&format!(
                " {} {} ON {} {} {}",
                keyword,
                wrap(&join.table),
                wrap(&join.first),
                join.operator,
                wrap(&join.second)
            ));
        }

        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres));
        }

        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&columnize(&self.groups));
        }

        if !self.havings.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&compile_predicates(&self.havings));
        }

        if !self.orders.is_empty() {
            let orders = self
                .orders
                .iter()
                .map(|(column, direction)| format!("{} {}", wrap(column), direction.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders);
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite has no OFFSET without LIMIT
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    fn compile_insert(&self, table: &str) -> Result<String> {
        if self.data.is_empty() {
            return Err(DbError::InvalidQuery(format!(
                "insert into {} without any values",
                table
            )));
        }
        let columns: Vec<&str> = self.data.keys().collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            wrap(table),
            columnize(&columns),
            parameterize(columns.len())
        ))
    }

    fn compile_update(&self, table: &str) -> Result<String> {
        if self.data.is_empty() {
            return Err(DbError::InvalidQuery(format!(
                "update of {} without any values",
                table
            )));
        }
        let sets = self
            .data
            .keys()
            .map(|column| format!("{} = ?", wrap(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("UPDATE {} SET {}", wrap(table), sets);
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres));
        }
        Ok(sql)
    }

    fn compile_delete(&self, table: &str) -> String {
        let mut sql = format!("DELETE FROM {}", wrap(table));
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&compile_predicates(&self.wheres));
        }
        sql
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run an INSERT, UPDATE or DELETE
    ///
    /// Returns the new row id for INSERT and the affected row count otherwise.
    pub fn execute(&self) -> Result<i64> {
        let compiled = self.compile()?;
        match self.kind {
            QueryKind::Insert => self.conn.insert(&compiled.sql, &compiled.bindings),
            QueryKind::Update | QueryKind::Delete => self
                .conn
                .execute(&compiled.sql, &compiled.bindings)
                .map(|n| n as i64),
            QueryKind::Select => Err(DbError::InvalidQuery(
                "execute() called on a SELECT; use get()".to_string(),
            )),
        }
    }

    /// Run the SELECT and return every row
    pub fn get(&self) -> Result<Collection<Row>> {
        if self.kind != QueryKind::Select {
            return Err(DbError::InvalidQuery(
                "get() called on a write query; use execute()".to_string(),
            ));
        }
        let compiled = self.compile()?;
        Ok(self.conn.select(&compiled.sql, &compiled.bindings)?.into())
    }

    pub fn first(&self) -> Result<Option<Row>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    /// Row whose `id` column equals `id`
    pub fn find(&self, id: impl Into<Value>) -> Result<Option<Row>> {
        self.clone().where_("id", id).first()
    }

    /// One column from every row
    pub fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        let rows = self.clone().select(&[column]).get()?;
        Ok(rows
            .into_iter()
            .map(|row| row.values().next().cloned().unwrap_or_default())
            .collect())
    }

    /// One column from the first row
    pub fn value(&self, column: &str) -> Result<Option<Value>> {
        Ok(self.clone().limit(1).pluck(column)?.into_iter().next())
    }

    pub fn exists(&self) -> Result<bool> {
        let compiled = self.compile()?;
        let sql = format!("SELECT EXISTS({}) AS `exists`", compiled.sql);
        let rows = self.conn.select(&sql, &compiled.bindings)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("exists"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Number of matching rows, or of groups when the query is grouped
    pub fn count(&self) -> Result<i64> {
        if self.groups.is_empty() {
            return Ok(self.aggregate("COUNT", "*")?.as_i64().unwrap_or(0));
        }

        let mut grouped = self.clone();
        grouped.orders.clear();
        grouped.limit = None;
        grouped.offset = None;
        let inner = grouped.compile()?;

        let sql = format!(
            "SELECT COUNT(*) AS `aggregate` FROM ({}) AS `grouped`",
            inner.sql
        );
        let rows = self.conn.select(&sql, &inner.bindings)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    pub fn max(&self, column: &str) -> Result<Value> {
        self.aggregate("MAX", column)
    }

    pub fn min(&self, column: &str) -> Result<Value> {
        self.aggregate("MIN", column)
    }

    pub fn sum(&self, column: &str) -> Result<Value> {
        self.aggregate("SUM", column)
    }

    pub fn avg(&self, column: &str) -> Result<Value> {
        self.aggregate("AVG", column)
    }

    /// Run `function(column)` over the filtered rows
    ///
    /// Works on a copy: the selected columns, ordering and paging of `self`
    /// are left untouched.
    fn aggregate(&self, function: &str, column: &str) -> Result<Value> {
        let mut query = self.clone();
        query.columns = vec![Column::Raw(format!(
            "{}({}) AS `aggregate`",
            function,
            wrap(column)
        ))];
        query.orders.clear();
        query.limit = None;
        query.offset = None;

        let row = query.get()?.into_iter().next();
        Ok(row
            .and_then(|r| r.get("aggregate").cloned())
            .unwrap_or_default())
    }
}

fn compile_predicates(clauses: &[WhereClause]) -> String {
    clauses
        .iter()
        .enumerate()
        .map(|(idx, clause)| {
            let sql = compile_predicate(clause);
            if idx == 0 {
                sql
            } else {
                format!("{} {}", clause.boolean.as_sql(), sql)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile_predicate(clause: &WhereClause) -> String {
    let column = wrap(&clause.column);
    match &clause.predicate {
        Predicate::Basic { operator, value } if value.is_null() => match operator {
            Operator::Eq => format!("{} IS NULL", column),
            op if op.is_negation() => format!("{} IS NOT NULL", column),
            op => format!("{} {} NULL", column, op),
        },
        Predicate::Basic { operator, .. } => format!("{} {} ?", column, operator),
        Predicate::In(values) if values.is_empty() => "0 = 1".to_string(),
        Predicate::In(values) => format!("{} IN ({})", column, parameterize(values.len())),
        Predicate::NotIn(values) if values.is_empty() => "1 = 1".to_string(),
        Predicate::NotIn(values) => {
            format!("{} NOT IN ({})", column, parameterize(values.len()))
        }
        Predicate::Null => format!("{} IS NULL", column),
        Predicate::NotNull => format!("{} IS NOT NULL", column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::in_memory();
        conn.statement(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, votes INT, created_at TEXT);
             CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INT, title TEXT);",
        )
        .unwrap();
        for (name, votes, created) in [
            ("ada", 10, "2024-01-01"),
            ("bob", 3, "2024-02-01"),
            ("cy", 7, "2024-03-01"),
        ] {
            conn.table("users")
                .insert(
                    Attributes::new()
                        .with("name", name)
                        .with("votes", votes)
                        .with("created_at", created),
                )
                .execute()
                .unwrap();
        }
        conn
    }

    #[test]
    fn test_select_clause_order() {
        let conn = Connection::in_memory();
        let q = conn
            .table("users")
            .select(&["users.name", "posts.title"])
            .join("posts", "posts.user_id", Operator::Eq, "users.id")
            .where_("users.active", 1)
            .group_by("users.name")
            .having("votes", Operator::Gt, 5)
            .order_by_desc("users.name")
            .limit(10)
            .offset(20)
            .compile()
            .unwrap();

        assert_eq!(
            q.sql,
            "SELECT `users`.`name`, `posts`.`title` FROM `users` \
             INNER JOIN `posts` ON `posts`.`user_id` = `users`.`id` \
             WHERE `users`.`active` = ? GROUP BY `users`.`name` \
             HAVING `votes` > ? ORDER BY `users`.`name` DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.bindings, vec![Value::Integer(1), Value::Integer(5)]);
    }

    #[test]
    fn test_placeholders_match_bindings() {
        let conn = Connection::in_memory();
        let q = conn
            .table("users")
            .where_("a", 1)
            .where_in("b", [2, 3, 4])
            .or_where_op("c", Operator::Like, "x%")
            .where_null("d")
            .where_("e", Value::Null)
            .where_in("f", Vec::<i64>::new())
            .compile()
            .unwrap();

        assert_eq!(q.placeholder_count(), q.bindings.len());
        assert_eq!(
            q.bindings,
            vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
                Value::Integer(4),
                Value::from("x%"),
            ]
        );
        assert!(q.sql.contains("`e` IS NULL"));
        assert!(q.sql.contains("0 = 1"));
        assert!(q.sql.contains("OR `c` LIKE ?"));
    }

    #[test]
    fn test_null_inequality_and_empty_not_in() {
        let conn = Connection::in_memory();
        let sql = conn
            .table("t")
            .where_op("a", Operator::NotEq, Value::Null)
            .where_not_in("b", Vec::<i64>::new())
            .to_sql()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM `t` WHERE `a` IS NOT NULL AND 1 = 1");
    }

    #[test]
    fn test_update_binds_set_values_before_where() {
        let conn = Connection::in_memory();
        let q = conn
            .table("users")
            .where_("id", 9)
            .update(Attributes::new().with("name", "z").with("votes", 2))
            .compile()
            .unwrap();
        assert_eq!(q.sql, "UPDATE `users` SET `name` = ?, `votes` = ? WHERE `id` = ?");
        assert_eq!(
            q.bindings,
            vec![Value::from("z"), Value::Integer(2), Value::Integer(9)]
        );
    }

    #[test]
    fn test_insert_and_delete_sql() {
        let conn = Connection::in_memory();
        let insert = conn
            .table("users")
            .insert(Attributes::new().with("name", "a").with("votes", 1))
            .compile()
            .unwrap();
        assert_eq!(insert.sql, "INSERT INTO `users` (`name`, `votes`) VALUES (?, ?)");

        let delete = conn.table("users").where_("id", 3).delete().compile().unwrap();
        assert_eq!(delete.sql, "DELETE FROM `users` WHERE `id` = ?");
        assert_eq!(delete.bindings, vec![Value::Integer(3)]);
    }

    #[test]
    fn test_invalid_queries() {
        let conn = Connection::in_memory();
        assert!(matches!(
            conn.query().compile(),
            Err(DbError::InvalidQuery(_))
        ));
        assert!(matches!(
            conn.table("users").insert(Attributes::new()).compile(),
            Err(DbError::InvalidQuery(_))
        ));
        assert!(matches!(
            conn.table("users").update(Attributes::new()).compile(),
            Err(DbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_offset_without_limit() {
        let conn = Connection::in_memory();
        let sql = conn.table("users").offset(5).to_sql().unwrap();
        assert_eq!(sql, "SELECT * FROM `users` LIMIT -1 OFFSET 5");
    }

    #[test]
    fn test_identifier_injection_is_quoted() {
        let conn = Connection::in_memory();
        let sql = conn
            .table("users")
            .where_("name`; DROP TABLE users; --", 1)
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `users` WHERE `name``; DROP TABLE users; --` = ?"
        );
    }

    #[test]
    fn test_execute_and_fetch() {
        let conn = setup();

        let rows = conn
            .table("users")
            .where_op("votes", Operator::Gte, 5)
            .order_by("name", Direction::Asc)
            .get()
            .unwrap();
        assert_eq!(rows.pluck("name"), vec![Value::from("ada"), Value::from("cy")]);

        let latest = conn.table("users").latest().first().unwrap().unwrap();
        assert_eq!(latest.get("name"), Some(&Value::from("cy")));

        let affected = conn
            .table("users")
            .where_("name", "bob")
            .update(Attributes::new().with("votes", 30))
            .execute()
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(
            conn.table("users").where_("name", "bob").value("votes").unwrap(),
            Some(Value::Integer(30))
        );

        let deleted = conn.table("users").where_("name", "cy").delete().execute().unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(conn.table("users").count().unwrap(), 2);
    }

    #[test]
    fn test_aggregates_keep_selected_columns() {
        let conn = setup();
        let query = conn.table("users").select(&["name"]).limit(1);

        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(query.max("votes").unwrap(), Value::Integer(10));
        assert_eq!(query.min("votes").unwrap(), Value::Integer(3));
        assert_eq!(query.sum("votes").unwrap(), Value::Integer(20));

        // the original selection still applies
        let rows = query.get().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn test_count_grouped_query() {
        let conn = setup();
        conn.table("users")
            .insert(Attributes::new().with("name", "ada").with("votes", 1))
            .execute()
            .unwrap();

        let grouped = conn.table("users").group_by("name");
        assert_eq!(grouped.count().unwrap(), 3);
        assert_eq!(
            grouped
                .clone()
                .having("name", Operator::NotEq, "bob")
                .limit(1)
                .count()
                .unwrap(),
            2
        );
        assert_eq!(conn.table("users").count().unwrap(), 4);
    }

    #[test]
    fn test_exists_and_find() {
        let conn = setup();
        assert!(conn.table("users").where_("name", "ada").exists().unwrap());
        assert!(!conn.table("users").where_("name", "zed").exists().unwrap());

        let row = conn.table("users").find(2).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("bob")));
        assert!(conn.table("users").find(99).unwrap().is_none());
    }

    #[test]
    fn test_for_page() {
        let conn = setup();
        let page = conn
            .table("users")
            .order_by("id", Direction::Asc)
            .for_page(2, 2)
            .pluck("id")
            .unwrap();
        assert_eq!(page, vec![Value::Integer(3)]);
    }
}
