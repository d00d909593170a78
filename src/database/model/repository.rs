use std::marker::PhantomData;

use serde::Serialize;

use crate::database::collection::Collection;
use crate::database::core::{Attributes, Connection, Value};
use crate::database::model::relation::eager_load;
use crate::database::model::{Model, ModelDefinition, ModelInfo, Related};
use crate::database::query::{Builder, Direction, Operator};
use crate::error::{DbError, Result};

/// Entry point for reading and writing models of type `M`
///
/// Holds the connection explicitly; nothing is looked up globally.
pub struct Repository<'c, M: ModelDefinition> {
    conn: &'c Connection,
    _model: PhantomData<M>,
}

impl<'c, M: ModelDefinition> Repository<'c, M> {
    pub fn new(conn: &'c Connection) -> Self {
        Repository {
            conn,
            _model: PhantomData,
        }
    }

    pub fn info(&self) -> ModelInfo {
        M::info()
    }

    /// A new unsaved model filled with `attributes`
    pub fn make(&self, attributes: Attributes) -> Model {
        let mut model = Model::of::<M>();
        model.fill(attributes);
        model
    }

    /// Make and insert a model
    pub fn create(&self, attributes: Attributes) -> Result<Model> {
        let mut model = self.make(attributes);
        model.save_or_fail(self.conn)?;
        Ok(model)
    }

    pub fn query(&self) -> ModelQuery<'c> {
        ModelQuery::new(self.conn, M::info())
    }

    pub fn find(&self, id: impl Into<Value>) -> Result<Option<Model>> {
        self.query().find(id)
    }

    pub fn find_or_fail(&self, id: impl Into<Value>) -> Result<Model> {
        let id = id.into();
        self.find(id.clone())?.ok_or_else(|| DbError::ModelNotFound {
            model: M::NAME.to_string(),
            key: id,
        })
    }

    pub fn all(&self) -> Result<Collection<Model>> {
        self.query().get()
    }

    pub fn where_(&self, column: &str, value: impl Into<Value>) -> ModelQuery<'c> {
        self.query().where_(column, value)
    }

    pub fn where_op(&self, column: &str, operator: Operator, value: impl Into<Value>) -> ModelQuery<'c> {
        self.query().where_op(column, operator, value)
    }

    pub fn count(&self) -> Result<i64> {
        self.query().count()
    }

    /// Query that eager-loads `relations` onto its results
    pub fn with(&self, relations: &[&str]) -> ModelQuery<'c> {
        self.query().with(relations)
    }

    pub fn latest(&self) -> ModelQuery<'c> {
        self.query().latest()
    }

    pub fn oldest(&self) -> ModelQuery<'c> {
        self.query().oldest()
    }

    pub fn save(&self, model: &mut Model) -> bool {
        model.save(self.conn)
    }

    pub fn delete(&self, model: &Model) -> Result<bool> {
        model.delete(self.conn)
    }

    /// Eager-load relations onto an already fetched model
    pub fn load(&self, model: &mut Model, relations: &[&str]) -> Result<()> {
        eager_load(self.conn, std::slice::from_mut(model), relations)
    }

    /// A relation of `model`, fetched on first access and cached on the model
    pub fn related<'m>(&self, model: &'m mut Model, name: &str) -> Result<&'m Related> {
        let info = *model.info();
        if !model.relation_loaded(name) {
            let relation = info.relation(name)?.bind(&info);
            let related = relation.get_results(self.conn, model)?;
            model.set_relation(name, related);
        }
        model
            .relation(name)
            .ok_or_else(|| DbError::RelationContract {
                model: info.name.to_string(),
                relation: name.to_string(),
            })
    }
}

/// One page of models
#[derive(Debug, Clone, Serialize)]
pub struct Paginator {
    pub items: Collection<Model>,
    pub total: i64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

impl Paginator {
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}

/// A query whose rows come back as models of one type
#[derive(Debug, Clone)]
pub struct ModelQuery<'c> {
    info: ModelInfo,
    builder: Builder<'c>,
    eager: Vec<String>,
}

impl<'c> ModelQuery<'c> {
    pub fn new(conn: &'c Connection, info: ModelInfo) -> Self {
        ModelQuery {
            info,
            builder: conn.table(info.table),
            eager: Vec::new(),
        }
    }

    pub fn builder(&self) -> &Builder<'c> {
        &self.builder
    }

    fn map(mut self, f: impl FnOnce(Builder<'c>) -> Builder<'c>) -> Self {
        self.builder = f(self.builder);
        self
    }

    // ===== Clauses =====

    pub fn select<S: AsRef<str>>(self, columns: &[S]) -> Self {
        self.map(|b| b.select(columns))
    }

    pub fn where_(self, column: &str, value: impl Into<Value>) -> Self {
        self.map(|b| b.where_(column, value))
    }

    pub fn where_op(self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.map(|b| b.where_op(column, operator, value))
    }

    pub fn or_where(self, column: &str, value: impl Into<Value>) -> Self {
        self.map(|b| b.or_where(column, value))
    }

    pub fn or_where_op(self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.map(|b| b.or_where_op(column, operator, value))
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.map(|b| b.where_in(column, values))
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.map(|b| b.where_not_in(column, values))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.map(|b| b.where_null(column))
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.map(|b| b.where_not_null(column))
    }

    pub fn join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.map(|b| b.join(table, first, operator, second))
    }

    pub fn left_join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.map(|b| b.left_join(table, first, operator, second))
    }

    pub fn group_by(self, column: &str) -> Self {
        self.map(|b| b.group_by(column))
    }

    pub fn having(self, column: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.map(|b| b.having(column, operator, value))
    }

    pub fn order_by(self, column: &str, direction: Direction) -> Self {
        self.map(|b| b.order_by(column, direction))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.map(|b| b.order_by_desc(column))
    }

    pub fn latest(self) -> Self {
        self.map(|b| b.latest())
    }

    pub fn oldest(self) -> Self {
        self.map(|b| b.oldest())
    }

    pub fn limit(self, limit: u64) -> Self {
        self.map(|b| b.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.map(|b| b.offset(offset))
    }

    /// Relations to eager-load onto the results
    pub fn with(mut self, relations: &[&str]) -> Self {
        self.eager
            .extend(relations.iter().map(|r| r.to_string()));
        self
    }

    // ===== Terminals =====

    pub fn to_sql(&self) -> Result<String> {
        self.builder.to_sql()
    }

    /// Fetch, hydrate and eager-load
    pub fn get(&self) -> Result<Collection<Model>> {
        let mut models = Model::hydrate(self.info, self.builder.get()?);
        if !self.eager.is_empty() && !models.is_empty() {
            let names: Vec<&str> = self.eager.iter().map(String::as_str).collect();
            eager_load(self.builder.connection(), models.as_mut_slice(), &names)?;
        }
        Ok(models)
    }

    pub fn first(&self) -> Result<Option<Model>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    pub fn find(&self, id: impl Into<Value>) -> Result<Option<Model>> {
        self.clone().where_(self.info.primary_key, id).first()
    }

    pub fn count(&self) -> Result<i64> {
        self.builder.count()
    }

    pub fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        self.builder.pluck(column)
    }

    /// 1-based page of results plus totals
    pub fn paginate(&self, page: u64, per_page: u64) -> Result<Paginator> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = self.count()?;
        let last_page = (total.max(0) as u64).div_ceil(per_page).max(1);
        let items = self
            .clone()
            .map(|b| b.for_page(page, per_page))
            .get()?;

        Ok(Paginator {
            items,
            total,
            per_page,
            current_page: page,
            last_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::model::fixtures::*;

    fn seed(conn: &Connection) -> Repository<'_, User> {
        let users = Repository::<User>::new(conn);
        for (name, created) in [("ada", "2024-01-01"), ("bob", "2024-02-01"), ("cy", "2024-03-01")] {
            users
                .create(Attributes::new().with("name", name).with("created_at", created))
                .unwrap();
        }
        users
    }

    #[test]
    fn test_create_and_find() {
        let conn = setup();
        let users = Repository::<User>::new(&conn);
        let created = users.create(Attributes::new().with("name", "a")).unwrap();
        let id = created.key().cloned().unwrap();
        assert_eq!(id, Value::Integer(conn.last_insert_id().unwrap()));

        let found = users.find(id).unwrap().unwrap();
        assert_eq!(found.get("id"), Some(&Value::Integer(1)));
        assert_eq!(found.get("name"), Some(&Value::from("a")));
        assert!(!found.is_dirty());
    }

    #[test]
    fn test_find_or_fail() {
        let conn = setup();
        let users = Repository::<User>::new(&conn);
        match users.find_or_fail(42) {
            Err(DbError::ModelNotFound { model, key }) => {
                assert_eq!(model, "User");
                assert_eq!(key, Value::Integer(42));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_query_helpers() {
        let conn = setup();
        let users = seed(&conn);

        assert_eq!(users.count().unwrap(), 3);
        assert_eq!(users.all().unwrap().len(), 3);
        let newest = users.latest().first().unwrap().unwrap();
        assert_eq!(newest.get("name"), Some(&Value::from("cy")));
        let oldest = users.oldest().first().unwrap().unwrap();
        assert_eq!(oldest.get("name"), Some(&Value::from("ada")));

        let names = users
            .where_op("name", Operator::NotEq, "bob")
            .order_by("name", Direction::Asc)
            .pluck("name")
            .unwrap();
        assert_eq!(names, vec![Value::from("ada"), Value::from("cy")]);
    }

    #[test]
    fn test_paginate() {
        let conn = setup();
        let users = seed(&conn);

        let page = users
            .query()
            .order_by("id", Direction::Asc)
            .paginate(2, 2)
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].get("name"), Some(&Value::from("cy")));
        assert!(!page.has_more_pages());
    }

    #[test]
    fn test_paginate_grouped_total() {
        let conn = setup();
        let users = seed(&conn);
        users.create(Attributes::new().with("name", "ada")).unwrap();

        let page = users
            .query()
            .select(&["name"])
            .group_by("name")
            .order_by("name", Direction::Asc)
            .paginate(1, 2)
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more_pages());
    }

    #[test]
    fn test_with_eager_loads() {
        let conn = setup();
        let users = seed(&conn);
        conn.table("posts")
            .insert(Attributes::new().with("user_id", 2).with("title", "b1"))
            .execute()
            .unwrap();

        conn.enable_query_log();
        let loaded = users.with(&["posts", "profile"]).get().unwrap();
        assert_eq!(conn.query_log().len(), 3);
        assert!(loaded.iter().all(|u| u.relation_loaded("posts") && u.relation_loaded("profile")));
        assert_eq!(loaded[1].relation("posts").unwrap().as_many().unwrap().len(), 1);
    }

    #[test]
    fn test_related_is_cached() {
        let conn = setup();
        let users = seed(&conn);
        conn.table("profiles")
            .insert(Attributes::new().with("user_id", 1).with("bio", "first"))
            .execute()
            .unwrap();

        let mut ada = users.find(1).unwrap().unwrap();
        conn.enable_query_log();
        let bio = users
            .related(&mut ada, "profile")
            .unwrap()
            .as_one()
            .and_then(|p| p.get("bio").cloned());
        assert_eq!(bio, Some(Value::from("first")));
        users.related(&mut ada, "profile").unwrap();
        assert_eq!(conn.query_log().len(), 1);

        assert!(matches!(
            users.related(&mut ada, "followers"),
            Err(DbError::RelationContract { .. })
        ));
    }

    #[test]
    fn test_load_and_save_through_repository() {
        let conn = setup();
        let users = seed(&conn);
        let mut bob = users.find(2).unwrap().unwrap();
        users.load(&mut bob, &["posts"]).unwrap();
        assert!(bob.relation("posts").unwrap().is_empty());

        bob.set("name", "Bob");
        assert!(users.save(&mut bob));
        assert_eq!(
            users.find(2).unwrap().unwrap().get("name"),
            Some(&Value::from("Bob"))
        );
        assert!(users.delete(&bob).unwrap());
        assert_eq!(users.count().unwrap(), 2);
    }
}
