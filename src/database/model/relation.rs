//! Relations between models and eager loading
//!
//! A [`RelationDef`] is the static declaration returned from
//! `ModelDefinition::relations()`. Binding it to the parent model's info gives
//! a short-lived [`Relation`] that knows both key columns and implements the
//! four eager-loading steps: seed the parents, constrain one query to all
//! parent keys, run it, and match the results back by key.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::database::collection::Collection;
use crate::database::core::{Connection, Value};
use crate::database::model::{Model, ModelDefinition, ModelInfo, Related};
use crate::database::query::{Builder, Direction};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
}

/// Declared relation, keys optional until bound to a parent
#[derive(Debug, Clone)]
pub struct RelationDef {
    kind: RelationKind,
    related: ModelInfo,
    foreign_key: Option<String>,
    local_key: Option<String>,
}

impl RelationDef {
    fn new(kind: RelationKind, related: ModelInfo) -> Self {
        RelationDef {
            kind,
            related,
            foreign_key: None,
            local_key: None,
        }
    }

    /// The related table holds `lower(parent)_id`
    pub fn has_one<R: ModelDefinition>() -> Self {
        Self::new(RelationKind::HasOne, R::info())
    }

    /// The related table holds `lower(parent)_id`, many rows per parent
    pub fn has_many<R: ModelDefinition>() -> Self {
        Self::new(RelationKind::HasMany, R::info())
    }

    /// This table holds `lower(related)_id`
    pub fn belongs_to<R: ModelDefinition>() -> Self {
        Self::new(RelationKind::BelongsTo, R::info())
    }

    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Parent column matched by a has-one/has-many foreign key
    pub fn local_key(mut self, column: &str) -> Self {
        self.local_key = Some(column.to_string());
        self
    }

    /// Related column a belongs-to foreign key points at
    pub fn owner_key(self, column: &str) -> Self {
        self.local_key(column)
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn related(&self) -> &ModelInfo {
        &self.related
    }

    /// Resolve inferred keys against the parent model
    pub fn bind(&self, parent: &ModelInfo) -> Relation {
        let (foreign_key, local_key) = match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => (
                self.foreign_key.clone().unwrap_or_else(|| parent.foreign_key()),
                self.local_key
                    .clone()
                    .unwrap_or_else(|| parent.primary_key.to_string()),
            ),
            RelationKind::BelongsTo => (
                self.foreign_key
                    .clone()
                    .unwrap_or_else(|| self.related.foreign_key()),
                self.local_key
                    .clone()
                    .unwrap_or_else(|| self.related.primary_key.to_string()),
            ),
        };
        Relation {
            kind: self.kind,
            related: self.related,
            foreign_key,
            local_key,
        }
    }
}

/// A relation bound to a parent model type
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub related: ModelInfo,
    pub foreign_key: String,
    /// Local key for has-one/has-many, owner key for belongs-to
    pub local_key: String,
}

impl Relation {
    /// Attribute read from the parent
    pub fn parent_key(&self) -> &str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => &self.local_key,
            RelationKind::BelongsTo => &self.foreign_key,
        }
    }

    /// Column matched on the related table
    pub fn related_key(&self) -> &str {
        match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => &self.foreign_key,
            RelationKind::BelongsTo => &self.local_key,
        }
    }

    fn is_many(&self) -> bool {
        self.kind == RelationKind::HasMany
    }

    fn empty(&self) -> Related {
        if self.is_many() {
            Related::Many(Collection::empty())
        } else {
            Related::One(None)
        }
    }

    pub fn query<'c>(&self, conn: &'c Connection) -> Builder<'c> {
        conn.table(self.related.table)
    }

    /// Lazy fetch for a single parent
    pub fn get_results(&self, conn: &Connection, parent: &Model) -> Result<Related> {
        let key = match parent.get(self.parent_key()).filter(|v| !v.is_null()) {
            Some(key) => key.clone(),
            None => return Ok(self.empty()),
        };

        let query = self.query(conn).where_(self.related_key(), key);
        if self.is_many() {
            Ok(Related::Many(Model::hydrate(self.related, query.get()?)))
        } else {
            // the newest match wins, as in eager matching
            Ok(Related::One(
                query
                    .order_by_desc(self.related.primary_key)
                    .first()?
                    .map(|row| Box::new(Model::from_row(self.related, row))),
            ))
        }
    }

    /// Eager query for the parents' keys, ordered so that the last match per
    /// key is the newest row
    fn eager_query<'c>(&self, conn: &'c Connection, parents: &[Model]) -> Option<Builder<'c>> {
        let query = self.add_eager_constraints(self.query(conn), parents)?;
        Some(match self.kind {
            RelationKind::HasOne => query.order_by(self.related.primary_key, Direction::Asc),
            RelationKind::HasMany | RelationKind::BelongsTo => query,
        })
    }

    /// Constrain `query` to the parents' keys; `None` when no parent has one
    pub fn add_eager_constraints<'c>(
        &self,
        query: Builder<'c>,
        parents: &[Model],
    ) -> Option<Builder<'c>> {
        let mut seen = HashSet::new();
        let keys: Vec<Value> = parents
            .iter()
            .filter_map(|p| p.get(self.parent_key()))
            .filter(|v| v.dictionary_key().is_some_and(|k| seen.insert(k)))
            .cloned()
            .collect();

        if keys.is_empty() {
            None
        } else {
            Some(query.where_in(self.related_key(), keys))
        }
    }

    /// Seed every parent with an empty relation value
    pub fn init_relation(&self, parents: &mut [Model], name: &str) {
        for parent in parents.iter_mut() {
            parent.set_relation(name, self.empty());
        }
    }

    /// Assign results to their parents by key
    ///
    /// To-one relations keep the last result seen for a key; to-many relations
    /// collect all results in query order.
    pub fn match_results(&self, parents: &mut [Model], results: Collection<Model>, name: &str) {
        let mut dictionary: HashMap<String, Vec<Model>> = HashMap::new();
        for model in results {
            if let Some(key) = model.get(self.related_key()).and_then(Value::dictionary_key) {
                let bucket = dictionary.entry(key).or_default();
                if !self.is_many() {
                    bucket.clear();
                }
                bucket.push(model);
            }
        }

        for parent in parents.iter_mut() {
            let Some(key) = parent.get(self.parent_key()).and_then(Value::dictionary_key) else {
                continue;
            };
            let Some(models) = dictionary.get(&key) else {
                continue;
            };
            let related = if self.is_many() {
                Related::Many(models.iter().cloned().collect())
            } else {
                Related::One(models.last().cloned().map(Box::new))
            };
            parent.set_relation(name, related);
        }
    }
}

/// Load `names` onto every parent with one query per relation
///
/// Dotted names (`posts.comments`) load the nested relation onto the related
/// models before they are attached to their parents.
pub fn eager_load(conn: &Connection, parents: &mut [Model], names: &[&str]) -> Result<()> {
    let Some(info) = parents.first().map(|p| *p.info()) else {
        return Ok(());
    };

    let mut tree: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for name in names {
        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (*name, None),
        };
        let nested = tree.entry(head).or_default();
        if let Some(rest) = rest {
            nested.push(rest);
        }
    }

    for (name, nested) in tree {
        let relation = info.relation(name)?.bind(&info);
        relation.init_relation(parents, name);

        let Some(query) = relation.eager_query(conn, parents) else {
            debug!(relation = name, "no parent keys, skipping eager query");
            continue;
        };

        let mut results = Model::hydrate(relation.related, query.get()?);
        if !nested.is_empty() {
            eager_load(conn, results.as_mut_slice(), &nested)?;
        }
        relation.match_results(parents, results, name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::Attributes;
    use crate::database::model::fixtures::*;
    use crate::database::model::Repository;
    use crate::error::DbError;

    fn seed(conn: &Connection) {
        for name in ["ada", "bob", "cy"] {
            conn.table("users")
                .insert(Attributes::new().with("name", name))
                .execute()
                .unwrap();
        }
        for (user_id, title) in [(1, "a1"), (1, "a2"), (3, "c1")] {
            conn.table("posts")
                .insert(Attributes::new().with("user_id", user_id).with("title", title))
                .execute()
                .unwrap();
        }
        conn.table("profiles")
            .insert(Attributes::new().with("user_id", 3).with("bio", "hi"))
            .execute()
            .unwrap();
        conn.table("comments")
            .insert(Attributes::new().with("post_id", 3).with("body", "nice"))
            .execute()
            .unwrap();
    }

    #[test]
    fn test_key_inference() {
        let user = User::info();
        let posts = user.relation("posts").unwrap().bind(&user);
        assert_eq!(posts.foreign_key, "user_id");
        assert_eq!(posts.local_key, "id");

        let post = Post::info();
        let owner = post.relation("user").unwrap().bind(&post);
        assert_eq!(owner.parent_key(), "user_id");
        assert_eq!(owner.related_key(), "id");

        let custom = RelationDef::belongs_to::<User>()
            .foreign_key("author_id")
            .owner_key("uuid")
            .bind(&post);
        assert_eq!(custom.parent_key(), "author_id");
        assert_eq!(custom.related_key(), "uuid");
    }

    #[test]
    fn test_has_many_eager_load_single_query() {
        let conn = setup();
        seed(&conn);
        let mut users = Repository::<User>::new(&conn).all().unwrap();

        conn.enable_query_log();
        eager_load(&conn, users.as_mut_slice(), &["posts"]).unwrap();
        let log = conn.query_log();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].sql,
            "SELECT * FROM `posts` WHERE `user_id` IN (?, ?, ?)"
        );

        let sizes: Vec<usize> = users
            .iter()
            .map(|u| u.relation("posts").and_then(Related::as_many).map_or(99, |p| p.len()))
            .collect();
        assert_eq!(sizes, vec![2, 0, 1]);
    }

    #[test]
    fn test_has_one_and_belongs_to() {
        let conn = setup();
        seed(&conn);

        let mut users = Repository::<User>::new(&conn).all().unwrap();
        eager_load(&conn, users.as_mut_slice(), &["profile"]).unwrap();
        assert!(users[0].relation("profile").unwrap().as_one().is_none());
        assert_eq!(
            users[2].relation("profile").unwrap().as_one().unwrap().get("bio"),
            Some(&Value::from("hi"))
        );

        let mut posts = Repository::<Post>::new(&conn).all().unwrap();
        conn.enable_query_log();
        eager_load(&conn, posts.as_mut_slice(), &["user"]).unwrap();
        // parent keys are de-duplicated: two posts share user 1
        assert_eq!(conn.query_log()[0].bindings, vec![Value::Integer(1), Value::Integer(3)]);
        let owners: Vec<Value> = posts
            .iter()
            .map(|p| p.relation("user").unwrap().as_one().unwrap().get("name").cloned().unwrap())
            .collect();
        assert_eq!(owners, vec![Value::from("ada"), Value::from("ada"), Value::from("cy")]);
    }

    #[test]
    fn test_has_one_lazy_and_eager_agree() {
        let conn = setup();
        seed(&conn);
        conn.table("profiles")
            .insert(Attributes::new().with("user_id", 3).with("bio", "newer"))
            .execute()
            .unwrap();

        let repo = Repository::<User>::new(&conn);
        let mut users = repo.all().unwrap();
        eager_load(&conn, users.as_mut_slice(), &["profile"]).unwrap();
        let eager = users[2].relation("profile").unwrap().as_one().unwrap().get("bio").cloned();

        let mut cy = repo.find(3).unwrap().unwrap();
        let lazy = repo
            .related(&mut cy, "profile")
            .unwrap()
            .as_one()
            .unwrap()
            .get("bio")
            .cloned();

        assert_eq!(eager, Some(Value::from("newer")));
        assert_eq!(lazy, eager);
    }

    #[test]
    fn test_nested_eager_load() {
        let conn = setup();
        seed(&conn);
        let mut users = Repository::<User>::new(&conn).all().unwrap();

        conn.enable_query_log();
        eager_load(&conn, users.as_mut_slice(), &["posts", "posts.comments"]).unwrap();
        assert_eq!(conn.query_log().len(), 2);

        let cy_posts = users[2].relation("posts").unwrap().as_many().unwrap();
        let comments = cy_posts[0].relation("comments").unwrap().as_many().unwrap();
        assert_eq!(comments.pluck("body"), vec![Value::from("nice")]);
    }

    #[test]
    fn test_null_keys_skip_query() {
        let conn = setup();
        let mut orphan = Model::of::<Post>();
        orphan.set("title", "loose");
        let mut parents = vec![orphan];

        conn.enable_query_log();
        eager_load(&conn, &mut parents, &["user"]).unwrap();
        assert!(conn.query_log().is_empty());
        assert_eq!(parents[0].relation("user"), Some(&Related::One(None)));
    }

    #[test]
    fn test_match_normalises_key_types() {
        let user = User::info();
        let relation = user.relation("posts").unwrap().bind(&user);
        let mut parents = vec![Model::from_row(user, Attributes::new().with("id", 1))];
        let results: Collection<Model> = vec![Model::from_row(
            Post::info(),
            Attributes::new().with("id", 9).with("user_id", "1"),
        )]
        .into();

        relation.init_relation(&mut parents, "posts");
        relation.match_results(&mut parents, results, "posts");
        assert_eq!(parents[0].relation("posts").unwrap().as_many().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_relation() {
        let conn = setup();
        seed(&conn);
        let mut users = Repository::<User>::new(&conn).all().unwrap();
        let err = eager_load(&conn, users.as_mut_slice(), &["followers"]).unwrap_err();
        assert!(matches!(err, DbError::RelationContract { .. }));
    }
}
