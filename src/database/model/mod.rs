//! Active-record models
//!
//! A model type describes itself once through [`ModelDefinition`] (name, table,
//! primary key, named relations). At runtime every row is a [`Model`]: the
//! current attributes, the snapshot taken after the last load or save, the set
//! of attributes touched since, and any relations loaded onto it.
//!
//! ```rust,ignore
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
//! let mut ada = users.create(Attributes::new().with("name", "ada"))?;
//! ada.set("name", "Ada");
//! users.save(&mut ada);
//! let with_posts = users.with(&["posts"]).get()?;
//! ```

mod relation;
mod repository;

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{error, warn};

use crate::database::collection::Collection;
use crate::database::core::{AttributeSource, Attributes, Connection, FromValue, Row, Value};
use crate::error::{DbError, Result};

pub use relation::{eager_load, Relation, RelationDef, RelationKind};
pub use repository::{ModelQuery, Paginator, Repository};

/// Static description of a model type
pub trait ModelDefinition {
    /// Basename used for foreign-key inference and error messages
    const NAME: &'static str;
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    /// Named relations of this model
    fn relations() -> Vec<(&'static str, RelationDef)> {
        Vec::new()
    }

    fn info() -> ModelInfo {
        ModelInfo {
            name: Self::NAME,
            table: Self::TABLE,
            primary_key: Self::PRIMARY_KEY,
            relations: Self::relations,
        }
    }
}

/// Type-erased copy of a [`ModelDefinition`]
#[derive(Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    relations: fn() -> Vec<(&'static str, RelationDef)>,
}

impl ModelInfo {
    /// `lower(name)_id`, the column other tables use to point at this model
    pub fn foreign_key(&self) -> String {
        format!("{}_id", self.name.to_lowercase())
    }

    pub fn relation_names(&self) -> Vec<&'static str> {
        (self.relations)().into_iter().map(|(name, _)| name).collect()
    }

    /// Look up a relation by name
    pub fn relation(&self, name: &str) -> Result<RelationDef> {
        (self.relations)()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, def)| def)
            .ok_or_else(|| DbError::RelationContract {
                model: self.name.to_string(),
                relation: name.to_string(),
            })
    }
}

impl fmt::Debug for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInfo")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

impl PartialEq for ModelInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table == other.table
    }
}

/// A loaded relation value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Related {
    One(Option<Box<Model>>),
    Many(Collection<Model>),
}

impl Related {
    /// The related model of a to-one relation
    pub fn as_one(&self) -> Option<&Model> {
        match self {
            Related::One(model) => model.as_deref(),
            Related::Many(_) => None,
        }
    }

    /// The related models of a to-many relation
    pub fn as_many(&self) -> Option<&Collection<Model>> {
        match self {
            Related::Many(models) => Some(models),
            Related::One(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(model) => model.is_none(),
            Related::Many(models) => models.is_empty(),
        }
    }
}

/// One row of a model's table
#[derive(Debug, Clone)]
pub struct Model {
    info: ModelInfo,
    attributes: Attributes,
    original: Attributes,
    dirty: HashSet<String>,
    relations: IndexMap<String, Related>,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
            && self.attributes == other.attributes
            && self.relations == other.relations
    }
}

impl Model {
    /// An empty, unsaved model
    pub fn new(info: ModelInfo) -> Self {
        Model {
            info,
            attributes: Attributes::new(),
            original: Attributes::new(),
            dirty: HashSet::new(),
            relations: IndexMap::new(),
        }
    }

    pub fn of<M: ModelDefinition>() -> Self {
        Self::new(M::info())
    }

    /// A clean model from a fetched row
    pub fn from_row(info: ModelInfo, row: Row) -> Self {
        let mut model = Self::new(info);
        model.original = row.clone();
        model.attributes = row;
        model
    }

    /// Wrap fetched rows as clean models
    pub fn hydrate(info: ModelInfo, rows: Collection<Row>) -> Collection<Model> {
        rows.map(|row| Model::from_row(info, row))
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn table(&self) -> &'static str {
        self.info.table
    }

    // ===== Attributes =====

    /// Set every given attribute, marking each dirty
    pub fn fill(&mut self, attributes: Attributes) -> &mut Self {
        for (name, value) in attributes {
            self.set(name, value);
        }
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        self.dirty.insert(name.clone());
        self.attributes.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Typed read; a missing attribute reads as `Null`
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.attributes.get(name).unwrap_or(&Value::Null);
        T::from_value(value).map_err(|reason| DbError::Attribute {
            name: name.to_string(),
            reason,
        })
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Attributes as of the last load or save
    pub fn original(&self) -> &Attributes {
        &self.original
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Attributes touched since the last load or save, in attribute order
    pub fn dirty(&self) -> Attributes {
        self.attributes
            .only(self.dirty.iter().map(String::as_str))
    }

    /// Primary key value, if set and not null
    pub fn key(&self) -> Option<&Value> {
        self.attributes
            .get(self.info.primary_key)
            .filter(|v| !v.is_null())
    }

    pub fn exists(&self) -> bool {
        self.key().is_some()
    }

    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
        self.dirty.clear();
    }

    // ===== Relations =====

    pub fn set_relation(&mut self, name: &str, related: Related) {
        self.relations.insert(name.to_string(), related);
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ===== Persistence =====

    /// Insert or update this model; failures are logged and reported as `false`
    ///
    /// A model without a primary key is inserted and receives the new id. A
    /// model with a key updates only its dirty attributes, and a clean model
    /// issues no statement at all.
    pub fn save(&mut self, conn: &Connection) -> bool {
        match self.save_or_fail(conn) {
            Ok(saved) => saved,
            Err(e) => {
                error!(model = self.info.name, error = %e, "failed to save model");
                false
            }
        }
    }

    /// Like [`save`](Self::save) but returns the error
    pub fn save_or_fail(&mut self, conn: &Connection) -> Result<bool> {
        let primary_key = self.info.primary_key;

        if self.key().is_none() {
            let mut data = self.attributes.clone();
            data.remove(primary_key);
            let id = conn.table(self.info.table).insert(data).execute()?;
            self.attributes.set(primary_key, id);
            self.sync_original();
            return Ok(true);
        }

        if !self.is_dirty() {
            return Ok(true);
        }

        // match on the stored key in case the key itself was changed
        let key = self
            .original
            .get(primary_key)
            .filter(|v| !v.is_null())
            .or_else(|| self.key())
            .cloned()
            .unwrap_or_default();

        let affected = conn
            .table(self.info.table)
            .where_(primary_key, key.clone())
            .update(self.dirty())
            .execute()?;

        if affected == 0 {
            warn!(model = self.info.name, key = %key, "update matched no rows");
            return Ok(false);
        }
        self.sync_original();
        Ok(true)
    }

    /// Delete this model's row; returns whether a row was removed
    pub fn delete(&self, conn: &Connection) -> Result<bool> {
        let key = self.key().cloned().ok_or_else(|| {
            DbError::InvalidQuery(format!(
                "cannot delete {} without a primary key",
                self.info.name
            ))
        })?;
        let affected = conn
            .table(self.info.table)
            .where_(self.info.primary_key, key)
            .delete()
            .execute()?;
        Ok(affected > 0)
    }

    /// JSON object of the attributes plus loaded relations
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl AttributeSource for Model {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + self.relations.len()))?;
        for (name, value) in self.attributes.iter() {
            map.serialize_entry(name, value)?;
        }
        for (name, related) in &self.relations {
            map.serialize_entry(name, related)?;
        }
        map.end()
    }
}
