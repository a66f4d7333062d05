//! Active records: one table row plus its loaded relationships.
//!
//! A record is bound to a table schema. Column values live in a field map whose keys are
//! always columns of that table; related records live in a separate map keyed by
//! relationship name and are loaded on demand through [`ActiveRecord::related`].
//!
//! After [`find`](ActiveRecord::find) a record also holds the query's cursor and shows
//! the current row; [`advance`](ActiveRecord::advance) and
//! [`rewind`](ActiveRecord::rewind) move through the result, and
//! [`all`](ActiveRecord::all) returns a fresh record per row.

mod find;
mod relations;
mod save;

pub use find::{FindOptions, Join, JoinSpec, JoinType, RecordKey};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::catalog::TableSchema;
use crate::cursor::RecordCursor;
use crate::database::Database;
use crate::driver::Driver;
use crate::error::{OrmError, OrmResult};
use crate::model::ModelHooks;
use crate::value::{Row, Value};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

static NULL: Value = Value::Null;

/// Loaded value of a relationship.
#[derive(Debug)]
pub enum Related {
    /// One-to-one or many-to-one.
    One(Box<ActiveRecord>),
    /// One-to-many, in query order.
    Many(Vec<ActiveRecord>),
}

impl Related {
    pub fn as_one(&self) -> Option<&ActiveRecord> {
        match self {
            Related::One(record) => Some(record),
            Related::Many(_) => None,
        }
    }

    pub fn as_one_mut(&mut self) -> Option<&mut ActiveRecord> {
        match self {
            Related::One(record) => Some(record),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[ActiveRecord]> {
        match self {
            Related::Many(records) => Some(records),
            Related::One(_) => None,
        }
    }

    pub fn as_many_mut(&mut self) -> Option<&mut Vec<ActiveRecord>> {
        match self {
            Related::Many(records) => Some(records),
            Related::One(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(_) => 1,
            Related::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(record) => record.to_json(),
            Related::Many(records) => {
                serde_json::Value::Array(records.iter().map(ActiveRecord::to_json).collect())
            }
        }
    }

    fn detached(&self) -> Related {
        match self {
            Related::One(record) => Related::One(Box::new(record.detached())),
            Related::Many(records) => Related::Many(records.iter().map(ActiveRecord::detached).collect()),
        }
    }
}

impl From<ActiveRecord> for Related {
    fn from(record: ActiveRecord) -> Self {
        Related::One(Box::new(record))
    }
}

impl From<Vec<ActiveRecord>> for Related {
    fn from(records: Vec<ActiveRecord>) -> Self {
        Related::Many(records)
    }
}

/// A row of one table, with lazily loaded relationships.
pub struct ActiveRecord {
    table: String,
    schema: Arc<TableSchema>,
    fields: HashMap<String, Value>,
    relations: HashMap<String, Related>,
    cursor: Option<RecordCursor>,
    hooks: Option<Arc<dyn ModelHooks>>,
}

impl ActiveRecord {
    /// An empty record with no model hooks.
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self::with_hooks(schema, None)
    }

    pub fn with_hooks(schema: Arc<TableSchema>, hooks: Option<Arc<dyn ModelHooks>>) -> Self {
        Self {
            table: schema.table.clone(),
            schema,
            fields: HashMap::new(),
            relations: HashMap::new(),
            cursor: None,
            hooks,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    // ── fields ──────────────────────────────────────────────────────────────

    /// Value of a column. Unset columns read as `NULL`; names that are not columns of
    /// the table fail with [`OrmError::UnknownColumn`]. Relationships are read with
    /// [`related`](Self::related).
    pub fn get(&self, name: &str) -> OrmResult<&Value> {
        if !self.schema.has_column(name) {
            return Err(OrmError::unknown_column(&self.table, name));
        }
        Ok(self.value(name))
    }

    /// Set a column value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        if !self.schema.has_column(name) {
            return Err(OrmError::unknown_column(&self.table, name));
        }
        self.fields.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Attach related records under a relationship name, replacing anything loaded.
    pub fn set_related(&mut self, name: &str, related: impl Into<Related>) -> OrmResult<()> {
        if self.schema.relationship(name).is_none() {
            return Err(OrmError::unknown_column(&self.table, name));
        }
        self.relations.insert(name.to_string(), related.into());
        Ok(())
    }

    /// Forget a column value (a later update leaves the stored value alone) or a loaded
    /// relationship.
    pub fn unset(&mut self, name: &str) -> OrmResult<()> {
        if self.schema.has_column(name) {
            self.fields.remove(name);
            Ok(())
        } else if self.schema.relationship(name).is_some() {
            self.relations.remove(name);
            Ok(())
        } else {
            Err(OrmError::unknown_column(&self.table, name))
        }
    }

    /// Whether a column holds a non-null value or a relationship is loaded.
    ///
    /// A column explicitly set to `NULL` counts as absent, although
    /// [`fields`](Self::fields) still lists it and an update still writes it.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.is_null()) || self.relations.contains_key(name)
    }

    /// Loaded relationship, without querying.
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// Columns currently present, in table order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .column_names()
            .filter_map(|name| self.fields.get(name).map(|v| (name, v)))
    }

    pub(crate) fn value(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// A copy that will insert as a new row: the cursor is dropped and a singular
    /// primary key is cleared.
    pub fn clone_as_new(&self) -> ActiveRecord {
        let mut copy = self.detached();
        if let Some(pk) = self.schema.single_primary_key() {
            copy.fields.insert(pk.to_string(), Value::Null);
        }
        copy
    }

    fn detached(&self) -> ActiveRecord {
        ActiveRecord {
            table: self.table.clone(),
            schema: self.schema.clone(),
            fields: self.fields.clone(),
            relations: self
                .relations
                .iter()
                .map(|(name, related)| (name.clone(), related.detached()))
                .collect(),
            cursor: None,
            hooks: self.hooks.clone(),
        }
    }

    /// Columns present plus loaded relationships, recursively.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, value) in self.fields() {
            object.insert(name.to_string(), value.to_json());
        }
        for relationship in &self.schema.relationships {
            if let Some(related) = self.relations.get(&relationship.name) {
                object.insert(relationship.name.clone(), related.to_json());
            }
        }
        serde_json::Value::Object(object)
    }

    /// Load columns and nested relationships from a JSON object. Keys that are neither
    /// columns nor relationships are ignored.
    pub fn load_json<'a, D: Driver>(
        &'a mut self,
        db: &'a Database<D>,
        payload: &'a serde_json::Value,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let Some(object) = payload.as_object() else {
                return Err(OrmError::Serialization(format!(
                    "expected a JSON object for {}",
                    self.table
                )));
            };

            for (key, value) in object {
                if self.schema.has_column(key) {
                    if let Some(v) = Value::from_json(value) {
                        self.fields.insert(key.clone(), v);
                    }
                    continue;
                }
                let Some(relationship) = self.schema.relationship(key).cloned() else {
                    continue;
                };

                let related = match (value, relationship.kind.is_many()) {
                    (serde_json::Value::Array(items), true) => {
                        let mut records = Vec::with_capacity(items.len());
                        for item in items {
                            let mut record = db.record(&relationship.table).await?;
                            record.load_json(db, item).await?;
                            records.push(record);
                        }
                        Related::Many(records)
                    }
                    (serde_json::Value::Object(_), many) => {
                        let mut record = db.record(&relationship.table).await?;
                        record.load_json(db, value).await?;
                        if many {
                            Related::Many(vec![record])
                        } else {
                            Related::One(Box::new(record))
                        }
                    }
                    _ => continue,
                };
                self.relations.insert(relationship.name, related);
            }
            Ok(())
        })
    }

    // ── iteration ───────────────────────────────────────────────────────────

    pub(crate) fn bind(&mut self, cursor: RecordCursor) {
        self.fields.clear();
        self.relations.clear();
        let mut cursor = cursor;
        if cursor.row_count() > 0 {
            if let Some(row) = cursor.advance().cloned() {
                self.hydrate(&row);
            }
        }
        self.cursor = Some(cursor);
    }

    fn hydrate(&mut self, row: &Row) {
        self.fields.clear();
        self.relations.clear();
        for column in &self.schema.columns {
            if let Some(value) = row.get(&column.name) {
                self.fields
                    .insert(column.name.clone(), value.clone().normalize(&column.data_type));
            }
        }
    }

    /// Move to the next row of the bound result. Returns `false` once exhausted.
    pub fn advance(&mut self) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        let row = cursor.advance().cloned();
        match row {
            Some(row) => {
                self.hydrate(&row);
                true
            }
            None => {
                self.fields.clear();
                self.relations.clear();
                false
            }
        }
    }

    /// Return to the first row of the bound result.
    pub fn rewind(&mut self) -> bool {
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        if cursor.row_count() == 0 || !cursor.rewind() {
            return false;
        }
        let row = cursor.current().cloned();
        match row {
            Some(row) => {
                self.hydrate(&row);
                true
            }
            None => false,
        }
    }

    /// Whether the bound result is positioned on a row.
    pub fn is_valid(&self) -> bool {
        self.cursor.as_ref().is_some_and(RecordCursor::is_valid)
    }

    /// Index of the current row, `-1` when unbound or before the first row.
    pub fn position(&self) -> i64 {
        self.cursor.as_ref().map_or(-1, RecordCursor::key)
    }

    /// Rows in the bound result; `0` for a record that was never found.
    pub fn count(&self) -> usize {
        self.cursor.as_ref().map_or(0, RecordCursor::row_count)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Every row of the bound result as its own record. Leaves this record on row `0`.
    pub fn all(&mut self) -> Vec<ActiveRecord> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Vec::new();
        };
        let mut rows = Vec::with_capacity(cursor.row_count());
        if cursor.row_count() > 0 && cursor.rewind() {
            while let Some(row) = cursor.current().cloned() {
                rows.push(row);
                cursor.advance();
            }
        }

        let records = rows
            .iter()
            .map(|row| {
                let mut record = ActiveRecord::with_hooks(self.schema.clone(), self.hooks.clone());
                record.hydrate(row);
                record
            })
            .collect();
        self.rewind();
        records
    }
}

impl fmt::Debug for ActiveRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<_> = self.fields().collect();
        let mut relations: Vec<_> = self.relations.keys().collect();
        relations.sort();
        f.debug_struct("ActiveRecord")
            .field("table", &self.table)
            .field("fields", &fields)
            .field("relations", &relations)
            .field("cursor", &self.cursor)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}
