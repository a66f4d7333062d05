//! Schema discovery and caching.
//!
//! [`SchemaCatalog`] asks the driver for a table's columns, primary key and foreign keys
//! the first time the table is named, derives named relationships from the foreign keys,
//! and memoizes the result for the lifetime of the catalog. With a
//! [`SchemaCacheStore`](crate::schema_cache::SchemaCacheStore) attached, snapshots are
//! read from disk before the database is asked, and written back after a catalog miss.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::driver::{Driver, ForeignKeyConstraint};
use crate::error::{OrmError, OrmResult};
use crate::inflect::singularize;
use crate::schema_cache::SchemaCacheStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Catalog attribute number.
    pub number: i32,
    pub name: String,
    /// Type as rendered by `format_type`, e.g. `character varying(64)`.
    pub data_type: String,
    pub not_null: bool,
    pub default_expr: Option<String>,
    /// Declared length for `char`/`varchar` columns.
    pub size: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
}

impl Cardinality {
    pub fn is_many(self) -> bool {
        matches!(self, Self::OneToMany)
    }
}

/// A named foreign-key relationship as seen from one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    /// The related table.
    pub table: String,
    /// Columns of the describing table, paired with `foreign_columns`.
    pub local_columns: Vec<String>,
    /// Columns of the related table.
    pub foreign_columns: Vec<String>,
    pub kind: Cardinality,
    /// `true` when this table references the related row, which must be saved first.
    pub dependency: bool,
}

impl Relationship {
    pub fn column_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.local_columns
            .iter()
            .map(String::as_str)
            .zip(self.foreign_columns.iter().map(String::as_str))
    }
}

/// Everything the catalog knows about one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub relationships: Vec<Relationship>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_type(&self, name: &str) -> Option<&str> {
        self.column(name).map(|c| c.data_type.as_str())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// The primary-key column when the key has exactly one column.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [pk] => Some(pk.as_str()),
            _ => None,
        }
    }

    pub fn has_compound_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Whether the singular primary key is also a column of an outgoing foreign key,
    /// i.e. its value comes from the referenced row rather than a local sequence.
    pub fn is_primary_key_reference(&self) -> bool {
        let Some(pk) = self.single_primary_key() else {
            return false;
        };
        self.relationships
            .iter()
            .any(|r| r.dependency && r.local_columns.iter().any(|c| c == pk))
    }
}

#[derive(Debug)]
struct TableBasics {
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
}

/// Per-table schema memo.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: Mutex<HashMap<String, Arc<TableSchema>>>,
    // Columns and key of every table touched, including related tables inspected during
    // inference. `None` marks a table the catalog does not know.
    basics: Mutex<HashMap<String, Option<Arc<TableBasics>>>>,
    store: Option<SchemaCacheStore>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog backed by an on-disk snapshot store.
    pub fn with_store(store: SchemaCacheStore) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    pub fn store(&self) -> Option<&SchemaCacheStore> {
        self.store.as_ref()
    }

    /// The memoized schema for `table`, without touching the database.
    pub fn cached(&self, table: &str) -> Option<Arc<TableSchema>> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    /// Drop everything memoized in memory. The on-disk store is left alone.
    pub fn clear(&self) {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.basics.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Full schema of `table`: columns, primary key and relationships, populated
    /// together on first access.
    pub async fn schema<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<Arc<TableSchema>> {
        if let Some(schema) = self.cached(table) {
            return Ok(schema);
        }

        if let Some(store) = &self.store {
            match store.load_schema(table) {
                Ok(Some(schema)) => {
                    tracing::debug!(target: "pgrecord.cache", table, "schema cache hit");
                    return Ok(self.remember(schema));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "pgrecord.cache", table, error = %e, "ignoring unreadable schema cache entry");
                }
            }
        }

        let schema = self.discover(driver, table).await?;
        tracing::debug!(
            target: "pgrecord.catalog",
            table,
            columns = schema.columns.len(),
            relationships = schema.relationships.len(),
            "discovered table schema"
        );

        if let Some(store) = &self.store {
            match store.save_schema(&schema) {
                Ok(()) => tracing::debug!(target: "pgrecord.cache", table, "schema cache written"),
                Err(e) => {
                    tracing::warn!(target: "pgrecord.cache", table, error = %e, "failed to write schema cache")
                }
            }
        }

        Ok(self.remember(schema))
    }

    pub async fn columns<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        Ok(self.schema(driver, table).await?.columns.clone())
    }

    pub async fn primary_key<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<Vec<String>> {
        Ok(self.schema(driver, table).await?.primary_key.clone())
    }

    pub async fn foreign_keys<D: Driver>(
        &self,
        driver: &D,
        table: &str,
    ) -> OrmResult<Vec<Relationship>> {
        Ok(self.schema(driver, table).await?.relationships.clone())
    }

    pub async fn column_type<D: Driver>(
        &self,
        driver: &D,
        table: &str,
        column: &str,
    ) -> OrmResult<String> {
        let schema = self.schema(driver, table).await?;
        schema
            .column_type(column)
            .map(String::from)
            .ok_or_else(|| OrmError::unknown_column(table, column))
    }

    pub async fn table_exists<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<bool> {
        if self.cached(table).is_some() {
            return Ok(true);
        }
        Ok(self.basics(driver, table).await?.is_some())
    }

    pub async fn is_primary_key_reference<D: Driver>(
        &self,
        driver: &D,
        table: &str,
    ) -> OrmResult<bool> {
        Ok(self.schema(driver, table).await?.is_primary_key_reference())
    }

    fn remember(&self, schema: TableSchema) -> Arc<TableSchema> {
        let schema = Arc::new(schema);
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.table.clone(), schema.clone());
        schema
    }

    async fn basics<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<Option<Arc<TableBasics>>> {
        let hit = self
            .basics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned();
        if let Some(hit) = hit {
            return Ok(hit);
        }

        let columns = driver.load_columns(table).await?;
        let basics = if columns.is_empty() {
            None
        } else {
            let primary_key = driver.load_primary_key(table).await?;
            Some(Arc::new(TableBasics {
                columns,
                primary_key,
            }))
        };

        self.basics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), basics.clone());
        Ok(basics)
    }

    async fn discover<D: Driver>(&self, driver: &D, table: &str) -> OrmResult<TableSchema> {
        let Some(basics) = self.basics(driver, table).await? else {
            return Err(OrmError::UnknownTable(table.to_string()));
        };

        let outgoing = driver.load_references(table).await?;
        let incoming = driver.load_referenced_by(table).await?;

        let mut relationships: Vec<Relationship> = Vec::new();

        for fk in outgoing {
            self.require_related(driver, table, &fk).await?;
            let relationship = Relationship {
                name: outgoing_name(&fk.local_columns[0]),
                table: fk.table,
                local_columns: fk.local_columns,
                foreign_columns: fk.foreign_columns,
                kind: Cardinality::ManyToOne,
                dependency: true,
            };
            push_relationship(table, &mut relationships, relationship);
        }

        for fk in incoming {
            let other = self.require_related(driver, table, &fk).await?;
            let kind = incoming_cardinality(&fk, &basics.primary_key, &other.primary_key);
            let relationship = Relationship {
                name: fk.table.clone(),
                table: fk.table,
                local_columns: fk.local_columns,
                foreign_columns: fk.foreign_columns,
                kind,
                dependency: false,
            };
            push_relationship(table, &mut relationships, relationship);
        }

        Ok(TableSchema {
            table: table.to_string(),
            columns: basics.columns.clone(),
            primary_key: basics.primary_key.clone(),
            relationships,
        })
    }

    async fn require_related<D: Driver>(
        &self,
        driver: &D,
        table: &str,
        fk: &ForeignKeyConstraint,
    ) -> OrmResult<Arc<TableBasics>> {
        let column = fk.local_columns.first().cloned().unwrap_or_default();
        if fk.local_columns.is_empty() || fk.local_columns.len() != fk.foreign_columns.len() {
            return Err(OrmError::relationship_not_found(table, &fk.table, column));
        }
        self.basics(driver, &fk.table)
            .await?
            .ok_or_else(|| OrmError::relationship_not_found(table, &fk.table, column))
    }
}

/// `author_id` → `author`, `categories_id` → `category`.
fn outgoing_name(column: &str) -> String {
    singularize(column.strip_suffix("_id").unwrap_or(column))
}

/// One-to-one when the referencing column is the other table's whole primary key, the
/// referenced column is this table's whole primary key, and only one column is paired.
fn incoming_cardinality(
    fk: &ForeignKeyConstraint,
    local_pk: &[String],
    other_pk: &[String],
) -> Cardinality {
    let one_to_one = fk.foreign_columns.len() == 1
        && other_pk.len() == 1
        && local_pk.len() == 1
        && fk.foreign_columns[0] == other_pk[0]
        && fk.local_columns[0] == local_pk[0];
    if one_to_one {
        Cardinality::OneToOne
    } else {
        Cardinality::OneToMany
    }
}

// First wins: a later relationship deriving a taken name is dropped.
fn push_relationship(table: &str, relationships: &mut Vec<Relationship>, relationship: Relationship) {
    if relationships.iter().any(|r| r.name == relationship.name) {
        tracing::warn!(
            target: "pgrecord.catalog",
            table,
            name = %relationship.name,
            related = %relationship.table,
            "relationship name already taken; dropping later relationship"
        );
        return;
    }
    relationships.push(relationship);
}
