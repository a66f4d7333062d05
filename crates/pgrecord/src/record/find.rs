//! SELECT assembly: keys, joins and clauses.

use std::str::FromStr;
use std::sync::Arc;

use crate::catalog::{Relationship, TableSchema};
use crate::database::Database;
use crate::driver::Driver;
use crate::error::{OrmError, OrmResult};
use crate::inflect::singularize;
use crate::value::Value;

use super::ActiveRecord;

/// Primary-key value(s) identifying a row.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKey {
    /// Value of a singular primary key.
    Single(Value),
    /// `(column, value)` for each column of a compound key.
    Compound(Vec<(String, Value)>),
}

impl RecordKey {
    pub fn compound<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        RecordKey::Compound(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn len(&self) -> usize {
        match self {
            RecordKey::Single(_) => 1,
            RecordKey::Compound(pairs) => pairs.len(),
        }
    }
}

impl From<Value> for RecordKey {
    fn from(v: Value) -> Self {
        RecordKey::Single(v)
    }
}

impl From<i64> for RecordKey {
    fn from(v: i64) -> Self {
        RecordKey::Single(Value::Int(v))
    }
}

impl From<i32> for RecordKey {
    fn from(v: i32) -> Self {
        RecordKey::Single(Value::from(v))
    }
}

impl From<&str> for RecordKey {
    fn from(v: &str) -> Self {
        RecordKey::Single(Value::from(v))
    }
}

impl From<String> for RecordKey {
    fn from(v: String) -> Self {
        RecordKey::Single(Value::Text(v))
    }
}

/// SQL join keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl FromStr for JoinType {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            other => Err(OrmError::JoinConfig(format!(
                "Unknown join type specified: {other}"
            ))),
        }
    }
}

/// An explicit join: `table` joined on the relationship whose column is `on`.
///
/// With `through`, the relationship is looked up on the table of an earlier join with
/// that alias instead of on the root table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: Option<String>,
    pub on: Option<String>,
    pub alias: Option<String>,
    pub join_type: Option<String>,
    pub through: Option<String>,
}

impl JoinSpec {
    pub fn new(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            on: Some(on.into()),
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn join_type(mut self, join_type: impl Into<String>) -> Self {
        self.join_type = Some(join_type.into());
        self
    }

    pub fn left(self) -> Self {
        self.join_type("left")
    }

    pub fn through(mut self, alias: impl Into<String>) -> Self {
        self.through = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    /// A relationship of the root table, by name; joined `INNER` on every column pair.
    Relationship(String),
    Descriptor(JoinSpec),
}

impl From<&str> for Join {
    fn from(name: &str) -> Self {
        Join::Relationship(name.to_string())
    }
}

impl From<String> for Join {
    fn from(name: String) -> Self {
        Join::Relationship(name)
    }
}

impl From<JoinSpec> for Join {
    fn from(spec: JoinSpec) -> Self {
        Join::Descriptor(spec)
    }
}

/// Clauses for [`ActiveRecord::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Raw SQL condition, ANDed with any key condition.
    pub where_clause: Option<String>,
    pub joins: Vec<Join>,
    /// Raw `ORDER BY` expression list.
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.where_clause = Some(condition.into());
        self
    }

    pub fn join(mut self, join: impl Into<Join>) -> Self {
        self.joins.push(join.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Rows,
    Count,
}

/// Alias of a table in generated SELECTs: `books` → `_book`.
pub(crate) fn table_alias(table: &str) -> String {
    format!("_{}", singularize(table))
}

struct JoinedTable {
    alias: String,
    table: String,
}

async fn select_sql<D: Driver>(
    db: &Database<D>,
    schema: &Arc<TableSchema>,
    key: Option<&RecordKey>,
    options: &FindOptions,
    projection: Projection,
) -> OrmResult<String> {
    let root = table_alias(&schema.table);
    let joins = join_sql(db, schema, &root, &options.joins).await?;
    let mut conditions = key_conditions(db, schema, &root, key)?;
    if let Some(condition) = options.where_clause.as_deref().filter(|c| !c.trim().is_empty()) {
        if conditions.is_empty() {
            conditions.push(condition.to_string());
        } else {
            conditions.push(format!("({condition})"));
        }
    }

    let mut sql = String::from("SELECT ");
    match projection {
        Projection::Rows => {
            if options.distinct {
                sql.push_str("DISTINCT ");
            }
            sql.push_str(&format!("{root}.*"));
        }
        Projection::Count => sql.push_str("COUNT(*) AS count"),
    }
    sql.push_str(&format!(" FROM {} AS {root}", schema.table));
    sql.push_str(&joins);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    if projection == Projection::Rows {
        if let Some(order) = options.order.as_deref().filter(|o| !o.trim().is_empty()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = options.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
    Ok(sql)
}

fn key_conditions<D: Driver>(
    db: &Database<D>,
    schema: &TableSchema,
    alias: &str,
    key: Option<&RecordKey>,
) -> OrmResult<Vec<String>> {
    let Some(key) = key else {
        return Ok(Vec::new());
    };
    let invalid = || OrmError::InvalidKey {
        table: schema.table.clone(),
        expected: schema.primary_key.len(),
        got: key.len(),
    };

    match key {
        RecordKey::Single(value) => {
            let pk = schema.single_primary_key().ok_or_else(invalid)?;
            let data_type = schema.column_type(pk).unwrap_or("text");
            Ok(vec![format!(
                "{alias}.{pk} = {}",
                db.format_literal(data_type, value)
            )])
        }
        RecordKey::Compound(pairs) => {
            if schema.primary_key.is_empty() || pairs.len() != schema.primary_key.len() {
                return Err(invalid());
            }
            pairs
                .iter()
                .map(|(column, value)| {
                    let data_type = schema
                        .column_type(column)
                        .ok_or_else(|| OrmError::unknown_column(&schema.table, column))?;
                    Ok(format!(
                        "{alias}.{column} = {}",
                        db.format_literal(data_type, value)
                    ))
                })
                .collect()
        }
    }
}

async fn join_sql<D: Driver>(
    db: &Database<D>,
    schema: &Arc<TableSchema>,
    root: &str,
    joins: &[Join],
) -> OrmResult<String> {
    let mut sql = String::new();
    let mut joined: Vec<JoinedTable> = Vec::new();

    for join in joins {
        let (join_type, from_alias, relationship, alias) = match join {
            Join::Relationship(name) => {
                let relationship = schema.relationship(name).cloned().ok_or_else(|| {
                    OrmError::InvalidJoin(format!("Unknown join relationship specified: {name}"))
                })?;
                let alias = format!("_{}", relationship.name);
                (JoinType::Inner, root.to_string(), relationship, alias)
            }
            Join::Descriptor(spec) => {
                let table = required(&spec.table, "Join table not specified")?;
                let on = required(&spec.on, "Join column not specified")?;
                let join_type = match spec.join_type.as_deref() {
                    Some(t) => t.parse::<JoinType>()?,
                    None => JoinType::Inner,
                };

                let (from_alias, from_schema) = match spec.through.as_deref() {
                    Some(through) => {
                        let earlier = joined.iter().find(|j| j.alias == through).ok_or_else(|| {
                            OrmError::InvalidJoin(format!("Invalid through join specified: {through}"))
                        })?;
                        (earlier.alias.clone(), db.schema(&earlier.table).await?)
                    }
                    None => (root.to_string(), schema.clone()),
                };

                let relationship = descriptor_relationship(&from_schema, table, on)
                    .cloned()
                    .ok_or_else(|| OrmError::relationship_not_found(&from_schema.table, table, on))?;
                let alias = spec
                    .alias
                    .clone()
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| format!("_{}", relationship.name));
                (join_type, from_alias, relationship, alias)
            }
        };

        if alias == root || joined.iter().any(|j| j.alias == alias) {
            return Err(OrmError::InvalidJoin(format!("Join alias used twice: {alias}")));
        }

        let on = relationship
            .column_pairs()
            .map(|(local, foreign)| format!("{from_alias}.{local} = {alias}.{foreign}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(
            " {} {} AS {alias} ON {on}",
            join_type.as_sql(),
            relationship.table
        ));
        joined.push(JoinedTable {
            alias,
            table: relationship.table,
        });
    }

    Ok(sql)
}

fn required<'a>(field: &'a Option<String>, message: &str) -> OrmResult<&'a str> {
    field
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| OrmError::JoinConfig(message.to_string()))
}

/// The relationship to `table` whose first local or foreign column is `on`.
fn descriptor_relationship<'a>(
    schema: &'a TableSchema,
    table: &str,
    on: &str,
) -> Option<&'a Relationship> {
    schema.relationships.iter().find(|r| {
        r.table == table
            && (r.local_columns.first().is_some_and(|c| c == on)
                || r.foreign_columns.first().is_some_and(|c| c == on))
    })
}

impl ActiveRecord {
    /// Run a SELECT for this record's table and bind its result.
    ///
    /// With a key, only the matching row is selected: a single value needs a singular
    /// primary key, a compound key must name as many columns as the primary key has.
    /// When the result has rows, row `0` becomes this record's state.
    pub async fn find<D: Driver>(
        &mut self,
        db: &Database<D>,
        key: Option<RecordKey>,
        options: &FindOptions,
    ) -> OrmResult<&mut Self> {
        let sql = select_sql(db, &self.schema, key.as_ref(), options, Projection::Rows).await?;
        let cursor = db.query(&sql).await?;
        tracing::debug!(target: "pgrecord.record", table = %self.table, rows = cursor.row_count(), "find");
        self.bind(cursor);
        Ok(self)
    }

    /// `SELECT COUNT(*)` with the same joins and conditions as [`find`](Self::find).
    pub async fn find_count<D: Driver>(&self, db: &Database<D>, options: &FindOptions) -> OrmResult<i64> {
        let sql = select_sql(db, &self.schema, None, options, Projection::Count).await?;
        let mut cursor = db.query(&sql).await?;
        let count = cursor
            .advance()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64);
        count.ok_or_else(|| OrmError::query_failed("count query returned no rows", sql))
    }

    /// Find rows where `column` equals `value`, optionally ordered.
    pub async fn find_by_column<D: Driver>(
        &mut self,
        db: &Database<D>,
        column: &str,
        value: impl Into<Value> + Send,
        order: Option<&str>,
    ) -> OrmResult<&mut Self> {
        let data_type = self
            .schema
            .column_type(column)
            .ok_or_else(|| OrmError::unknown_column(&self.table, column))?;
        let mut options = FindOptions::new().where_clause(format!(
            "{column} = {}",
            db.format_literal(data_type, &value.into())
        ));
        if let Some(order) = order {
            options = options.order(order);
        }
        self.find(db, None, &options).await
    }

    /// `DELETE FROM table WHERE column = value`.
    pub async fn delete_by_column<D: Driver>(
        &self,
        db: &Database<D>,
        column: &str,
        value: impl Into<Value> + Send,
    ) -> OrmResult<()> {
        let data_type = self
            .schema
            .column_type(column)
            .ok_or_else(|| OrmError::unknown_column(&self.table, column))?;
        let sql = format!(
            "DELETE FROM {} WHERE {column} = {}",
            self.table,
            db.format_literal(data_type, &value.into())
        );
        db.execute(&sql).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_type_parsing() {
        assert_eq!("LEFT".parse::<JoinType>().unwrap(), JoinType::Left);
        assert_eq!(" inner ".parse::<JoinType>().unwrap(), JoinType::Inner);
        assert!(matches!("cross".parse::<JoinType>(), Err(OrmError::JoinConfig(_))));
    }

    #[test]
    fn aliases_use_the_singular_table_name() {
        assert_eq!(table_alias("books"), "_book");
        assert_eq!(table_alias("categories"), "_category");
        assert_eq!(table_alias("audit_log"), "_audit_log");
    }

    #[test]
    fn builders_accumulate() {
        let options = FindOptions::new().join("author").join(JoinSpec::new("tags", "book_id").left());
        assert_eq!(options.joins.len(), 2);
        assert_eq!(
            options.joins[1],
            Join::Descriptor(JoinSpec {
                table: Some("tags".into()),
                on: Some("book_id".into()),
                join_type: Some("left".into()),
                ..JoinSpec::default()
            })
        );
        assert_eq!(RecordKey::from(3).len(), 1);
        assert_eq!(RecordKey::compound([("a", 1), ("b", 2)]).len(), 2);
    }
}
