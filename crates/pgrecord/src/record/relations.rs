//! Lazy loading of related records.

use crate::catalog::{Relationship, TableSchema};
use crate::database::Database;
use crate::driver::Driver;
use crate::error::{OrmError, OrmResult};

use super::{ActiveRecord, FindOptions, RecordKey, Related};

impl ActiveRecord {
    /// Related record(s) under a relationship name, loaded on first access and cached.
    ///
    /// - one-to-many: every row of the related table whose foreign columns match this
    ///   record's local columns.
    /// - one-to-one / many-to-one: the row matching the local column's value, or an
    ///   empty record when the local column is unset, so a relation can be assigned
    ///   before either side is saved.
    ///
    /// Related rows are always fetched by their own query; joined rows from
    /// [`find`](Self::find) are not reused.
    pub async fn related<D: Driver>(&mut self, db: &Database<D>, name: &str) -> OrmResult<&mut Related> {
        if !self.relations.contains_key(name) {
            let related = self.load_relation(db, name).await?;
            self.relations.insert(name.to_string(), related);
        }
        self.relations
            .get_mut(name)
            .ok_or_else(|| OrmError::unknown_column(&self.table, name))
    }

    /// The single related record of a one-to-one or many-to-one relationship.
    pub async fn related_one<D: Driver>(
        &mut self,
        db: &Database<D>,
        name: &str,
    ) -> OrmResult<&mut ActiveRecord> {
        let table = self.table.clone();
        self.related(db, name)
            .await?
            .as_one_mut()
            .ok_or_else(|| OrmError::InvalidJoin(format!("{table}.{name} is a one-to-many relationship")))
    }

    /// The related records of a one-to-many relationship.
    pub async fn related_many<D: Driver>(
        &mut self,
        db: &Database<D>,
        name: &str,
    ) -> OrmResult<&mut Vec<ActiveRecord>> {
        let table = self.table.clone();
        self.related(db, name)
            .await?
            .as_many_mut()
            .ok_or_else(|| OrmError::InvalidJoin(format!("{table}.{name} is not a one-to-many relationship")))
    }

    async fn load_relation<D: Driver>(&self, db: &Database<D>, name: &str) -> OrmResult<Related> {
        let relationship = self
            .schema
            .relationship(name)
            .cloned()
            .ok_or_else(|| OrmError::unknown_column(&self.table, name))?;
        let related_schema = db.schema(&relationship.table).await?;

        tracing::debug!(
            target: "pgrecord.record",
            table = %self.table,
            relationship = name,
            related = %relationship.table,
            "loading relationship"
        );

        if relationship.kind.is_many() {
            let options = FindOptions::new().where_clause(self.match_condition(db, &relationship, &related_schema));
            let records = db.find_all(&relationship.table, &options).await?;
            return Ok(Related::Many(records));
        }

        let mut record = db.record(&relationship.table).await?;
        let local_value = relationship
            .local_columns
            .first()
            .map(|column| self.value(column).clone())
            .unwrap_or_default();

        if !local_value.is_empty() {
            let keyed_on_primary_key = relationship.foreign_columns.len() == 1
                && related_schema.single_primary_key() == relationship.foreign_columns.first().map(String::as_str);
            if keyed_on_primary_key {
                record
                    .find(db, Some(RecordKey::Single(local_value)), &FindOptions::new())
                    .await?;
            } else {
                let options =
                    FindOptions::new().where_clause(self.match_condition(db, &relationship, &related_schema));
                record.find(db, None, &options).await?;
            }
        }
        Ok(Related::One(Box::new(record)))
    }

    /// `foreign = <local value>` for every column pair, against the related table.
    fn match_condition<D: Driver>(
        &self,
        db: &Database<D>,
        relationship: &Relationship,
        related_schema: &TableSchema,
    ) -> String {
        relationship
            .column_pairs()
            .map(|(local, foreign)| {
                let data_type = related_schema.column_type(foreign).unwrap_or("text");
                format!("{foreign} = {}", db.format_literal(data_type, self.value(local)))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}
