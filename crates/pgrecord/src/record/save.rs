//! INSERT / UPDATE / DELETE and the dependency-ordered cascade.

use chrono::Utc;

use crate::database::Database;
use crate::driver::Driver;
use crate::error::{OrmError, OrmResult};
use crate::model::{Hook, WriteKind, run_hooks};
use crate::value::Value;

use super::{ActiveRecord, BoxFuture, Related};

const CREATED_COLUMNS: [&str; 3] = ["created_date", "created_stamp", "created_on"];
const UPDATED_COLUMNS: [&str; 3] = ["updated_date", "updated_stamp", "updated_on"];

/// Current UTC time in the format stamped into `created_*` / `updated_*` columns.
///
/// The explicit `+00` offset keeps `timestamptz` columns independent of the session
/// `TimeZone`; `timestamp` and `date` columns ignore it.
pub(crate) fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S+00").to_string()
}

impl ActiveRecord {
    /// Decide whether saving this record inserts or updates.
    ///
    /// - no primary key: insert
    /// - singular key that is itself a reference to another table: existence check
    /// - singular local key: insert iff the key value is empty
    /// - compound key: existence check
    pub async fn write_kind<D: Driver>(&self, db: &Database<D>) -> OrmResult<WriteKind> {
        let exists = match self.schema.primary_key.as_slice() {
            [] => false,
            [pk] if !self.schema.is_primary_key_reference() => !self.value(pk).is_empty(),
            _ => self.record_exists(db).await?,
        };
        Ok(if exists { WriteKind::Update } else { WriteKind::Insert })
    }

    /// Whether a row with this record's primary-key values exists.
    pub async fn record_exists<D: Driver>(&self, db: &Database<D>) -> OrmResult<bool> {
        let condition = self.primary_key_condition(db)?;
        let sql = format!("SELECT 1 FROM {} WHERE {condition}", self.table);
        let rows = db.execute(&sql).await?;
        Ok(rows.row_count() != 0)
    }

    /// Insert or update this row, running the model's save hooks when present.
    ///
    /// Validation and before-hooks run first (`ValidateX`, `Validate`, `OnBeforeX`,
    /// `OnBeforeSave`); any of them returning `false` stops the save with `Ok(false)`.
    /// The write kind is decided again after the before-hooks, since they may assign the
    /// primary key; the after-hooks follow the write that actually ran.
    pub async fn save<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<bool> {
        let Some(hooks) = self.hooks.clone() else {
            return self.save_row(db).await;
        };
        let kind = self.write_kind(db).await?;
        if !run_hooks(hooks.as_ref(), &Hook::before_save(kind), self) {
            return Ok(false);
        }
        let kind = self.write_kind(db).await?;
        self.persist(db, kind).await?;
        Ok(run_hooks(hooks.as_ref(), &Hook::after_save(kind), self))
    }

    /// Save this record together with its loaded relationships.
    ///
    /// Referenced records (many-to-one) are saved first and their keys copied into this
    /// record, then this row is saved, then dependent records (one-to-one, one-to-many)
    /// receive this record's key and are saved. The first failure stops the cascade;
    /// rows already written stay written.
    ///
    /// Model hooks run before-hooks first here (`OnBeforeX`, `OnBeforeSave`,
    /// `ValidateX`, `Validate`), unlike [`save`](Self::save).
    pub fn save_all<'a, D: Driver>(&'a mut self, db: &'a Database<D>) -> BoxFuture<'a, OrmResult<bool>> {
        Box::pin(async move {
            let hooks = self.hooks.clone();
            let mut kind = None;
            if let Some(hooks) = &hooks {
                let k = self.write_kind(db).await?;
                if !run_hooks(hooks.as_ref(), &Hook::before_save_all(k), self) {
                    return Ok(false);
                }
                kind = Some(k);
            }

            if !self.cascade(db).await? {
                return Ok(false);
            }

            match (hooks, kind) {
                (Some(hooks), Some(kind)) => Ok(run_hooks(hooks.as_ref(), &Hook::after_save(kind), self)),
                _ => Ok(true),
            }
        })
    }

    async fn cascade<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<bool> {
        let schema = self.schema.clone();

        for relationship in schema.relationships.iter().filter(|r| r.dependency) {
            let parent = match self.relations.get_mut(&relationship.name) {
                Some(Related::One(parent)) => parent,
                Some(Related::Many(_)) => {
                    return Err(OrmError::InvalidJoin(format!(
                        "relationship `{}` of `{}` refers to a single `{}` row but holds a list",
                        relationship.name, self.table, relationship.table
                    )));
                }
                None => continue,
            };
            if !parent.save_all(db).await? {
                tracing::debug!(
                    target: "pgrecord.record",
                    table = %self.table,
                    relationship = %relationship.name,
                    "dependency save failed"
                );
                return Ok(false);
            }
            let keys: Vec<(String, Value)> = relationship
                .column_pairs()
                .map(|(local, foreign)| (local.to_string(), parent.value(foreign).clone()))
                .collect();
            self.fields.extend(keys);
        }

        if !self.save_row(db).await? {
            return Ok(false);
        }

        for relationship in schema.relationships.iter().filter(|r| !r.dependency) {
            let keys: Vec<(String, Value)> = relationship
                .column_pairs()
                .map(|(local, foreign)| (foreign.to_string(), self.value(local).clone()))
                .collect();
            let children: Vec<&mut ActiveRecord> = match self.relations.get_mut(&relationship.name) {
                Some(Related::Many(records)) => records.iter_mut().collect(),
                Some(Related::One(record)) => vec![record.as_mut()],
                None => continue,
            };
            for child in children {
                child.fields.extend(keys.iter().cloned());
                if !child.save_all(db).await? {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Hook-free save: decide the write kind and run it.
    async fn save_row<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<bool> {
        let kind = self.write_kind(db).await?;
        self.persist(db, kind).await?;
        Ok(true)
    }

    async fn persist<D: Driver>(&mut self, db: &Database<D>, kind: WriteKind) -> OrmResult<()> {
        match kind {
            WriteKind::Insert => self.insert(db).await,
            WriteKind::Update => self.update(db).await,
        }
    }

    /// `INSERT` the non-empty columns.
    ///
    /// `created_date`, `created_stamp` and `created_on` are stamped with the current UTC
    /// time. A singular primary key that is not a reference is left to the database and
    /// read back from its sequence afterwards.
    pub async fn insert<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<()> {
        let schema = self.schema.clone();
        let generated_key = schema
            .single_primary_key()
            .filter(|_| !schema.is_primary_key_reference());
        let now = utc_timestamp();

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for column in &schema.columns {
            if CREATED_COLUMNS.contains(&column.name.as_str()) {
                self.fields.insert(column.name.clone(), Value::Text(now.clone()));
            }
            if generated_key == Some(column.name.as_str()) {
                continue;
            }
            let value = self.value(&column.name);
            if value.is_empty() {
                continue;
            }
            columns.push(column.name.as_str());
            values.push(db.format_literal(&column.data_type, value));
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table,
                columns.join(", "),
                values.join(", ")
            )
        };
        db.execute(&sql).await?;

        if let Some(pk) = generated_key {
            if let Some(value) = db.serial_current_value(&self.table, pk).await? {
                let data_type = schema.column_type(pk).unwrap_or("integer");
                self.fields.insert(pk.to_string(), value.normalize(data_type));
            }
        }
        tracing::debug!(target: "pgrecord.record", table = %self.table, "inserted row");
        Ok(())
    }

    /// `UPDATE` the columns present in the field map, keyed by the primary key.
    ///
    /// `created_*` columns are never written; `updated_date`, `updated_stamp` and
    /// `updated_on` are stamped with the current UTC time. Does nothing when no column
    /// qualifies.
    pub async fn update<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<()> {
        let condition = self.primary_key_condition(db)?;
        let schema = self.schema.clone();
        let now = utc_timestamp();

        let mut assignments = Vec::new();
        for column in &schema.columns {
            if CREATED_COLUMNS.contains(&column.name.as_str()) {
                continue;
            }
            if UPDATED_COLUMNS.contains(&column.name.as_str()) {
                self.fields.insert(column.name.clone(), Value::Text(now.clone()));
            }
            let Some(value) = self.fields.get(&column.name) else {
                continue;
            };
            assignments.push(format!(
                "{} = {}",
                column.name,
                db.format_literal(&column.data_type, value)
            ));
        }

        if assignments.is_empty() {
            tracing::debug!(target: "pgrecord.record", table = %self.table, "nothing to update");
            return Ok(());
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {condition}",
            self.table,
            assignments.join(", ")
        );
        db.execute(&sql).await?;
        tracing::debug!(target: "pgrecord.record", table = %self.table, "updated row");
        Ok(())
    }

    /// Delete this row, running the model's destroy hooks when present.
    pub async fn destroy<D: Driver>(&mut self, db: &Database<D>) -> OrmResult<bool> {
        let hooks = self.hooks.clone();
        if let Some(hooks) = &hooks {
            if !run_hooks(hooks.as_ref(), &[Hook::BeforeDestroy], self) {
                return Ok(false);
            }
        }

        let condition = self.primary_key_condition(db)?;
        let sql = format!("DELETE FROM {} WHERE {condition}", self.table);
        db.execute(&sql).await?;
        tracing::debug!(target: "pgrecord.record", table = %self.table, "deleted row");

        match &hooks {
            Some(hooks) => Ok(run_hooks(hooks.as_ref(), &[Hook::AfterDestroy], self)),
            None => Ok(true),
        }
    }

    fn primary_key_condition<D: Driver>(&self, db: &Database<D>) -> OrmResult<String> {
        if self.schema.primary_key.is_empty() {
            return Err(OrmError::MissingPrimaryKey(self.table.clone()));
        }
        Ok(self
            .schema
            .primary_key
            .iter()
            .map(|pk| {
                let data_type = self.schema.column_type(pk).unwrap_or("text");
                format!("{pk} = {}", db.format_literal(data_type, self.value(pk)))
            })
            .collect::<Vec<_>>()
            .join(" AND "))
    }
}
