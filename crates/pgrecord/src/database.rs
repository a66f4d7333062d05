//! The database context: one driver, its schema catalog and its model registry.

use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{ColumnInfo, Relationship, SchemaCatalog, TableSchema};
use crate::config::DatabaseConfig;
use crate::cursor::RecordCursor;
use crate::driver::{Driver, RowSource};
use crate::error::{OrmError, OrmResult};
use crate::model::{ModelHooks, ModelRegistry};
use crate::record::{ActiveRecord, FindOptions, RecordKey};
use crate::schema_cache::SchemaCacheStore;
use crate::value::Value;

/// Owns a connection, its schema catalog and the table → model registry.
///
/// Every record operation takes the context by reference; nothing is process-global.
///
/// # Example
///
/// ```ignore
/// use pgrecord::{Database, FindOptions, PgDriver};
///
/// let db = Database::new(PgDriver::connect("postgres://localhost/shop").await?);
/// let mut book = db.find("books", Some(5.into()), &FindOptions::new().join("author")).await?;
/// book.set("title", "Dune")?;
/// book.save(&db).await?;
/// ```
#[derive(Debug)]
pub struct Database<D: Driver> {
    driver: D,
    catalog: SchemaCatalog,
    models: ModelRegistry,
    config: DatabaseConfig,
}

impl<D: Driver> Database<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            catalog: SchemaCatalog::new(),
            models: ModelRegistry::new(),
            config: DatabaseConfig::default(),
        }
    }

    /// Build a context with explicit configuration.
    ///
    /// Fails with [`OrmError::CacheDirectoryMissing`] when the schema cache is enabled
    /// and its directory does not exist.
    pub fn with_config(driver: D, config: DatabaseConfig) -> OrmResult<Self> {
        let catalog = if config.schema_cache.enabled {
            SchemaCatalog::with_store(SchemaCacheStore::open(&config.schema_cache.cache_dir)?)
        } else {
            SchemaCatalog::new()
        };
        Ok(Self {
            driver,
            catalog,
            models: ModelRegistry::new(),
            config,
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    /// Register a `Default`-constructible model for `table`.
    pub fn register_model<M>(&mut self, table: impl Into<String>) -> &mut Self
    where
        M: ModelHooks + Default + 'static,
    {
        self.models.register_model::<M>(table);
        self
    }

    // ── execution ───────────────────────────────────────────────────────────

    /// Run `sql` and wrap its result in a cursor.
    pub async fn query(&self, sql: &str) -> OrmResult<RecordCursor> {
        Ok(RecordCursor::new(self.execute(sql).await?))
    }

    /// Run `sql`, applying the configured timeout.
    ///
    /// Driver failures surface as [`OrmError::QueryFailed`] carrying the driver's last
    /// error text and the SQL.
    pub async fn execute(&self, sql: &str) -> OrmResult<Box<dyn RowSource>> {
        let start = Instant::now();
        match self.with_timeout(self.driver.execute(sql)).await {
            Ok(rows) => {
                tracing::debug!(
                    target: "pgrecord.sql",
                    sql,
                    rows = rows.row_count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "query executed"
                );
                Ok(rows)
            }
            Err(e) => {
                let err = match e {
                    e @ (OrmError::QueryFailed { .. }
                    | OrmError::Connection(_)
                    | OrmError::Timeout(_)) => e,
                    other => OrmError::query_failed(
                        self.driver.last_error().unwrap_or_else(|| other.to_string()),
                        sql,
                    ),
                };
                tracing::warn!(target: "pgrecord.sql", sql, error = %err, "query failed");
                Err(err)
            }
        }
    }

    pub async fn begin(&self) -> OrmResult<()> {
        tracing::debug!(target: "pgrecord.sql", "BEGIN");
        self.with_timeout(self.driver.begin()).await
    }

    pub async fn commit(&self) -> OrmResult<()> {
        tracing::debug!(target: "pgrecord.sql", "COMMIT");
        self.with_timeout(self.driver.commit()).await
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        tracing::debug!(target: "pgrecord.sql", "ROLLBACK");
        self.with_timeout(self.driver.rollback()).await
    }

    pub fn format_literal(&self, data_type: &str, value: &Value) -> String {
        self.driver.format_literal(data_type, value)
    }

    pub fn last_error(&self) -> Option<String> {
        self.driver.last_error()
    }

    /// The value the sequence behind `table.column` most recently produced.
    pub async fn serial_current_value(&self, table: &str, column: &str) -> OrmResult<Option<Value>> {
        let sql = self.driver.serial_current_value_sql(table, column);
        let mut rows = self.execute(&sql).await?;
        Ok(rows
            .next_row()
            .and_then(|row| row.get("current_value").cloned())
            .filter(|v| !v.is_empty()))
    }

    /// Await `future`, bounded by the configured query timeout.
    ///
    /// On expiry a cancel request is sent for the in-flight statement, if the driver
    /// exposes a cancel token.
    pub async fn with_timeout<T, F>(&self, future: F) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>> + Send,
    {
        match self.config.query_timeout {
            Some(timeout) => tokio::time::timeout(timeout, future).await.map_err(|_| {
                if let Some(cancel_token) = self.driver.cancel_token() {
                    tokio::spawn(async move {
                        let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
                    });
                }
                OrmError::Timeout(timeout)
            })?,
            None => future.await,
        }
    }

    // ── schema ──────────────────────────────────────────────────────────────

    pub async fn schema(&self, table: &str) -> OrmResult<Arc<TableSchema>> {
        self.with_timeout(self.catalog.schema(&self.driver, table))
            .await
    }

    pub async fn columns(&self, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        self.with_timeout(self.catalog.columns(&self.driver, table))
            .await
    }

    pub async fn primary_key(&self, table: &str) -> OrmResult<Vec<String>> {
        self.with_timeout(self.catalog.primary_key(&self.driver, table))
            .await
    }

    pub async fn foreign_keys(&self, table: &str) -> OrmResult<Vec<Relationship>> {
        self.with_timeout(self.catalog.foreign_keys(&self.driver, table))
            .await
    }

    pub async fn column_type(&self, table: &str, column: &str) -> OrmResult<String> {
        self.with_timeout(self.catalog.column_type(&self.driver, table, column))
            .await
    }

    pub async fn table_exists(&self, table: &str) -> OrmResult<bool> {
        self.with_timeout(self.catalog.table_exists(&self.driver, table))
            .await
    }

    pub async fn is_primary_key_reference(&self, table: &str) -> OrmResult<bool> {
        self.with_timeout(self.catalog.is_primary_key_reference(&self.driver, table))
            .await
    }

    /// User tables on the search path.
    pub async fn tables(&self) -> OrmResult<Vec<String>> {
        self.with_timeout(self.driver.load_tables()).await
    }

    // ── records ─────────────────────────────────────────────────────────────

    /// A new, empty record for `table`, carrying the table's model hooks if registered.
    pub async fn record(&self, table: &str) -> OrmResult<ActiveRecord> {
        let schema = self.schema(table).await?;
        Ok(ActiveRecord::with_hooks(schema, self.models.hooks_for(table)))
    }

    /// Construct a record for `table` and run [`ActiveRecord::find`] on it.
    pub async fn find(
        &self,
        table: &str,
        key: Option<RecordKey>,
        options: &FindOptions,
    ) -> OrmResult<ActiveRecord> {
        let mut record = self.record(table).await?;
        record.find(self, key, options).await?;
        Ok(record)
    }

    /// Every matching row as its own record.
    pub async fn find_all(&self, table: &str, options: &FindOptions) -> OrmResult<Vec<ActiveRecord>> {
        let mut record = self.record(table).await?;
        record.find(self, None, options).await?;
        Ok(record.all())
    }

    /// Build a record (and nested related records) from a JSON object.
    pub async fn record_from_json(
        &self,
        table: &str,
        payload: &serde_json::Value,
    ) -> OrmResult<ActiveRecord> {
        let mut record = self.record(table).await?;
        record.load_json(self, payload).await?;
        Ok(record)
    }
}

/// Runs the given block inside a database transaction.
///
/// - Issues `BEGIN` through `$db.begin().await`.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`; a failed rollback is reported alongside the original error.
///
/// The block must evaluate to `pgrecord::OrmResult<T>`.
///
/// # Example
///
/// ```ignore
/// let saved = pgrecord::transaction!(db, {
///     let mut order = db.record("orders").await?;
///     order.set("customer_id", 7)?;
///     order.save_all(&db).await
/// })?;
/// ```
#[macro_export]
macro_rules! transaction {
    ($db:expr, $body:block) => {{
        let __pgrecord_db = &$db;
        __pgrecord_db.begin().await?;

        let __pgrecord_tx_body_result: $crate::OrmResult<_> = async { $body }.await;
        match __pgrecord_tx_body_result {
            Ok(value) => {
                __pgrecord_db.commit().await?;
                Ok(value)
            }
            Err(error) => match __pgrecord_db.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}
