#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use pgrecord::{
    BufferedRows, ColumnInfo, Database, Driver, ForeignKeyConstraint, OrmError, OrmResult, Row,
    RowSource, Value,
};

#[derive(Debug, Clone)]
struct FixtureTable {
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
}

#[derive(Debug, Clone)]
struct FixtureKey {
    name: String,
    table: String,
    columns: Vec<String>,
    references: String,
    referenced_columns: Vec<String>,
}

/// In-memory driver: a fixed catalog plus scripted query results.
///
/// Every statement passed to `execute` is logged. Results are scripted by substring;
/// the first matching script wins and unmatched statements return no rows. Each
/// `INSERT` bumps a session sequence that `CURRVAL` reads back.
#[derive(Debug, Default)]
pub struct MockDriver {
    tables: HashMap<String, FixtureTable>,
    keys: Vec<FixtureKey>,
    log: Mutex<Vec<String>>,
    scripts: Mutex<Vec<(String, Vec<Row>)>>,
    failures: Mutex<Vec<(String, String)>>,
    last_error: Mutex<Option<String>>,
    catalog_calls: AtomicUsize,
    serial: AtomicI64,
    delay: Option<Duration>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Column types are given as `format_type` would render them.
    pub fn table(mut self, name: &str, columns: &[(&str, &str)], primary_key: &[&str]) -> Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (column, data_type))| ColumnInfo {
                number: i as i32 + 1,
                name: column.to_string(),
                data_type: data_type.to_string(),
                not_null: primary_key.contains(column),
                default_expr: None,
                size: None,
            })
            .collect();
        self.tables.insert(
            name.to_string(),
            FixtureTable {
                columns,
                primary_key: strings(primary_key),
            },
        );
        self
    }

    /// Add a foreign key `table(columns) REFERENCES references(referenced_columns)`.
    pub fn foreign_key(
        mut self,
        table: &str,
        columns: &[&str],
        references: &str,
        referenced_columns: &[&str],
    ) -> Self {
        self.keys.push(FixtureKey {
            name: format!("{table}_{}_fkey", columns.join("_")),
            table: table.to_string(),
            columns: strings(columns),
            references: references.to_string(),
            referenced_columns: strings(referenced_columns),
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return `rows` for statements containing `needle`.
    pub fn respond(&self, needle: &str, rows: Vec<Row>) {
        lock(&self.scripts).push((needle.to_string(), rows));
    }

    /// Fail statements containing `needle` with `message`.
    pub fn fail_on(&self, needle: &str, message: &str) {
        lock(&self.failures).push((needle.to_string(), message.to_string()));
    }

    pub fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Logged statements starting with one of the DML/DDL keywords we assert on.
    pub fn writes(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|sql| {
                ["INSERT", "UPDATE", "DELETE", "BEGIN", "COMMIT", "ROLLBACK"]
                    .iter()
                    .any(|kw| sql.starts_with(kw))
            })
            .collect()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// How many times the catalog was asked about a table.
    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    fn catalog_hit(&self) {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Driver for MockDriver {
    async fn execute(&self, sql: &str) -> OrmResult<Box<dyn RowSource>> {
        lock(&self.log).push(sql.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.failures)
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, message)| message.clone());
        if let Some(message) = failure {
            *lock(&self.last_error) = Some(message.clone());
            return Err(OrmError::query_failed(message, sql));
        }

        if sql.starts_with("INSERT") {
            self.serial.fetch_add(1, Ordering::SeqCst);
        }
        if sql.contains("CURRVAL") {
            let current = self.serial.load(Ordering::SeqCst);
            return Ok(Box::new(BufferedRows::new(vec![Row::from_pairs([(
                "current_value",
                Value::Text(current.to_string()),
            )])])));
        }

        let rows = lock(&self.scripts)
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(Box::new(BufferedRows::new(rows)))
    }

    fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    async fn load_columns(&self, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        self.catalog_hit();
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn load_primary_key(&self, table: &str) -> OrmResult<Vec<String>> {
        self.catalog_hit();
        Ok(self
            .tables
            .get(table)
            .map(|t| t.primary_key.clone())
            .unwrap_or_default())
    }

    async fn load_references(&self, table: &str) -> OrmResult<Vec<ForeignKeyConstraint>> {
        self.catalog_hit();
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .filter(|k| k.table == table)
            .map(|k| ForeignKeyConstraint {
                name: k.name.clone(),
                table: k.references.clone(),
                local_columns: k.columns.clone(),
                foreign_columns: k.referenced_columns.clone(),
            })
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn load_referenced_by(&self, table: &str) -> OrmResult<Vec<ForeignKeyConstraint>> {
        self.catalog_hit();
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .filter(|k| k.references == table)
            .map(|k| ForeignKeyConstraint {
                name: k.name.clone(),
                table: k.table.clone(),
                local_columns: k.referenced_columns.clone(),
                foreign_columns: k.columns.clone(),
            })
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn load_tables(&self) -> OrmResult<Vec<String>> {
        let mut tables: Vec<_> = self.tables.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A row as PostgreSQL's text protocol would return it.
pub fn row(pairs: &[(&str, &str)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (*k, Value::Text(v.to_string()))))
}

/// authors ─< books ─< book_tags, authors ─ profiles (shared key), plus a keyless
/// audit table.
pub fn shop() -> MockDriver {
    MockDriver::new()
        .table(
            "authors",
            &[
                ("id", "integer"),
                ("name", "character varying(64)"),
                ("created_date", "timestamp without time zone"),
            ],
            &["id"],
        )
        .table(
            "books",
            &[
                ("id", "integer"),
                ("title", "text"),
                ("author_id", "integer"),
                ("in_print", "boolean"),
                ("updated_on", "timestamp without time zone"),
            ],
            &["id"],
        )
        .table(
            "book_tags",
            &[("book_id", "integer"), ("tag", "text"), ("weight", "numeric(4,2)")],
            &["book_id", "tag"],
        )
        .table(
            "profiles",
            &[("author_id", "integer"), ("bio", "text")],
            &["author_id"],
        )
        .table(
            "audit_log",
            &[("message", "text"), ("created_on", "timestamp with time zone")],
            &[],
        )
        .foreign_key("books", &["author_id"], "authors", &["id"])
        .foreign_key("book_tags", &["book_id"], "books", &["id"])
        .foreign_key("profiles", &["author_id"], "authors", &["id"])
}

pub fn shop_db() -> Database<MockDriver> {
    Database::new(shop())
}
