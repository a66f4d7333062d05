//! [`Driver`] implementation over a `tokio_postgres::Client`.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::driver::{BufferedRows, Driver, RowSource};
use crate::error::{OrmError, OrmResult};
use crate::value::{Row, Value};

/// A PostgreSQL connection driven through the simple-query (text) protocol.
///
/// Results are buffered in full, so every [`RowSource`] it returns can be rewound.
pub struct PgDriver {
    client: Client,
    last_error: Mutex<Option<String>>,
}

impl PgDriver {
    /// Wrap an already connected client. The caller keeps driving its connection.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            last_error: Mutex::new(None),
        }
    }

    /// Connect with `NoTls` using a PostgreSQL connection URL.
    ///
    /// The connection future is spawned onto the current tokio runtime.
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| OrmError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(target: "pgrecord.sql", error = %e, "connection error");
            }
        });

        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn record_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }
}

impl Driver for PgDriver {
    async fn execute(&self, sql: &str) -> OrmResult<Box<dyn RowSource>> {
        let messages = match self.client.simple_query(sql).await {
            Ok(messages) => messages,
            Err(e) => {
                let err = OrmError::from_db_error(e, sql);
                self.record_error(Some(match &err {
                    OrmError::QueryFailed { message, .. } => message.clone(),
                    other => other.to_string(),
                }));
                return Err(err);
            }
        };
        self.record_error(None);
        Ok(Box::new(BufferedRows::new(collect_rows(messages))))
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(self.client.cancel_token())
    }
}

/// Rows of every result in the batch; column names are shared per result.
fn collect_rows(messages: Vec<SimpleQueryMessage>) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut columns: Option<Arc<[String]>> = None;

    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                let names = columns
                    .get_or_insert_with(|| {
                        row.columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect::<Vec<_>>()
                            .into()
                    })
                    .clone();
                let values = (0..row.len())
                    .map(|i| row.get(i).map_or(Value::Null, Value::from))
                    .collect();
                rows.push(Row::new(names, values));
            }
            SimpleQueryMessage::CommandComplete(_) => columns = None,
            _ => {}
        }
    }
    rows
}
