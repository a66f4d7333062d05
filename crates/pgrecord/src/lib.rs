//! # pgrecord
//!
//! A schema-discovering active-record ORM for PostgreSQL.
//!
//! ## Features
//!
//! - **No declarations**: columns, primary keys and foreign keys are read from the catalog
//!   the first time a table is named, then memoized (optionally on disk)
//! - **Named relationships**: `books.author_id → authors.id` becomes `book.author` and
//!   `author.books`, loaded lazily on first access
//! - **Active records**: `find`, `save`, `save_all` (dependency-ordered cascade), `destroy`
//! - **Model hooks**: validation and before/after callbacks per table
//! - **Context passing**: a [`Database`] owns the driver, catalog and models; nothing is global
//!
//! ## Example
//!
//! ```ignore
//! use pgrecord::{Database, FindOptions, PgDriver};
//!
//! let db = Database::new(PgDriver::connect("postgres://localhost/shop").await?);
//!
//! let mut book = db
//!     .find("books", Some(5.into()), &FindOptions::new().join("author"))
//!     .await?;
//! let author = book.related_one(&db, "author").await?;
//! author.set("name", "Frank Herbert")?;
//! book.save_all(&db).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod database;
pub mod driver;
pub mod error;
pub mod inflect;
pub mod literal;
pub mod model;
pub mod pg;
pub mod record;
pub mod schema_cache;
pub mod value;

pub use catalog::{Cardinality, ColumnInfo, Relationship, SchemaCatalog, TableSchema};
pub use config::DatabaseConfig;
pub use cursor::RecordCursor;
pub use database::Database;
pub use driver::{BufferedRows, Driver, ForeignKeyConstraint, RowSource};
pub use error::{OrmError, OrmResult};
pub use inflect::singularize;
pub use literal::format_literal;
pub use model::{Hook, ModelHooks, ModelRegistry, WriteKind};
pub use pg::PgDriver;
pub use record::{ActiveRecord, FindOptions, Join, JoinSpec, JoinType, RecordKey, Related};
pub use schema_cache::{CachedSchema, SchemaCacheConfig, SchemaCacheStore};
pub use value::{Row, Value};
