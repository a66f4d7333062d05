//! Schema discovery, relationship naming and memoization.

mod common;

use common::{shop, shop_db};
use pgrecord::{Cardinality, Database, DatabaseConfig, OrmError};

#[tokio::test]
async fn outgoing_and_incoming_relationships_are_named() {
    let db = shop_db();

    let books = db.schema("books").await.unwrap();
    let author = books.relationship("author").unwrap();
    assert_eq!(author.table, "authors");
    assert_eq!(author.kind, Cardinality::ManyToOne);
    assert!(author.dependency);
    assert_eq!(author.local_columns, ["author_id"]);
    assert_eq!(author.foreign_columns, ["id"]);

    let tags = books.relationship("book_tags").unwrap();
    assert_eq!(tags.kind, Cardinality::OneToMany);
    assert!(!tags.dependency);
    assert_eq!(tags.local_columns, ["id"]);
    assert_eq!(tags.foreign_columns, ["book_id"]);

    let authors = db.schema("authors").await.unwrap();
    assert_eq!(authors.relationship("books").unwrap().kind, Cardinality::OneToMany);
    assert_eq!(authors.relationship("profiles").unwrap().kind, Cardinality::OneToOne);
}

#[tokio::test]
async fn schema_is_discovered_once() {
    let db = shop_db();

    db.schema("books").await.unwrap();
    let calls = db.driver().catalog_calls();
    assert!(calls > 0);

    db.columns("books").await.unwrap();
    db.primary_key("books").await.unwrap();
    db.foreign_keys("books").await.unwrap();
    db.column_type("books", "title").await.unwrap();
    db.schema("books").await.unwrap();

    assert_eq!(db.driver().catalog_calls(), calls);
    assert!(db.driver().log().is_empty());
}

#[tokio::test]
async fn columns_keep_catalog_order_and_types() {
    let db = shop_db();

    let columns = db.columns("books").await.unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "title", "author_id", "in_print", "updated_on"]);
    assert_eq!(db.column_type("books", "in_print").await.unwrap(), "boolean");
    assert_eq!(db.primary_key("book_tags").await.unwrap(), ["book_id", "tag"]);
    assert!(db.primary_key("audit_log").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_names_fail() {
    let db = shop_db();

    let err = db.column_type("books", "isbn").await.unwrap_err();
    assert!(err.is_unknown_column());

    let err = db.schema("magazines").await.unwrap_err();
    assert!(matches!(err, OrmError::UnknownTable(t) if t == "magazines"));

    assert!(db.table_exists("books").await.unwrap());
    assert!(!db.table_exists("magazines").await.unwrap());
}

#[tokio::test]
async fn reference_primary_keys_are_detected() {
    let db = shop_db();
    assert!(db.is_primary_key_reference("profiles").await.unwrap());
    assert!(!db.is_primary_key_reference("books").await.unwrap());
    assert!(!db.is_primary_key_reference("book_tags").await.unwrap());
}

#[tokio::test]
async fn dangling_foreign_key_is_an_error() {
    let driver = shop().foreign_key("books", &["publisher_id"], "publishers", &["id"]);
    let db = Database::new(driver);

    let err = db.schema("books").await.unwrap_err();
    assert!(matches!(err, OrmError::RelationshipNotFound { ref target, .. } if target == "publishers"));
}

#[tokio::test]
async fn colliding_relationship_names_keep_the_first() {
    // books.author and books.author_id both derive "author"; constraints are read
    // in name order, so books_author_fkey comes first
    let driver = shop()
        .table(
            "books",
            &[
                ("id", "integer"),
                ("author_id", "integer"),
                ("author", "integer"),
            ],
            &["id"],
        )
        .foreign_key("books", &["author"], "authors", &["id"]);
    let db = Database::new(driver);

    let books = db.schema("books").await.unwrap();
    let authors: Vec<_> = books
        .relationships
        .iter()
        .filter(|r| r.name == "author")
        .collect();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].local_columns, ["author"]);
}

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("pgrecord-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn schema_cache_survives_a_new_context() {
    let dir = scratch_dir("catalog-cache");
    let config = DatabaseConfig::new().schema_cache_dir(&dir);

    let first = Database::with_config(shop(), config.clone()).unwrap();
    let discovered = first.schema("books").await.unwrap();
    assert!(first.driver().catalog_calls() > 0);
    assert!(dir.join("books.json").exists());

    let second = Database::with_config(shop(), config).unwrap();
    let cached = second.schema("books").await.unwrap();
    assert_eq!(second.driver().catalog_calls(), 0);
    assert_eq!(cached, discovered);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_cache_directory_is_rejected() {
    let dir = std::env::temp_dir().join(format!("pgrecord-absent-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let err = Database::with_config(shop(), DatabaseConfig::new().schema_cache_dir(&dir)).unwrap_err();
    assert!(matches!(err, OrmError::CacheDirectoryMissing(_)));
}
