//! INSERT / UPDATE / DELETE and the save cascade.

mod common;

use chrono::{NaiveDateTime, Utc};
use common::{row, shop_db};
use pgrecord::{ActiveRecord, FindOptions, OrmError, Value};
use serde_json::json;

/// Parse a `created_*` / `updated_*` stamp and return how far it is from now, in seconds.
fn seconds_from_now(stamp: &Value) -> i64 {
    let text = stamp.as_str().expect("stamp is text");
    let utc = text.strip_suffix("+00").expect("stamp carries a UTC offset");
    let at = NaiveDateTime::parse_from_str(utc, "%Y-%m-%d %H:%M:%S")
        .unwrap()
        .and_utc();
    (Utc::now() - at).num_seconds().abs()
}

#[tokio::test]
async fn new_record_inserts_and_reads_back_its_serial_key() {
    let db = shop_db();
    let mut author = db.record("authors").await.unwrap();
    author.set("name", "Ursula").unwrap();

    assert!(author.save(&db).await.unwrap());

    let log = db.driver().log();
    assert!(log[0].starts_with("INSERT INTO authors (name, created_date) VALUES ('Ursula', '"));
    assert_eq!(
        log[1],
        "SELECT CURRVAL(PG_GET_SERIAL_SEQUENCE('authors', 'id')) AS current_value"
    );
    assert_eq!(author.get("id").unwrap(), &Value::Int(1));
    assert!(!author.get("created_date").unwrap().is_empty());
}

#[tokio::test]
async fn insert_stamps_created_columns_with_the_current_utc_time() {
    let db = shop_db();
    let mut author = db.record("authors").await.unwrap();
    author.set("name", "Octavia").unwrap();

    author.insert(&db).await.unwrap();

    let stamp = author.get("created_date").unwrap().clone();
    assert!(seconds_from_now(&stamp) <= 5);
    let literal = format!("'{}'", stamp.as_str().unwrap());
    assert_eq!(
        db.driver().log()[0],
        format!("INSERT INTO authors (name, created_date) VALUES ('Octavia', {literal})")
    );
}

#[tokio::test]
async fn update_stamps_updated_columns_and_never_writes_created_ones() {
    let db = shop_db();
    db.driver().respond(
        "FROM authors AS _author",
        vec![row(&[("id", "3"), ("name", "Old"), ("created_date", "2001-02-03 04:05:06")])],
    );
    db.driver().respond(
        "FROM books AS _book",
        vec![row(&[("id", "4"), ("title", "Old"), ("updated_on", "2001-02-03 04:05:06")])],
    );

    let mut author = db.find("authors", Some(3.into()), &FindOptions::new()).await.unwrap();
    author.set("name", "New").unwrap();
    let mut book = db.find("books", Some(4.into()), &FindOptions::new()).await.unwrap();
    book.set("title", "New").unwrap();
    db.driver().clear_log();

    author.save(&db).await.unwrap();
    book.save(&db).await.unwrap();

    let log = db.driver().log();
    assert_eq!(log[0], "UPDATE authors SET id = 3, name = 'New' WHERE id = 3");
    assert_eq!(
        author.get("created_date").unwrap().as_str(),
        Some("2001-02-03 04:05:06")
    );

    let stamp = book.get("updated_on").unwrap().clone();
    assert!(seconds_from_now(&stamp) <= 5);
    assert_eq!(
        log[1],
        format!(
            "UPDATE books SET id = 4, title = 'New', updated_on = '{}' WHERE id = 4",
            stamp.as_str().unwrap()
        )
    );
}

#[tokio::test]
async fn record_with_key_updates_only_present_columns() {
    let db = shop_db();
    db.driver().respond(
        "FROM books AS _book",
        vec![row(&[("id", "5"), ("title", "Dune"), ("author_id", "2"), ("in_print", "t")])],
    );

    let mut book = db.find("books", Some(5.into()), &FindOptions::new()).await.unwrap();
    book.set("title", "Dune Messiah").unwrap();
    book.unset("in_print").unwrap();
    db.driver().clear_log();

    assert!(book.save(&db).await.unwrap());

    let log = db.driver().log();
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("UPDATE books SET id = 5, title = 'Dune Messiah', author_id = 2, updated_on = '"));
    assert!(log[0].ends_with("' WHERE id = 5"));
    assert!(!log[0].contains("in_print"));
}

#[tokio::test]
async fn insert_skips_empty_values_but_keeps_zero_and_false() {
    let db = shop_db();
    let mut book = db.record("books").await.unwrap();
    book.set("title", "").unwrap();
    book.set("author_id", 0).unwrap();
    book.set("in_print", false).unwrap();

    book.insert(&db).await.unwrap();

    assert_eq!(
        db.driver().log()[0],
        "INSERT INTO books (author_id, in_print) VALUES (0, false)"
    );
}

#[tokio::test]
async fn record_with_nothing_to_write_uses_default_values() {
    let db = shop_db();
    let mut book = db.record("books").await.unwrap();
    book.insert(&db).await.unwrap();
    assert_eq!(db.driver().log()[0], "INSERT INTO books DEFAULT VALUES");
}

#[tokio::test]
async fn compound_key_checks_for_existence() {
    let db = shop_db();
    let mut tag = db.record("book_tags").await.unwrap();
    tag.set("book_id", 7).unwrap();
    tag.set("tag", "scifi").unwrap();
    tag.set("weight", 1.5).unwrap();

    tag.save(&db).await.unwrap();
    db.driver()
        .respond("SELECT 1 FROM book_tags", vec![row(&[("?column?", "1")])]);
    tag.set("weight", 2.0).unwrap();
    tag.save(&db).await.unwrap();

    assert_eq!(
        db.driver().log(),
        [
            "SELECT 1 FROM book_tags WHERE book_id = 7 AND tag = 'scifi'",
            "INSERT INTO book_tags (book_id, tag, weight) VALUES (7, 'scifi', 1.5)",
            "SELECT 1 FROM book_tags WHERE book_id = 7 AND tag = 'scifi'",
            "UPDATE book_tags SET book_id = 7, tag = 'scifi', weight = 2 WHERE book_id = 7 AND tag = 'scifi'",
        ]
    );
}

#[tokio::test]
async fn reference_key_is_written_not_generated() {
    let db = shop_db();
    let mut profile = db.record("profiles").await.unwrap();
    profile.set("author_id", 3).unwrap();
    profile.set("bio", "hi").unwrap();

    profile.save(&db).await.unwrap();

    assert_eq!(
        db.driver().log(),
        [
            "SELECT 1 FROM profiles WHERE author_id = 3",
            "INSERT INTO profiles (author_id, bio) VALUES (3, 'hi')",
        ]
    );
}

#[tokio::test]
async fn keyless_table_inserts_but_cannot_update_or_destroy() {
    let db = shop_db();
    let mut entry = db.record("audit_log").await.unwrap();
    entry.set("message", "boot").unwrap();

    assert!(entry.save(&db).await.unwrap());
    let log = db.driver().log();
    assert_eq!(log.len(), 1);
    assert!(log[0].starts_with("INSERT INTO audit_log (message, created_on) VALUES ('boot', '"));

    assert!(matches!(entry.update(&db).await, Err(OrmError::MissingPrimaryKey(_))));
    assert!(matches!(entry.destroy(&db).await, Err(OrmError::MissingPrimaryKey(_))));
}

#[tokio::test]
async fn destroy_deletes_by_key() {
    let db = shop_db();
    let mut tag = db.record("book_tags").await.unwrap();
    tag.set("book_id", 7).unwrap();
    tag.set("tag", "x").unwrap();

    assert!(tag.destroy(&db).await.unwrap());
    assert_eq!(
        db.driver().log(),
        ["DELETE FROM book_tags WHERE book_id = 7 AND tag = 'x'"]
    );
}

#[tokio::test]
async fn failed_write_reports_driver_error_and_sql() {
    let db = shop_db();
    db.driver().fail_on("INSERT INTO authors", "duplicate key value");

    let mut author = db.record("authors").await.unwrap();
    author.set("name", "X").unwrap();
    let err = author.save(&db).await.unwrap_err();

    match err {
        OrmError::QueryFailed { message, sql } => {
            assert_eq!(message, "duplicate key value");
            assert!(sql.starts_with("INSERT INTO authors"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.last_error().as_deref(), Some("duplicate key value"));
}

#[tokio::test]
async fn save_all_orders_writes_by_dependency() {
    let db = shop_db();

    let mut author = db.record("authors").await.unwrap();
    author.set("name", "Le Guin").unwrap();

    let mut tag = db.record("book_tags").await.unwrap();
    tag.set("tag", "fantasy").unwrap();

    let mut book = db.record("books").await.unwrap();
    book.set("title", "Earthsea").unwrap();
    book.set_related("author", author).unwrap();
    book.set_related("book_tags", vec![tag]).unwrap();

    assert!(book.save_all(&db).await.unwrap());

    let writes = db.driver().writes();
    assert_eq!(writes.len(), 3);
    assert!(writes[0].starts_with("INSERT INTO authors (name, created_date) VALUES ('Le Guin', '"));
    assert_eq!(writes[1], "INSERT INTO books (title, author_id) VALUES ('Earthsea', 1)");
    assert_eq!(
        writes[2],
        "INSERT INTO book_tags (book_id, tag) VALUES (2, 'fantasy')"
    );

    assert_eq!(book.get("author_id").unwrap(), &Value::Int(1));
    assert_eq!(book.get("id").unwrap(), &Value::Int(2));
    let tags = book.relation("book_tags").and_then(|r| r.as_many()).unwrap();
    assert_eq!(tags[0].get("book_id").unwrap(), &Value::Int(2));
}

#[tokio::test]
async fn serial_read_back_failure_is_a_query_failure() {
    let db = shop_db();
    db.driver().fail_on("CURRVAL", "currval of sequence is not yet defined");

    let mut author = db.record("authors").await.unwrap();
    author.set("name", "X").unwrap();

    match author.save(&db).await.unwrap_err() {
        OrmError::QueryFailed { sql, .. } => assert!(sql.contains("PG_GET_SERIAL_SEQUENCE('authors', 'id')")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.driver().writes().len(), 1);
}

#[tokio::test]
async fn save_all_rejects_a_list_under_a_single_row_relationship() {
    let db = shop_db();
    let mut author = db.record("authors").await.unwrap();
    author.set("name", "A").unwrap();
    let mut book = db.record("books").await.unwrap();
    book.set("title", "B").unwrap();
    book.set_related("author", vec![author]).unwrap();

    let err = book.save_all(&db).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidJoin(_)));
    assert!(db.driver().writes().is_empty());
}

#[tokio::test]
async fn save_all_stops_at_the_first_failure() {
    let db = shop_db();
    db.driver().fail_on("INSERT INTO books", "check constraint");

    let mut author = db.record("authors").await.unwrap();
    author.set("name", "A").unwrap();
    let mut book = db.record("books").await.unwrap();
    book.set("title", "B").unwrap();
    book.set_related("author", author).unwrap();
    let mut tag = db.record("book_tags").await.unwrap();
    tag.set("tag", "t").unwrap();
    book.set_related("book_tags", vec![tag]).unwrap();

    let err = book.save_all(&db).await.unwrap_err();
    assert!(err.is_query_failed());

    let writes = db.driver().writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[0].starts_with("INSERT INTO authors"));
    assert!(writes[1].starts_with("INSERT INTO books"));
}

#[tokio::test]
async fn json_payload_builds_a_record_tree() {
    let db = shop_db();
    let payload = json!({
        "title": "The Dispossessed",
        "in_print": true,
        "isbn": "ignored",
        "author": {"name": "Le Guin"},
        "book_tags": [{"tag": "utopia"}, {"tag": "scifi"}]
    });

    let mut book = db.record_from_json("books", &payload).await.unwrap();
    assert_eq!(book.get("in_print").unwrap(), &Value::Bool(true));
    assert_eq!(book.relation("book_tags").unwrap().len(), 2);

    book.save_all(&db).await.unwrap();
    let writes = db.driver().writes();
    assert_eq!(writes.len(), 4);
    assert!(writes[0].starts_with("INSERT INTO authors"));
    assert!(writes[1].starts_with("INSERT INTO books"));
    assert!(writes[2].ends_with("VALUES (2, 'utopia')"));
    assert!(writes[3].ends_with("VALUES (2, 'scifi')"));

    let round_trip = book.to_json();
    assert_eq!(round_trip["author"]["id"], json!(1));
    assert_eq!(round_trip["book_tags"][1]["book_id"], json!(2));
    assert!(round_trip.get("isbn").is_none());
}

#[tokio::test]
async fn clone_as_new_inserts_a_copy() {
    let db = shop_db();
    db.driver()
        .respond("FROM authors AS _author", vec![row(&[("id", "9"), ("name", "Orig")])]);

    let original: ActiveRecord = db.find("authors", Some(9.into()), &FindOptions::new()).await.unwrap();
    let mut copy = original.clone_as_new();
    db.driver().clear_log();

    copy.save(&db).await.unwrap();
    assert!(db.driver().log()[0].starts_with("INSERT INTO authors (name, created_date)"));
    assert_eq!(original.get("id").unwrap(), &Value::Int(9));
}
