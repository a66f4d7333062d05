//! Driver contract: the capability surface the ORM needs from a relational connection.
//!
//! A driver runs SQL text and hands back a [`RowSource`]. The catalog-introspection
//! methods have PostgreSQL defaults written on top of [`Driver::execute`], so a driver
//! only has to implement `execute` and `last_error`.

use crate::catalog::ColumnInfo;
use crate::error::OrmResult;
use crate::literal::{self, quote};
use crate::value::{Row, Value};

/// A buffered or streaming result set.
pub trait RowSource: Send + Sync {
    /// Pull the next row, or `None` once the result is exhausted.
    fn next_row(&mut self) -> Option<Row>;

    /// Number of rows the result reported when it was produced.
    fn row_count(&self) -> usize;

    /// Reposition at the first row. Returns `false` if the source cannot rewind.
    fn reset(&mut self) -> bool;
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct BufferedRows {
    rows: Vec<Row>,
    position: usize,
}

impl BufferedRows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, position: 0 }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl RowSource for BufferedRows {
    fn next_row(&mut self) -> Option<Row> {
        let row = self.rows.get(self.position).cloned()?;
        self.position += 1;
        Some(row)
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn reset(&mut self) -> bool {
        self.position = 0;
        true
    }
}

/// One foreign-key constraint seen from a given table.
///
/// `local_columns` always belong to the table being described and `foreign_columns` to
/// `table`, pairwise in constraint order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyConstraint {
    pub name: String,
    pub table: String,
    pub local_columns: Vec<String>,
    pub foreign_columns: Vec<String>,
}

/// A relational connection.
pub trait Driver: Send + Sync {
    /// Run one SQL statement.
    fn execute(
        &self,
        sql: &str,
    ) -> impl std::future::Future<Output = OrmResult<Box<dyn RowSource>>> + Send;

    /// Text of the most recent driver error, if any.
    fn last_error(&self) -> Option<String>;

    fn begin(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send {
        async move {
            self.execute("BEGIN").await?;
            Ok(())
        }
    }

    fn commit(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send {
        async move {
            self.execute("COMMIT").await?;
            Ok(())
        }
    }

    fn rollback(&self) -> impl std::future::Future<Output = OrmResult<()>> + Send {
        async move {
            self.execute("ROLLBACK").await?;
            Ok(())
        }
    }

    /// Format `value` as a SQL literal for a column of `data_type`.
    fn format_literal(&self, data_type: &str, value: &Value) -> String {
        literal::format_literal(data_type, value)
    }

    /// Token used to cancel an in-flight statement when a query times out.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }

    /// Columns of `table` in catalog order, dropped columns excluded.
    fn load_columns(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = OrmResult<Vec<ColumnInfo>>> + Send {
        async move {
            let sql = format!(
                r#"
SELECT
  a.attnum AS number,
  a.attname AS name,
  pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
  a.attnotnull AS not_null,
  pg_catalog.pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
  CASE WHEN a.atttypid IN (1042, 1043) AND a.atttypmod > 4 THEN a.atttypmod - 4 END AS size
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = c.oid AND ad.adnum = a.attnum
WHERE c.relname = {table}
  AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
  AND pg_catalog.pg_table_is_visible(c.oid)
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#,
                table = quote(table)
            );
            let mut rows = self.execute(&sql).await?;

            let mut columns = Vec::new();
            while let Some(row) = rows.next_row() {
                let name = text(&row, "name");
                if name.is_empty() || name.contains(".pg.dropped.") {
                    continue;
                }
                columns.push(ColumnInfo {
                    number: int(&row, "number").unwrap_or_default() as i32,
                    name,
                    data_type: text(&row, "data_type"),
                    not_null: flag(&row, "not_null"),
                    default_expr: optional_text(&row, "default_expr"),
                    size: int(&row, "size").map(|s| s as i32),
                });
            }
            Ok(columns)
        }
    }

    /// Primary-key columns of `table` in key order; empty when the table has none.
    fn load_primary_key(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = OrmResult<Vec<String>>> + Send {
        async move {
            let sql = format!(
                r#"
SELECT a.attname AS column_name
FROM pg_catalog.pg_index i
JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
WHERE i.indisprimary
  AND c.relname = {table}
  AND pg_catalog.pg_table_is_visible(c.oid)
ORDER BY k.ord
"#,
                table = quote(table)
            );
            let mut rows = self.execute(&sql).await?;

            let mut key = Vec::new();
            while let Some(row) = rows.next_row() {
                key.push(text(&row, "column_name"));
            }
            Ok(key)
        }
    }

    /// Constraints declared on `table` that point at other tables.
    fn load_references(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = OrmResult<Vec<ForeignKeyConstraint>>> + Send {
        async move {
            let sql = foreign_key_sql("c.relname", "f.relname", "conkey", "confkey", table);
            let mut rows = self.execute(&sql).await?;
            Ok(collect_constraints(rows.as_mut()))
        }
    }

    /// Constraints on other tables that point at `table`.
    fn load_referenced_by(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = OrmResult<Vec<ForeignKeyConstraint>>> + Send {
        async move {
            let sql = foreign_key_sql("f.relname", "c.relname", "confkey", "conkey", table);
            let mut rows = self.execute(&sql).await?;
            Ok(collect_constraints(rows.as_mut()))
        }
    }

    fn table_exists(&self, table: &str) -> impl std::future::Future<Output = OrmResult<bool>> + Send {
        async move {
            let sql = format!(
                "SELECT 1 AS present FROM pg_catalog.pg_tables \
                 WHERE tablename = {} AND schemaname = ANY (current_schemas(false))",
                quote(table)
            );
            let rows = self.execute(&sql).await?;
            Ok(rows.row_count() > 0)
        }
    }

    /// User tables visible on the search path, by name.
    fn load_tables(&self) -> impl std::future::Future<Output = OrmResult<Vec<String>>> + Send {
        async move {
            let sql = "SELECT tablename FROM pg_catalog.pg_tables \
                       WHERE schemaname = ANY (current_schemas(false)) ORDER BY tablename";
            let mut rows = self.execute(sql).await?;

            let mut tables = Vec::new();
            while let Some(row) = rows.next_row() {
                tables.push(text(&row, "tablename"));
            }
            Ok(tables)
        }
    }

    /// Statement reading the value most recently assigned by the sequence behind
    /// `table.column` in this session, as a `current_value` column.
    fn serial_current_value_sql(&self, table: &str, column: &str) -> String {
        format!(
            "SELECT CURRVAL(PG_GET_SERIAL_SEQUENCE({}, {})) AS current_value",
            quote(table),
            quote(column)
        )
    }
}

fn foreign_key_sql(
    filter_on: &str,
    other_table: &str,
    local_key: &str,
    foreign_key: &str,
    table: &str,
) -> String {
    let (local_rel, foreign_rel) = if local_key == "conkey" {
        ("con.conrelid", "con.confrelid")
    } else {
        ("con.confrelid", "con.conrelid")
    };
    format!(
        r#"
SELECT
  con.conname AS name,
  {other_table} AS other_table,
  array_to_string(ARRAY(
    SELECT a.attname
    FROM unnest(con.{local_key}) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = {local_rel} AND a.attnum = k.attnum
    ORDER BY k.ord
  ), ',') AS local_columns,
  array_to_string(ARRAY(
    SELECT a.attname
    FROM unnest(con.{foreign_key}) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = {foreign_rel} AND a.attnum = k.attnum
    ORDER BY k.ord
  ), ',') AS foreign_columns
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_class f ON f.oid = con.confrelid
WHERE con.contype = 'f'
  AND {filter_on} = {table}
  AND pg_catalog.pg_table_is_visible(c.oid)
  AND pg_catalog.pg_table_is_visible(f.oid)
ORDER BY con.conname
"#,
        table = quote(table)
    )
}

fn collect_constraints(rows: &mut dyn RowSource) -> Vec<ForeignKeyConstraint> {
    let mut constraints = Vec::new();
    while let Some(row) = rows.next_row() {
        constraints.push(ForeignKeyConstraint {
            name: text(&row, "name"),
            table: text(&row, "other_table"),
            local_columns: split_columns(&text(&row, "local_columns")),
            foreign_columns: split_columns(&text(&row, "foreign_columns")),
        });
    }
    constraints
}

fn split_columns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

fn text(row: &Row, column: &str) -> String {
    row.get(column).map(ToString::to_string).unwrap_or_default()
}

fn optional_text(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .filter(|v| !v.is_null())
        .map(ToString::to_string)
}

fn int(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn flag(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Text(s)) => matches!(s.as_str(), "t" | "true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_rows_rewind() {
        let mut rows = BufferedRows::new(vec![
            Row::from_pairs([("id", 1)]),
            Row::from_pairs([("id", 2)]),
        ]);
        assert_eq!(rows.row_count(), 2);
        assert!(rows.next_row().is_some());
        assert!(rows.next_row().is_some());
        assert!(rows.next_row().is_none());
        assert!(rows.reset());
        assert_eq!(rows.next_row().unwrap().get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn constraint_rows_split_column_lists() {
        let mut rows = BufferedRows::new(vec![Row::from_pairs([
            ("name", "order_lines_order_fk"),
            ("other_table", "orders"),
            ("local_columns", "order_id,shop_id"),
            ("foreign_columns", "id,shop_id"),
        ])]);
        let constraints = collect_constraints(&mut rows);
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].table, "orders");
        assert_eq!(constraints[0].local_columns, vec!["order_id", "shop_id"]);
        assert_eq!(constraints[0].foreign_columns, vec!["id", "shop_id"]);
    }

    #[test]
    fn incoming_constraint_sql_filters_on_referenced_table() {
        let sql = foreign_key_sql("f.relname", "c.relname", "confkey", "conkey", "authors");
        assert!(sql.contains("f.relname = 'authors'"));
        assert!(sql.contains("unnest(con.confkey)"));
        assert!(sql.contains("a.attrelid = con.confrelid"));
    }
}
