use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use pgrecord::{
    ActiveRecord, Cardinality, Database, FindOptions, PgDriver, RecordKey, SchemaCacheStore,
    TableSchema, Value,
};

use crate::cli::{FindArgs, GlobalArgs, SchemaArgs};
use crate::config::Settings;

async fn connect(settings: &Settings) -> anyhow::Result<Database<PgDriver>> {
    let driver = PgDriver::connect(&settings.database_url).await?;
    Ok(Database::with_config(driver, settings.database.clone())?)
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub async fn tables(global: GlobalArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&global)?;
    let db = connect(&settings).await?;

    let tables = db.tables().await?;
    if tables.is_empty() {
        println!("{}", "no tables found".yellow());
        return Ok(());
    }
    for table in tables {
        println!("{table}");
    }
    Ok(())
}

pub async fn schema(args: SchemaArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args.global)?;
    let db = connect(&settings).await?;

    let schema = db.schema(&args.table).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
        return Ok(());
    }

    println!("{}", schema.table.bold().cyan());
    println!("{}", columns_table(&schema));
    if schema.relationships.is_empty() {
        println!("{}", "no relationships".dimmed());
    } else {
        println!("{}", relationships_table(&schema));
    }
    Ok(())
}

fn columns_table(schema: &TableSchema) -> Table {
    let mut table = new_table();
    table.set_header(header(&["#", "Column", "Type", "Not Null", "Default", "Key"]));
    for column in &schema.columns {
        let key = if schema.primary_key.contains(&column.name) {
            Cell::new("PK").fg(Color::Yellow)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(column.number),
            Cell::new(&column.name),
            Cell::new(&column.data_type).fg(Color::Green),
            Cell::new(if column.not_null { "yes" } else { "no" }),
            Cell::new(column.default_expr.as_deref().unwrap_or("")).fg(Color::DarkGrey),
            key,
        ]);
    }
    table
}

fn relationships_table(schema: &TableSchema) -> Table {
    let mut table = new_table();
    table.set_header(header(&["Name", "Table", "Columns", "Kind"]));
    for relationship in &schema.relationships {
        let pairs = relationship
            .column_pairs()
            .map(|(local, foreign)| format!("{local} → {foreign}"))
            .collect::<Vec<_>>()
            .join(", ");
        let kind = match relationship.kind {
            Cardinality::OneToOne => "one-to-one",
            Cardinality::OneToMany => "one-to-many",
            Cardinality::ManyToOne => "many-to-one",
        };
        table.add_row(vec![
            Cell::new(&relationship.name).fg(Color::Yellow),
            Cell::new(&relationship.table),
            Cell::new(pairs),
            Cell::new(kind),
        ]);
    }
    table
}

/// `5` → single key; `book_id=7,tag=x` → compound key.
pub fn parse_key(raw: &str) -> RecordKey {
    if !raw.contains('=') {
        return RecordKey::Single(Value::Text(raw.to_string()));
    }
    RecordKey::compound(raw.split(',').filter_map(|pair| {
        let (column, value) = pair.split_once('=')?;
        Some((column.trim().to_string(), Value::Text(value.trim().to_string())))
    }))
}

pub async fn find(args: FindArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args.global)?;
    let db = connect(&settings).await?;

    let mut options = FindOptions::new();
    if let Some(where_clause) = &args.where_clause {
        options = options.where_clause(where_clause.as_str());
    }
    for join in &args.joins {
        options = options.join(join.as_str());
    }
    if let Some(order) = &args.order {
        options = options.order(order.as_str());
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    if let Some(offset) = args.offset {
        options = options.offset(offset);
    }

    let mut found = db
        .find(&args.table, args.key.as_deref().map(parse_key), &options)
        .await?;
    let rows = found.all();

    if args.json {
        let rows: Vec<_> = rows.iter().map(ActiveRecord::to_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "no rows".yellow());
        return Ok(());
    }

    let columns: Vec<&str> = found.schema().column_names().collect();
    let mut table = new_table();
    table.set_header(header(&columns));
    for record in &rows {
        table.add_row(
            columns
                .iter()
                .map(|column| match record.get(column) {
                    Ok(Value::Null) | Err(_) => Cell::new("(null)").fg(Color::DarkGrey),
                    Ok(value) => Cell::new(value),
                })
                .collect::<Vec<_>>(),
        );
    }
    println!("{table}");
    println!("{} {}", rows.len().to_string().bold(), "row(s)".dimmed());
    Ok(())
}

pub fn cache_clear(global: GlobalArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&global)?;
    let dir = &settings.database.schema_cache.cache_dir;
    let store = SchemaCacheStore::open(dir)?;
    let removed = store.clear()?;
    println!(
        "  {} removed {removed} cached schema(s) from {}",
        "✓".green().bold(),
        dir.display()
    );
    Ok(())
}
