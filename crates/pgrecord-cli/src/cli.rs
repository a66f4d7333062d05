use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Schema,
    Find,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help(HelpTopic),
    Tables(GlobalArgs),
    Schema(SchemaArgs),
    Find(FindArgs),
    CacheClear(GlobalArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalArgs {
    pub config: PathBuf,
    pub database: Option<String>,
}

impl Default for GlobalArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("pgrecord.toml"),
            database: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaArgs {
    pub global: GlobalArgs,
    pub table: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindArgs {
    pub global: GlobalArgs,
    pub table: String,
    /// `5`, or `col=value,col=value` for compound keys.
    pub key: Option<String>,
    pub where_clause: Option<String>,
    pub joins: Vec<String>,
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub json: bool,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1).map(String::as_str);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    match first {
        "-h" | "--help" | "help" => Ok(Command::Help(HelpTopic::Root)),
        "tables" => parse_tables(it),
        "schema" => parse_schema(it),
        "find" => parse_find(it),
        "cache" => parse_cache(it),
        _ => anyhow::bail!("unknown command: {first}"),
    }
}

/// Consume a global option if `token` is one. Returns `Ok(false)` when it is not.
fn global_option<'a>(
    token: &'a str,
    it: &mut impl Iterator<Item = &'a str>,
    global: &mut GlobalArgs,
) -> anyhow::Result<bool> {
    match token {
        "--config" => {
            let Some(v) = it.next() else {
                anyhow::bail!("--config requires a value");
            };
            global.config = PathBuf::from(v);
        }
        _ if token.starts_with("--config=") => {
            global.config = PathBuf::from(token.trim_start_matches("--config="));
        }
        "--database" => {
            let Some(v) = it.next() else {
                anyhow::bail!("--database requires a value");
            };
            global.database = Some(v.to_string());
        }
        _ if token.starts_with("--database=") => {
            global.database = Some(token.trim_start_matches("--database=").to_string());
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn value<'a>(flag: &str, it: &mut impl Iterator<Item = &'a str>) -> anyhow::Result<&'a str> {
    it.next()
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

fn number(flag: &str, raw: &str) -> anyhow::Result<u64> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("{flag} expects a non-negative integer, got {raw}"))
}

fn parse_tables<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut global = GlobalArgs::default();
    while let Some(token) = it.next() {
        if token == "-h" || token == "--help" {
            return Ok(Command::Help(HelpTopic::Root));
        }
        if !global_option(token, &mut it, &mut global)? {
            anyhow::bail!("unexpected argument: {token}");
        }
    }
    Ok(Command::Tables(global))
}

fn parse_schema<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut global = GlobalArgs::default();
    let mut table = None;
    let mut json = false;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Schema)),
            "--json" => json = true,
            _ if global_option(token, &mut it, &mut global)? => {}
            _ if token.starts_with('-') => anyhow::bail!("unknown option: {token}"),
            _ if table.is_none() => table = Some(token.to_string()),
            _ => anyhow::bail!("unexpected argument: {token}"),
        }
    }

    let Some(table) = table else {
        anyhow::bail!("schema requires a table name");
    };
    Ok(Command::Schema(SchemaArgs {
        global,
        table,
        json,
    }))
}

fn parse_find<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut global = GlobalArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut where_clause = None;
    let mut joins = Vec::new();
    let mut order = None;
    let mut limit = None;
    let mut offset = None;
    let mut json = false;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Find)),
            "--json" => json = true,
            "--where" => where_clause = Some(value(token, &mut it)?.to_string()),
            "--join" => joins.push(value(token, &mut it)?.to_string()),
            "--order" => order = Some(value(token, &mut it)?.to_string()),
            "--limit" => limit = Some(number(token, value(token, &mut it)?)?),
            "--offset" => offset = Some(number(token, value(token, &mut it)?)?),
            _ if global_option(token, &mut it, &mut global)? => {}
            _ if token.starts_with("--") => anyhow::bail!("unknown option: {token}"),
            _ => positional.push(token.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let Some(table) = positional.next() else {
        anyhow::bail!("find requires a table name");
    };
    let key = positional.next();
    if let Some(extra) = positional.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }

    Ok(Command::Find(FindArgs {
        global,
        table,
        key,
        where_clause,
        joins,
        order,
        limit,
        offset,
        json,
    }))
}

fn parse_cache<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut global = GlobalArgs::default();
    let mut subcmd = None;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Cache)),
            "clear" if subcmd.is_none() => subcmd = Some(token),
            _ if global_option(token, &mut it, &mut global)? => {}
            _ => anyhow::bail!("unexpected argument: {token}"),
        }
    }

    match subcmd {
        Some("clear") => Ok(Command::CacheClear(global)),
        _ => Ok(Command::Help(HelpTopic::Cache)),
    }
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => {
            println!(
                "\
pgrecord - inspect and query a PostgreSQL database through pgrecord

USAGE:
  pgrecord <COMMAND> [OPTIONS]

COMMANDS:
  tables        List user tables
  schema        Show a table's columns, primary key and relationships
  find          Find rows of a table
  cache         Manage the on-disk schema cache

GLOBAL OPTIONS:
  --config <FILE>       Config file path (default: pgrecord.toml)
  --database <URL>      Override database.url from config
  -h, --help            Print help

Run `pgrecord <command> --help` for more."
            );
        }
        HelpTopic::Schema => {
            println!(
                "\
USAGE:
  pgrecord schema <TABLE> [OPTIONS]

OPTIONS:
  --json                Print the discovered schema as JSON"
            );
        }
        HelpTopic::Find => {
            println!(
                "\
USAGE:
  pgrecord find <TABLE> [KEY] [OPTIONS]

KEY:
  5                     Value of a single-column primary key
  book_id=7,tag=scifi   Every column of a compound primary key

OPTIONS:
  --where <SQL>         Raw WHERE condition
  --join <NAME>         Join a relationship by name (repeatable)
  --order <SQL>         Raw ORDER BY list
  --limit <N>           LIMIT
  --offset <N>          OFFSET
  --json                Print rows as JSON"
            );
        }
        HelpTopic::Cache => {
            println!(
                "\
USAGE:
  pgrecord cache clear [OPTIONS]

Deletes every cached schema snapshot in schema_cache.dir."
            );
        }
    }
}
