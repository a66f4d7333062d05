use std::path::{Path, PathBuf};
use std::time::Duration;

use pgrecord::{DatabaseConfig, SchemaCacheConfig};
use serde::Deserialize;

use crate::cli::GlobalArgs;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub schema_cache: SchemaCacheSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    pub query_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaCacheSection {
    #[serde(default)]
    pub enabled: bool,
    pub dir: Option<String>,
}

impl Default for SchemaCacheSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: Some(".pgrecord".to_string()),
        }
    }
}

impl ConfigFile {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut file: ConfigFile = toml::from_str(raw)?;
        file.expand_env()?;
        file.validate()?;
        Ok(file)
    }

    fn expand_env(&mut self) -> anyhow::Result<()> {
        self.database.url = expand_env_vars(&self.database.url)?;
        if let Some(dir) = self.schema_cache.dir.as_mut() {
            *dir = expand_env_vars(dir)?;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("database.url must not be empty");
        }
        if self.database.query_timeout_ms == Some(0) {
            anyhow::bail!("database.query_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

/// Everything a command needs to reach the database.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub database: DatabaseConfig,
}

impl Settings {
    /// Resolve settings from the config file (when present), the environment and the
    /// command line. `--database` wins over `database.url`.
    pub fn resolve(global: &GlobalArgs) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        if !global.config.exists() {
            let Some(database_url) = global.database.clone() else {
                anyhow::bail!(
                    "failed to load config {}; provide --database or create the file",
                    global.config.display()
                );
            };
            return Ok(Self {
                database_url,
                database: DatabaseConfig::new(),
            });
        }

        let raw = std::fs::read_to_string(&global.config).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file {}: {e}",
                global.config.display()
            )
        })?;
        let file = ConfigFile::parse(&raw).map_err(|e| {
            anyhow::anyhow!(
                "failed to parse config file {}: {e}",
                global.config.display()
            )
        })?;

        let config_dir = global
            .config
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Ok(Self::from_file(file, &config_dir, global.database.clone()))
    }

    fn from_file(file: ConfigFile, config_dir: &Path, database_override: Option<String>) -> Self {
        let mut database = DatabaseConfig::new();
        if let Some(ms) = file.database.query_timeout_ms {
            database = database.query_timeout(Duration::from_millis(ms));
        }
        let dir = file
            .schema_cache
            .dir
            .as_deref()
            .map(|d| resolve_path(config_dir, d))
            .unwrap_or_else(|| config_dir.join(".pgrecord"));
        database = database.schema_cache(SchemaCacheConfig {
            enabled: file.schema_cache.enabled,
            cache_dir: dir,
        });

        Self {
            database_url: database_override.unwrap_or(file.database.url),
            database,
        }
    }
}

fn resolve_path(base: &Path, p: &str) -> PathBuf {
    let p = Path::new(p);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn expand_env_vars(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                anyhow::bail!("unterminated env var reference: ${{{key}}}");
            }
            if key.is_empty() {
                anyhow::bail!("invalid env var reference: ${{}}");
            }

            let v = std::env::var(&key)
                .map_err(|_| anyhow::anyhow!("missing env var for config expansion: {key}"))?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}
