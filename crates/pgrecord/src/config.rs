use std::path::PathBuf;
use std::time::Duration;

use crate::schema_cache::SchemaCacheConfig;

/// Configuration for a [`Database`](crate::Database).
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    /// Upper bound for every statement the database context runs.
    pub query_timeout: Option<Duration>,
    /// On-disk schema snapshot settings.
    pub schema_cache: SchemaCacheConfig,
}

impl DatabaseConfig {
    /// Create a new configuration with defaults: no timeout, schema cache off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Enable the on-disk schema cache in `dir`. The directory must exist.
    pub fn schema_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_cache = SchemaCacheConfig::at(dir);
        self
    }

    /// Replace the schema cache settings.
    pub fn schema_cache(mut self, schema_cache: SchemaCacheConfig) -> Self {
        self.schema_cache = schema_cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = DatabaseConfig::new()
            .query_timeout(Duration::from_millis(250))
            .schema_cache_dir("/tmp/pgrecord");
        assert_eq!(config.query_timeout, Some(Duration::from_millis(250)));
        assert!(config.schema_cache.enabled);
        assert_eq!(config.schema_cache.cache_dir, PathBuf::from("/tmp/pgrecord"));
    }

    #[test]
    fn defaults_are_off() {
        let config = DatabaseConfig::default();
        assert!(config.query_timeout.is_none());
        assert!(!config.schema_cache.enabled);
    }
}
