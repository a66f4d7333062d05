//! On-disk persistence of discovered table schemas.
//!
//! One JSON file per table, written atomically (temp file + rename). Files carry a
//! format version; a snapshot with an unknown version is treated as a miss.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::TableSchema;
use crate::error::{OrmError, OrmResult};

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCacheConfig {
    /// Whether discovered schemas are read from and written to `cache_dir`.
    pub enabled: bool,
    /// Directory holding the cache files. Must already exist when `enabled`.
    pub cache_dir: PathBuf,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        let cache_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".pgrecord");

        Self {
            enabled: false,
            cache_dir,
        }
    }
}

impl SchemaCacheConfig {
    /// An enabled cache rooted at `dir`.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            cache_dir: dir.into(),
        }
    }
}

/// A persisted snapshot of one table's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSchema {
    pub version: u32,
    pub retrieved_at: DateTime<Utc>,
    pub table: String,
    pub schema: TableSchema,
}

/// Key/value byte store over a cache directory.
#[derive(Debug, Clone)]
pub struct SchemaCacheStore {
    dir: PathBuf,
}

impl SchemaCacheStore {
    /// Open a store over an existing directory.
    pub fn open(dir: impl Into<PathBuf>) -> OrmResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(OrmError::CacheDirectoryMissing(dir));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a table: characters outside `[A-Za-z0-9_]` are hex-escaped.
    pub fn key_for(table: &str) -> String {
        let mut key = String::with_capacity(table.len() + 5);
        for ch in table.chars() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                key.push(ch);
            } else {
                let mut buf = [0u8; 4];
                for b in ch.encode_utf8(&mut buf).bytes() {
                    key.push_str(&format!("-{b:02x}"));
                }
            }
        }
        key.push_str(".json");
        key
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub fn load(&self, key: &str) -> OrmResult<Vec<u8>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OrmError::FileNotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, key: &str, data: &[u8]) -> OrmResult<()> {
        if !self.dir.is_dir() {
            return Err(OrmError::CacheDirectoryMissing(self.dir.clone()));
        }
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Load a table snapshot; `Ok(None)` when no usable snapshot exists.
    pub fn load_schema(&self, table: &str) -> OrmResult<Option<TableSchema>> {
        let key = Self::key_for(table);
        if !self.exists(&key) {
            return Ok(None);
        }
        let data = self.load(&key)?;
        let cached: CachedSchema = serde_json::from_slice(&data)
            .map_err(|e| OrmError::Serialization(format!("Failed to parse schema cache: {e}")))?;
        if cached.version != CACHE_VERSION || cached.table != table {
            return Ok(None);
        }
        Ok(Some(cached.schema))
    }

    pub fn save_schema(&self, schema: &TableSchema) -> OrmResult<()> {
        let snapshot = CachedSchema {
            version: CACHE_VERSION,
            retrieved_at: Utc::now(),
            table: schema.table.clone(),
            schema: schema.clone(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| OrmError::Serialization(format!("Failed to serialize schema cache: {e}")))?;
        self.save(&Self::key_for(&schema.table), &data)
    }

    /// Remove every cache file in the directory. Returns how many were deleted.
    pub fn clear(&self) -> OrmResult<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
