//! Inventory cache.
//!
//! A successful live run can store its [`Snapshot`] so later runs replay it
//! instead of querying vCenter. Two backends implement [`CacheBackend`]:
//!
//! | `cache_plugin` | Backend | Lifetime |
//! |----------------|---------|----------|
//! | `jsonfile` | [`JsonFileCache`] | one JSON file per key under `cache_connection`, expires after `cache_timeout` |
//! | `memory` | [`MemoryCache`] | current process only |
//!
//! Snapshots are wrapped in a [`CacheEntry`] carrying a schema version and
//! a fingerprint of the options that shaped the snapshot. An entry written
//! by another schema or another configuration is a miss, as is any entry
//! that fails to decode.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vm_inventory_core::filter::FilterNames;
use vm_inventory_core::populate::PopulateOptions;
use vm_inventory_core::snapshot::Snapshot;

/// Version of the [`CacheEntry`] layout.
pub const SCHEMA_VERSION: u32 = 1;

const CACHE_KEY_PREFIX: &str = "vmware_vm_inventory";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePlugin {
    #[default]
    Jsonfile,
    Memory,
}

/// Resolved cache options.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub plugin: CachePlugin,
    pub connection: PathBuf,
    /// `None` means entries never expire.
    pub timeout: Option<Duration>,
}

/// Key/value store for cached inventories.
pub trait CacheBackend {
    /// Stored value for `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&mut self, key: &str, value: &Value) -> Result<()>;
}

/// One JSON file per key.
pub struct JsonFileCache {
    dir: PathBuf,
    timeout: Option<Duration>,
}

impl JsonFileCache {
    pub fn new(dir: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn is_expired(&self, path: &Path) -> Result<bool> {
        let Some(timeout) = self.timeout else {
            return Ok(false);
        };
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat cache file: {}", path.display()))?;
        // A modification time in the future counts as fresh.
        let age = modified.elapsed().unwrap_or_default();
        Ok(age > timeout)
    }
}

impl CacheBackend for JsonFileCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        if self.is_expired(&path)? {
            tracing::debug!(path = %path.display(), "cache entry expired");
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;
        Ok(Some(value))
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_string(value)?;
        fs::write(&tmp, body)
            .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cache file: {}", path.display()))?;
        Ok(())
    }
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, Value>,
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &Value) -> Result<()> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Stored form of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub fingerprint: String,
    pub written_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

/// Cache key for a plugin file: stable per plugin name and file path.
pub fn cache_key(plugin_name: &str, source_path: &str) -> String {
    let plugin_digest = hex_sha256(plugin_name.as_bytes());
    let path_digest = hex_sha256(source_path.as_bytes());
    format!(
        "{}_{}s_{}",
        CACHE_KEY_PREFIX,
        &plugin_digest[..5],
        &path_digest[..5]
    )
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    hostname: &'a str,
    port: u16,
    properties: &'a [String],
    with_tags: bool,
    filters: &'a FilterNames,
}

/// Digest of everything that changes the shape of a snapshot.
pub fn fingerprint(hostname: &str, port: u16, options: &PopulateOptions) -> String {
    let input = FingerprintInput {
        hostname,
        port,
        properties: &options.properties,
        with_tags: options.with_tags,
        filters: &options.filters,
    };
    // Serializing plain strings and lists into a Vec cannot fail.
    let encoded = serde_json::to_vec(&input).unwrap_or_default();
    hex_sha256(&encoded)
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Versioned snapshot store bound to one key and fingerprint.
pub struct InventoryCache {
    backend: Box<dyn CacheBackend>,
    key: String,
    fingerprint: String,
}

impl InventoryCache {
    pub fn new(backend: Box<dyn CacheBackend>, key: String, fingerprint: String) -> Self {
        Self {
            backend,
            key,
            fingerprint,
        }
    }

    /// Backend selected by `settings.plugin`.
    pub fn from_settings(settings: &CacheSettings, key: String, fingerprint: String) -> Self {
        let backend: Box<dyn CacheBackend> = match settings.plugin {
            CachePlugin::Jsonfile => Box::new(JsonFileCache::new(
                settings.connection.clone(),
                settings.timeout,
            )),
            CachePlugin::Memory => Box::new(MemoryCache::default()),
        };
        Self::new(backend, key, fingerprint)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached snapshot, if a compatible one exists.
    ///
    /// Read failures and undecodable entries are logged and reported as a
    /// miss so a broken cache never blocks a live run.
    pub fn load(&self) -> Option<Snapshot> {
        let value = match self.backend.get(&self.key) {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!(key = %self.key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %self.key, "ignoring unreadable cache entry: {:#}", e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %self.key, "ignoring corrupt cache entry: {}", e);
                return None;
            }
        };

        if entry.schema_version != SCHEMA_VERSION {
            tracing::info!(
                key = %self.key,
                found = entry.schema_version,
                expected = SCHEMA_VERSION,
                "cache entry has another schema version"
            );
            return None;
        }
        if entry.fingerprint != self.fingerprint {
            tracing::info!(key = %self.key, "cache entry was written for other options");
            return None;
        }

        tracing::debug!(key = %self.key, written_at = %entry.written_at, "cache hit");
        Some(entry.snapshot)
    }

    pub fn store(&mut self, snapshot: &Snapshot) -> Result<()> {
        let entry = CacheEntry {
            schema_version: SCHEMA_VERSION,
            fingerprint: self.fingerprint.clone(),
            written_at: Utc::now(),
            snapshot: snapshot.clone(),
        };
        let value = serde_json::to_value(&entry).context("Failed to encode cache entry")?;
        self.backend.set(&self.key, &value)?;
        tracing::debug!(key = %self.key, "cache updated");
        Ok(())
    }
}
