//! Plugin configuration.
//!
//! The inventory source is configured by a YAML file whose name ends with
//! one of [`VALID_SUFFIXES`]. Connection options left out of the file fall
//! back to environment variables:
//!
//! | Option | Environment |
//! |--------|-------------|
//! | `hostname` | `VMWARE_HOST`, `VMWARE_SERVER` |
//! | `username` | `VMWARE_USER`, `VMWARE_USERNAME` |
//! | `password` | `VMWARE_PASSWORD` |
//! | `port` | `VMWARE_PORT` |
//! | `validate_certs` | `VMWARE_VALIDATE_CERTS` |
//!
//! Missing credentials are not a parse error; they surface as
//! `MissingRequired` when the session is initialized.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vm_inventory_core::filter::{FilterNames, NoObjectFailure};
use vm_inventory_core::populate::{default_properties, PopulateOptions};

use crate::cache::{CachePlugin, CacheSettings};
use crate::session::ConnectionContext;

/// Accepted values of the `plugin` key.
pub const PLUGIN_NAMES: [&str; 2] = [
    "vmware_vm_inventory",
    "community.vmware.vmware_vm_inventory",
];

/// File name endings recognised as plugin configuration.
pub const VALID_SUFFIXES: [&str; 4] = [
    "vmware.yaml",
    "vmware.yml",
    "vmware_vm_inventory.yaml",
    "vmware_vm_inventory.yml",
];

#[derive(Debug, Deserialize, Clone)]
pub struct PluginConfig {
    pub plugin: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub validate_certs: Option<bool>,
    #[serde(default)]
    pub with_tags: bool,
    #[serde(default = "default_properties")]
    pub properties: Vec<String>,
    #[serde(default)]
    pub datacenters: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub esxi_hostsystems: Vec<String>,
    #[serde(default)]
    pub resource_pools: Vec<String>,
    #[serde(default)]
    pub no_object_failure: NoObjectFailure,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub cache_plugin: CachePlugin,
    #[serde(default)]
    pub cache_connection: Option<PathBuf>,
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout: u64,
}

fn default_port() -> u16 {
    443
}
fn default_cache_timeout() -> u64 {
    3600
}

fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("vmware-vm-inventory"),
        None => std::env::temp_dir().join("vmware-vm-inventory"),
    }
}

impl PluginConfig {
    /// Fill connection options the file left out from `lookup`.
    ///
    /// Values present in the file always win.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|v| !v.is_empty())
        };

        if self.hostname.is_none() {
            self.hostname = first(&["VMWARE_HOST", "VMWARE_SERVER"]);
        }
        if self.username.is_none() {
            self.username = first(&["VMWARE_USER", "VMWARE_USERNAME"]);
        }
        if self.password.is_none() {
            self.password = first(&["VMWARE_PASSWORD"]);
        }
        if self.port.is_none() {
            if let Some(raw) = first(&["VMWARE_PORT"]) {
                let port = raw
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("VMWARE_PORT is not a valid port: '{}'", raw))?;
                self.port = Some(port);
            }
        }
        if self.validate_certs.is_none() {
            if let Some(raw) = first(&["VMWARE_VALIDATE_CERTS"]) {
                self.validate_certs = Some(parse_bool(&raw).with_context(|| {
                    format!("VMWARE_VALIDATE_CERTS is not a boolean: '{}'", raw)
                })?);
            }
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(default_port)
    }

    pub fn connection(&self) -> ConnectionContext {
        ConnectionContext {
            hostname: self.hostname.clone().unwrap_or_default(),
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            port: self.port(),
            validate_certs: self.validate_certs.unwrap_or(true),
            with_tags: self.with_tags,
        }
    }

    pub fn filter_names(&self) -> FilterNames {
        FilterNames {
            datacenters: self.datacenters.clone(),
            clusters: self.clusters.clone(),
            folders: self.folders.clone(),
            esxi_hostsystems: self.esxi_hostsystems.clone(),
            resource_pools: self.resource_pools.clone(),
        }
    }

    pub fn populate_options(&self) -> PopulateOptions {
        PopulateOptions {
            with_tags: self.with_tags,
            properties: self.properties.clone(),
            filters: self.filter_names(),
            no_object_failure: self.no_object_failure,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.cache,
            plugin: self.cache_plugin,
            connection: self
                .cache_connection
                .clone()
                .unwrap_or_else(default_cache_dir),
            timeout: match self.cache_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Some(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// Whether `path` names an existing plugin configuration file.
pub fn verify_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| VALID_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)));
    name_ok && path.is_file()
}

/// Read and validate a plugin file, then apply environment fallbacks.
pub fn load_config(path: &Path) -> Result<PluginConfig> {
    if !verify_file(path) {
        anyhow::bail!(
            "{} is not a VMware VM inventory source: the file must exist and its name must end with one of {}",
            path.display(),
            VALID_SUFFIXES.join(", ")
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: PluginConfig =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    config.apply_env(|name| std::env::var(name).ok())?;

    Ok(config)
}

fn validate(config: &PluginConfig) -> Result<()> {
    if !PLUGIN_NAMES.contains(&config.plugin.as_str()) {
        anyhow::bail!(
            "Unknown plugin: '{}'. Must be one of: {}",
            config.plugin,
            PLUGIN_NAMES.join(", ")
        );
    }

    if config.port == Some(0) {
        anyhow::bail!("port must be > 0");
    }

    if let Some(empty) = config.properties.iter().find(|p| p.trim().is_empty()) {
        anyhow::bail!("properties must not contain empty paths (got '{}')", empty);
    }

    Ok(())
}
