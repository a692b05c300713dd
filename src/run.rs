//! One inventory run, end to end.
//!
//! ```text
//! load config ─▶ initialize session ─▶ read cache ─▶ populate ─▶ write cache
//! ```
//!
//! The session is opened before the cache is consulted, so a cache hit
//! still validates credentials. `--refresh-cache` skips the read but keeps
//! the write.

use anyhow::{Context, Result};
use std::path::Path;

use vm_inventory_core::backend::{AutomationApi, VimApi};
use vm_inventory_core::inventory::Inventory;
use vm_inventory_core::populate::{CacheDecision, PopulateOptions, PopulateOutcome, Populator};

use crate::cache::{cache_key, fingerprint, InventoryCache};
use crate::config::PluginConfig;
use crate::session::{self, Capabilities};

/// Populate an inventory from `config`, using and refreshing its cache.
pub fn run(config: &PluginConfig, source_path: &Path, refresh_cache: bool) -> Result<Inventory> {
    let conn = config.connection();
    let options = config.populate_options();
    let settings = config.cache_settings();

    let session = session::initialize(&conn, &Capabilities::detect())?;

    let mut cache = settings.enabled.then(|| {
        InventoryCache::from_settings(
            &settings,
            cache_key(&config.plugin, &source_path.to_string_lossy()),
            fingerprint(&conn.hostname, conn.port, &options),
        )
    });

    let (inventory, outcome) = populate_inventory(
        session.vim(),
        session.automation(),
        &options,
        cache.as_mut(),
        refresh_cache,
    )?;

    tracing::info!(
        hosts = outcome.snapshot.meta.hostvars.len(),
        groups = outcome.snapshot.groups.len(),
        from_cache = outcome.from_cache,
        "inventory ready"
    );
    Ok(inventory)
}

/// Cache decision, population and cache write against the given APIs.
///
/// A failed cache write is logged; the inventory is still returned.
pub fn populate_inventory(
    vim: &dyn VimApi,
    automation: &dyn AutomationApi,
    options: &PopulateOptions,
    mut cache: Option<&mut InventoryCache>,
    refresh_cache: bool,
) -> Result<(Inventory, PopulateOutcome)> {
    let cached = match cache.as_deref() {
        Some(cache) if !refresh_cache => cache.load(),
        _ => None,
    };
    let decision = CacheDecision::decide(cache.is_some(), cached);

    let mut inventory = Inventory::new();
    let outcome = Populator::new(vim, automation, options)
        .populate(decision, &mut inventory)
        .context("Failed to populate inventory")?;

    if outcome.write_cache {
        if let Some(cache) = cache.as_deref_mut() {
            if let Err(e) = cache.store(&outcome.snapshot) {
                tracing::warn!(key = %cache.key(), "failed to update inventory cache: {:#}", e);
            }
        }
    }

    Ok((inventory, outcome))
}
