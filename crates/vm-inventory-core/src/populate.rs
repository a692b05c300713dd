//! Inventory population.
//!
//! A run moves through three states:
//!
//! ```text
//! AwaitingCacheDecision ──(cache on, snapshot found)──▶ ReplayingCache ──▶ Done
//!          │
//!          └──(otherwise)──▶ LiveEnumerating ──▶ Done
//! ```
//!
//! [`CacheDecision::decide`] takes the first transition; [`Populator::populate`]
//! runs the chosen branch and reports whether the caller must write the
//! resulting [`Snapshot`] back to the cache.
//!
//! # Live enumeration
//!
//! 1. Build the [`FilterSpec`](crate::models::FilterSpec) and list matching VMs.
//! 2. With tags enabled, load every tag once and pre-create one group per
//!    tag name.
//! 3. Resolve each VM; orphans (no `config`) are skipped.
//! 4. Process each host key at most once: `ansible_host`, requested
//!    properties, tag groups, power-state group, guest-id group.
//! 5. Copy each processed host's variables into `_meta.hostvars`.
//!
//! Backend failures abort the run. Only unreadable properties and
//! policy-gated filter misses are absorbed.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::backend::{AutomationApi, VimApi};
use crate::error::InventoryError;
use crate::filter::{build_filter_spec, FilterNames, NoObjectFailure};
use crate::inventory::{Inventory, ALL_GROUP};
use crate::models::VirtualMachine;
use crate::property::{get_object_prop, is_known_property, CUSTOM_VALUE};
use crate::snapshot::Snapshot;

/// Host variable carrying the connection address.
pub const ANSIBLE_HOST_VAR: &str = "ansible_host";

/// Properties extracted when the configuration does not list any.
pub fn default_properties() -> Vec<String> {
    [
        "name",
        "config.cpuHotAddEnabled",
        "config.cpuHotRemoveEnabled",
        "config.instanceUuid",
        "config.hardware.numCPU",
        "config.template",
        "config.name",
        "guest.hostName",
        "guest.ipAddress",
        "guest.guestId",
        "guest.guestState",
        "runtime.maxMemoryUsage",
        CUSTOM_VALUE,
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

/// Per-run options for live enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateOptions {
    pub with_tags: bool,
    pub properties: Vec<String>,
    pub filters: FilterNames,
    pub no_object_failure: NoObjectFailure,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            with_tags: false,
            properties: default_properties(),
            filters: FilterNames::default(),
            no_object_failure: NoObjectFailure::Silent,
        }
    }
}

/// Outcome of the `AwaitingCacheDecision` state.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheDecision {
    /// Replay a snapshot found in the cache.
    Replay(Snapshot),
    /// Enumerate the backend; `update_cache` asks for the result to be stored.
    Live { update_cache: bool },
}

impl CacheDecision {
    pub fn decide(cache_enabled: bool, cached: Option<Snapshot>) -> Self {
        match (cache_enabled, cached) {
            (true, Some(snapshot)) => CacheDecision::Replay(snapshot),
            (true, None) => CacheDecision::Live { update_cache: true },
            (false, _) => CacheDecision::Live {
                update_cache: false,
            },
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateOutcome {
    pub snapshot: Snapshot,
    /// The caller should store `snapshot` in the cache.
    pub write_cache: bool,
    /// The inventory came from a cached snapshot.
    pub from_cache: bool,
}

/// Drives one run against a pair of backend clients.
pub struct Populator<'a> {
    vim: &'a dyn VimApi,
    automation: &'a dyn AutomationApi,
    options: &'a PopulateOptions,
}

impl<'a> Populator<'a> {
    pub fn new(
        vim: &'a dyn VimApi,
        automation: &'a dyn AutomationApi,
        options: &'a PopulateOptions,
    ) -> Self {
        Self {
            vim,
            automation,
            options,
        }
    }

    /// Run the branch selected by `decision`, mutating `inventory`.
    pub fn populate(
        &self,
        decision: CacheDecision,
        inventory: &mut Inventory,
    ) -> Result<PopulateOutcome, InventoryError> {
        match decision {
            CacheDecision::Replay(snapshot) => {
                tracing::info!(groups = snapshot.groups.len(), "replaying cached inventory");
                snapshot.replay(inventory);
                Ok(PopulateOutcome {
                    snapshot,
                    write_cache: false,
                    from_cache: true,
                })
            }
            CacheDecision::Live { update_cache } => {
                let snapshot = self.populate_from_source(inventory)?;
                Ok(PopulateOutcome {
                    snapshot,
                    write_cache: update_cache,
                    from_cache: false,
                })
            }
        }
    }

    /// Enumerate the backend and build a fresh snapshot.
    pub fn populate_from_source(
        &self,
        inventory: &mut Inventory,
    ) -> Result<Snapshot, InventoryError> {
        let filter = build_filter_spec(
            self.automation,
            &self.options.filters,
            self.options.no_object_failure,
        )?;
        let vm_refs = self.automation.list_vms(&filter)?;
        tracing::info!(count = vm_refs.len(), "listed virtual machines");

        let mut snapshot = Snapshot::new();

        let tag_names = if self.options.with_tags {
            self.load_tag_groups(&mut snapshot, inventory)?
        } else {
            HashMap::new()
        };

        let custom_fields: HashMap<i32, String> =
            if self.options.properties.iter().any(|p| p == CUSTOM_VALUE) {
                self.vim
                    .custom_field_defs()?
                    .into_iter()
                    .map(|def| (def.key, def.name))
                    .collect()
            } else {
                HashMap::new()
            };

        let extra_properties: Vec<String> = self
            .options
            .properties
            .iter()
            .filter(|p| !is_known_property(p))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        let mut processed = Vec::new();

        for vm_ref in &vm_refs {
            let vm = self.vim.retrieve_vm(vm_ref, &extra_properties)?;

            let Some(host) = vm.host_key() else {
                tracing::debug!(vm = %vm_ref.id, "skipping VM without configuration");
                continue;
            };
            if !seen.insert(host.clone()) {
                tracing::debug!(host = %host, "host already processed");
                continue;
            }

            inventory.add_host(&host, None);

            if let Some(ip) = vm.ip_address() {
                inventory.set_variable(&host, ANSIBLE_HOST_VAR, Value::String(ip.to_string()));
            }

            self.populate_host_properties(&vm, &host, &custom_fields, inventory);

            if self.options.with_tags {
                for tag_id in self.automation.list_attached_tags(&vm.moid)? {
                    match tag_names.get(&tag_id) {
                        Some(tag_name) => {
                            inventory.add_child(tag_name, &host);
                            snapshot.push_host(tag_name, &host);
                        }
                        None => {
                            tracing::debug!(
                                host = %host,
                                tag = %tag_id,
                                "attached tag not in tag list"
                            )
                        }
                    }
                }
            }

            let power_state = vm.power_state();
            if !power_state.is_empty() {
                add_membership(power_state, &host, &mut snapshot, inventory);
            }

            if let Some(guest_id) = vm.guest_id() {
                add_membership(guest_id, &host, &mut snapshot, inventory);
            }

            processed.push(host);
        }

        for host in processed {
            let vars = inventory.host_vars(&host);
            snapshot.meta.hostvars.insert(host, vars);
        }

        Ok(snapshot)
    }

    /// Load every tag, pre-create its group, and return the id → name map.
    fn load_tag_groups(
        &self,
        snapshot: &mut Snapshot,
        inventory: &mut Inventory,
    ) -> Result<HashMap<String, String>, InventoryError> {
        let mut names = HashMap::new();
        for tag_id in self.automation.list_tags()? {
            let tag = self.automation.get_tag(&tag_id)?;
            if snapshot.ensure_group(&tag.name) {
                inventory.add_group(&tag.name);
                inventory.add_child(ALL_GROUP, &tag.name);
            }
            names.insert(tag.id, tag.name);
        }
        tracing::debug!(tags = names.len(), "loaded tags");
        Ok(names)
    }

    fn populate_host_properties(
        &self,
        vm: &VirtualMachine,
        host: &str,
        custom_fields: &HashMap<i32, String>,
        inventory: &mut Inventory,
    ) {
        for property in &self.options.properties {
            if property == CUSTOM_VALUE {
                for custom in &vm.custom_value {
                    match custom_fields.get(&custom.key) {
                        Some(field_name) => inventory.set_variable(
                            host,
                            field_name,
                            Value::String(custom.value.clone()),
                        ),
                        None => tracing::warn!(
                            host = %host,
                            "custom attribute key {} has no field definition; skipping",
                            custom.key
                        ),
                    }
                }
            } else {
                inventory.set_variable(host, property, get_object_prop(vm, property));
            }
        }
    }
}

fn add_membership(group: &str, host: &str, snapshot: &mut Snapshot, inventory: &mut Inventory) {
    if snapshot.ensure_group(group) {
        inventory.add_group(group);
        inventory.add_child(ALL_GROUP, group);
    }
    snapshot.push_host(group, host);
    inventory.add_child(group, host);
}
