//! Cacheable snapshot of one run.
//!
//! A snapshot is the flat mapping the cache stores:
//!
//! ```json
//! {
//!   "poweredOn": { "hosts": ["web1_u1"] },
//!   "otherLinux64Guest": { "hosts": ["web1_u1"] },
//!   "_meta": { "hostvars": { "web1_u1": { "ansible_host": "10.0.0.5" } } }
//! }
//! ```
//!
//! It is built incrementally during live enumeration and replayed into an
//! [`Inventory`] on a cache hit. Replay trusts the stored structure and
//! does not consult the backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::inventory::{Inventory, ALL_GROUP};

/// Reserved key holding host variables.
pub const META_KEY: &str = "_meta";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_meta", default)]
    pub meta: SnapshotMeta,
    #[serde(flatten)]
    pub groups: BTreeMap<String, GroupMembers>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default)]
    pub hostvars: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMembers {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `group` if absent. Returns `true` when it was created.
    pub fn ensure_group(&mut self, group: &str) -> bool {
        if self.groups.contains_key(group) {
            return false;
        }
        self.groups.insert(group.to_string(), GroupMembers::default());
        true
    }

    /// Append `host` to `group`, creating the group if needed.
    pub fn push_host(&mut self, group: &str, host: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .hosts
            .push(host.to_string());
    }

    pub fn hosts_in(&self, group: &str) -> &[String] {
        self.groups
            .get(group)
            .map(|g| g.hosts.as_slice())
            .unwrap_or(&[])
    }

    /// Host keys listed in a group but missing from `_meta.hostvars`.
    pub fn dangling_hosts(&self) -> Vec<&str> {
        let mut dangling: Vec<&str> = self
            .groups
            .values()
            .flat_map(|g| g.hosts.iter())
            .filter(|h| !self.meta.hostvars.contains_key(h.as_str()))
            .map(String::as_str)
            .collect();
        dangling.sort_unstable();
        dangling.dedup();
        dangling
    }

    /// Replay the snapshot into `inventory`.
    ///
    /// Every group except `all` is registered, its hosts are added with
    /// their stored variables, and the group is linked under `all`.
    pub fn replay(&self, inventory: &mut Inventory) {
        for (name, members) in &self.groups {
            if name == ALL_GROUP || name == META_KEY {
                continue;
            }
            inventory.add_group(name);
            for host in &members.hosts {
                inventory.add_host(host, Some(name));
                if let Some(vars) = self.meta.hostvars.get(host) {
                    for (key, value) in vars {
                        inventory.set_variable(host, key, value.clone());
                    }
                }
            }
            inventory.add_child(ALL_GROUP, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        serde_json::from_value(json!({
            "poweredOn": { "hosts": ["web1_u1"] },
            "otherLinux64Guest": { "hosts": ["web1_u1"] },
            "prod": { "hosts": [] },
            "_meta": { "hostvars": { "web1_u1": { "ansible_host": "10.0.0.5", "name": "web1" } } }
        }))
        .unwrap()
    }

    #[test]
    fn test_meta_is_not_a_group() {
        let snap = sample();
        assert_eq!(snap.groups.len(), 3);
        assert!(!snap.groups.contains_key(META_KEY));
        assert_eq!(snap.meta.hostvars.len(), 1);
    }

    #[test]
    fn test_serialized_shape_is_flat() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["poweredOn"], json!({ "hosts": ["web1_u1"] }));
        assert_eq!(
            value["_meta"]["hostvars"]["web1_u1"]["ansible_host"],
            json!("10.0.0.5")
        );
    }

    #[test]
    fn test_replay_registers_groups_hosts_vars() {
        let mut inv = Inventory::new();
        sample().replay(&mut inv);

        assert_eq!(inv.group("poweredOn").unwrap().hosts, vec!["web1_u1"]);
        assert!(inv.group("prod").unwrap().hosts.is_empty());
        assert_eq!(
            inv.get_host("web1_u1").unwrap().vars["ansible_host"],
            json!("10.0.0.5")
        );
        let root = inv.group(ALL_GROUP).unwrap();
        assert!(root.children.contains(&"prod".to_string()));
        assert!(root.children.contains(&"poweredOn".to_string()));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let snap = sample();
        let mut first = Inventory::new();
        snap.replay(&mut first);
        let mut second = Inventory::new();
        snap.replay(&mut second);
        assert_eq!(first, second);

        // Replaying onto an already populated inventory changes nothing.
        snap.replay(&mut first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_replay_skips_all_group() {
        let mut snap = sample();
        snap.push_host(ALL_GROUP, "web1_u1");
        let mut inv = Inventory::new();
        snap.replay(&mut inv);
        assert!(inv.group(ALL_GROUP).unwrap().hosts.is_empty());
    }

    #[test]
    fn test_dangling_hosts() {
        let mut snap = sample();
        assert!(snap.dangling_hosts().is_empty());
        snap.push_host("poweredOff", "web2_u2");
        snap.push_host("windows9Server64Guest", "web2_u2");
        assert_eq!(snap.dangling_hosts(), vec!["web2_u2"]);
    }
}
