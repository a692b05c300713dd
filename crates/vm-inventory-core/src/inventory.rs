//! In-memory inventory model.
//!
//! Groups hold host names and child groups; hosts hold a JSON variable map.
//! Every group linked under [`ALL_GROUP`] is reachable from the root. The
//! model renders to the dynamic-inventory JSON layout consumed by the
//! automation host:
//!
//! ```json
//! {
//!   "_meta": { "hostvars": { "web1_u1": { "ansible_host": "10.0.0.5" } } },
//!   "all": { "children": ["poweredOn", "ungrouped"] },
//!   "poweredOn": { "hosts": ["web1_u1"] }
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// Name of the universal root group.
pub const ALL_GROUP: &str = "all";

/// Pseudo-group for hosts that belong to no other group.
pub const UNGROUPED_GROUP: &str = "ungrouped";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub name: String,
    /// Member hosts, in insertion order, without duplicates.
    pub hosts: Vec<String>,
    /// Child groups, in insertion order, without duplicates.
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Host {
    pub name: String,
    pub vars: Map<String, Value>,
    /// Groups this host was added to (excluding `all`).
    pub groups: Vec<String>,
}

/// Groups, hosts and host variables produced by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    groups: BTreeMap<String, Group>,
    hosts: BTreeMap<String, Host>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// An empty inventory containing only the `all` group.
    pub fn new() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            ALL_GROUP.to_string(),
            Group {
                name: ALL_GROUP.to_string(),
                ..Default::default()
            },
        );
        Self {
            groups,
            hosts: BTreeMap::new(),
        }
    }

    /// Register a group. Returns `false` if it already existed.
    pub fn add_group(&mut self, name: &str) -> bool {
        if self.groups.contains_key(name) {
            return false;
        }
        self.groups.insert(
            name.to_string(),
            Group {
                name: name.to_string(),
                ..Default::default()
            },
        );
        true
    }

    /// Register a host, optionally as a member of `group`.
    pub fn add_host(&mut self, name: &str, group: Option<&str>) {
        self.hosts.entry(name.to_string()).or_insert_with(|| Host {
            name: name.to_string(),
            ..Default::default()
        });
        if let Some(group) = group {
            self.add_child(group, name);
        }
    }

    /// Link `child` under group `parent`.
    ///
    /// `child` is treated as a group if one with that name exists, and as a
    /// host otherwise (the host is registered if needed). A missing
    /// `parent` group is created.
    pub fn add_child(&mut self, parent: &str, child: &str) {
        self.add_group(parent);

        if self.groups.contains_key(child) {
            if let Some(group) = self.groups.get_mut(parent) {
                push_unique(&mut group.children, child);
            }
            return;
        }

        let host = self.hosts.entry(child.to_string()).or_insert_with(|| Host {
            name: child.to_string(),
            ..Default::default()
        });
        if parent != ALL_GROUP {
            push_unique(&mut host.groups, parent);
        }
        if let Some(group) = self.groups.get_mut(parent) {
            push_unique(&mut group.hosts, child);
        }
    }

    /// Set one host variable, registering the host if needed.
    pub fn set_variable(&mut self, host: &str, key: &str, value: Value) {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Host {
                name: host.to_string(),
                ..Default::default()
            })
            .vars
            .insert(key.to_string(), value);
    }

    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Variables of `host`, or an empty map for unknown hosts.
    pub fn host_vars(&self, host: &str) -> Map<String, Value> {
        self.hosts
            .get(host)
            .map(|h| h.vars.clone())
            .unwrap_or_default()
    }

    /// Render the dynamic-inventory JSON document.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();

        let hostvars: Map<String, Value> = self
            .hosts
            .values()
            .map(|h| (h.name.clone(), Value::Object(h.vars.clone())))
            .collect();
        out.insert("_meta".to_string(), json!({ "hostvars": hostvars }));

        let ungrouped: Vec<&str> = self
            .hosts
            .values()
            .filter(|h| h.groups.is_empty())
            .map(|h| h.name.as_str())
            .collect();

        for group in self.groups.values() {
            let mut entry = Map::new();
            let mut children = group.children.clone();
            if group.name == ALL_GROUP && !ungrouped.is_empty() {
                push_unique(&mut children, UNGROUPED_GROUP);
            }
            if !group.hosts.is_empty() {
                entry.insert("hosts".to_string(), json!(group.hosts));
            }
            if !children.is_empty() {
                entry.insert("children".to_string(), json!(children));
            }
            out.insert(group.name.clone(), Value::Object(entry));
        }

        if !ungrouped.is_empty() && !self.groups.contains_key(UNGROUPED_GROUP) {
            out.insert(UNGROUPED_GROUP.to_string(), json!({ "hosts": ungrouped }));
        }

        Value::Object(out)
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_only_all() {
        let inv = Inventory::new();
        assert_eq!(inv.groups().count(), 1);
        assert!(inv.group(ALL_GROUP).is_some());
    }

    #[test]
    fn test_add_group_idempotent() {
        let mut inv = Inventory::new();
        assert!(inv.add_group("poweredOn"));
        assert!(!inv.add_group("poweredOn"));
    }

    #[test]
    fn test_add_child_host_and_group() {
        let mut inv = Inventory::new();
        inv.add_host("web1_u1", None);
        inv.add_group("prod");
        inv.add_child("prod", "web1_u1");
        inv.add_child("prod", "web1_u1");
        inv.add_child(ALL_GROUP, "prod");

        assert_eq!(inv.group("prod").unwrap().hosts, vec!["web1_u1"]);
        assert_eq!(inv.group(ALL_GROUP).unwrap().children, vec!["prod"]);
        assert_eq!(inv.get_host("web1_u1").unwrap().groups, vec!["prod"]);
    }

    #[test]
    fn test_set_variable_and_host_vars() {
        let mut inv = Inventory::new();
        inv.add_host("web1_u1", None);
        inv.set_variable("web1_u1", "ansible_host", json!("10.0.0.5"));
        assert_eq!(inv.host_vars("web1_u1")["ansible_host"], json!("10.0.0.5"));
        assert!(inv.host_vars("unknown").is_empty());
    }

    #[test]
    fn test_to_json_layout() {
        let mut inv = Inventory::new();
        inv.add_group("poweredOn");
        inv.add_child(ALL_GROUP, "poweredOn");
        inv.add_host("web1_u1", Some("poweredOn"));
        inv.add_host("lonely_u9", None);
        inv.set_variable("web1_u1", "ansible_host", json!("10.0.0.5"));

        let out = inv.to_json();
        assert_eq!(out["poweredOn"]["hosts"], json!(["web1_u1"]));
        assert_eq!(out["all"]["children"], json!(["poweredOn", "ungrouped"]));
        assert_eq!(out["ungrouped"]["hosts"], json!(["lonely_u9"]));
        assert_eq!(
            out["_meta"]["hostvars"]["web1_u1"]["ansible_host"],
            json!("10.0.0.5")
        );
        assert_eq!(out["_meta"]["hostvars"]["lonely_u9"], json!({}));
    }
}
