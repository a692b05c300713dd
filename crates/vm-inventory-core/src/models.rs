//! Core data models shared by the backends and the populator.
//!
//! [`VirtualMachine`] is the typed view of the slice of the vSphere
//! `VirtualMachine` schema the inventory needs. Anything requested outside
//! that slice travels in [`VirtualMachine::other`] as a dynamic
//! [`PropertyValue`] tree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::property::PropertyValue;

/// Inventory object categories that can constrain VM enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Datacenter,
    Cluster,
    Folder,
    HostSystem,
    ResourcePool,
}

impl ObjectKind {
    /// All filter categories, in the order they are resolved.
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Datacenter,
        ObjectKind::Cluster,
        ObjectKind::Folder,
        ObjectKind::HostSystem,
        ObjectKind::ResourcePool,
    ];

    /// Human-readable label used in diagnostics ("Unable to find cluster X").
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Datacenter => "datacenter",
            ObjectKind::Cluster => "cluster",
            ObjectKind::Folder => "folder",
            ObjectKind::HostSystem => "esxi hostsystem",
            ObjectKind::ResourcePool => "resource pool",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A named inventory object returned by a by-name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Managed object id (e.g. `"datacenter-3"`, `"domain-c8"`).
    pub id: String,
    pub name: String,
}

/// Object-reference constraints for VM enumeration.
///
/// One dedicated set per category. An empty set leaves that dimension
/// unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    pub datacenters: BTreeSet<String>,
    pub clusters: BTreeSet<String>,
    pub folders: BTreeSet<String>,
    pub hosts: BTreeSet<String>,
    pub resource_pools: BTreeSet<String>,
}

impl FilterSpec {
    pub fn dimension(&self, kind: ObjectKind) -> &BTreeSet<String> {
        match kind {
            ObjectKind::Datacenter => &self.datacenters,
            ObjectKind::Cluster => &self.clusters,
            ObjectKind::Folder => &self.folders,
            ObjectKind::HostSystem => &self.hosts,
            ObjectKind::ResourcePool => &self.resource_pools,
        }
    }

    pub(crate) fn dimension_mut(&mut self, kind: ObjectKind) -> &mut BTreeSet<String> {
        match kind {
            ObjectKind::Datacenter => &mut self.datacenters,
            ObjectKind::Cluster => &mut self.clusters,
            ObjectKind::Folder => &mut self.folders,
            ObjectKind::HostSystem => &mut self.hosts,
            ObjectKind::ResourcePool => &mut self.resource_pools,
        }
    }

    /// True when no dimension constrains the enumeration.
    pub fn is_unconstrained(&self) -> bool {
        ObjectKind::ALL.iter().all(|k| self.dimension(*k).is_empty())
    }
}

/// A VM as listed by the automation API, before its properties are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VmRef {
    /// Managed object id (e.g. `"vm-42"`).
    #[serde(rename = "vm")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// An operator-defined tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// Definition of a custom attribute, used to name `customValue` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDef {
    pub key: i32,
    pub name: String,
}

/// A custom attribute value attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldValue {
    pub key: i32,
    pub value: String,
}

/// Typed VM record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualMachine {
    /// Managed object id.
    pub moid: String,
    /// Display name.
    pub name: String,
    /// `None` for orphaned VMs whose configuration cannot be read.
    pub config: Option<VmConfig>,
    pub guest: GuestInfo,
    pub runtime: VmRuntime,
    pub custom_value: Vec<CustomFieldValue>,
    /// Requested properties without a typed field, keyed by dotted path.
    pub other: BTreeMap<String, PropertyValue>,
}

impl VirtualMachine {
    /// Inventory host key: `<name>_<config.uuid>`.
    ///
    /// VMware allows duplicate display names, so the BIOS uuid is appended.
    pub fn host_key(&self) -> Option<String> {
        self.config
            .as_ref()
            .map(|c| format!("{}_{}", self.name, c.uuid))
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.guest.ip_address.as_deref().filter(|ip| !ip.is_empty())
    }

    pub fn power_state(&self) -> &str {
        &self.runtime.power_state
    }

    /// Configured guest OS identifier (`config.guestId`).
    pub fn guest_id(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.guest_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmConfig {
    /// BIOS uuid.
    pub uuid: String,
    pub instance_uuid: Option<String>,
    pub guest_id: Option<String>,
    pub guest_full_name: Option<String>,
    pub name: Option<String>,
    pub template: Option<bool>,
    pub cpu_hot_add_enabled: Option<bool>,
    pub cpu_hot_remove_enabled: Option<bool>,
    pub hardware: VmHardware,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmHardware {
    pub num_cpu: Option<i64>,
    pub memory_mb: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestInfo {
    pub host_name: Option<String>,
    pub ip_address: Option<String>,
    pub guest_id: Option<String>,
    pub guest_full_name: Option<String>,
    pub guest_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmRuntime {
    /// `poweredOn`, `poweredOff` or `suspended`.
    pub power_state: String,
    pub max_memory_usage: Option<i64>,
}
