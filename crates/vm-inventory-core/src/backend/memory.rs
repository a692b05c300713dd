//! In-memory backend for tests and offline runs.
//!
//! Holds VMs, lookup objects, tags and custom fields in plain collections
//! and implements both [`VimApi`] and [`AutomationApi`] against them. VM
//! listing honours [`FilterSpec`] through each VM's [`Placement`]. Call
//! counters let tests assert which backend calls a run made.

use std::cell::Cell;
use std::collections::HashMap;

use crate::models::{
    CustomFieldDef, FilterSpec, ObjectKind, ObjectRef, Tag, VirtualMachine, VmRef,
};

use super::{AutomationApi, BackendError, VimApi};

/// Where a VM sits in the inventory tree, by managed object id.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub datacenter: Option<String>,
    pub cluster: Option<String>,
    pub folder: Option<String>,
    pub host: Option<String>,
    pub resource_pool: Option<String>,
}

impl Placement {
    fn id(&self, kind: ObjectKind) -> Option<&str> {
        match kind {
            ObjectKind::Datacenter => self.datacenter.as_deref(),
            ObjectKind::Cluster => self.cluster.as_deref(),
            ObjectKind::Folder => self.folder.as_deref(),
            ObjectKind::HostSystem => self.host.as_deref(),
            ObjectKind::ResourcePool => self.resource_pool.as_deref(),
        }
    }

    fn matches(&self, filter: &FilterSpec) -> bool {
        ObjectKind::ALL.iter().all(|kind| {
            let wanted = filter.dimension(*kind);
            wanted.is_empty() || self.id(*kind).is_some_and(|id| wanted.contains(id))
        })
    }
}

struct StoredVm {
    vm: VirtualMachine,
    placement: Placement,
}

/// In-memory vSphere stand-in.
#[derive(Default)]
pub struct InMemoryBackend {
    objects: Vec<(ObjectKind, ObjectRef)>,
    vms: HashMap<String, StoredVm>,
    listing: Vec<String>,
    tags: Vec<Tag>,
    attachments: HashMap<String, Vec<String>>,
    custom_fields: Vec<CustomFieldDef>,
    listing_failure: Option<BackendError>,
    find_calls: Cell<usize>,
    list_vm_calls: Cell<usize>,
    retrieve_calls: Cell<usize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named lookup object (datacenter, cluster, ...).
    pub fn with_object(mut self, kind: ObjectKind, id: &str, name: &str) -> Self {
        self.objects.push((
            kind,
            ObjectRef {
                id: id.to_string(),
                name: name.to_string(),
            },
        ));
        self
    }

    /// Add a VM with no placement. It matches only unconstrained listings.
    pub fn with_vm(self, vm: VirtualMachine) -> Self {
        self.with_vm_at(vm, Placement::default())
    }

    pub fn with_vm_at(mut self, vm: VirtualMachine, placement: Placement) -> Self {
        self.listing.push(vm.moid.clone());
        self.vms.insert(vm.moid.clone(), StoredVm { vm, placement });
        self
    }

    /// List an already added VM one more time, as a paging overlap would.
    pub fn with_repeated_listing(mut self, moid: &str) -> Self {
        self.listing.push(moid.to_string());
        self
    }

    pub fn with_tag(mut self, id: &str, name: &str) -> Self {
        self.tags.push(Tag {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_attached_tag(mut self, vm_moid: &str, tag_id: &str) -> Self {
        self.attachments
            .entry(vm_moid.to_string())
            .or_default()
            .push(tag_id.to_string());
        self
    }

    pub fn with_custom_field(mut self, key: i32, name: &str) -> Self {
        self.custom_fields.push(CustomFieldDef {
            key,
            name: name.to_string(),
        });
        self
    }

    /// Make every VM listing fail with `error`.
    pub fn with_listing_failure(mut self, error: BackendError) -> Self {
        self.listing_failure = Some(error);
        self
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.get()
    }

    pub fn list_vm_calls(&self) -> usize {
        self.list_vm_calls.get()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.get()
    }
}

impl VimApi for InMemoryBackend {
    fn retrieve_vm(
        &self,
        vm: &VmRef,
        extra_properties: &[String],
    ) -> Result<VirtualMachine, BackendError> {
        self.retrieve_calls.set(self.retrieve_calls.get() + 1);
        let stored = self
            .vms
            .get(&vm.id)
            .ok_or_else(|| BackendError::NotFound(vm.id.clone()))?;
        // Only requested extras come back, as from a real property collector.
        let mut record = stored.vm.clone();
        record.other.retain(|path, _| extra_properties.contains(path));
        Ok(record)
    }

    fn custom_field_defs(&self) -> Result<Vec<CustomFieldDef>, BackendError> {
        Ok(self.custom_fields.clone())
    }
}

impl AutomationApi for InMemoryBackend {
    fn find_objects(&self, kind: ObjectKind, name: &str) -> Result<Vec<ObjectRef>, BackendError> {
        self.find_calls.set(self.find_calls.get() + 1);
        Ok(self
            .objects
            .iter()
            .filter(|(k, obj)| *k == kind && obj.name == name)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn list_vms(&self, filter: &FilterSpec) -> Result<Vec<VmRef>, BackendError> {
        self.list_vm_calls.set(self.list_vm_calls.get() + 1);
        if let Some(err) = &self.listing_failure {
            return Err(err.clone());
        }
        Ok(self
            .listing
            .iter()
            .filter_map(|moid| self.vms.get(moid))
            .filter(|stored| stored.placement.matches(filter))
            .map(|stored| VmRef {
                id: stored.vm.moid.clone(),
                name: stored.vm.name.clone(),
            })
            .collect())
    }

    fn list_tags(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.tags.iter().map(|t| t.id.clone()).collect())
    }

    fn get_tag(&self, id: &str) -> Result<Tag, BackendError> {
        self.tags
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn list_attached_tags(&self, vm_moid: &str) -> Result<Vec<String>, BackendError> {
        Ok(self.attachments.get(vm_moid).cloned().unwrap_or_default())
    }
}
