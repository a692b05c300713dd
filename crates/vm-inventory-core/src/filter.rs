//! Filter-spec construction.
//!
//! Configuration names datacenters, clusters, folders, ESXi host systems
//! and resource pools. Each name is resolved to a managed object id with an
//! exact-name lookup; the first match goes into that category's own field
//! of [`FilterSpec`]. Names without a match are handled by the
//! [`NoObjectFailure`] policy, identically for all five categories.

use serde::{Deserialize, Serialize};

use crate::backend::AutomationApi;
use crate::error::InventoryError;
use crate::models::{FilterSpec, ObjectKind};

/// What to do when a filter name matches nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoObjectFailure {
    /// Ignore the name.
    #[default]
    Silent,
    /// Log a warning and continue.
    Warn,
    /// Abort the run.
    Error,
}

/// Filter names as configured, one list per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterNames {
    pub datacenters: Vec<String>,
    pub clusters: Vec<String>,
    pub folders: Vec<String>,
    pub esxi_hostsystems: Vec<String>,
    pub resource_pools: Vec<String>,
}

impl FilterNames {
    pub fn names(&self, kind: ObjectKind) -> &[String] {
        match kind {
            ObjectKind::Datacenter => &self.datacenters,
            ObjectKind::Cluster => &self.clusters,
            ObjectKind::Folder => &self.folders,
            ObjectKind::HostSystem => &self.esxi_hostsystems,
            ObjectKind::ResourcePool => &self.resource_pools,
        }
    }

    pub fn is_empty(&self) -> bool {
        ObjectKind::ALL.iter().all(|k| self.names(*k).is_empty())
    }
}

/// Resolve configured names into a [`FilterSpec`].
///
/// # Errors
///
/// - [`InventoryError::UnresolvedFilter`] for the first unmatched name when
///   `policy` is [`NoObjectFailure::Error`].
/// - [`InventoryError::Backend`] when a lookup call fails.
pub fn build_filter_spec(
    api: &dyn AutomationApi,
    names: &FilterNames,
    policy: NoObjectFailure,
) -> Result<FilterSpec, InventoryError> {
    let mut spec = FilterSpec::default();

    for kind in ObjectKind::ALL {
        for name in names.names(kind) {
            let found = api.find_objects(kind, name)?;
            match found.into_iter().next() {
                Some(object) => {
                    tracing::debug!(kind = %kind, name = %name, id = %object.id, "resolved filter");
                    spec.dimension_mut(kind).insert(object.id);
                }
                None => handle_unresolved(policy, kind, name)?,
            }
        }
    }

    Ok(spec)
}

/// Apply the unresolved-name policy to one miss.
pub fn handle_unresolved(
    policy: NoObjectFailure,
    kind: ObjectKind,
    name: &str,
) -> Result<(), InventoryError> {
    match policy {
        NoObjectFailure::Silent => Ok(()),
        NoObjectFailure::Warn => {
            tracing::warn!("Unable to find {} {}", kind, name);
            Ok(())
        }
        NoObjectFailure::Error => Err(InventoryError::UnresolvedFilter {
            kind,
            name: name.to_string(),
        }),
    }
}
