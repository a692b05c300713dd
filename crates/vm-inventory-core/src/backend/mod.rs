//! Backend abstraction for the two vSphere API surfaces.
//!
//! vSphere exposes VM objects through two distinct APIs, modelled here as
//! two traits:
//!
//! | Trait | API surface | Used for |
//! |-------|-------------|----------|
//! | [`VimApi`] | vim25 SOAP (`/sdk`) | resolving full VM objects, custom field definitions |
//! | [`AutomationApi`] | vSphere Automation REST (`/api`) | by-name object lookup, VM listing, tags |
//!
//! All calls block until the backend answers. Implementations must map
//! transport and protocol failures onto [`BackendError`] so the session
//! adapter and populator can classify them.

pub mod memory;

use thiserror::Error;

use crate::models::{CustomFieldDef, FilterSpec, ObjectKind, ObjectRef, Tag, VirtualMachine, VmRef};

/// Failure reported by a backend client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("invalid login: {0}")]
    InvalidLogin(String),

    #[error("permission denied: {0}")]
    NoPermission(String),

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    /// The requested property path does not exist on the object type.
    #[error("invalid property: {0}")]
    InvalidProperty(String),

    #[error("object not found: {0}")]
    NotFound(String),

    /// Network or TLS failure before a response was received.
    #[error("connection failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Any other server-side fault, identified by its fault type.
    #[error("{kind}: {message}")]
    Fault { kind: String, message: String },

    /// The response could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The operation needs a client component that was not compiled in.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// The vim25 object API: resolves VM references into typed records.
pub trait VimApi {
    /// Retrieve the typed properties of one VM.
    ///
    /// `extra_properties` lists requested dotted paths outside the typed
    /// schema; the implementation stores whatever it can read of them in
    /// [`VirtualMachine::other`] and leaves out the rest.
    ///
    /// Returns a record whose `config` is `None` for orphaned VMs.
    fn retrieve_vm(
        &self,
        vm: &VmRef,
        extra_properties: &[String],
    ) -> Result<VirtualMachine, BackendError>;

    /// Custom attribute definitions (`CustomFieldsManager.field`).
    fn custom_field_defs(&self) -> Result<Vec<CustomFieldDef>, BackendError>;
}

/// The automation API: lookups, VM listing, and tagging.
pub trait AutomationApi {
    /// Objects of `kind` whose name is exactly `name`.
    fn find_objects(&self, kind: ObjectKind, name: &str) -> Result<Vec<ObjectRef>, BackendError>;

    /// VMs matching every non-empty dimension of `filter`.
    fn list_vms(&self, filter: &FilterSpec) -> Result<Vec<VmRef>, BackendError>;

    /// Ids of every tag defined on the server.
    fn list_tags(&self) -> Result<Vec<String>, BackendError>;

    fn get_tag(&self, id: &str) -> Result<Tag, BackendError>;

    /// Tag ids attached to the VM with managed object id `vm_moid`.
    fn list_attached_tags(&self, vm_moid: &str) -> Result<Vec<String>, BackendError>;
}
