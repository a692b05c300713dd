//! # VM Inventory Core
//!
//! Backend-agnostic logic for the VMware VM inventory source: data models,
//! property flattening, filter-spec construction, the inventory model, the
//! cache snapshot codec, and the populator that ties them together.
//!
//! This crate performs no network or filesystem I/O. The vSphere clients
//! live in the `vmware-vm-inventory` package and plug in through the
//! [`backend::VimApi`] and [`backend::AutomationApi`] traits;
//! [`backend::memory::InMemoryBackend`] implements both for tests.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Typed VM schema, object references, filter spec |
//! | [`property`] | Property flattener and dotted-path getter |
//! | [`backend`] | Backend traits, backend errors, in-memory backend |
//! | [`filter`] | Filter-spec builder and unresolved-name policy |
//! | [`inventory`] | Groups, hosts and host variables |
//! | [`snapshot`] | Cacheable snapshot of one run |
//! | [`populate`] | Cache decision and live enumeration |
//! | [`error`] | Run-level error taxonomy |

pub mod backend;
pub mod error;
pub mod filter;
pub mod inventory;
pub mod models;
pub mod populate;
pub mod property;
pub mod snapshot;

pub use error::InventoryError;
