//! # VMware VM Inventory
//!
//! Dynamic inventory source that presents the virtual machines of a
//! VMware vCenter or ESXi server as Ansible groups and host variables.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ plugin YAML  │──▶│   Session    │──▶│     Populator      │──▶ JSON (stdout)
//! │ + VMWARE_*   │   │ vim25 + REST │   │ (vm-inventory-core)│
//! └──────────────┘   └──────────────┘   └─────────┬──────────┘
//!                                                 │
//!                                           ┌─────▼─────┐
//!                                           │   Cache   │
//!                                           └───────────┘
//! ```
//!
//! Grouping, property flattening and the cache snapshot format live in the
//! `vm-inventory-core` crate; this crate adds the network clients,
//! configuration, cache storage and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Plugin file parsing, environment fallbacks |
//! | [`session`] | Requirement checks, TLS policy, login, scoped logout |
//! | [`vim`] | vim25 SOAP client |
//! | [`rest`] | vSphere Automation REST client |
//! | [`cache`] | Cache backends and the versioned snapshot envelope |
//! | [`run`] | One run end to end |
//! | [`logging`] | stderr tracing subscriber |

pub mod cache;
pub mod config;
pub mod logging;
pub mod rest;
pub mod run;
pub mod session;
pub mod vim;
