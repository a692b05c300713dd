//! Run-level error taxonomy.
//!
//! Every variant except [`InventoryError::UnresolvedFilter`] aborts the run
//! unconditionally. Unresolved filter names only surface as errors when the
//! `no_object_failure` policy is `error`. Connection-time variants carry the
//! endpoint and username so operators can tell which login failed.

use thiserror::Error;

use crate::backend::BackendError;
use crate::models::ObjectKind;

#[derive(Debug, Error)]
pub enum InventoryError {
    /// A client component required for this run is not compiled in.
    #[error("missing dependency: {component} is required for the VMware VM inventory source. {hint}")]
    MissingDependency { component: String, hint: String },

    #[error("missing one of the following: hostname, username, password. Please read the documentation for more information")]
    MissingRequired,

    #[error("'{component}' version should be >= {required}, found: {found}")]
    UnsupportedVersion {
        component: String,
        required: String,
        found: String,
    },

    #[error("failed to parse '{component}' version: {found}")]
    VersionParse { component: String, found: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unable to log on to vCenter or ESXi API at {endpoint} as {username}: {message}")]
    InvalidLogin {
        endpoint: String,
        username: String,
        message: String,
    },

    #[error("user {username} does not have required permission to log on to vCenter or ESXi API at {endpoint}: {message}")]
    NoPermission {
        endpoint: String,
        username: String,
        message: String,
    },

    #[error("failed to get a response from server {endpoint} as request is malformed (user {username}): {message}")]
    MalformedRequest {
        endpoint: String,
        username: String,
        message: String,
    },

    #[error("unable to connect to vCenter or ESXi API at {endpoint} (user {username}): {message}")]
    Connectivity {
        endpoint: String,
        username: String,
        message: String,
    },

    #[error("unknown error while connecting to vCenter or ESXi API at {endpoint} (user {username}): {message}")]
    UnknownBackend {
        endpoint: String,
        username: String,
        message: String,
    },

    #[error("failed to login to {endpoint} using {username}: no session was returned")]
    NullSession { endpoint: String, username: String },

    #[error("Unable to find {kind} {name}")]
    UnresolvedFilter { kind: ObjectKind, name: String },

    /// Backend failure during enumeration. Never recovered locally.
    #[error("vSphere API request failed: {0}")]
    Backend(#[from] BackendError),
}
