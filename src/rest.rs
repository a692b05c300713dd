//! vSphere Automation REST client.
//!
//! Implements [`AutomationApi`] over the `/api` endpoints:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | login | `POST /api/session` (basic auth) → token sent as `vmware-api-session-id` |
//! | by-name lookup | `GET /api/vcenter/{datacenter,cluster,folder,host,resource-pool}?names=` |
//! | VM listing | `GET /api/vcenter/vm` with repeated filter parameters |
//! | tags | `GET /api/cis/tagging/tag`, `GET /api/cis/tagging/tag/{id}` |
//! | attached tags | `POST /api/cis/tagging/tag-association?action=list-attached-tags` |
//! | logout | `DELETE /api/session` |
//!
//! HTTP status codes map onto [`BackendError`] variants; the human-readable
//! message of a vAPI error body is kept when present.

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use vm_inventory_core::backend::{AutomationApi, BackendError};
use vm_inventory_core::models::{FilterSpec, ObjectKind, ObjectRef, Tag, VmRef};

use crate::session::ConnectionContext;

/// Header carrying the REST session token.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Logged-in REST session.
pub struct RestClient {
    http: Client,
    base: String,
    token: String,
}

/// Collection path and id field of a lookup kind.
pub fn lookup_endpoint(kind: ObjectKind) -> (&'static str, &'static str) {
    match kind {
        ObjectKind::Datacenter => ("vcenter/datacenter", "datacenter"),
        ObjectKind::Cluster => ("vcenter/cluster", "cluster"),
        ObjectKind::Folder => ("vcenter/folder", "folder"),
        ObjectKind::HostSystem => ("vcenter/host", "host"),
        ObjectKind::ResourcePool => ("vcenter/resource-pool", "resource_pool"),
    }
}

/// Object references from a lookup reply. Entries without an id are dropped.
pub fn object_refs(kind: ObjectKind, summaries: &[Value]) -> Vec<ObjectRef> {
    let (_, id_field) = lookup_endpoint(kind);
    summaries
        .iter()
        .filter_map(|s| {
            Some(ObjectRef {
                id: s.get(id_field)?.as_str()?.to_string(),
                name: s
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

/// Query parameters for `GET /api/vcenter/vm`. Empty dimensions are left out.
pub fn vm_list_query(filter: &FilterSpec) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    for kind in ObjectKind::ALL {
        let param = match kind {
            ObjectKind::Datacenter => "datacenters",
            ObjectKind::Cluster => "clusters",
            ObjectKind::Folder => "folders",
            ObjectKind::HostSystem => "hosts",
            ObjectKind::ResourcePool => "resource_pools",
        };
        query.extend(filter.dimension(kind).iter().map(|id| (param, id.clone())));
    }
    query
}

pub fn attached_tags_body(vm_moid: &str) -> Value {
    json!({ "object_id": { "type": "VirtualMachine", "id": vm_moid } })
}

/// `default_message` of the first vAPI error message, if the body has one.
pub fn vapi_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("messages")?
        .as_array()?
        .iter()
        .find_map(|m| m.get("default_message").and_then(Value::as_str))
        .map(str::to_string)
}

/// Classify a non-success HTTP status.
pub fn status_error(status: u16, body: &str) -> BackendError {
    let message = vapi_message(body).unwrap_or_else(|| body.chars().take(500).collect());
    match status {
        400 => BackendError::InvalidRequest(message),
        401 => BackendError::InvalidLogin(message),
        403 => BackendError::NoPermission(message),
        404 => BackendError::NotFound(message),
        _ => BackendError::Http {
            status,
            body: message,
        },
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

fn send(request: RequestBuilder) -> Result<Response, BackendError> {
    let resp = request.send().map_err(transport)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(status_error(status.as_u16(), &body))
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    resp.json()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

impl RestClient {
    /// Open a session. `Ok(None)` when the server returned an empty token.
    pub fn login(http: Client, ctx: &ConnectionContext) -> Result<Option<Self>, BackendError> {
        let base = format!("https://{}:{}/api", ctx.hostname, ctx.port);
        let resp = send(
            http.post(format!("{}/session", base))
                .basic_auth(&ctx.username, Some(&ctx.password)),
        )?;
        let token: String = decode(resp)?;
        if token.is_empty() {
            return Ok(None);
        }
        tracing::debug!(url = %base, "REST session established");
        Ok(Some(Self { http, base, token }))
    }

    pub fn logout(&self) -> Result<(), BackendError> {
        send(
            self.http
                .delete(format!("{}/session", self.base))
                .header(SESSION_HEADER, &self.token),
        )?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        let request = self
            .http
            .get(format!("{}/{}", self.base, path))
            .header(SESSION_HEADER, &self.token)
            .query(query);
        decode(send(request)?)
    }

    fn require_tagging(&self) -> Result<(), BackendError> {
        if cfg!(feature = "tagging") {
            Ok(())
        } else {
            Err(BackendError::Unsupported(
                "tagging support was not compiled in".to_string(),
            ))
        }
    }
}

impl AutomationApi for RestClient {
    fn find_objects(&self, kind: ObjectKind, name: &str) -> Result<Vec<ObjectRef>, BackendError> {
        let (path, _) = lookup_endpoint(kind);
        let summaries: Vec<Value> = self.get(path, &[("names", name.to_string())])?;
        Ok(object_refs(kind, &summaries))
    }

    fn list_vms(&self, filter: &FilterSpec) -> Result<Vec<VmRef>, BackendError> {
        self.get("vcenter/vm", &vm_list_query(filter))
    }

    fn list_tags(&self) -> Result<Vec<String>, BackendError> {
        self.require_tagging()?;
        self.get("cis/tagging/tag", &[])
    }

    fn get_tag(&self, id: &str) -> Result<Tag, BackendError> {
        self.require_tagging()?;
        self.get(&format!("cis/tagging/tag/{}", id), &[])
    }

    fn list_attached_tags(&self, vm_moid: &str) -> Result<Vec<String>, BackendError> {
        self.require_tagging()?;
        let request = self
            .http
            .post(format!("{}/cis/tagging/tag-association", self.base))
            .header(SESSION_HEADER, &self.token)
            .query(&[("action", "list-attached-tags")])
            .json(&attached_tags_body(vm_moid));
        decode(send(request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(401, ""), BackendError::InvalidLogin(_)));
        assert!(matches!(status_error(403, ""), BackendError::NoPermission(_)));
        assert!(matches!(status_error(400, ""), BackendError::InvalidRequest(_)));
        assert!(matches!(status_error(404, ""), BackendError::NotFound(_)));
        assert_eq!(
            status_error(503, "busy"),
            BackendError::Http {
                status: 503,
                body: "busy".to_string()
            }
        );
    }

    #[test]
    fn test_vapi_message_extracted() {
        let body = r#"{"error_type":"UNAUTHENTICATED","messages":[{"args":[],"default_message":"Authentication required.","id":"com.vmware.vapi.endpoint.method.authentication.required"}]}"#;
        assert_eq!(
            status_error(401, body),
            BackendError::InvalidLogin("Authentication required.".to_string())
        );
        assert_eq!(vapi_message("not json"), None);
    }

    #[test]
    fn test_object_refs_use_kind_id_field() {
        let summaries = vec![
            json!({ "resource_pool": "resgroup-9", "name": "gold" }),
            json!({ "name": "no id" }),
        ];
        let refs = object_refs(ObjectKind::ResourcePool, &summaries);
        assert_eq!(
            refs,
            vec![ObjectRef {
                id: "resgroup-9".to_string(),
                name: "gold".to_string()
            }]
        );

        let hosts = vec![json!({ "host": "host-20", "name": "esx01.lab", "connection_state": "CONNECTED" })];
        assert_eq!(object_refs(ObjectKind::HostSystem, &hosts)[0].id, "host-20");
    }

    #[test]
    fn test_vm_list_query_repeats_params() {
        let mut filter = FilterSpec::default();
        filter.clusters.insert("domain-c8".to_string());
        filter.clusters.insert("domain-c9".to_string());
        filter.resource_pools.insert("resgroup-9".to_string());

        let query = vm_list_query(&filter);
        assert_eq!(
            query,
            vec![
                ("clusters", "domain-c8".to_string()),
                ("clusters", "domain-c9".to_string()),
                ("resource_pools", "resgroup-9".to_string()),
            ]
        );
        assert!(vm_list_query(&FilterSpec::default()).is_empty());
    }

    #[test]
    fn test_vm_summary_decodes() {
        let listing: Vec<VmRef> = serde_json::from_value(json!([
            { "vm": "vm-42", "name": "web1", "power_state": "POWERED_ON", "cpu_count": 2 }
        ]))
        .unwrap();
        assert_eq!(listing[0].id, "vm-42");
        assert_eq!(listing[0].name, "web1");
    }

    #[test]
    fn test_attached_tags_body() {
        assert_eq!(
            attached_tags_body("vm-42"),
            json!({ "object_id": { "type": "VirtualMachine", "id": "vm-42" } })
        );
    }
}
