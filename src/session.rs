//! vCenter/ESXi session setup.
//!
//! [`initialize`] validates requirements before any network traffic, builds
//! one HTTP client with the configured TLS policy, then logs in to the
//! vim25 SOAP API and the Automation REST API with the same credentials.
//! Login failures are classified into [`InventoryError`] variants that name
//! the endpoint and user.
//!
//! The returned [`Session`] logs out of both APIs when dropped, on every
//! exit path. Logout failures are logged at `debug` and never surfaced.

use reqwest::blocking::Client;
use std::time::Duration;

use vm_inventory_core::backend::{AutomationApi, BackendError, VimApi};
use vm_inventory_core::InventoryError;

use crate::rest::RestClient;
use crate::vim::VimClient;

/// HTTP client component and the version this build links.
///
/// The version mirrors the `reqwest` requirement in `Cargo.toml`, so the
/// gate in [`check_requirements`] always passes for [`Capabilities::detect`].
/// It only rejects capabilities supplied by an embedding caller.
pub const HTTP_CLIENT: &str = "reqwest";
pub const HTTP_CLIENT_VERSION: &str = "0.12";
/// Oldest supported HTTP client `(major, minor)`.
pub const MIN_HTTP_CLIENT_VERSION: (u32, u32) = (0, 12);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Resolved connection options.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionContext {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub validate_certs: bool,
    pub with_tags: bool,
}

impl ConnectionContext {
    /// `hostname:port`, as shown in diagnostics.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Client components available to this build.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// Version string of the HTTP client, `None` when absent.
    pub http_client: Option<String>,
    /// vim25 enumeration client.
    pub enumeration: bool,
    /// Automation tagging client.
    pub tagging: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            http_client: Some(HTTP_CLIENT_VERSION.to_string()),
            enumeration: true,
            tagging: cfg!(feature = "tagging"),
        }
    }
}

/// Parse the leading `major.minor` of a version string.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check components, client version, and required options.
pub fn check_requirements(
    ctx: &ConnectionContext,
    caps: &Capabilities,
) -> Result<(), InventoryError> {
    let Some(version) = caps.http_client.as_deref() else {
        return Err(InventoryError::MissingDependency {
            component: HTTP_CLIENT.to_string(),
            hint: "Rebuild with the default HTTP client enabled.".to_string(),
        });
    };
    if !caps.enumeration {
        return Err(InventoryError::MissingDependency {
            component: "vim25 client".to_string(),
            hint: "VM enumeration is unavailable in this build.".to_string(),
        });
    }
    if ctx.with_tags && !caps.tagging {
        return Err(InventoryError::MissingDependency {
            component: "vSphere Automation tagging client".to_string(),
            hint: "Rebuild with the `tagging` feature or set with_tags: false.".to_string(),
        });
    }

    let found = parse_version(version).ok_or_else(|| InventoryError::VersionParse {
        component: HTTP_CLIENT.to_string(),
        found: version.to_string(),
    })?;
    if found < MIN_HTTP_CLIENT_VERSION {
        return Err(InventoryError::UnsupportedVersion {
            component: HTTP_CLIENT.to_string(),
            required: format!("{}.{}", MIN_HTTP_CLIENT_VERSION.0, MIN_HTTP_CLIENT_VERSION.1),
            found: version.to_string(),
        });
    }

    if ctx.hostname.is_empty() || ctx.username.is_empty() || ctx.password.is_empty() {
        return Err(InventoryError::MissingRequired);
    }
    Ok(())
}

/// Blocking HTTP client with the requested certificate policy.
pub fn build_http_client(validate_certs: bool) -> Result<Client, BackendError> {
    let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
    if !validate_certs {
        tracing::warn!("TLS certificate validation is disabled for the vSphere connection");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder
        .build()
        .map_err(|e| BackendError::Transport(e.to_string()))
}

/// Map a login-time backend failure onto the run-level taxonomy.
pub fn login_error(ctx: &ConnectionContext, err: BackendError) -> InventoryError {
    let endpoint = ctx.endpoint();
    let username = ctx.username.clone();
    match err {
        BackendError::InvalidLogin(message) => InventoryError::InvalidLogin {
            endpoint,
            username,
            message,
        },
        BackendError::NoPermission(message) => InventoryError::NoPermission {
            endpoint,
            username,
            message,
        },
        BackendError::InvalidRequest(message) => InventoryError::MalformedRequest {
            endpoint,
            username,
            message,
        },
        BackendError::Transport(message) => InventoryError::Connectivity {
            endpoint,
            username,
            message,
        },
        other => InventoryError::UnknownBackend {
            endpoint,
            username,
            message: other.to_string(),
        },
    }
}

/// Both API sessions of one run.
pub struct Session {
    vim: VimClient,
    rest: RestClient,
}

impl Session {
    pub fn vim(&self) -> &dyn VimApi {
        &self.vim
    }

    pub fn automation(&self) -> &dyn AutomationApi {
        &self.rest
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.rest.logout() {
            tracing::debug!("REST logout failed: {}", e);
        }
        if let Err(e) = self.vim.logout() {
            tracing::debug!("vim25 logout failed: {}", e);
        }
    }
}

/// Validate requirements and log in to both APIs.
pub fn initialize(ctx: &ConnectionContext, caps: &Capabilities) -> Result<Session, InventoryError> {
    check_requirements(ctx, caps)?;

    let http = build_http_client(ctx.validate_certs).map_err(|e| login_error(ctx, e))?;
    let null_session = || InventoryError::NullSession {
        endpoint: ctx.endpoint(),
        username: ctx.username.clone(),
    };

    let vim = VimClient::login(http.clone(), ctx)
        .map_err(|e| login_error(ctx, e))?
        .ok_or_else(null_session)?;

    let rest = match RestClient::login(http, ctx) {
        Ok(Some(rest)) => rest,
        Ok(None) => {
            logout_quietly(&vim);
            return Err(null_session());
        }
        Err(e) => {
            logout_quietly(&vim);
            return Err(login_error(ctx, e));
        }
    };

    tracing::info!(endpoint = %ctx.endpoint(), user = %ctx.username, "connected to vSphere");
    Ok(Session { vim, rest })
}

fn logout_quietly(vim: &VimClient) {
    if let Err(e) = vim.logout() {
        tracing::debug!("vim25 logout failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            hostname: "vc.lab".to_string(),
            username: "administrator@vsphere.local".to_string(),
            password: "secret".to_string(),
            port: 443,
            validate_certs: true,
            with_tags: false,
        }
    }

    fn caps() -> Capabilities {
        Capabilities {
            http_client: Some("0.12".to_string()),
            enumeration: true,
            tagging: true,
        }
    }

    #[test]
    fn test_http_client_version_matches_manifest() {
        let manifest = include_str!("../Cargo.toml");
        let requirement = format!("reqwest = {{ version = \"{}\"", HTTP_CLIENT_VERSION);
        assert!(
            manifest.contains(&requirement),
            "expected `{}` in Cargo.toml",
            requirement
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0.12"), Some((0, 12)));
        assert_eq!(parse_version("2.31.0"), Some((2, 31)));
        assert_eq!(parse_version("1.4rc1"), Some((1, 4)));
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("3"), None);
    }

    #[test]
    fn test_requirements_pass() {
        assert!(check_requirements(&ctx(), &caps()).is_ok());
        assert!(check_requirements(&ctx(), &Capabilities::detect()).is_ok());
    }

    #[test]
    fn test_missing_http_client() {
        let mut c = caps();
        c.http_client = None;
        let err = check_requirements(&ctx(), &c).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::MissingDependency { ref component, .. } if component == HTTP_CLIENT
        ));
    }

    #[test]
    fn test_missing_tagging_only_matters_with_tags() {
        let mut c = caps();
        c.tagging = false;
        assert!(check_requirements(&ctx(), &c).is_ok());

        let mut tagged = ctx();
        tagged.with_tags = true;
        let err = check_requirements(&tagged, &c).unwrap_err();
        assert!(matches!(err, InventoryError::MissingDependency { .. }));
    }

    #[test]
    fn test_old_or_unparsable_version() {
        let mut c = caps();
        c.http_client = Some("0.11.27".to_string());
        let err = check_requirements(&ctx(), &c).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'reqwest' version should be >= 0.12, found: 0.11.27"
        );

        c.http_client = Some("dev".to_string());
        assert!(matches!(
            check_requirements(&ctx(), &c),
            Err(InventoryError::VersionParse { .. })
        ));
    }

    #[test]
    fn test_missing_required_fields() {
        for blank in ["hostname", "username", "password"] {
            let mut c = ctx();
            match blank {
                "hostname" => c.hostname.clear(),
                "username" => c.username.clear(),
                _ => c.password.clear(),
            }
            assert!(matches!(
                check_requirements(&c, &caps()),
                Err(InventoryError::MissingRequired)
            ));
        }
    }

    #[test]
    fn test_login_error_mapping_names_endpoint_and_user() {
        let err = login_error(&ctx(), BackendError::InvalidLogin("bad password".to_string()));
        let text = err.to_string();
        assert!(matches!(err, InventoryError::InvalidLogin { .. }));
        assert!(text.contains("vc.lab:443"));
        assert!(text.contains("administrator@vsphere.local"));

        assert!(matches!(
            login_error(&ctx(), BackendError::NoPermission(String::new())),
            InventoryError::NoPermission { .. }
        ));
        assert!(matches!(
            login_error(&ctx(), BackendError::InvalidRequest(String::new())),
            InventoryError::MalformedRequest { .. }
        ));
        assert!(matches!(
            login_error(&ctx(), BackendError::Transport("refused".to_string())),
            InventoryError::Connectivity { .. }
        ));
        assert!(matches!(
            login_error(&ctx(), BackendError::Http { status: 502, body: String::new() }),
            InventoryError::UnknownBackend { .. }
        ));
    }

    #[test]
    fn test_build_http_client_both_policies() {
        assert!(build_http_client(true).is_ok());
        assert!(build_http_client(false).is_ok());
    }

    #[test]
    fn test_unreachable_host_is_connectivity_error() {
        let mut c = ctx();
        c.hostname = "127.0.0.1".to_string();
        c.port = 1;
        let err = match initialize(&c, &caps()) {
            Ok(_) => panic!("login to a closed port succeeded"),
            Err(e) => e,
        };
        assert!(matches!(err, InventoryError::Connectivity { .. }), "{:?}", err);
    }
}
