//! Server configuration types.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use syscontext_core::{Extras, Snapshot, User};

/// Top-level configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Realm named in the `WWW-Authenticate` challenge on 401 responses.
    pub realm: String,
    /// Roles that must all be held to reach `/admin`.
    pub admin_roles: Vec<String>,
    /// Roles of which any one grants access to `/reports`.
    pub report_roles: Vec<String>,
    /// Static bearer-token table used by the demo authenticator.
    pub identities: Vec<IdentityConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            request_timeout: Duration::from_secs(30),
            realm: "syscontext".to_string(),
            admin_roles: vec!["ADMIN".to_string()],
            report_roles: vec!["ADMIN".to_string(), "AUDITOR".to_string()],
            identities: Vec::new(),
        }
    }
}

/// One bearer token and the snapshot it resolves to.
///
/// No `Default` impl because a token has no sensible default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<String>,
    /// String-valued extras attached to the snapshot.
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl IdentityConfig {
    /// Builds the snapshot attached to requests carrying this token.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot {
        let extras = self
            .extras
            .iter()
            .fold(Extras::new(), |extras, (key, value)| {
                extras.with(key.clone(), value.clone())
            });
        Snapshot::new(self.user.clone(), self.roles.iter().cloned()).with_extras(extras)
    }
}

/// Reads a JSON array of [`IdentityConfig`] from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON.
pub fn load_identities(path: &Path) -> anyhow::Result<Vec<IdentityConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading identities from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing identities from {}", path.display()))
}
