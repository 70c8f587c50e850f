//! Command-line interface for the server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{load_identities, ServerConfig};
use crate::logging::LogFormat;

/// HTTP server that attaches request-scoped authorization context.
#[derive(Parser, Debug)]
#[command(name = "syscontext-server", version, about, long_about = None)]
pub struct Cli {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "SYSCONTEXT_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080, env = "SYSCONTEXT_PORT")]
    pub port: u16,

    /// JSON file with the bearer-token identity table.
    #[arg(short, long, env = "SYSCONTEXT_IDENTITIES")]
    pub identities: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30, env = "SYSCONTEXT_REQUEST_TIMEOUT")]
    pub request_timeout_secs: u64,

    /// Realm advertised in the `WWW-Authenticate` challenge.
    #[arg(long, default_value = "syscontext", env = "SYSCONTEXT_REALM")]
    pub realm: String,

    /// Roles required (all of them) for `/admin`.
    #[arg(long, value_delimiter = ',', default_value = "ADMIN")]
    pub admin_roles: Vec<String>,

    /// Roles of which any one grants `/reports`.
    #[arg(long, value_delimiter = ',', default_value = "ADMIN,AUDITOR")]
    pub report_roles: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", env = "SYSCONTEXT_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "SYSCONTEXT_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Address for the Prometheus scrape endpoint. Disabled when unset.
    #[arg(long, env = "SYSCONTEXT_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Builds the server configuration, loading the identity table if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the identities file cannot be loaded.
    pub fn to_config(&self) -> anyhow::Result<ServerConfig> {
        let identities = match &self.identities {
            Some(path) => load_identities(path)?,
            None => Vec::new(),
        };
        Ok(ServerConfig {
            host: self.host.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            realm: self.realm.clone(),
            admin_roles: self.admin_roles.clone(),
            report_roles: self.report_roles.clone(),
            identities,
        })
    }
}
