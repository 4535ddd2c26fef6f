use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed broker endpoint, e.g. `kafka://localhost:9092`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceUrl {
    /// Comma-separated `host:port` bootstrap list.
    Kafka { bootstrap_servers: String },
}

impl FromStr for ServiceUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("service url '{url}' has no scheme")))?;
        match scheme {
            "kafka" => {
                let servers = rest.trim_end_matches('/');
                if servers.is_empty() {
                    return Err(Error::Config(format!("service url '{url}' has no hosts")));
                }
                for server in servers.split(',') {
                    check_host_port(url, server)?;
                }
                Ok(ServiceUrl::Kafka {
                    bootstrap_servers: servers.to_owned(),
                })
            }
            other => Err(Error::Config(format!(
                "unsupported service url scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceUrl::Kafka { bootstrap_servers } => write!(f, "kafka://{bootstrap_servers}"),
        }
    }
}

fn check_host_port(url: &str, server: &str) -> Result<()> {
    let (host, port) = server
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("'{server}' in '{url}' has no port")))?;
    if host.is_empty() {
        return Err(Error::Config(format!("'{server}' in '{url}' has no host")));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("'{server}' in '{url}' has an invalid port")))?;
    Ok(())
}

/// Settings collected by [`crate::ClientBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub service_url: Option<String>,
    pub operation_timeout: Duration,
    /// Extra transport properties, passed through verbatim.
    pub properties: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            properties: Vec::new(),
        }
    }
}
