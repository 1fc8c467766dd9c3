//! Configuration types for the HTTP service
//!
//! A service is described by its listen definition, optional TLS material,
//! timeouts, JWT verification keys and an ordered set of named endpoints.
//! Uses HCL (HashiCorp Configuration Language) as the file format.

mod endpoint;
mod listen;

pub use endpoint::{EndpointConfig, InterceptorConfig};
pub use listen::{ListenConfig, ListenSocket, TimeoutConfig};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Result, ServiceError};
use crate::interceptor::KNOWN_INTERCEPTORS;
use crate::router::PathPattern;

/// Top-level service configuration
///
/// # HCL Example
///
/// ```hcl
/// name = "api"
///
/// listen {
///   address = "0.0.0.0"
///   socket  = 8080
/// }
///
/// timeout {
///   server = 60
/// }
///
/// jwt {
///   public_file = "/etc/keys/issuer.pub"
/// }
///
/// endpoints "/health" {
///   connected = "health"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name used in logs
    #[serde(default = "default_name")]
    pub name: String,

    /// Listen definition
    #[serde(default)]
    pub listen: ListenConfig,

    /// Path to the PEM private key (enables https)
    #[serde(default)]
    pub key: Option<String>,

    /// Path to the PEM certificate chain
    #[serde(default)]
    pub cert: Option<String>,

    /// Timeouts
    #[serde(default)]
    pub timeout: TimeoutConfig,

    /// JWT verification keys
    #[serde(default)]
    pub jwt: Option<JwtConfig>,

    /// Put handler error messages into 500 response bodies
    #[serde(default = "default_expose_errors")]
    pub expose_errors: bool,

    /// Endpoints in registration order
    #[serde(default)]
    pub endpoints: IndexMap<String, EndpointConfig>,
}

fn default_name() -> String {
    "http".to_string()
}

fn default_expose_errors() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen: ListenConfig::default(),
            key: None,
            cert: None,
            timeout: TimeoutConfig::default(),
            jwt: None,
            expose_errors: default_expose_errors(),
            endpoints: IndexMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an HCL file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServiceError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| ServiceError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Whether TLS key material is configured
    pub fn is_secure(&self) -> bool {
        self.key.is_some()
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        self.listen.validate().map_err(ServiceError::Config)?;

        if self.key.is_some() != self.cert.is_some() {
            return Err(ServiceError::Config(
                "TLS requires both 'key' and 'cert'".to_string(),
            ));
        }

        if let Some(jwt) = &self.jwt {
            let sources = [&jwt.public, &jwt.public_file, &jwt.secret]
                .iter()
                .filter(|s| s.is_some())
                .count();
            if sources > 1 {
                return Err(ServiceError::Config(
                    "jwt: configure only one of 'public', 'public_file' or 'secret'".to_string(),
                ));
            }
        }

        let mut claimed = HashSet::new();
        for (name, ep) in &self.endpoints {
            for ic in &ep.interceptors {
                if !KNOWN_INTERCEPTORS.contains(&ic.interceptor_type.as_str()) {
                    return Err(ServiceError::Config(format!(
                        "Endpoint '{}': unknown interceptor type '{}'",
                        name, ic.interceptor_type
                    )));
                }
            }

            let (method, path) = ep.resolve(name);
            PathPattern::parse(&path)
                .map_err(|e| ServiceError::Config(format!("Endpoint '{}': {}", name, e)))?;
            let key = if ep.ws {
                ("WS".to_string(), path)
            } else {
                (method, path)
            };
            if !claimed.insert(key.clone()) {
                return Err(ServiceError::Config(format!(
                    "Endpoint '{}': {} {} is already claimed by another endpoint",
                    name, key.0, key.1
                )));
            }
        }

        Ok(())
    }

    /// Merge an update into this configuration and report what changed
    pub fn merge(&mut self, update: ConfigUpdate) -> ConfigChanges {
        let mut changes = ConfigChanges::default();

        if let Some(listen) = update.listen {
            if listen.url != self.listen.url
                || listen.address != self.listen.address
                || listen.socket != self.listen.socket
            {
                changes.record("listen", true);
            } else if listen != self.listen {
                changes.record("listen.retry", false);
            }
            self.listen = listen;
        }
        if let Some(key) = update.key {
            if self.key.as_ref() != Some(&key) {
                changes.record("key", true);
                self.key = Some(key);
            }
        }
        if let Some(cert) = update.cert {
            if self.cert.as_ref() != Some(&cert) {
                changes.record("cert", true);
                self.cert = Some(cert);
            }
        }
        if let Some(timeout) = update.timeout {
            if timeout != self.timeout {
                changes.record("timeout", false);
                self.timeout = timeout;
            }
        }
        if let Some(jwt) = update.jwt {
            if self.jwt.as_ref() != Some(&jwt) {
                changes.record("jwt", false);
                self.jwt = Some(jwt);
            }
        }
        if let Some(expose) = update.expose_errors {
            if expose != self.expose_errors {
                changes.record("expose_errors", false);
                self.expose_errors = expose;
            }
        }
        if let Some(endpoints) = update.endpoints {
            if endpoints != self.endpoints {
                changes.record("endpoints", false);
                self.endpoints = endpoints;
            }
        }

        changes
    }
}

/// JWT verification key material
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    /// PEM-encoded RSA or EC public key
    #[serde(default)]
    pub public: Option<String>,

    /// Path to a PEM-encoded public key
    #[serde(default)]
    pub public_file: Option<String>,

    /// Shared HMAC secret
    #[serde(default)]
    pub secret: Option<String>,
}

/// Partial configuration accepted by `HttpService::configure`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub listen: Option<ListenConfig>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub timeout: Option<TimeoutConfig>,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
    #[serde(default)]
    pub expose_errors: Option<bool>,
    #[serde(default)]
    pub endpoints: Option<IndexMap<String, EndpointConfig>>,
}

/// Attributes changed by a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    changed: Vec<&'static str>,
    needs_restart: bool,
}

impl ConfigChanges {
    fn record(&mut self, attribute: &'static str, needs_restart: bool) {
        self.changed.push(attribute);
        self.needs_restart |= needs_restart;
    }

    /// Whether any changed attribute requires the listener to be reopened
    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }

    /// Whether the named attribute changed
    pub fn contains(&self, attribute: &str) -> bool {
        self.changed.iter().any(|a| *a == attribute)
    }

    /// Names of the changed attributes, in merge order
    pub fn changed(&self) -> &[&'static str] {
        &self.changed
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}
