//! Endpoint configuration: declarative route definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Endpoint declaration
///
/// The declaration is keyed by the endpoint name. A name of the form
/// `METHOD:/path` supplies both method and path; a name starting with `/`
/// is used as the path when `path` is absent.
///
/// # Example
///
/// ```hcl
/// endpoints "POST:/orders" {
///   connected    = "orders"
///   interceptors = [
///     { type = "ctx-jwt-verify", required_entitlements = ["orders.write"] },
///     { type = "ctx-body-param" },
///   ]
/// }
///
/// endpoints "/events" {
///   ws        = true
///   connected = "events"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL path pattern (defaults to the endpoint name)
    #[serde(default)]
    pub path: Option<String>,

    /// HTTP method (defaults to GET)
    #[serde(default)]
    pub method: Option<String>,

    /// Declare a WebSocket endpoint
    #[serde(default)]
    pub ws: bool,

    /// Interceptor chain, in execution order
    #[serde(default)]
    pub interceptors: Vec<InterceptorConfig>,

    /// Name of the registered handler this endpoint is connected to
    #[serde(default)]
    pub connected: Option<String>,
}

impl EndpointConfig {
    /// Resolve the effective `(method, path)` for an endpoint called `name`
    pub fn resolve(&self, name: &str) -> (String, String) {
        if let Some((method, path)) = split_method_prefix(name) {
            return (method.to_ascii_uppercase(), path.to_string());
        }

        let method = self
            .method
            .as_deref()
            .map(|m| m.to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string());
        let path = self.path.clone().unwrap_or_else(|| name.to_string());
        (method, path)
    }
}

/// Split `METHOD:/path` into its parts
fn split_method_prefix(name: &str) -> Option<(&str, &str)> {
    let (method, path) = name.split_once(':')?;
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((method, path))
}

/// Interceptor declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Interceptor type (`ctx`, `ctx-body-param`, `ctx-jwt-verify`)
    #[serde(rename = "type")]
    pub interceptor_type: String,

    /// Headers merged into every response (encoders)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Entitlements a token must carry (`ctx-jwt-verify`)
    #[serde(default)]
    pub required_entitlements: Vec<String>,
}

impl InterceptorConfig {
    /// Declaration of the given type with no options
    pub fn of_type(interceptor_type: impl Into<String>) -> Self {
        Self {
            interceptor_type: interceptor_type.into(),
            ..Default::default()
        }
    }
}
