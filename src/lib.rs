//! # A3S HTTP Service
//!
//! An embeddable HTTP/WebSocket service core: named endpoints, per-endpoint
//! interceptor chains and a listener that can be started, stopped and
//! reconfigured at runtime.
//!
//! ## Architecture
//!
//! ```text
//! Listener → Router → Interceptor Chain → Connected Handler
//!              └──→ WebSocket upgrade → Socket set → Handler
//! ```
//!
//! ## Core Features
//!
//! - **Endpoints**: `METHOD:/path/:param` declarations, HTTP or WebSocket
//! - **Interceptors**: body decoding, response encoding, JWT verification
//! - **WebSocket**: per-endpoint socket sets, broadcast, token-authenticated upgrades
//! - **Lifecycle**: port-range and delayed bind retry, graceful stop, live reconfiguration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use a3s_http_service::{handler_fn, HttpService, config::ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> a3s_http_service::Result<()> {
//!     let config = ServiceConfig::from_file("service.hcl").await?;
//!     let service = HttpService::new(config)?;
//!     service.register_handler("echo", handler_fn(|m| async move { Ok(Some(m)) }))?;
//!     service.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     service.stop().await
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod entrypoint;
pub mod error;
pub mod interceptor;
pub mod jwt;
pub mod observability;
pub mod router;
pub mod server;
pub(crate) mod tls;
pub mod ws;

// Re-export main types
pub use config::{ConfigChanges, ConfigUpdate, EndpointConfig, ServiceConfig};
pub use endpoint::{handler_fn, Endpoint, Handler};
pub use error::{Result, ServiceError};
pub use interceptor::{Context, Interceptor, Next};
pub use server::HttpService;
pub use ws::Broadcaster;

use serde::{Deserialize, Serialize};

/// Listener lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceState {
    /// Not listening
    #[default]
    Stopped,
    /// Binding the listener (possibly waiting out an address-in-use retry)
    Starting,
    /// Accepting connections
    Running,
    /// Closing sockets and draining connections
    Stopping,
    /// The last start failed with an unrecoverable bind error
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Service status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Current lifecycle state
    pub state: ServiceState,
    /// Canonical listener URL
    pub url: Option<String>,
    /// Seconds since the listener was bound
    pub uptime_secs: u64,
    /// Connections and sockets currently served
    pub open_connections: usize,
    /// HTTP requests dispatched since the service was created
    pub total_requests: u64,
}
