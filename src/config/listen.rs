//! Listen configuration: where and how the service binds its socket

use serde::{Deserialize, Serialize};
use url::Url;

/// Listening socket: a TCP port or a pre-opened file descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListenSocket {
    /// TCP port (0 picks an ephemeral port)
    Port(u16),
    /// Already bound and listening descriptor handed over by the parent process
    Fd { fd: i32 },
}

impl ListenSocket {
    /// Port number, if this is a TCP port
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Port(port) => Some(*port),
            Self::Fd { .. } => None,
        }
    }
}

impl std::fmt::Display for ListenSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Port(port) => write!(f, "{}", port),
            Self::Fd { fd } => write!(f, "fd:{}", fd),
        }
    }
}

/// Listen definition of the service
///
/// # Example
///
/// ```hcl
/// listen {
///   address          = "127.0.0.1"
///   socket           = 8080
///   retry_timeout_ms = 10000
///   from_port        = 8080
///   to_port          = 8090
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// URL of the server; supplies address and port when those are absent
    #[serde(default)]
    pub url: Option<String>,

    /// Hostname or IP address to bind
    #[serde(default)]
    pub address: Option<String>,

    /// Port or descriptor to listen on
    #[serde(default)]
    pub socket: Option<ListenSocket>,

    /// Delay between bind attempts while the address is in use
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,

    /// Maximum number of delayed bind retries (unlimited when absent)
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// First port of the fallback range, tried after the configured port
    /// is found in use (defaults to the port after it)
    #[serde(default)]
    pub from_port: Option<u16>,

    /// Last port of the fallback range
    #[serde(default)]
    pub to_port: Option<u16>,
}

fn default_retry_timeout_ms() -> u64 {
    10_000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            url: None,
            address: None,
            socket: None,
            retry_timeout_ms: default_retry_timeout_ms(),
            retry_attempts: None,
            from_port: None,
            to_port: None,
        }
    }
}

impl ListenConfig {
    /// Listen on a TCP port
    pub fn port(port: u16) -> Self {
        Self {
            socket: Some(ListenSocket::Port(port)),
            ..Self::default()
        }
    }

    /// Effective socket: the explicit one, otherwise the port of `url`
    pub fn socket(&self) -> Option<ListenSocket> {
        if self.socket.is_some() {
            return self.socket;
        }
        self.parsed_url()
            .and_then(|u| u.port_or_known_default())
            .map(ListenSocket::Port)
    }

    /// Effective address: the explicit one, otherwise the host of `url`
    pub fn address(&self) -> Option<String> {
        if self.address.is_some() {
            return self.address.clone();
        }
        self.parsed_url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Canonical URL of the listener
    ///
    /// `bound_port` overrides the configured port once the socket is bound
    /// (relevant when listening on port 0).
    pub fn url(&self, secure: bool, bound_port: Option<u16>) -> Option<String> {
        let socket = self.socket();

        if let Some(mut url) = self.parsed_url() {
            let port = bound_port.or_else(|| match self.socket {
                Some(ListenSocket::Port(port)) => Some(port),
                _ => None,
            });
            if let Some(port) = port {
                let _ = url.set_port(Some(port));
            }
            return Some(url.to_string().trim_end_matches('/').to_string());
        }

        match socket? {
            ListenSocket::Port(port) => {
                let scheme = if secure { "https" } else { "http" };
                let address = self.address().unwrap_or_else(|| "localhost".to_string());
                Some(format!(
                    "{}://{}:{}",
                    scheme,
                    address,
                    bound_port.unwrap_or(port)
                ))
            }
            ListenSocket::Fd { fd } => Some(format!("fd:///{}", fd)),
        }
    }

    /// Check the `url` attribute parses
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(url) = &self.url {
            Url::parse(url).map_err(|e| format!("invalid listen url '{}': {}", url, e))?;
        }
        if let (Some(from), Some(to)) = (self.from_port, self.to_port) {
            if from > to {
                return Err(format!(
                    "listen port range is empty: from_port {} > to_port {}",
                    from, to
                ));
            }
        }
        Ok(())
    }

    fn parsed_url(&self) -> Option<Url> {
        self.url.as_deref().and_then(|u| Url::parse(u).ok())
    }
}

/// Timeout settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Idle connection timeout in seconds
    #[serde(default = "default_server_timeout")]
    pub server: u64,
}

fn default_server_timeout() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            server: default_server_timeout(),
        }
    }
}
