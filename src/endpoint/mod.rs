//! Endpoints: named routes bound to an interceptor chain and a handler
//!
//! An endpoint is either plain HTTP or WebSocket. The kind is fixed when the
//! endpoint is built from its declaration and stored on the endpoint, so
//! the router never has to inspect handlers to decide how to dispatch.

mod handler;
mod registry;

pub use handler::{handler_fn, Handler};
pub use registry::EndpointRegistry;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::error::{Result, ServiceError};
use crate::interceptor::{Context, Pipeline};
use crate::jwt::JwtKeys;
use crate::router::PathPattern;
use crate::ws::{to_message, Sockets};

/// Endpoint variant
#[derive(Debug, Clone)]
pub enum EndpointKind {
    /// Request/response endpoint
    Http,
    /// WebSocket endpoint with its set of open sockets
    WebSocket(Arc<Sockets>),
}

/// A named, path/method addressed route
pub struct Endpoint {
    name: String,
    method: String,
    pattern: PathPattern,
    pipeline: Pipeline,
    connected: Option<Arc<dyn Handler>>,
    kind: EndpointKind,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.pattern.as_str())
            .field("interceptors", &self.pipeline)
            .field("connected", &self.connected.is_some())
            .field("kind", &self.kind)
            .finish()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            EndpointKind::Http => write!(f, "{} {}", self.method, self.pattern.as_str()),
            EndpointKind::WebSocket(_) => write!(f, "WS {}", self.pattern.as_str()),
        }
    }
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        method: &str,
        path: &str,
        pipeline: Pipeline,
        connected: Option<Arc<dyn Handler>>,
        kind: EndpointKind,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = PathPattern::parse(path)
            .map_err(|e| ServiceError::Config(format!("Endpoint '{}': {}", name, e)))?;

        Ok(Self {
            name,
            method: method.to_ascii_uppercase(),
            pattern,
            pipeline,
            connected,
            kind,
        })
    }

    /// Build an endpoint from its declaration
    ///
    /// `sockets` carries the socket set of a previous WebSocket endpoint with
    /// the same name so open connections survive a reconfiguration.
    pub fn from_config(
        name: &str,
        config: &EndpointConfig,
        handlers: &HashMap<String, Arc<dyn Handler>>,
        jwt: &Arc<JwtKeys>,
        sockets: Option<Arc<Sockets>>,
    ) -> Result<Self> {
        let (method, path) = config.resolve(name);
        let pipeline = Pipeline::from_config(&config.interceptors, jwt)
            .map_err(|e| ServiceError::Config(format!("Endpoint '{}': {}", name, e)))?;

        let connected = match &config.connected {
            Some(handler) => {
                let found = handlers.get(handler).cloned();
                if found.is_none() {
                    tracing::warn!(endpoint = name, handler = handler, "Handler not registered");
                }
                found
            }
            None => None,
        };

        let kind = if config.ws {
            EndpointKind::WebSocket(sockets.unwrap_or_default())
        } else {
            EndpointKind::Http
        };

        Self::new(name, &method, &path, pipeline, connected, kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-case HTTP method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path template
    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    /// The terminal handler, if one is registered
    pub fn connected(&self) -> Option<&Arc<dyn Handler>> {
        self.connected.as_ref()
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.kind, EndpointKind::WebSocket(_))
    }

    /// Socket set of a WebSocket endpoint
    pub fn sockets(&self) -> Option<&Arc<Sockets>> {
        match &self.kind {
            EndpointKind::WebSocket(sockets) => Some(sockets),
            EndpointKind::Http => None,
        }
    }

    /// Whether a WebSocket endpoint has at least one open socket
    pub fn is_open(&self) -> bool {
        self.sockets().map(|s| s.is_open()).unwrap_or(false)
    }

    /// Whether a request with `method` is served by this endpoint
    pub fn accepts_method(&self, method: &str) -> bool {
        method.eq_ignore_ascii_case(&self.method)
            || (self.method == "GET" && method.eq_ignore_ascii_case("HEAD"))
    }

    /// Run a message through the interceptor chain into the handler
    pub async fn dispatch(&self, ctx: &mut Context, message: Value) -> Result<Option<Value>> {
        self.pipeline.run(self, ctx, message).await
    }

    /// Push a message to every open socket; returns how many accepted it
    pub fn broadcast(&self, message: &Value) -> usize {
        match &self.kind {
            EndpointKind::WebSocket(sockets) => sockets.broadcast(to_message(message)),
            EndpointKind::Http => 0,
        }
    }

    /// Forcibly close every open socket
    pub fn close_sockets(&self) -> usize {
        self.sockets().map(|s| s.close_all()).unwrap_or(0)
    }
}
