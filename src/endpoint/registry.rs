//! Endpoint registry: the ordered set of endpoints of one service

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Endpoint, Handler};
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::jwt::JwtKeys;

/// Endpoints in registration order
#[derive(Debug, Default, Clone)]
pub struct EndpointRegistry {
    endpoints: IndexMap<String, Arc<Endpoint>>,
}

impl EndpointRegistry {
    /// Build every declared endpoint
    ///
    /// WebSocket endpoints keep the socket set of the same-named endpoint in
    /// `previous`.
    pub fn from_config(
        config: &ServiceConfig,
        handlers: &HashMap<String, Arc<dyn Handler>>,
        jwt: &Arc<JwtKeys>,
        previous: Option<&EndpointRegistry>,
    ) -> Result<Self> {
        let mut registry = Self::default();

        for (name, ep_config) in &config.endpoints {
            let sockets = previous
                .and_then(|p| p.get(name))
                .and_then(|ep| ep.sockets().cloned());
            let endpoint = Endpoint::from_config(name, ep_config, handlers, jwt, sockets)?;
            registry.insert(endpoint)?;
        }

        Ok(registry)
    }

    /// Register an endpoint
    ///
    /// Fails when the name or the (method, path) pair is already claimed.
    pub fn insert(&mut self, endpoint: Endpoint) -> Result<Arc<Endpoint>> {
        if self.endpoints.contains_key(endpoint.name()) {
            return Err(ServiceError::Config(format!(
                "Endpoint '{}' is already registered",
                endpoint.name()
            )));
        }

        if let Some(existing) = self.endpoints.values().find(|e| {
            e.is_websocket() == endpoint.is_websocket()
                && e.path() == endpoint.path()
                && (endpoint.is_websocket() || e.method() == endpoint.method())
        }) {
            return Err(ServiceError::Config(format!(
                "Endpoint '{}': {} is already claimed by '{}'",
                endpoint.name(),
                endpoint,
                existing.name()
            )));
        }

        let endpoint = Arc::new(endpoint);
        self.endpoints
            .insert(endpoint.name().to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Remove an endpoint, keeping the order of the others
    pub fn remove(&mut self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(name)
    }

    /// Endpoints in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.values()
    }

    /// WebSocket endpoints in registration order
    pub fn websockets(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.values().filter(|e| e.is_websocket())
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
