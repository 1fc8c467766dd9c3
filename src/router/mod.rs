//! Router: matches requests and upgrades against registered endpoints
//!
//! The table is compiled once per configuration change from the endpoint
//! registry. Matching walks endpoints in registration order and returns the
//! first hit:
//! - HTTP endpoints match on path and method (a GET endpoint also serves HEAD)
//! - WebSocket endpoints match on path only

mod pattern;

pub use pattern::PathPattern;

use std::collections::HashMap;
use std::sync::Arc;

use crate::endpoint::{Endpoint, EndpointRegistry};

/// A resolved route: the matched endpoint and its path parameters
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub endpoint: Arc<Endpoint>,
    pub params: HashMap<String, String>,
}

/// Compiled routing table
#[derive(Debug, Default)]
pub struct RouteTable {
    http: Vec<Arc<Endpoint>>,
    websocket: Vec<Arc<Endpoint>>,
}

impl RouteTable {
    /// Build a table from the endpoint registry
    pub fn compile(registry: &EndpointRegistry) -> Self {
        let mut table = Self::default();
        for endpoint in registry.iter() {
            if endpoint.is_websocket() {
                table.websocket.push(endpoint.clone());
            } else {
                table.http.push(endpoint.clone());
            }
        }
        table
    }

    /// Match an HTTP request
    pub fn route(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.http
            .iter()
            .filter(|e| e.accepts_method(method))
            .find_map(|e| {
                e.pattern().matches(path).map(|params| RouteMatch {
                    endpoint: e.clone(),
                    params,
                })
            })
    }

    /// Match a WebSocket upgrade request
    pub fn route_ws(&self, path: &str) -> Option<RouteMatch> {
        self.websocket.iter().find_map(|e| {
            e.pattern().matches(path).map(|params| RouteMatch {
                endpoint: e.clone(),
                params,
            })
        })
    }

    /// Current WebSocket endpoint registered under `name`
    pub fn websocket(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.websocket.iter().find(|e| e.name() == name).cloned()
    }

    /// Number of compiled routes
    pub fn len(&self) -> usize {
        self.http.len() + self.websocket.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.websocket.is_empty()
    }

    /// `METHOD path` / `WS path` of every route, in match order
    pub fn routes_info(&self) -> Vec<String> {
        self.http
            .iter()
            .chain(self.websocket.iter())
            .map(|e| e.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;
    use crate::interceptor::Pipeline;

    fn registry(routes: &[(&str, &str, &str, bool)]) -> EndpointRegistry {
        let mut registry = EndpointRegistry::default();
        for (name, method, path, ws) in routes {
            let kind = if *ws {
                EndpointKind::WebSocket(Default::default())
            } else {
                EndpointKind::Http
            };
            registry
                .insert(Endpoint::new(*name, method, path, Pipeline::empty(), None, kind).unwrap())
                .unwrap();
        }
        registry
    }

    fn sample() -> RouteTable {
        RouteTable::compile(&registry(&[
            ("/s1/:key", "GET", "/s1/:key", false),
            ("POST:/s2", "POST", "/s2", false),
            ("/s3", "GET", "/s3", false),
            ("catch", "GET", "/s3/*", false),
            ("/w1", "GET", "/w1", true),
        ]))
    }

    #[test]
    fn test_route_with_params() {
        let table = sample();
        let m = table.route("GET", "/s1/abc").unwrap();
        assert_eq!(m.endpoint.name(), "/s1/:key");
        assert_eq!(m.params["key"], "abc");
    }

    #[test]
    fn test_head_matches_get_only() {
        let table = sample();
        assert!(table.route("HEAD", "/s3").is_some());
        assert!(table.route("POST", "/s3").is_none());
        assert!(table.route("HEAD", "/s2").is_none());
        assert_eq!(table.route("POST", "/s2").unwrap().endpoint.name(), "POST:/s2");
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::compile(&registry(&[
            ("specific", "GET", "/a/b", false),
            ("generic", "GET", "/a/:x", false),
        ]));
        assert_eq!(table.route("GET", "/a/b").unwrap().endpoint.name(), "specific");
        assert_eq!(table.route("GET", "/a/c").unwrap().endpoint.name(), "generic");
    }

    #[test]
    fn test_no_match() {
        let table = sample();
        assert!(table.route("GET", "/unknown").is_none());
        assert!(table.route("GET", "/w1").is_none());
    }

    #[test]
    fn test_ws_routes_separate() {
        let table = sample();
        assert_eq!(table.route_ws("/w1").unwrap().endpoint.name(), "/w1");
        assert!(table.route_ws("/s3").is_none());
        assert_eq!(table.websocket("/w1").unwrap().path(), "/w1");
        assert!(table.websocket("/s3").is_none());
    }

    #[test]
    fn test_compile_twice_same_behavior() {
        let reg = registry(&[
            ("/s1/:key", "GET", "/s1/:key", false),
            ("POST:/s2", "POST", "/s2", false),
        ]);
        let a = RouteTable::compile(&reg);
        let b = RouteTable::compile(&reg);
        for (method, path) in [("GET", "/s1/x"), ("POST", "/s2"), ("GET", "/s2"), ("HEAD", "/s1/y")] {
            assert_eq!(
                a.route(method, path).map(|m| m.endpoint.name().to_string()),
                b.route(method, path).map(|m| m.endpoint.name().to_string())
            );
        }
        assert_eq!(a.routes_info(), b.routes_info());
    }

    #[test]
    fn test_empty() {
        let table = RouteTable::default();
        assert!(table.is_empty());
        assert_eq!(sample().len(), 5);
    }
}
