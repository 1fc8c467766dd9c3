//! HttpService: lifecycle owner of one listener and its endpoints

use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigChanges, ConfigUpdate, EndpointConfig, ListenSocket, ServiceConfig};
use crate::endpoint::{Endpoint, EndpointRegistry, Handler};
use crate::entrypoint::{bind_listener, spawn_accept_loop, ConnectionScope, Dispatcher};
use crate::error::{Result, ServiceError};
use crate::jwt::JwtKeys;
use crate::router::RouteTable;
use crate::tls::build_tls_acceptor;
use crate::{ServiceState, ServiceStatus};

/// Bound listener bookkeeping
struct Listening {
    local_addr: SocketAddr,
    started_at: Instant,
    scope: ConnectionScope,
}

/// An HTTP/WebSocket service: endpoints, interceptor chains and a listener
/// that can be started, stopped and reconfigured at runtime.
pub struct HttpService {
    config: RwLock<ServiceConfig>,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    registry: RwLock<EndpointRegistry>,
    jwt: Arc<JwtKeys>,
    dispatcher: Arc<Dispatcher>,
    state: RwLock<ServiceState>,
    /// Serializes start/stop; holds the accept loop while running
    accept: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    listening: RwLock<Option<Listening>>,
    pending: Mutex<Option<CancellationToken>>,
}

impl HttpService {
    /// Create a stopped service from a validated configuration
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let jwt = Arc::new(JwtKeys::from_config(config.jwt.as_ref())?);
        let registry = EndpointRegistry::from_config(&config, &HashMap::new(), &jwt, None)?;

        let dispatcher = Arc::new(Dispatcher::new(config.name.clone(), jwt.clone()));
        dispatcher.set_expose_errors(config.expose_errors);
        dispatcher.set_idle_timeout(config.timeout.server);
        dispatcher.swap_routes(RouteTable::compile(&registry));

        tracing::debug!(service = config.name, endpoints = registry.len(), "Service created");

        Ok(Self {
            config: RwLock::new(config),
            handlers: RwLock::new(HashMap::new()),
            registry: RwLock::new(registry),
            jwt,
            dispatcher,
            state: RwLock::new(ServiceState::Stopped),
            accept: tokio::sync::Mutex::new(None),
            listening: RwLock::new(None),
            pending: Mutex::new(None),
        })
    }

    /// Register a handler under `name` and connect the endpoints naming it
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let name = name.into();
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handler);

        let config = self.config();
        self.rebuild_endpoints(&config)?;
        tracing::debug!(service = config.name, handler = name, "Handler registered");
        Ok(())
    }

    /// Declare a new endpoint
    pub fn add_endpoint(&self, name: impl Into<String>, endpoint: EndpointConfig) -> Result<Arc<Endpoint>> {
        let name = name.into();
        let mut config = self.config();
        if config.endpoints.contains_key(&name) {
            return Err(ServiceError::Config(format!(
                "Endpoint '{}' is already registered",
                name
            )));
        }
        config.endpoints.insert(name.clone(), endpoint);
        config.validate()?;

        self.rebuild_endpoints(&config)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;

        self.endpoint(&name)
            .ok_or_else(|| ServiceError::Other(format!("Endpoint '{}' was not registered", name)))
    }

    /// Remove an endpoint, closing its open sockets
    pub fn remove_endpoint(&self, name: &str) -> Result<bool> {
        let mut config = self.config();
        if config.endpoints.shift_remove(name).is_none() {
            return Ok(false);
        }

        self.rebuild_endpoints(&config)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(true)
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Endpoints in registration order
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Push a message to every socket of a WebSocket endpoint
    pub fn broadcast(&self, endpoint: &str, message: &Value) -> Option<usize> {
        let endpoint = self.endpoint(endpoint)?;
        endpoint.is_websocket().then(|| endpoint.broadcast(message))
    }

    /// Rebuild the registry from `config` and swap the route table
    fn rebuild_endpoints(&self, config: &ServiceConfig) -> Result<()> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let next = self.build_endpoints(config, &registry)?;
        self.install_endpoints(config, &mut registry, next);
        Ok(())
    }

    /// Build the endpoints of `config`, carrying socket sets over from `current`
    fn build_endpoints(
        &self,
        config: &ServiceConfig,
        current: &EndpointRegistry,
    ) -> Result<EndpointRegistry> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        EndpointRegistry::from_config(config, &handlers, &self.jwt, Some(current))
    }

    /// Replace `registry` with `next`, closing sockets of dropped endpoints
    fn install_endpoints(
        &self,
        config: &ServiceConfig,
        registry: &mut EndpointRegistry,
        next: EndpointRegistry,
    ) {
        for old in registry.websockets() {
            let kept = next
                .get(old.name())
                .map(|ep| ep.is_websocket())
                .unwrap_or(false);
            if !kept {
                let closed = old.close_sockets();
                tracing::debug!(endpoint = old.name(), closed = closed, "WebSocket endpoint removed");
            }
        }

        let routes = RouteTable::compile(&next);
        tracing::debug!(service = config.name, routes = routes.len(), "Route table compiled");
        self.dispatcher.swap_routes(routes);
        *registry = next;
    }

    /// Open the listener and start serving
    ///
    /// Resolves immediately when already running. A pending start (waiting
    /// out an address-in-use delay) is aborted by [`stop`](Self::stop) with
    /// [`ServiceError::Cancelled`].
    pub async fn start(&self) -> Result<()> {
        let mut accept = self.accept.lock().await;
        if accept.is_some() {
            return Ok(());
        }

        let config = self.config();
        self.set_state(ServiceState::Starting);

        let cancel = CancellationToken::new();
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        let bound = self.open_listener(&config, &cancel).await;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let (listener, tls, local_addr) = match bound {
            Ok(bound) => bound,
            Err(ServiceError::Cancelled) => {
                tracing::info!(service = config.name, "Start cancelled");
                self.set_state(ServiceState::Stopped);
                return Err(ServiceError::Cancelled);
            }
            Err(e) => {
                tracing::error!(service = config.name, error = %e, "Failed to start");
                self.set_state(ServiceState::Failed);
                return Err(e);
            }
        };

        let scope = ConnectionScope::new();
        *accept = Some(spawn_accept_loop(
            listener,
            tls,
            self.dispatcher.clone(),
            scope.clone(),
        ));
        *self.listening.write().unwrap_or_else(PoisonError::into_inner) = Some(Listening {
            local_addr,
            started_at: Instant::now(),
            scope,
        });

        self.set_state(ServiceState::Running);
        tracing::info!(
            service = config.name,
            url = self.url().unwrap_or_default(),
            address = %local_addr,
            "Listening"
        );
        Ok(())
    }

    async fn open_listener(
        &self,
        config: &ServiceConfig,
        cancel: &CancellationToken,
    ) -> Result<(
        tokio::net::TcpListener,
        Option<tokio_rustls::TlsAcceptor>,
        SocketAddr,
    )> {
        let tls = match (&config.key, &config.cert) {
            (Some(key), Some(cert)) => Some(build_tls_acceptor(key, cert)?),
            _ => None,
        };
        let (listener, local_addr) = bind_listener(&config.listen, cancel).await?;
        Ok((listener, tls, local_addr))
    }

    /// Gracefully stop serving
    ///
    /// WebSocket sockets are closed at once, the listening socket is closed,
    /// then in-flight HTTP requests are allowed to finish.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }

        let mut accept = self.accept.lock().await;
        let Some(accept_loop) = accept.take() else {
            if self.state() != ServiceState::Stopped {
                self.set_state(ServiceState::Stopped);
            }
            return Ok(());
        };

        let name = self.name();
        self.set_state(ServiceState::Stopping);
        tracing::info!(service = name, "Stopping");

        let registry = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let closed: usize = registry.websockets().map(|ep| ep.close_sockets()).sum();
        if closed > 0 {
            tracing::debug!(service = name, sockets = closed, "WebSocket sockets closed");
        }

        let listening = self
            .listening
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listening) = &listening {
            listening.scope.shutdown.cancel();
        }
        if let Err(e) = accept_loop.await {
            tracing::warn!(service = name, error = %e, "Accept loop ended abnormally");
        }
        if let Some(listening) = listening {
            listening.scope.drain(&name).await;
        }

        self.set_state(ServiceState::Stopped);
        tracing::info!(service = name, "Stopped");
        Ok(())
    }

    /// Stop, then start again with the current configuration
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Merge a partial configuration
    ///
    /// Live attributes apply immediately. When an attribute that needs a
    /// restart changed and the service is running, it is restarted. Nothing
    /// is applied when the update is rejected.
    pub async fn configure(&self, update: ConfigUpdate) -> Result<ConfigChanges> {
        let mut config = self.config();
        let changes = config.merge(update);
        if changes.is_empty() {
            return Ok(changes);
        }
        config.validate()?;

        {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            let verifier = if changes.contains("jwt") {
                Some(JwtKeys::prepare(config.jwt.as_ref())?)
            } else {
                None
            };
            let endpoints = if changes.contains("endpoints") {
                Some(self.build_endpoints(&config, &registry)?)
            } else {
                None
            };

            if let Some(verifier) = verifier {
                self.jwt.install(verifier);
            }
            if let Some(next) = endpoints {
                self.install_endpoints(&config, &mut registry, next);
            }
            self.dispatcher.set_expose_errors(config.expose_errors);
            self.dispatcher.set_idle_timeout(config.timeout.server);
        }

        let name = config.name.clone();
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;

        let restart = changes.needs_restart() && self.is_running();
        tracing::info!(
            service = name,
            changed = ?changes.changed(),
            restart = restart,
            "Configuration updated"
        );
        if restart {
            self.restart().await?;
        }
        Ok(changes)
    }

    /// Get the current service state
    pub fn state(&self) -> ServiceState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Status snapshot
    pub fn status(&self) -> ServiceStatus {
        let listening = self.listening.read().unwrap_or_else(PoisonError::into_inner);
        let (uptime_secs, open_connections) = listening
            .as_ref()
            .map(|l| (l.started_at.elapsed().as_secs(), l.scope.open_connections()))
            .unwrap_or((0, 0));
        drop(listening);

        ServiceStatus {
            state: self.state(),
            url: self.url(),
            uptime_secs,
            open_connections,
            total_requests: self.dispatcher.total_requests(),
        }
    }

    /// Canonical listener URL
    ///
    /// Reports the bound port while running.
    pub fn url(&self) -> Option<String> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        let bound_port = self.local_addr().map(|addr| addr.port());
        config.listen.url(config.is_secure(), bound_port)
    }

    /// Configured listen address (host)
    pub fn address(&self) -> Option<String> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listen
            .address()
    }

    /// Configured listen socket (port or descriptor)
    pub fn socket(&self) -> Option<ListenSocket> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listen
            .socket()
    }

    /// Address of the bound socket while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.local_addr)
    }

    pub fn name(&self) -> String {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .name
            .clone()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ServiceConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, new_state: ServiceState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}

impl Drop for HttpService {
    fn drop(&mut self) {
        if let Some(cancel) = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
        if let Some(listening) = self
            .listening
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listening.scope.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("url", &self.url())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InterceptorConfig, JwtConfig, ListenConfig};
    use crate::endpoint::handler_fn;
    use indexmap::IndexMap;
    use serde_json::json;

    fn local_config() -> ServiceConfig {
        ServiceConfig {
            listen: ListenConfig {
                address: Some("127.0.0.1".to_string()),
                ..ListenConfig::port(0)
            },
            ..ServiceConfig::default()
        }
    }

    fn echo() -> Arc<dyn Handler> {
        handler_fn(|message| async move { Ok(Some(message)) })
    }

    #[test]
    fn test_new_service_is_stopped() {
        let service = HttpService::new(local_config()).unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.local_addr().is_none());
        assert_eq!(service.url().as_deref(), Some("http://127.0.0.1:0"));
        assert_eq!(service.address().as_deref(), Some("127.0.0.1"));
        assert_eq!(service.socket(), Some(ListenSocket::Port(0)));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = local_config();
        config.key = Some("key.pem".to_string());
        assert!(HttpService::new(config).is_err());
    }

    #[test]
    fn test_register_handler_connects_endpoint() {
        let mut config = local_config();
        config.endpoints.insert(
            "/s1/:key".to_string(),
            EndpointConfig {
                connected: Some("echo".to_string()),
                ..EndpointConfig::default()
            },
        );
        let service = HttpService::new(config).unwrap();
        assert!(service.endpoint("/s1/:key").unwrap().connected().is_none());

        service.register_handler("echo", echo()).unwrap();
        assert!(service.endpoint("/s1/:key").unwrap().connected().is_some());
    }

    #[test]
    fn test_add_and_remove_endpoint() {
        let service = HttpService::new(local_config()).unwrap();
        let endpoint = service
            .add_endpoint(
                "POST:/s2",
                EndpointConfig {
                    interceptors: vec![InterceptorConfig::of_type("ctx-body-param")],
                    ..EndpointConfig::default()
                },
            )
            .unwrap();
        assert_eq!(endpoint.method(), "POST");
        assert_eq!(endpoint.path(), "/s2");
        assert_eq!(service.endpoints().len(), 1);

        assert!(service
            .add_endpoint("POST:/s2", EndpointConfig::default())
            .is_err());

        assert!(service.remove_endpoint("POST:/s2").unwrap());
        assert!(!service.remove_endpoint("POST:/s2").unwrap());
        assert!(service.endpoints().is_empty());
    }

    #[test]
    fn test_broadcast_requires_websocket_endpoint() {
        let service = HttpService::new(local_config()).unwrap();
        service
            .add_endpoint(
                "/ws",
                EndpointConfig {
                    ws: true,
                    ..EndpointConfig::default()
                },
            )
            .unwrap();
        service
            .add_endpoint("/http", EndpointConfig::default())
            .unwrap();

        assert_eq!(service.broadcast("/ws", &json!("hi")), Some(0));
        assert_eq!(service.broadcast("/http", &json!("hi")), None);
        assert_eq!(service.broadcast("/missing", &json!("hi")), None);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let service = HttpService::new(local_config()).unwrap();

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        let addr = service.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(
            service.url(),
            Some(format!("http://127.0.0.1:{}", addr.port()))
        );

        // Second start is a no-op
        service.start().await.unwrap();
        assert_eq!(service.local_addr(), Some(addr));

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.local_addr().is_none());

        // Stopping a stopped service is a no-op
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_start_failure_sets_failed() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut config = local_config();
        config.listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            retry_attempts: Some(0),
            ..ListenConfig::port(port)
        };
        let service = HttpService::new(config).unwrap();

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, ServiceError::AddressInUse(_)));
        assert_eq!(service.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_start() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut config = local_config();
        config.listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            retry_timeout_ms: 60_000,
            ..ListenConfig::port(port)
        };
        let service = Arc::new(HttpService::new(config).unwrap());

        let starting = service.clone();
        let start = tokio::spawn(async move { starting.start().await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(service.state(), ServiceState::Starting);

        service.stop().await.unwrap();
        let result = start.await.unwrap();
        assert!(matches!(result, Err(ServiceError::Cancelled)));
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_configure_live_attributes() {
        let service = HttpService::new(local_config()).unwrap();
        let changes = service
            .configure(ConfigUpdate {
                expose_errors: Some(false),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap();
        assert!(changes.contains("expose_errors"));
        assert!(!changes.needs_restart());
        assert!(!service.config().expose_errors);

        let unchanged = service
            .configure(ConfigUpdate {
                expose_errors: Some(false),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap();
        assert!(unchanged.is_empty());
    }

    #[tokio::test]
    async fn test_configure_invalid_update_is_rejected() {
        let service = HttpService::new(local_config()).unwrap();
        let result = service
            .configure(ConfigUpdate {
                key: Some("key.pem".to_string()),
                ..ConfigUpdate::default()
            })
            .await;
        assert!(result.is_err());
        assert!(service.config().key.is_none());
    }

    #[tokio::test]
    async fn test_failed_configure_applies_nothing() {
        let service = HttpService::new(local_config()).unwrap();
        service.register_handler("echo", echo()).unwrap();

        let mut endpoints = IndexMap::new();
        endpoints.insert(
            "/s1".to_string(),
            EndpointConfig {
                connected: Some("echo".to_string()),
                interceptors: vec![InterceptorConfig {
                    headers: [("bad header".to_string(), "x".to_string())].into(),
                    ..InterceptorConfig::of_type("ctx")
                }],
                ..Default::default()
            },
        );
        let result = service
            .configure(ConfigUpdate {
                jwt: Some(JwtConfig {
                    secret: Some("s3cret".to_string()),
                    ..Default::default()
                }),
                endpoints: Some(endpoints),
                ..ConfigUpdate::default()
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Config(_))));
        assert!(service.config().jwt.is_none());
        assert!(!service.jwt.is_configured());
        assert!(service.endpoints().is_empty());
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_endpoint_path() {
        let service = HttpService::new(local_config()).unwrap();
        let mut endpoints = IndexMap::new();
        endpoints.insert(
            "bad".to_string(),
            EndpointConfig {
                path: Some("relative".to_string()),
                ..Default::default()
            },
        );
        let result = service
            .configure(ConfigUpdate {
                jwt: Some(JwtConfig {
                    secret: Some("s3cret".to_string()),
                    ..Default::default()
                }),
                endpoints: Some(endpoints),
                ..ConfigUpdate::default()
            })
            .await;

        assert!(result.is_err());
        assert!(service.config().jwt.is_none());
        assert!(!service.jwt.is_configured());
    }

    #[tokio::test]
    async fn test_configure_listen_restarts_running_service() {
        let service = HttpService::new(local_config()).unwrap();
        service.start().await.unwrap();
        let first = service.local_addr().unwrap();

        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = free.local_addr().unwrap().port();
        drop(free);

        let changes = service
            .configure(ConfigUpdate {
                listen: Some(ListenConfig {
                    address: Some("127.0.0.1".to_string()),
                    ..ListenConfig::port(port)
                }),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap();
        assert!(changes.needs_restart());
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(service.local_addr().unwrap().port(), port);
        assert_ne!(service.local_addr(), Some(first));

        service.stop().await.unwrap();
    }

    #[test]
    fn test_status_when_stopped() {
        let service = HttpService::new(local_config()).unwrap();
        let status = service.status();
        assert_eq!(status.state, ServiceState::Stopped);
        assert_eq!(status.uptime_secs, 0);
        assert_eq!(status.open_connections, 0);
        assert_eq!(status.total_requests, 0);
    }
}
