//! Entrypoint: listener binding, accept loop and request dispatch
//!
//! Binding follows an explicit retry state machine: while the configured
//! port is in use the port range (`from_port..=to_port`) is walked, then the
//! whole round is retried after `retry_timeout_ms`. A pending start stops
//! retrying once its attempt budget is spent or it is cancelled.

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{ListenConfig, ListenSocket};
use crate::error::{Result, ServiceError};
use crate::interceptor::{encode_value, Context, Reply};
use crate::jwt::JwtKeys;
use crate::observability::AccessLog;
use crate::router::RouteTable;
use crate::ws;

/// Interval between "connections still open" reports while stopping
const DRAIN_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Next step after a bind attempt found the address in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Try the next port of the range right away
    NextPort(u16),
    /// Wait, then start over at the first port
    Wait(Duration),
    /// Retry budget exhausted
    GiveUp,
}

/// Bind retry state
///
/// Each round starts at the configured port. When it is in use, the ports of
/// `from_port..=to_port` (skipping the configured one) are tried in order,
/// then the round restarts after the retry delay.
#[derive(Debug, Clone)]
pub struct BindRetry {
    configured: u16,
    port: u16,
    range: Option<(u16, u16)>,
    delay: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl BindRetry {
    pub fn new(listen: &ListenConfig, configured_port: u16) -> Self {
        let range = listen.to_port.map(|to| {
            let from = listen
                .from_port
                .unwrap_or_else(|| configured_port.saturating_add(1));
            (from, to)
        });
        Self {
            configured: configured_port,
            port: configured_port,
            range,
            delay: Duration::from_millis(listen.retry_timeout_ms),
            max_attempts: listen.retry_attempts,
            attempts: 0,
        }
    }

    /// Port for the next bind attempt
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Delayed retries performed so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn next_in_range(&self) -> Option<u16> {
        let (from, to) = self.range?;
        let mut next = if self.port == self.configured {
            from
        } else {
            self.port.checked_add(1)?
        };
        if next == self.configured {
            next = next.checked_add(1)?;
        }
        (next <= to).then_some(next)
    }

    /// Advance after an address-in-use failure
    pub fn on_address_in_use(&mut self) -> RetryAction {
        if let Some(next) = self.next_in_range() {
            self.port = next;
            return RetryAction::NextPort(next);
        }

        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return RetryAction::GiveUp;
            }
        }
        self.attempts += 1;
        self.port = self.configured;
        RetryAction::Wait(self.delay)
    }
}

fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Open the listening socket described by `listen`
///
/// `cancel` aborts a pending retry delay with [`ServiceError::Cancelled`].
pub async fn bind_listener(
    listen: &ListenConfig,
    cancel: &CancellationToken,
) -> Result<(TcpListener, SocketAddr)> {
    let port = match listen.socket() {
        Some(ListenSocket::Port(port)) => port,
        Some(ListenSocket::Fd { fd }) => return listener_from_fd(fd),
        None => {
            return Err(ServiceError::Config(
                "listen: no socket, url or descriptor configured".to_string(),
            ))
        }
    };

    let host = listen.address().unwrap_or_else(|| "0.0.0.0".to_string());
    let mut retry = BindRetry::new(listen, port);

    loop {
        let address = host_port(&host, retry.port());
        match TcpListener::bind(&address).await {
            Ok(listener) => {
                let local_addr = listener.local_addr()?;
                return Ok((listener, local_addr));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => match retry.on_address_in_use() {
                RetryAction::NextPort(next) => {
                    tracing::warn!(address = address, next_port = next, "Address in use, trying next port");
                }
                RetryAction::Wait(delay) => {
                    tracing::warn!(
                        address = address,
                        attempt = retry.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Address in use, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
                    }
                }
                RetryAction::GiveUp => return Err(ServiceError::AddressInUse(address)),
            },
            Err(e) => {
                return Err(ServiceError::Bind {
                    address,
                    source: e,
                })
            }
        }
    }
}

#[cfg(unix)]
fn listener_from_fd(fd: i32) -> Result<(TcpListener, SocketAddr)> {
    use std::os::unix::io::FromRawFd;

    if fd < 0 {
        return Err(ServiceError::Config(format!("invalid descriptor {}", fd)));
    }
    // SAFETY: the descriptor is handed over by the parent process for this
    // service to own; it is not used anywhere else in this process.
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    let bind_err = |source| ServiceError::Bind {
        address: format!("fd:{}", fd),
        source,
    };
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    let listener = TcpListener::from_std(std_listener).map_err(bind_err)?;
    let local_addr = listener.local_addr().map_err(bind_err)?;
    Ok((listener, local_addr))
}

#[cfg(not(unix))]
fn listener_from_fd(fd: i32) -> Result<(TcpListener, SocketAddr)> {
    Err(ServiceError::Config(format!(
        "listening on descriptor {} is only supported on unix",
        fd
    )))
}

/// Cancellation and bookkeeping shared by every connection of one listener
#[derive(Clone, Default)]
pub struct ConnectionScope {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

impl ConnectionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections and sockets still being served
    pub fn open_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every connection task finished, reporting progress
    pub async fn drain(&self, service: &str) {
        self.tracker.close();
        let wait = self.tracker.wait();
        tokio::pin!(wait);

        let mut report = tokio::time::interval(DRAIN_REPORT_INTERVAL);
        report.tick().await;
        loop {
            tokio::select! {
                _ = &mut wait => break,
                _ = report.tick() => {
                    let open = self.tracker.len();
                    tracing::info!(service = service, open = open, "{} connection(s) still open", open);
                }
            }
        }
    }
}

/// Shared request handling state of a service
pub struct Dispatcher {
    service: String,
    routes: Arc<ArcSwap<RouteTable>>,
    jwt: Arc<JwtKeys>,
    expose_errors: AtomicBool,
    idle_timeout_secs: AtomicU64,
    total_requests: AtomicU64,
    access_log: AccessLog,
}

impl Dispatcher {
    pub fn new(service: impl Into<String>, jwt: Arc<JwtKeys>) -> Self {
        Self {
            service: service.into(),
            routes: Arc::new(ArcSwap::from_pointee(RouteTable::default())),
            jwt,
            expose_errors: AtomicBool::new(true),
            idle_timeout_secs: AtomicU64::new(120),
            total_requests: AtomicU64::new(0),
            access_log: AccessLog::new(),
        }
    }

    /// Replace the routing table atomically
    pub fn swap_routes(&self, routes: RouteTable) {
        self.routes.store(Arc::new(routes));
    }

    /// Current routing table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    pub fn set_expose_errors(&self, expose: bool) {
        self.expose_errors.store(expose, Ordering::Relaxed);
    }

    /// Idle timeout applied to connections accepted from now on
    pub fn set_idle_timeout(&self, secs: u64) {
        self.idle_timeout_secs.store(secs, Ordering::Relaxed);
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Requests handled since the service was created
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.access_log
    }

    /// Handle one request of a connection
    ///
    /// An `Err` tells hyper to drop the connection; that is how rejected
    /// WebSocket upgrades are refused.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        scope: &ConnectionScope,
    ) -> Result<Response<Full<Bytes>>> {
        if ws::is_websocket_upgrade(req.headers()) {
            return self.upgrade(req, remote_addr, scope);
        }

        let tracker = self.access_log.start_request();
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request body");
                Bytes::new()
            }
        };

        let method = parts.method.as_str().to_string();
        let path = parts.uri.path().to_string();
        let user_agent = parts
            .headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut ctx =
            Context::new(parts.method, parts.uri, parts.headers, body).with_remote_addr(remote_addr);

        let routes = self.routes.load_full();
        let (endpoint_name, reply) = match routes.route(&method, &path) {
            Some(route) => {
                let endpoint = route.endpoint;
                ctx = ctx.with_params(route.params);
                let message = ctx.params_value();
                let reply = match endpoint.dispatch(&mut ctx, message).await {
                    Ok(value) => match ctx.take_reply() {
                        Some(reply) => Ok(reply),
                        None => encode_value(value.as_ref(), &HeaderMap::new()),
                    },
                    Err(e) => Err(e),
                };
                let reply = reply.unwrap_or_else(|e| self.error_reply(&method, &path, &e));
                (Some(endpoint.name().to_string()), reply)
            }
            None => {
                tracing::debug!(method = method, path = path, "No endpoint matched");
                (None, Reply::text(StatusCode::NOT_FOUND, ""))
            }
        };

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let entry = tracker.build_entry(
            &self.service,
            remote_addr.ip().to_string(),
            method,
            path,
            reply.status.as_u16(),
            reply.body.len() as u64,
            endpoint_name,
            user_agent,
        );
        self.access_log.record(&entry);

        Ok(into_response(reply))
    }

    /// Response for a failed chain
    fn error_reply(&self, method: &str, path: &str, error: &ServiceError) -> Reply {
        let status = error.status();
        let message = if error.is_internal() {
            tracing::error!(
                service = self.service,
                method = method,
                path = path,
                error = %error,
                "Endpoint failed"
            );
            if self.expose_errors.load(Ordering::Relaxed) {
                error.to_string()
            } else {
                "Internal Server Error".to_string()
            }
        } else {
            tracing::debug!(method = method, path = path, status = status.as_u16(), error = %error, "Request rejected");
            error.to_string()
        };

        let mut reply = Reply::text(status, message);
        if let Some(challenge) = error.www_authenticate() {
            if let Ok(value) = challenge.parse() {
                reply
                    .headers
                    .insert(http::header::WWW_AUTHENTICATE, value);
            }
        }
        reply
    }

    /// Authenticate, route and accept a WebSocket upgrade
    fn upgrade(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        scope: &ConnectionScope,
    ) -> Result<Response<Full<Bytes>>> {
        let path = req.uri().path().to_string();
        let token = ws::access_token(req.headers());

        let claims = if self.jwt.is_configured() {
            let verified = token
                .ok_or(ServiceError::MissingToken)
                .and_then(|t| self.jwt.verify(t));
            match verified {
                Ok(claims) => Some(claims),
                Err(e) => {
                    tracing::warn!(path = path, remote = %remote_addr, error = %e, "WebSocket upgrade rejected");
                    return Err(e);
                }
            }
        } else {
            None
        };

        let Some(route) = self.routes.load().route_ws(&path) else {
            tracing::debug!(path = path, "No WebSocket endpoint matched");
            return Err(ServiceError::NoMatchingRoute {
                method: "WS".to_string(),
                path,
            });
        };

        let protocol = token.map(|_| ws::ACCESS_TOKEN_PROTOCOL);
        let response = ws::handshake_response(req.headers(), protocol)?;

        let mut ctx = Context::new(
            req.method().clone(),
            req.uri().clone(),
            req.headers().clone(),
            Bytes::new(),
        )
        .with_remote_addr(remote_addr)
        .with_params(route.params);
        if let Some(claims) = claims {
            ctx.set_claims(claims);
        }
        let ctx = ctx.for_message();

        let endpoint = route.endpoint;
        let routes = self.routes.clone();
        let shutdown = scope.shutdown.clone();
        scope.tracker.spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let stream =
                        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                            .await;
                    ws::serve_socket(stream, endpoint, routes, ctx, shutdown).await;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket upgrade failed");
                }
            }
        });

        Ok(response)
    }
}

fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(reply.body));
    *response.status_mut() = reply.status;
    *response.headers_mut() = reply.headers;
    response
}

/// Accept connections until the scope is shut down
///
/// The listener is dropped, and the socket closed, when the loop ends.
pub fn spawn_accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    scope: ConnectionScope,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = scope.shutdown.cancelled() => break,
                conn = listener.accept() => match conn {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let dispatcher = dispatcher.clone();
            let tls = tls.clone();
            let conn_scope = scope.clone();
            scope.tracker.spawn(async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            serve_connection(tls_stream, remote_addr, dispatcher, conn_scope).await
                        }
                        Err(e) => {
                            tracing::debug!(remote = %remote_addr, error = %e, "TLS handshake failed");
                        }
                    },
                    None => serve_connection(stream, remote_addr, dispatcher, conn_scope).await,
                }
            });
        }
    })
}

/// Serve HTTP/1.1 on one connection, finishing in-flight requests on shutdown
async fn serve_connection<I>(
    io: I,
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    scope: ConnectionScope,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(dispatcher.idle_timeout());

    let service_dispatcher = dispatcher.clone();
    let service_scope = scope.clone();
    let service = service_fn(move |req| {
        let dispatcher = service_dispatcher.clone();
        let scope = service_scope.clone();
        async move { dispatcher.handle(req, remote_addr, &scope).await }
    });

    let conn = builder
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(remote = %remote_addr, error = %e, "Connection ended with error");
            }
        }
        _ = scope.shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(remote = %remote_addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen(from: Option<u16>, to: Option<u16>, attempts: Option<u32>) -> ListenConfig {
        ListenConfig {
            from_port: from,
            to_port: to,
            retry_attempts: attempts,
            retry_timeout_ms: 50,
            ..ListenConfig::port(8080)
        }
    }

    #[test]
    fn test_retry_walks_range_then_waits() {
        let mut retry = BindRetry::new(&listen(Some(9000), Some(9002), None), 8080);
        assert_eq!(retry.port(), 8080);
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(9000));
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(9001));
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(9002));
        assert_eq!(
            retry.on_address_in_use(),
            RetryAction::Wait(Duration::from_millis(50))
        );
        assert_eq!(retry.port(), 8080);
        assert_eq!(retry.attempts(), 1);
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(9000));
    }

    #[test]
    fn test_retry_range_skips_configured_port() {
        let mut retry = BindRetry::new(&listen(Some(8079), Some(8081), Some(0)), 8080);
        assert_eq!(retry.port(), 8080);
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(8079));
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(8081));
        assert_eq!(retry.on_address_in_use(), RetryAction::GiveUp);
    }

    #[test]
    fn test_retry_range_defaults_to_following_port() {
        let mut retry = BindRetry::new(&listen(None, Some(8081), Some(0)), 8080);
        assert_eq!(retry.on_address_in_use(), RetryAction::NextPort(8081));
        assert_eq!(retry.on_address_in_use(), RetryAction::GiveUp);
    }

    #[test]
    fn test_retry_without_range_waits() {
        let mut retry = BindRetry::new(&listen(None, None, None), 8080);
        assert_eq!(retry.port(), 8080);
        for _ in 0..5 {
            assert_eq!(
                retry.on_address_in_use(),
                RetryAction::Wait(Duration::from_millis(50))
            );
            assert_eq!(retry.port(), 8080);
        }
    }

    #[test]
    fn test_retry_gives_up_after_budget() {
        let mut retry = BindRetry::new(&listen(None, None, Some(2)), 8080);
        assert!(matches!(retry.on_address_in_use(), RetryAction::Wait(_)));
        assert!(matches!(retry.on_address_in_use(), RetryAction::Wait(_)));
        assert_eq!(retry.on_address_in_use(), RetryAction::GiveUp);
    }

    #[test]
    fn test_retry_zero_attempts_gives_up_immediately() {
        let mut retry = BindRetry::new(&listen(None, None, Some(0)), 8080);
        assert_eq!(retry.on_address_in_use(), RetryAction::GiveUp);
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("127.0.0.1", 80), "127.0.0.1:80");
        assert_eq!(host_port("::1", 80), "[::1]:80");
        assert_eq!(host_port("[::1]", 80), "[::1]:80");
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            ..ListenConfig::port(0)
        };
        let (_listener, addr) = bind_listener(&listen, &CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_moves_to_next_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            from_port: Some(port),
            to_port: Some(port.saturating_add(20)),
            retry_attempts: Some(0),
            ..ListenConfig::port(port)
        };
        let (_listener, addr) = bind_listener(&listen, &CancellationToken::new())
            .await
            .unwrap();
        assert!(addr.port() > port);
    }

    #[tokio::test]
    async fn test_bind_prefers_configured_port() {
        let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = free.local_addr().unwrap().port();
        drop(free);

        let listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            from_port: Some(port.saturating_add(1)),
            to_port: Some(port.saturating_add(20)),
            ..ListenConfig::port(port)
        };
        let (_listener, addr) = bind_listener(&listen, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(addr.port(), port);
    }

    #[tokio::test]
    async fn test_bind_conflict_gives_up() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            retry_attempts: Some(0),
            ..ListenConfig::port(port)
        };
        let err = bind_listener(&listen, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AddressInUse(_)));
    }

    #[tokio::test]
    async fn test_bind_retry_cancelled() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let listen = ListenConfig {
            address: Some("127.0.0.1".to_string()),
            retry_timeout_ms: 60_000,
            ..ListenConfig::port(port)
        };
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = bind_listener(&listen, &cancel).await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
    }

    #[tokio::test]
    async fn test_bind_without_socket() {
        let err = bind_listener(&ListenConfig::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no socket"));
    }

    #[test]
    fn test_error_reply_hides_internal_errors() {
        let dispatcher = Dispatcher::new("test", Arc::new(JwtKeys::default()));
        let err = ServiceError::Handler("db password is hunter2".to_string());

        let reply = dispatcher.error_reply("GET", "/x", &err);
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body, Bytes::from("db password is hunter2"));

        dispatcher.set_expose_errors(false);
        let reply = dispatcher.error_reply("GET", "/x", &err);
        assert_eq!(reply.body, Bytes::from("Internal Server Error"));
    }

    #[test]
    fn test_error_reply_auth_challenge() {
        let dispatcher = Dispatcher::new("test", Arc::new(JwtKeys::default()));
        let reply = dispatcher.error_reply("GET", "/x", &ServiceError::MissingToken);
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.headers[http::header::WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .starts_with("Bearer,error=\"missing_token\""));
        assert_eq!(reply.body, Bytes::from("Missing token"));
    }

    /// Serve one connection over an in-memory pipe holding a partial request
    async fn stalled_connection(idle_secs: u64) -> tokio::task::JoinHandle<()> {
        use tokio::io::AsyncWriteExt;

        let dispatcher = Arc::new(Dispatcher::new("test", Arc::new(JwtKeys::default())));
        dispatcher.set_idle_timeout(idle_secs);
        let (mut client, server) = tokio::io::duplex(1024);
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let conn = tokio::spawn(serve_connection(server, remote, dispatcher, ConnectionScope::new()));

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(client);
        });
        conn
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_read_timeout_closes_stalled_connection() {
        let conn = stalled_connection(1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(conn.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_idle_timeout_disables_header_read_timeout() {
        let conn = stalled_connection(0).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!conn.is_finished());
    }

    #[test]
    fn test_idle_timeout() {
        let dispatcher = Dispatcher::new("test", Arc::new(JwtKeys::default()));
        assert_eq!(dispatcher.idle_timeout(), Some(Duration::from_secs(120)));
        dispatcher.set_idle_timeout(0);
        assert_eq!(dispatcher.idle_timeout(), None);
    }
}
