//! Socket connection task: bridges one upgraded socket to its endpoint

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::sockets::{from_message, to_message, Broadcaster, Sockets};
use crate::endpoint::Endpoint;
use crate::interceptor::Context;
use crate::router::RouteTable;

/// The endpoint currently owning a socket set
///
/// Reconfiguration rebuilds endpoints (handler, interceptor chain) but hands
/// the socket set over to the same-named successor, so the owner is looked up
/// again from the live route table instead of being fixed at upgrade time.
struct LiveEndpoint {
    name: String,
    sockets: Arc<Sockets>,
    routes: Arc<ArcSwap<RouteTable>>,
    last: Arc<Endpoint>,
}

impl LiveEndpoint {
    /// Current owner; `None` once no endpoint owns the set any more
    fn current(&mut self) -> Option<Arc<Endpoint>> {
        let endpoint = self.routes.load().websocket(&self.name)?;
        let owns = endpoint
            .sockets()
            .is_some_and(|s| Arc::ptr_eq(s, &self.sockets));
        if !owns {
            return None;
        }
        self.last = endpoint.clone();
        Some(endpoint)
    }

    /// Last owner seen
    fn last(&self) -> &Arc<Endpoint> {
        &self.last
    }
}

/// Serve an upgraded socket until the peer or `shutdown` closes it
///
/// Inbound messages run one at a time through the interceptor chain of the
/// endpoint that owns the socket when the message arrives; a returned value
/// is written back to this socket only.
pub async fn serve_socket<S>(
    stream: WebSocketStream<S>,
    endpoint: Arc<Endpoint>,
    routes: Arc<ArcSwap<RouteTable>>,
    ctx: Context,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(sockets) = endpoint.sockets().cloned() else {
        tracing::error!(endpoint = endpoint.name(), "Socket attached to an HTTP endpoint");
        return;
    };
    let mut live = LiveEndpoint {
        name: endpoint.name().to_string(),
        sockets: sockets.clone(),
        routes,
        last: endpoint,
    };

    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let close = shutdown.child_token();
    let remote_addr = ctx.remote_addr();

    let id = {
        let _order = sockets.notifications().await;
        let Some(endpoint) = live.current() else {
            tracing::debug!(endpoint = live.name, "Endpoint removed before socket attached");
            return;
        };
        let (id, first) = sockets.attach(tx, close.clone());
        tracing::debug!(
            endpoint = endpoint.name(),
            socket = id,
            remote = ?remote_addr,
            open = sockets.len(),
            "Socket attached"
        );
        if first {
            if let Some(handler) = endpoint.connected() {
                handler.opened(Broadcaster::new(sockets.clone())).await;
            }
        }
        id
    };

    let writer_close = close.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_close.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = close.cancelled() => break,
            frame = source.next() => match frame {
                Some(Ok(msg)) => {
                    if msg.is_close() {
                        break;
                    }
                    let Some(value) = from_message(&msg) else {
                        continue;
                    };
                    let Some(endpoint) = live.current() else {
                        tracing::debug!(endpoint = live.name, socket = id, "Endpoint removed");
                        break;
                    };
                    let mut message_ctx = ctx.clone();
                    match endpoint.dispatch(&mut message_ctx, value).await {
                        Ok(Some(reply)) => {
                            sockets.send_to(id, to_message(&reply));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                endpoint = endpoint.name(),
                                socket = id,
                                error = %e,
                                "Socket message rejected"
                            );
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(socket = id, error = %e, "Socket read failed");
                    break;
                }
                None => break,
            },
        }
    }

    close.cancel();
    let _ = writer.await;

    let _order = sockets.notifications().await;
    let endpoint = live.current().unwrap_or_else(|| live.last().clone());
    let last = sockets.detach(id);
    tracing::debug!(
        endpoint = endpoint.name(),
        socket = id,
        open = sockets.len(),
        "Socket detached"
    );
    if last {
        if let Some(handler) = endpoint.connected() {
            handler.closed().await;
        }
    }
}
