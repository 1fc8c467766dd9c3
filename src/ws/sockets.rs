//! Socket sets: the live connections of one WebSocket endpoint
//!
//! Membership changes only through [`Sockets::attach`] and
//! [`Sockets::detach`], both called by the connection task that owns the
//! socket. Broadcasts iterate over a snapshot of the senders so a socket
//! closing mid-broadcast never invalidates the iteration.
//!
//! Opened and closed notifications are serialized through
//! [`Sockets::notifications`]: the membership change and its notification
//! happen under one lock, so handlers observe them in order.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Identifier of a socket within its endpoint
pub type SocketId = u64;

struct SocketHandle {
    tx: mpsc::UnboundedSender<Message>,
    close: CancellationToken,
}

/// Set of open sockets attached to a WebSocket endpoint
#[derive(Default)]
pub struct Sockets {
    next_id: AtomicU64,
    members: Mutex<HashMap<SocketId, SocketHandle>>,
    notify: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Sockets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sockets").field("len", &self.len()).finish()
    }
}

impl Sockets {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self) -> MutexGuard<'_, HashMap<SocketId, SocketHandle>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold while attaching or detaching and notifying the handler
    pub(crate) async fn notifications(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.notify.lock().await
    }

    /// Add a socket; returns its id and whether the set was empty before
    pub(crate) fn attach(
        &self,
        tx: mpsc::UnboundedSender<Message>,
        close: CancellationToken,
    ) -> (SocketId, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut members = self.members();
        let first = members.is_empty();
        members.insert(id, SocketHandle { tx, close });
        (id, first)
    }

    /// Remove a socket; returns true when this emptied the set
    pub(crate) fn detach(&self, id: SocketId) -> bool {
        let mut members = self.members();
        members.remove(&id).is_some() && members.is_empty()
    }

    /// Number of open sockets
    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Whether at least one socket is open
    pub fn is_open(&self) -> bool {
        !self.is_empty()
    }

    /// Queue `message` on every open socket; returns how many accepted it
    pub fn broadcast(&self, message: Message) -> usize {
        let senders: Vec<(SocketId, mpsc::UnboundedSender<Message>)> = self
            .members()
            .iter()
            .map(|(id, h)| (*id, h.tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in senders {
            match tx.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::debug!(socket = id, "Broadcast skipped closed socket"),
            }
        }
        delivered
    }

    /// Queue `message` on a single socket
    pub(crate) fn send_to(&self, id: SocketId, message: Message) -> bool {
        let tx = self.members().get(&id).map(|h| h.tx.clone());
        tx.map(|tx| tx.send(message).is_ok()).unwrap_or(false)
    }

    /// Forcibly terminate every open socket
    pub fn close_all(&self) -> usize {
        let members = self.members();
        for handle in members.values() {
            handle.close.cancel();
        }
        members.len()
    }
}

/// Handle given to connected handlers for pushing data to every socket
#[derive(Clone, Debug)]
pub struct Broadcaster {
    sockets: Arc<Sockets>,
}

impl Broadcaster {
    pub fn new(sockets: Arc<Sockets>) -> Self {
        Self { sockets }
    }

    /// Send a value to every open socket; returns how many accepted it
    pub fn send(&self, message: &Value) -> usize {
        self.sockets.broadcast(to_message(message))
    }

    /// Number of open sockets
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

/// Frame for an outbound value: strings verbatim, everything else as JSON
pub fn to_message(value: &Value) -> Message {
    match value {
        Value::String(s) => Message::text(s.clone()),
        other => Message::text(other.to_string()),
    }
}

/// Value for an inbound frame; `None` for control frames
pub fn from_message(message: &Message) -> Option<Value> {
    match message {
        Message::Text(text) => Some(Value::String(text.as_str().to_string())),
        Message::Binary(data) => Some(Value::String(String::from_utf8_lossy(data).into_owned())),
        _ => None,
    }
}
