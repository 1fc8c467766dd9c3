//! Connected handlers: the business logic behind an endpoint

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::ws::Broadcaster;

/// Terminal stage of an endpoint's interceptor chain
///
/// HTTP endpoints call `receive` once per request. WebSocket endpoints call
/// it once per inbound message and report connection-level transitions
/// through `opened`/`closed`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a message; the returned value becomes the response
    async fn receive(&self, message: Value) -> Result<Option<Value>>;

    /// The first socket of a WebSocket endpoint was attached
    async fn opened(&self, _broadcaster: Broadcaster) {}

    /// The last socket of a WebSocket endpoint was detached
    async fn closed(&self) {}
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>>> + Send,
{
    async fn receive(&self, message: Value) -> Result<Option<Value>> {
        (self.f)(message).await
    }
}

/// Adapt an async closure into a [`Handler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
