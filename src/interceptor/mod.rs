//! Interceptor chain: composable stages in front of a connected handler
//!
//! Each interceptor receives a [`Next`] continuation standing for the rest
//! of the chain plus the handler. Calling `next.run(..)` forwards the
//! message; returning an error instead short-circuits the chain.

mod body;
mod context;
mod encode;
mod jwt;

pub use body::{decode_body, BodyDecoder, SUPPORTED_TYPES};
pub use context::{Context, Reply, Transport};
pub use encode::{encode_value, ResponseEncoder};
pub use jwt::JwtVerify;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::InterceptorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServiceError};
use crate::jwt::JwtKeys;

/// Interceptor types accepted in endpoint declarations
pub const KNOWN_INTERCEPTORS: &[&str] = &["ctx", "ctx-body-param", "ctx-jwt-verify"];

/// A single pipeline stage
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Process `message`, forwarding it with `next.run(ctx, message)` or
    /// returning early
    async fn receive(
        &self,
        endpoint: &Endpoint,
        next: Next<'_>,
        ctx: &mut Context,
        message: Value,
    ) -> Result<Option<Value>>;

    /// Interceptor type name
    fn name(&self) -> &str;
}

/// Continuation: the remaining interceptors followed by the connected handler
pub struct Next<'a> {
    endpoint: &'a Endpoint,
    chain: &'a [Arc<dyn Interceptor>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(endpoint: &'a Endpoint, chain: &'a [Arc<dyn Interceptor>]) -> Self {
        Self { endpoint, chain }
    }

    /// Invoke the rest of the chain
    pub async fn run(self, ctx: &mut Context, message: Value) -> Result<Option<Value>> {
        match self.chain.split_first() {
            Some((interceptor, rest)) => {
                interceptor
                    .receive(self.endpoint, Next::new(self.endpoint, rest), ctx, message)
                    .await
            }
            None => match self.endpoint.connected() {
                Some(handler) => handler.receive(message).await,
                None => Err(ServiceError::Handler(format!(
                    "endpoint '{}' is not connected",
                    self.endpoint.name()
                ))),
            },
        }
    }
}

/// Ordered interceptor chain, built once per configuration
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::empty()
    }
}

impl Pipeline {
    /// Build a pipeline from interceptor declarations
    pub fn from_config(configs: &[InterceptorConfig], jwt: &Arc<JwtKeys>) -> Result<Self> {
        let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(configs.len());

        for config in configs {
            let interceptor: Arc<dyn Interceptor> = match config.interceptor_type.as_str() {
                "ctx" => Arc::new(ResponseEncoder::new(config)?),
                "ctx-body-param" => Arc::new(BodyDecoder::new(config)?),
                "ctx-jwt-verify" => Arc::new(JwtVerify::new(config, jwt.clone())),
                other => {
                    return Err(ServiceError::Config(format!(
                        "Unknown interceptor type: '{}'",
                        other
                    )));
                }
            };
            interceptors.push(interceptor);
        }

        Ok(Self::new(interceptors))
    }

    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    /// Create an empty pipeline
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Run `message` through the chain into the endpoint's handler
    pub async fn run(
        &self,
        endpoint: &Endpoint,
        ctx: &mut Context,
        message: Value,
    ) -> Result<Option<Value>> {
        Next::new(endpoint, &self.interceptors).run(ctx, message).await
    }

    /// Interceptor names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Number of interceptors in the pipeline
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}
