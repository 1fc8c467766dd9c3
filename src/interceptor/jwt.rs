//! JWT interceptor: bearer token verification and entitlement checks

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{Context, Interceptor, Next, Transport};
use crate::config::InterceptorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServiceError};
use crate::jwt::{bearer_token, JwtKeys};

/// `ctx-jwt-verify` interceptor
pub struct JwtVerify {
    keys: Arc<JwtKeys>,
    required_entitlements: Vec<String>,
}

impl JwtVerify {
    pub fn new(config: &InterceptorConfig, keys: Arc<JwtKeys>) -> Self {
        Self {
            keys,
            required_entitlements: config.required_entitlements.clone(),
        }
    }

    fn authorize(&self, ctx: &mut Context) -> Result<()> {
        // Socket messages reuse the claims verified at upgrade time
        let claims = match (ctx.transport(), ctx.claims()) {
            (Transport::Message, Some(claims)) => claims.clone(),
            _ => {
                let token = bearer_token(ctx.header("authorization"))?;
                self.keys.verify(token)?
            }
        };

        if !self.required_entitlements.is_empty()
            && !claims.has_entitlements(&self.required_entitlements)
        {
            return Err(ServiceError::InsufficientEntitlements);
        }

        ctx.set_claims(claims);
        Ok(())
    }
}

#[async_trait]
impl Interceptor for JwtVerify {
    async fn receive(
        &self,
        _endpoint: &Endpoint,
        next: Next<'_>,
        ctx: &mut Context,
        message: Value,
    ) -> Result<Option<Value>> {
        if let Err(e) = self.authorize(ctx) {
            tracing::debug!(path = ctx.path(), error = %e, "Bearer token rejected");
            return Err(e);
        }
        next.run(ctx, message).await
    }

    fn name(&self) -> &str {
        "ctx-jwt-verify"
    }
}
