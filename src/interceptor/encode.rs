//! Response encoder: writes the chain result as the HTTP response

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use std::collections::HashMap;

use super::{Context, Interceptor, Next, Reply, Transport};
use crate::config::InterceptorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServiceError};

/// Encode a chain result: strings as text, everything else as JSON
pub fn encode_value(value: Option<&Value>, overrides: &HeaderMap) -> Result<Reply> {
    let mut reply = match value {
        None => Reply::new(StatusCode::OK),
        Some(Value::String(s)) => Reply::text(StatusCode::OK, s.clone()),
        Some(other) => {
            let mut reply = Reply::new(StatusCode::OK);
            reply
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            reply.body = Bytes::from(serde_json::to_vec(other)?);
            reply
        }
    };

    for (name, value) in overrides {
        reply.headers.insert(name.clone(), value.clone());
    }
    Ok(reply)
}

/// Parse configured header overrides
pub(crate) fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ServiceError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ServiceError::Config(format!("invalid value for header '{}': {}", name, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// `ctx` interceptor: calls the rest of the chain and encodes its result
pub struct ResponseEncoder {
    headers: HeaderMap,
}

impl ResponseEncoder {
    pub fn new(config: &InterceptorConfig) -> Result<Self> {
        Ok(Self {
            headers: parse_headers(&config.headers)?,
        })
    }
}

#[async_trait]
impl Interceptor for ResponseEncoder {
    async fn receive(
        &self,
        _endpoint: &Endpoint,
        next: Next<'_>,
        ctx: &mut Context,
        message: Value,
    ) -> Result<Option<Value>> {
        let result = next.run(ctx, message).await?;
        if ctx.transport() == Transport::Request {
            ctx.respond(encode_value(result.as_ref(), &self.headers)?);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "ctx"
    }
}
