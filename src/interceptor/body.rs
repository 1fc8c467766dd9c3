//! Body decoder: parses JSON and form bodies before the handler runs

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{Map, Value};

use super::encode::{encode_value, parse_headers};
use super::{Context, Interceptor, Next, Transport};
use crate::config::InterceptorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, ServiceError};

const APPLICATION_JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Media types the decoder accepts
pub const SUPPORTED_TYPES: &[&str] = &[APPLICATION_JSON, FORM_URLENCODED];

/// Decode the request body according to its `Content-Type`
pub fn decode_body(ctx: &Context) -> Result<Value> {
    if ctx.is_content_type(APPLICATION_JSON) {
        if ctx.body().iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(ctx.body())
            .map_err(|e| ServiceError::BadRequest(format!("invalid JSON body: {}", e)));
    }

    if ctx.is_content_type(FORM_URLENCODED) {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(ctx.body())
            .map_err(|e| ServiceError::BadRequest(format!("invalid form body: {}", e)))?;
        let map: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Ok(Value::Object(map));
    }

    Err(ServiceError::UnsupportedMediaType {
        content_type: ctx.content_type().unwrap_or_else(|| "none".to_string()),
        supported: SUPPORTED_TYPES.join(", "),
    })
}

/// `ctx-body-param` interceptor: hands the decoded body to the rest of the
/// chain and encodes its result
pub struct BodyDecoder {
    headers: HeaderMap,
}

impl BodyDecoder {
    pub fn new(config: &InterceptorConfig) -> Result<Self> {
        Ok(Self {
            headers: parse_headers(&config.headers)?,
        })
    }
}

#[async_trait]
impl Interceptor for BodyDecoder {
    async fn receive(
        &self,
        _endpoint: &Endpoint,
        next: Next<'_>,
        ctx: &mut Context,
        message: Value,
    ) -> Result<Option<Value>> {
        if ctx.transport() == Transport::Message {
            return next.run(ctx, message).await;
        }

        let decoded = decode_body(ctx)?;
        let result = next.run(ctx, decoded).await?;
        ctx.respond(encode_value(result.as_ref(), &self.headers)?);
        Ok(result)
    }

    fn name(&self) -> &str {
        "ctx-body-param"
    }
}
