//! Request context carried through an interceptor chain

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::ServiceError;
use crate::jwt::Claims;

/// What the context was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A single HTTP request/response exchange
    Request,
    /// One inbound message on an upgraded WebSocket
    Message,
}

/// Response written by an interceptor
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain text reply
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut reply = Self::new(status);
        reply.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        reply.body = Bytes::from(body.into());
        reply
    }
}

/// Request/response pair seen by interceptors
#[derive(Debug, Clone)]
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: HashMap<String, String>,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    claims: Option<Claims>,
    reply: Option<Reply>,
    transport: Transport,
}

impl Context {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            params: HashMap::new(),
            body,
            remote_addr: None,
            claims: None,
            reply: None,
            transport: Transport::Request,
        }
    }

    /// Context for one message on a socket opened by this (upgrade) request
    pub fn for_message(&self) -> Self {
        Self {
            body: Bytes::new(),
            reply: None,
            transport: Transport::Message,
            ..self.clone()
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Path parameters extracted by the router
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Path parameters as a JSON object
    pub fn params_value(&self) -> Value {
        let map: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Media type of the request body without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        self.header(http::header::CONTENT_TYPE.as_str()).map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Whether the request body has the given media type
    pub fn is_content_type(&self, mime: &str) -> bool {
        self.content_type()
            .map(|ct| ct.eq_ignore_ascii_case(mime))
            .unwrap_or(false)
    }

    /// Abort the chain with an explicit status
    ///
    /// Interceptors return the error instead of calling `next`.
    pub fn fail(&self, status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError::Rejected {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// Claims of the verified bearer token
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub fn set_claims(&mut self, claims: Claims) {
        self.claims = Some(claims);
    }

    /// Write the response; later writes replace earlier ones
    pub fn respond(&mut self, reply: Reply) {
        self.reply = Some(reply);
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }
}
