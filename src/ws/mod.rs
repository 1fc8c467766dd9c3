//! WebSocket support: upgrade handshake, socket sets and connection tasks
//!
//! Upgrades are answered by the HTTP listener itself: the handshake response
//! is produced here, then the upgraded connection is wrapped with
//! `WebSocketStream::from_raw_socket` and handed to [`serve_socket`].

mod connection;
mod sockets;

pub use connection::serve_socket;
pub use sockets::{from_message, to_message, Broadcaster, SocketId, Sockets};

use bytes::Bytes;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::error::{Result, ServiceError};

/// Sub-protocol carrying the bearer token during the upgrade
pub const ACCESS_TOKEN_PROTOCOL: &str = "access_token";

/// Check if an HTTP request is a WebSocket upgrade request
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Token offered as `Sec-WebSocket-Protocol: access_token, <jwt>`
pub fn access_token(headers: &HeaderMap) -> Option<&str> {
    let offered = headers.get(SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let mut protocols = offered.split(',').map(str::trim);
    protocols.find(|p| *p == ACCESS_TOKEN_PROTOCOL)?;
    protocols.next().filter(|t| !t.is_empty())
}

/// `101 Switching Protocols` answer to an upgrade request
pub fn handshake_response(
    headers: &HeaderMap,
    protocol: Option<&str>,
) -> Result<Response<Full<Bytes>>> {
    let key = headers
        .get(SEC_WEBSOCKET_KEY)
        .ok_or_else(|| ServiceError::BadRequest("missing Sec-WebSocket-Key".to_string()))?;
    let accept = derive_accept_key(key.as_bytes());

    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, HeaderValue::from_static("websocket"))
        .header(CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(SEC_WEBSOCKET_ACCEPT, accept);
    if let Some(protocol) = protocol {
        builder = builder.header(SEC_WEBSOCKET_PROTOCOL, protocol);
    }

    builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| ServiceError::Other(format!("failed to build handshake response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_is_websocket_upgrade() {
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
        assert!(is_websocket_upgrade(&headers(&[("upgrade", "WebSocket")])));
        assert!(!is_websocket_upgrade(&headers(&[("upgrade", "h2c")])));
    }

    #[test]
    fn test_access_token() {
        let h = headers(&[("sec-websocket-protocol", "access_token, abc.def.ghi")]);
        assert_eq!(access_token(&h), Some("abc.def.ghi"));

        let h = headers(&[("sec-websocket-protocol", "chat")]);
        assert_eq!(access_token(&h), None);

        let h = headers(&[("sec-websocket-protocol", "access_token")]);
        assert_eq!(access_token(&h), None);

        assert_eq!(access_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_handshake_response() {
        // Sample key and accept value from RFC 6455 section 1.3
        let h = headers(&[("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")]);
        let response = handshake_response(&h, Some(ACCESS_TOKEN_PROTOCOL)).unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            response.headers()[SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(response.headers()[SEC_WEBSOCKET_PROTOCOL], "access_token");
    }

    #[test]
    fn test_handshake_requires_key() {
        assert!(handshake_response(&HeaderMap::new(), None).is_err());
    }
}
