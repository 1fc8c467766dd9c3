//! JWT verification: bearer extraction, signature and claim checks
//!
//! Verification keys come from the service `jwt` configuration: a PEM
//! public key (RSA, EC or Ed25519) or a shared HMAC secret. Keys live in a
//! [`JwtKeys`] slot so a configuration change applies without a restart.

use arc_swap::ArcSwapOption;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::JwtConfig;
use crate::error::{Result, ServiceError};

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];
const EC_ALGORITHMS: &[Algorithm] = &[Algorithm::ES256, Algorithm::ES384];
const ED_ALGORITHMS: &[Algorithm] = &[Algorithm::EdDSA];
const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Decoded token claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Granted entitlements (array or comma separated string in the token)
    #[serde(default, deserialize_with = "entitlements")]
    pub entitlements: Vec<String>,

    /// Every other claim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Whether every entitlement in `required` was granted
    pub fn has_entitlements(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.entitlements.contains(r))
    }
}

fn entitlements<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::List(list)) => list,
        Some(Raw::Csv(csv)) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => Vec::new(),
    })
}

/// Verifies signed tokens against one key
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish()
    }
}

impl JwtVerifier {
    /// Build from configuration; `Ok(None)` when no key is configured
    pub fn from_config(config: &JwtConfig) -> Result<Option<Self>> {
        if let Some(secret) = &config.secret {
            if secret.is_empty() {
                return Err(ServiceError::Config("jwt secret cannot be empty".to_string()));
            }
            return Ok(Some(Self::from_secret(secret)));
        }

        let pem = match (&config.public, &config.public_file) {
            (Some(pem), _) => pem.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ServiceError::Config(format!("Failed to read jwt public key {}: {}", path, e))
            })?,
            (None, None) => return Ok(None),
        };
        Self::from_public_pem(pem.as_bytes()).map(Some)
    }

    /// Verifier for a PEM encoded public key
    pub fn from_public_pem(pem: &[u8]) -> Result<Self> {
        if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
            return Ok(Self::new(key, RSA_ALGORITHMS));
        }
        if let Ok(key) = DecodingKey::from_ec_pem(pem) {
            return Ok(Self::new(key, EC_ALGORITHMS));
        }
        if let Ok(key) = DecodingKey::from_ed_pem(pem) {
            return Ok(Self::new(key, ED_ALGORITHMS));
        }
        Err(ServiceError::Config(
            "jwt public key is not a PEM encoded RSA, EC or Ed25519 key".to_string(),
        ))
    }

    /// Verifier for an HMAC shared secret
    pub fn from_secret(secret: &str) -> Self {
        Self::new(DecodingKey::from_secret(secret.as_bytes()), HMAC_ALGORITHMS)
    }

    fn new(key: DecodingKey, algorithms: &[Algorithm]) -> Self {
        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms.to_vec();
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        Self { key, validation }
    }

    /// Verify a compact serialized token and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims> {
        check_signed(token)?;
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let message = match e.kind() {
                    ErrorKind::ExpiredSignature => "jwt expired",
                    ErrorKind::ImmatureSignature => "jwt not active",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidAlgorithm => "invalid algorithm",
                    ErrorKind::InvalidIssuer => "jwt issuer invalid",
                    ErrorKind::InvalidAudience => "jwt audience invalid",
                    _ => "jwt malformed",
                };
                tracing::debug!(error = %e, "JWT verification failed");
                ServiceError::InvalidToken(message.to_string())
            })
    }
}

/// Reject tokens that are not three segments or carry no signature
fn check_signed(token: &str) -> Result<()> {
    let malformed = || ServiceError::InvalidToken("jwt malformed".to_string());

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(malformed());
    }

    let header = URL_SAFE_NO_PAD
        .decode(parts[0].trim_end_matches('='))
        .map_err(|_| malformed())?;
    let header: Value = serde_json::from_slice(&header).map_err(|_| malformed())?;
    let alg = header.get("alg").and_then(Value::as_str).unwrap_or("none");

    if alg.eq_ignore_ascii_case("none") || parts[2].is_empty() {
        return Err(ServiceError::InvalidToken(
            "jwt signature is required".to_string(),
        ));
    }
    Ok(())
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or(ServiceError::MissingToken)?;
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(ServiceError::MissingToken),
    }
}

/// Live slot holding the current verifier
#[derive(Debug, Default)]
pub struct JwtKeys {
    current: ArcSwapOption<JwtVerifier>,
}

impl JwtKeys {
    /// Slot initialized from optional configuration
    pub fn from_config(config: Option<&JwtConfig>) -> Result<Self> {
        let keys = Self::default();
        keys.update(config)?;
        Ok(keys)
    }

    /// Replace the verifier; an invalid key leaves the previous one in place
    pub fn update(&self, config: Option<&JwtConfig>) -> Result<()> {
        self.install(Self::prepare(config)?);
        Ok(())
    }

    /// Build the verifier for `config` without installing it
    pub fn prepare(config: Option<&JwtConfig>) -> Result<Option<Arc<JwtVerifier>>> {
        let verifier = match config {
            Some(config) => JwtVerifier::from_config(config)?,
            None => None,
        };
        Ok(verifier.map(Arc::new))
    }

    /// Install a verifier built by [`prepare`](Self::prepare)
    pub fn install(&self, verifier: Option<Arc<JwtVerifier>>) {
        self.current.store(verifier);
    }

    /// Whether a key is configured
    pub fn is_configured(&self) -> bool {
        self.current.load().is_some()
    }

    /// Verify with the current key
    pub fn verify(&self, token: &str) -> Result<Claims> {
        match self.current.load_full() {
            Some(verifier) => verifier.verify(token),
            None => Err(ServiceError::InvalidToken(
                "secret or public key must be provided".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-key-for-unit-tests";

    fn token(claims: Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn keys() -> JwtKeys {
        JwtKeys::from_config(Some(&JwtConfig {
            secret: Some(SECRET.to_string()),
            ..Default::default()
        }))
        .unwrap()
    }

    fn message(err: ServiceError) -> String {
        err.to_string()
    }

    #[test]
    fn test_verify_valid_token() {
        let claims = keys()
            .verify(&token(json!({"sub": "u1", "entitlements": ["a", "b"], "org": "x"})))
            .unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(claims.entitlements, vec!["a", "b"]);
        assert_eq!(claims.extra["org"], "x");
    }

    #[test]
    fn test_entitlements_comma_string() {
        let claims = keys()
            .verify(&token(json!({"entitlements": "a, b,c"})))
            .unwrap();
        assert_eq!(claims.entitlements, vec!["a", "b", "c"]);
        assert!(claims.has_entitlements(&["a".to_string(), "c".to_string()]));
        assert!(!claims.has_entitlements(&["d".to_string()]));
    }

    #[test]
    fn test_malformed() {
        let err = keys().verify("not-a-token").unwrap_err();
        assert_eq!(message(err), "jwt malformed");
        let err = keys().verify("a.b").unwrap_err();
        assert_eq!(message(err), "jwt malformed");
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#);
        let err = keys()
            .verify(&format!("{}.{}.", header, payload))
            .unwrap_err();
        assert_eq!(message(err), "jwt signature is required");
    }

    #[test]
    fn test_invalid_signature() {
        let other = encode(
            &Header::default(),
            &json!({"sub": "u1"}),
            &EncodingKey::from_secret(b"another-secret"),
        )
        .unwrap();
        let err = keys().verify(&other).unwrap_err();
        assert_eq!(message(err), "invalid signature");
    }

    #[test]
    fn test_expired() {
        let err = keys()
            .verify(&token(json!({"sub": "u1", "exp": 1_000_000})))
            .unwrap_err();
        assert_eq!(message(err), "jwt expired");
    }

    #[test]
    fn test_no_key_configured() {
        let keys = JwtKeys::default();
        assert!(!keys.is_configured());
        let err = keys.verify(&token(json!({"sub": "u1"}))).unwrap_err();
        assert_eq!(message(err), "secret or public key must be provided");
    }

    #[test]
    fn test_update_replaces_key() {
        let keys = JwtKeys::default();
        keys.update(Some(&JwtConfig {
            secret: Some(SECRET.to_string()),
            ..Default::default()
        }))
        .unwrap();
        assert!(keys.is_configured());
        keys.update(None).unwrap();
        assert!(!keys.is_configured());
    }

    #[test]
    fn test_prepare_then_install() {
        let keys = JwtKeys::default();
        let verifier = JwtKeys::prepare(Some(&JwtConfig {
            secret: Some(SECRET.to_string()),
            ..Default::default()
        }))
        .unwrap();
        assert!(verifier.is_some());
        assert!(!keys.is_configured());

        keys.install(verifier);
        assert!(keys.verify(&token(json!({"sub": "u1"}))).is_ok());
    }

    #[test]
    fn test_invalid_public_key() {
        let result = JwtVerifier::from_public_pem(b"-----BEGIN PUBLIC KEY-----\nxx\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer abc")).unwrap(), "abc");
        assert!(matches!(
            bearer_token(None),
            Err(ServiceError::MissingToken)
        ));
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer")).is_err());
        assert!(bearer_token(Some("Bearer a b")).is_err());
        assert!(bearer_token(Some("Bearer  abc")).is_err());
        assert!(bearer_token(Some("Bearer abc ")).is_err());
        assert!(bearer_token(Some(" Bearer abc")).is_err());
    }
}
