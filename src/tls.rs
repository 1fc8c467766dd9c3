//! TLS termination: rustls acceptor built from the service `key`/`cert`

use crate::error::{Result, ServiceError};
use rustls::ServerConfig;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from PEM key and certificate files
pub fn build_tls_acceptor(key_file: &str, cert_file: &str) -> Result<TlsAcceptor> {
    let server_config = build_server_config(Path::new(key_file), Path::new(cert_file))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn build_server_config(key_path: &Path, cert_path: &Path) -> Result<ServerConfig> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        ServiceError::Tls(format!(
            "Failed to open certificate file {}: {}",
            cert_path.display(),
            e
        ))
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ServiceError::Tls(format!("Failed to parse certificate: {}", e)))?;

    if certs.is_empty() {
        return Err(ServiceError::Tls(format!(
            "No certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        ServiceError::Tls(format!(
            "Failed to open key file {}: {}",
            key_path.display(),
            e
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| ServiceError::Tls(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| {
            ServiceError::Tls(format!("No private key found in {}", key_path.display()))
        })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServiceError::Tls(format!("TLS configuration error: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}
