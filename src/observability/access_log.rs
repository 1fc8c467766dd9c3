//! Structured access log: one entry per dispatched HTTP request
//!
//! Entries are emitted on the `access_log` tracing target as JSON,
//! suitable for ingestion by log aggregation systems.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A single access log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Service name
    pub service: String,
    /// Client IP address
    pub client_ip: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// HTTP status code
    pub status: u16,
    /// Response size in bytes
    pub response_bytes: u64,
    /// Request duration in milliseconds
    pub duration_ms: u64,
    /// Endpoint that matched
    pub endpoint: Option<String>,
    /// User agent string
    pub user_agent: Option<String>,
}

/// Access log manager: counts and emits structured entries
#[derive(Debug, Default)]
pub struct AccessLog {
    total_entries: AtomicU64,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request
    pub fn start_request(&self) -> RequestTracker {
        RequestTracker {
            start: Instant::now(),
        }
    }

    /// Record and emit a log entry
    pub fn record(&self, entry: &AccessLogEntry) {
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "access_log",
            service = entry.service,
            client_ip = entry.client_ip,
            method = entry.method,
            path = entry.path,
            status = entry.status,
            duration_ms = entry.duration_ms,
            response_bytes = entry.response_bytes,
            endpoint = entry.endpoint.as_deref().unwrap_or("-"),
            "{}",
            serde_json::to_string(entry).unwrap_or_default()
        );
    }

    /// Number of recorded entries
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }
}

/// Tracks request duration
pub struct RequestTracker {
    start: Instant,
}

impl RequestTracker {
    /// Milliseconds since the request started
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Build an access log entry from the tracked request
    #[allow(clippy::too_many_arguments)]
    pub fn build_entry(
        &self,
        service: &str,
        client_ip: String,
        method: String,
        path: String,
        status: u16,
        response_bytes: u64,
        endpoint: Option<String>,
        user_agent: Option<String>,
    ) -> AccessLogEntry {
        AccessLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            service: service.to_string(),
            client_ip,
            method,
            path,
            status,
            response_bytes,
            duration_ms: self.elapsed_ms(),
            endpoint,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_entry() {
        let tracker = AccessLog::new().start_request();
        let entry = tracker.build_entry(
            "api",
            "127.0.0.1".to_string(),
            "GET".to_string(),
            "/s1/abc".to_string(),
            200,
            12,
            Some("/s1/:key".to_string()),
            None,
        );
        assert_eq!(entry.service, "api");
        assert_eq!(entry.status, 200);
        assert_eq!(entry.endpoint.as_deref(), Some("/s1/:key"));
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.timestamp).is_ok());
    }

    #[test]
    fn test_record_counts() {
        let log = AccessLog::new();
        let entry = log.start_request().build_entry(
            "api",
            "10.0.0.1".to_string(),
            "POST".to_string(),
            "/s2".to_string(),
            415,
            0,
            None,
            Some("curl/8".to_string()),
        );
        log.record(&entry);
        log.record(&entry);
        assert_eq!(log.total_entries(), 2);
    }

    #[test]
    fn test_entry_serializes() {
        let entry = AccessLog::new().start_request().build_entry(
            "api",
            "10.0.0.1".to_string(),
            "GET".to_string(),
            "/".to_string(),
            404,
            0,
            None,
            None,
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], 404);
        assert_eq!(json["path"], "/");
        assert!(json["endpoint"].is_null());
    }
}
