//! Path patterns: `/users/:id` style templates compiled to regexes
//!
//! Supported segments:
//! ```text
//! /literal       exact match
//! /:name         one segment, captured as `name`
//! /files/*       rest of the path, captured as `*`
//! ```

use regex::Regex;
use std::collections::HashMap;

/// A compiled path template
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    /// Parameter names in declaration order
    keys: Vec<String>,
}

impl PathPattern {
    /// Compile a path template
    pub fn parse(input: &str) -> Result<Self, String> {
        if !input.starts_with('/') {
            return Err(format!("path '{}' must start with '/'", input));
        }

        let segments: Vec<&str> = input.trim_end_matches('/').split('/').skip(1).collect();
        let mut expr = String::from("^");
        let mut keys = Vec::new();

        for (i, segment) in segments.iter().enumerate() {
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(format!("invalid parameter name ':{}' in '{}'", name, input));
                }
                if keys.iter().any(|k| k == name) {
                    return Err(format!("duplicate parameter ':{}' in '{}'", name, input));
                }
                expr.push_str("/([^/]+)");
                keys.push(name.to_string());
            } else if *segment == "*" {
                if i + 1 != segments.len() {
                    return Err(format!("wildcard must be the last segment in '{}'", input));
                }
                expr.push_str("(?:/(.*))?");
                keys.push("*".to_string());
            } else {
                expr.push('/');
                expr.push_str(&regex::escape(segment));
            }
        }
        expr.push_str("/?$");

        let regex = Regex::new(&expr).map_err(|e| format!("invalid path '{}': {}", input, e))?;

        Ok(Self {
            source: input.to_string(),
            regex,
            keys,
        })
    }

    /// Match a request path, returning the decoded parameters
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path = path.split('?').next().unwrap_or(path);
        let captures = self.regex.captures(path)?;

        let mut params = HashMap::with_capacity(self.keys.len());
        for (i, key) in self.keys.iter().enumerate() {
            let raw = captures.get(i + 1).map(|m| m.as_str()).unwrap_or("");
            let value = urlencoding::decode(raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            params.insert(key.clone(), value);
        }
        Some(params)
    }

    /// The template this pattern was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parameter names in declaration order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}
