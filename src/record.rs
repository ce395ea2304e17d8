use std::collections::BTreeMap;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use hyper::{Version, header, http::request::Parts};
use serde::{Deserialize, Serialize};

/// One captured HTTP request, persisted as a single JSON file.
///
/// Field order here is the field order in the written file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub header: BTreeMap<String, Vec<String>>,
    pub host: String,
    pub path: String,
    pub body: String,
}

impl Record {
    pub fn capture(parts: &Parts, body: &[u8], timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            method: parts.method.to_string(),
            header: capture_headers(parts),
            host: request_host(parts),
            path: request_target(parts),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("serialize request record")
    }

    /// Decimal nanoseconds since the Unix epoch.
    pub fn file_name(&self) -> anyhow::Result<String> {
        let nanos = self.timestamp.timestamp_nanos_opt().with_context(|| {
            format!(
                "record timestamp {} is outside the nanosecond range",
                self.timestamp
            )
        })?;
        Ok(nanos.to_string())
    }
}

fn capture_headers(parts: &Parts) -> BTreeMap<String, Vec<String>> {
    let mut captured: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &parts.headers {
        if *name == header::HOST || *name == header::TRANSFER_ENCODING {
            continue;
        }
        captured
            .entry(canonical_header_key(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    captured
}

/// HTTP/2 requests carry `:scheme` and `:authority` inside the URI; only
/// `:path` is the request target. HTTP/1 absolute-form targets stay whole.
fn request_target(parts: &Parts) -> String {
    if parts.version == Version::HTTP_2 {
        return parts
            .uri
            .path_and_query()
            .map(|target| target.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned());
    }
    parts.uri.to_string()
}

fn request_host(parts: &Parts) -> String {
    if let Some(authority) = parts.uri.authority() {
        return authority.as_str().to_owned();
    }
    parts
        .headers
        .get(header::HOST)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// MIME canonical form of a header name, e.g. `x-forwarded-for` becomes
/// `X-Forwarded-For`. Names with non-token bytes are returned unchanged.
pub fn canonical_header_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_owned();
    }

    let mut canonical = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            canonical.push(ch.to_ascii_uppercase());
        } else {
            canonical.push(ch.to_ascii_lowercase());
        }
        upper = ch == '-';
    }
    canonical
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}
