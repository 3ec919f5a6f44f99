// beacongraph/src/logparse.rs
//
// Proxy log ingestion. Two wire formats:
//   squid — native access.log lines (see the squid LogFormat docs)
//   json  — gateway export, one object per line (@timestamp, tk_* fields)
//
// Malformed lines are logged and skipped; a log is never rejected outright
// for a bad line.

use std::collections::HashMap;
use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::model::Request;

/// Full-line match for the squid access.log format.
const SQUID_REGEX: &str = r"^(\d+\.\d+)\s+(\d+)\s(\S+)\s(\S+)/(\d+)\s(\d+)\s(\S+)\s(\S+)\s-\s(\S+)/(\S+)\s(\S+).*$";

const JSON_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Squid,
    Json,
}

#[derive(Debug, Error)]
pub enum LogParseError {
    #[error("line did not match the {format:?} format: {line}")]
    Malformed { format: LogFormat, line: String },

    #[error("bad timestamp {0}")]
    BadTimestamp(String),

    #[error("cannot extract a domain from url {0}")]
    BadUrl(String),
}

pub struct LogParser {
    squid: Regex,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser {
    pub fn new() -> Self {
        Self {
            squid: Regex::new(SQUID_REGEX).expect("squid regex compiles"),
        }
    }

    /// Parse every line of a log, skipping malformed ones with a warning.
    pub fn parse_reader<R: BufRead>(
        &self,
        reader: R,
        format: LogFormat,
    ) -> std::io::Result<Vec<Request>> {
        let mut requests = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match self.parse_line(&line, format) {
                Ok(request) => requests.push(request),
                Err(e) => warn!("skipping log line: {e}"),
            }
        }
        Ok(requests)
    }

    pub fn parse_line(&self, line: &str, format: LogFormat) -> Result<Request, LogParseError> {
        match format {
            LogFormat::Squid => self.parse_squid(line),
            LogFormat::Json => parse_json(line),
        }
    }

    fn parse_squid(&self, line: &str) -> Result<Request, LogParseError> {
        let caps = self
            .squid
            .captures(line)
            .ok_or_else(|| LogParseError::Malformed {
                format: LogFormat::Squid,
                line: line.to_string(),
            })?;
        let seconds: f64 = caps[1]
            .parse()
            .map_err(|_| LogParseError::BadTimestamp(caps[1].to_string()))?;
        let url = caps[8].to_string();
        Ok(Request {
            time: (seconds * 1000.0).round() as i64,
            elapsed: caps[2].parse().unwrap_or(0),
            client: caps[3].to_string(),
            code: caps[4].to_string(),
            status: caps[5].parse().unwrap_or(0),
            bytes: caps[6].parse().unwrap_or(0),
            method: caps[7].to_string(),
            domain: domain_of(&url)?,
            url,
            peerstatus: caps[9].to_string(),
            peerhost: caps[10].to_string(),
            content_type: caps[11].to_string(),
        })
    }
}

fn parse_json(line: &str) -> Result<Request, LogParseError> {
    let obj: serde_json::Value =
        serde_json::from_str(line).map_err(|_| LogParseError::Malformed {
            format: LogFormat::Json,
            line: line.to_string(),
        })?;
    let str_field = |name: &str| {
        obj.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };

    let stamp = obj
        .get("@timestamp")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LogParseError::BadTimestamp(line.to_string()))?;
    let time = NaiveDateTime::parse_from_str(stamp, JSON_TIMESTAMP)
        .map_err(|_| LogParseError::BadTimestamp(stamp.to_string()))?
        .and_utc()
        .timestamp_millis();

    let url = str_field("tk_url");
    Ok(Request {
        time,
        elapsed: 0,
        client: str_field("tk_client_ip"),
        code: "unknown".to_string(),
        status: 0,
        bytes: obj.get("tk_size").and_then(|v| v.as_u64()).unwrap_or(0),
        method: str_field("tk_operation"),
        domain: domain_of(&url)?,
        url,
        peerstatus: "unknown".to_string(),
        peerhost: str_field("tk_server_ip"),
        content_type: str_field("tk_mime_content"),
    })
}

/// Domain name of a request URL: scheme and port stripped, `www.` dropped.
/// Scheme-less and CONNECT-style (`tcp://`) targets are normalized first.
pub fn domain_of(raw: &str) -> Result<String, LogParseError> {
    let mut candidate = raw.to_string();
    for odd_scheme in ["tcp://", "-://"] {
        if let Some(rest) = candidate.strip_prefix(odd_scheme) {
            candidate = format!("http://{rest}");
        }
    }
    if !candidate.starts_with("http://") && !candidate.starts_with("https://") {
        candidate = format!("http://{candidate}");
    }
    let parsed = Url::parse(&candidate).map_err(|_| LogParseError::BadUrl(raw.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| LogParseError::BadUrl(raw.to_string()))?;
    Ok(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// Split a request list per client address, keeping log order.
pub fn group_by_user(requests: Vec<Request>) -> HashMap<String, Vec<Request>> {
    let mut by_user: HashMap<String, Vec<Request>> = HashMap::new();
    for request in requests {
        by_user.entry(request.client.clone()).or_default().push(request);
    }
    by_user
}

// ── Line synthesis (used by the injection tool) ───────────────────────────────

pub fn to_squid_line(request: &Request) -> String {
    format!(
        "{:.3} {} {} {}/{} {} {} {} - {}/{} {}",
        request.time as f64 / 1000.0,
        request.elapsed,
        request.client,
        request.code,
        request.status,
        request.bytes,
        request.method,
        request.url,
        request.peerstatus,
        request.peerhost,
        request.content_type,
    )
}

pub fn to_json_line(request: &Request) -> String {
    let stamp: DateTime<Utc> = DateTime::from_timestamp_millis(request.time).unwrap_or_default();
    serde_json::json!({
        "@timestamp": stamp.format(JSON_TIMESTAMP).to_string(),
        "tk_client_ip": request.client,
        "tk_operation": request.method,
        "tk_size": request.bytes,
        "tk_url": request.url,
        "tk_server_ip": request.peerhost,
        "tk_mime_content": request.content_type,
    })
    .to_string()
}
