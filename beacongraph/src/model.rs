// beacongraph/src/model.rs
//
// Shared domain types flowing through the pipeline: proxy-log requests,
// per-domain aggregates, and the fixed feature order of the graph store.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Request ───────────────────────────────────────────────────────────────────

/// One proxy-log entry. Immutable once parsed.
///
/// Identity is the `(time, client, url)` triple — two log lines with the same
/// triple are the same request everywhere graphs test membership, regardless
/// of the remaining fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unix timestamp, UTC milliseconds.
    pub time: i64,
    /// Elapsed time in ms.
    pub elapsed: u32,
    /// Address of the requesting client.
    pub client: String,
    /// Proxy result code (e.g. `TCP_MISS`).
    pub code: String,
    /// HTTP status.
    pub status: u16,
    /// Response size in bytes.
    pub bytes: u64,
    pub method: String,
    pub url: String,
    /// Domain name extracted from `url`.
    pub domain: String,
    /// Hierarchy code (e.g. `HIER_DIRECT`).
    pub peerstatus: String,
    /// Address the request was forwarded to.
    pub peerhost: String,
    /// Content type.
    pub content_type: String,
}

/// Stable content key for a [`Request`] — the identity triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub time: i64,
    pub client: String,
    pub url: String,
}

impl Request {
    pub fn key(&self) -> RequestKey {
        RequestKey {
            time: self.time,
            client: self.client.clone(),
            url: self.url.clone(),
        }
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.client == other.client && self.url == other.url
    }
}

impl Eq for Request {}

impl std::hash::Hash for Request {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.time.hash(state);
        self.client.hash(state);
        self.url.hash(state);
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.url, self.client)
    }
}

// ── Domain ────────────────────────────────────────────────────────────────────

/// A named aggregate of requests, built during domain aggregation.
///
/// The request set is content-unique and keeps insertion order. Two domains
/// are equal when both the name and the full request set match.
#[derive(Debug, Clone, Default)]
pub struct Domain {
    name: String,
    requests: Vec<Request>,
    seen: HashSet<RequestKey>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of aggregated requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn contains(&self, request: &Request) -> bool {
        self.seen.contains(&request.key())
    }

    /// Add a request, ignoring content duplicates. Returns true if inserted.
    pub fn insert(&mut self, request: Request) -> bool {
        if self.seen.insert(request.key()) {
            self.requests.push(request);
            true
        } else {
            false
        }
    }

    /// Union of two same-named domains. When names differ the merge is
    /// rejected and the result is a plain copy of `self`.
    pub fn merge(&self, other: &Domain) -> Domain {
        let mut out = self.clone();
        if self.name == other.name {
            for req in &other.requests {
                out.insert(req.clone());
            }
        }
        out
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.requests.len() == other.requests.len()
            && self.requests.iter().all(|r| other.contains(r))
    }
}

impl Eq for Domain {}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ── Feature order ─────────────────────────────────────────────────────────────

/// The behavioral features a request graph is built from. The order here is
/// the order graphs are persisted and fused in; it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    Time,
    OrderedTime,
    Domain,
    Url,
}

impl Feature {
    /// Fixed store/fusion order.
    pub const ALL: [Feature; 4] = [
        Feature::Time,
        Feature::OrderedTime,
        Feature::Domain,
        Feature::Url,
    ];
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::OrderedTime => write!(f, "ordered_time"),
            Self::Domain => write!(f, "domain"),
            Self::Url => write!(f, "url"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Build a request with the fields that matter in tests; the rest carry
    /// fixed proxy-log values.
    pub fn request(time: i64, client: &str, url: &str, domain: &str) -> Request {
        Request {
            time,
            elapsed: 51,
            client: client.to_string(),
            code: "TCP_MISS".to_string(),
            status: 200,
            bytes: 4575,
            method: "GET".to_string(),
            url: url.to_string(),
            domain: domain.to_string(),
            peerstatus: "HIER_DIRECT".to_string(),
            peerhost: "95.101.90.153".to_string(),
            content_type: "-".to_string(),
        }
    }
}
