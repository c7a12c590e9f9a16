//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path prefix on segment boundaries (case-sensitive)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - No regex to guarantee O(n) matching
//! - Empty condition list = always matches (wildcard)

use axum::http::{header, HeaderMap, Uri};

/// The parts of a request routing looks at.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub host: Option<&'a str>,
    pub path: &'a str,
}

impl<'a> RouteInput<'a> {
    /// Take the host from the `Host` header, falling back to the URI authority.
    pub fn from_parts(uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.host());
        Self {
            host,
            path: uri.path(),
        }
    }
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, input: &RouteInput<'_>) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, input: &RouteInput<'_>) -> bool {
        input
            .host
            .map(|h| h.rsplit_once(':').map_or(h, |(name, _)| name))
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.expected_host))
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, input: &RouteInput<'_>) -> bool {
        match input.path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, input: &RouteInput<'_>) -> bool {
        self.matchers.iter().all(|m| m.matches(input))
    }
}
