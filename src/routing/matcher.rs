//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive)
//! - Match path prefix (case-sensitive)
//! - Match request method against an allowed set
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec)
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex in the match path; rewrites run after a match

use axum::body::Body;
use axum::http::{Method, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header, ignoring any port suffix.
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
    fn matches(&self, req: &Request<Body>) -> bool {
        req.headers()
            .get("host")
            .and_then(|h| h.to_str().ok())
            .map(|h| {
                let host = h.split(':').next().unwrap_or(h);
                host.eq_ignore_ascii_case(&self.expected_host)
            })
            .unwrap_or(false)
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
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path().starts_with(&self.prefix)
    }
}

/// Matches the request method against an allowed set.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    allowed: Vec<Method>,
}

impl MethodMatcher {
    /// Unparseable method names are dropped; validation reports them.
    pub fn new(methods: &[String]) -> Self {
        Self {
            allowed: methods
                .iter()
                .filter_map(|m| m.to_uppercase().parse().ok())
                .collect(),
        }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.allowed.iter().any(|m| m == req.method())
    }
}

/// Combines multiple matchers with AND semantics.
///
/// An empty matcher list is a wildcard: it matches every request.
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
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}
