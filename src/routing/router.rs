//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Compile route configs into an immutable rule table
//! - Look up the first matching route for a request
//! - Swap the whole table atomically on reload
//!
//! # Design Decisions
//! - Rules evaluate in config-file order; first match wins
//! - Explicit no-match rather than silent default
//! - Readers load the table through ArcSwap, so a reload never exposes a
//!   partially-updated rule set

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use regex::Regex;

use crate::config::schema::{HeaderActionConfig, RouteConfig};
use crate::routing::matcher::{
    AndMatcher, HostMatcher, Matcher, MethodMatcher, PathPrefixMatcher,
};

/// What to do with one request header when forwarding.
#[derive(Debug, Clone)]
pub enum HeaderAction {
    Passthrough,
    Ignore,
    Replace { pattern: Regex, replace: String },
}

/// A compiled, immutable route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub backend_group: String,
    matcher: AndMatcher,
    /// Optional regex rewrite of path and query before forwarding.
    rewrite: Option<(Regex, String)>,
    header_actions: HashMap<String, HeaderAction>,
    header_fallback: HeaderAction,
}

impl Route {
    fn compile(config: &RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
        }
        if !config.methods.is_empty() {
            matchers.push(Box::new(MethodMatcher::new(&config.methods)));
        }

        // Validation already compiled these patterns once; a failure here
        // only drops the offending piece instead of the whole table.
        let rewrite = config.rewrite.as_ref().and_then(|r| {
            Regex::new(&r.r#match)
                .ok()
                .map(|re| (re, r.replace.clone()))
        });

        let mut header_actions = HashMap::new();
        let mut header_fallback = HeaderAction::Passthrough;
        for (name, action) in &config.headers {
            let compiled = match action {
                HeaderActionConfig::Named(kind) if kind == "ignore" => HeaderAction::Ignore,
                HeaderActionConfig::Named(_) => HeaderAction::Passthrough,
                HeaderActionConfig::Replace { r#match, replace } => match Regex::new(r#match) {
                    Ok(pattern) => HeaderAction::Replace {
                        pattern,
                        replace: replace.clone(),
                    },
                    Err(_) => HeaderAction::Ignore,
                },
            };
            if name == "$default" {
                header_fallback = compiled;
            } else {
                header_actions.insert(name.to_lowercase(), compiled);
            }
        }

        Self {
            name: config.name.clone(),
            backend_group: config.backend_group.clone(),
            matcher: AndMatcher::new(matchers),
            rewrite,
            header_actions,
            header_fallback,
        }
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.matcher.matches(req)
    }

    /// Rewrite a path-and-query string per this route's rule.
    pub fn rewrite_path(&self, path_and_query: &str) -> String {
        match &self.rewrite {
            Some((pattern, replace)) => pattern.replace(path_and_query, replace).into_owned(),
            None => path_and_query.to_string(),
        }
    }

    /// Forwarding policy for a header, by lowercase name.
    pub fn header_action(&self, name: &str) -> &HeaderAction {
        self.header_actions.get(name).unwrap_or(&self.header_fallback)
    }
}

/// Immutable, ordered rule table.
#[derive(Debug)]
pub struct RuleTable {
    routes: Vec<Arc<Route>>,
}

impl RuleTable {
    pub fn compile(configs: &[RouteConfig]) -> Self {
        Self {
            routes: configs.iter().map(|c| Arc::new(Route::compile(c))).collect(),
        }
    }

    fn resolve(&self, req: &Request<Body>) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(req)).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Shared router handle. Cheap to clone into every request task.
pub struct Router {
    table: ArcSwap<RuleTable>,
}

impl Router {
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        Self {
            table: ArcSwap::from_pointee(RuleTable::compile(configs)),
        }
    }

    /// First matching route, or `None` for a routing failure. The returned
    /// route stays valid across reloads for the life of the request.
    pub fn resolve(&self, req: &Request<Body>) -> Option<Arc<Route>> {
        self.table.load().resolve(req)
    }

    /// Swap in a freshly compiled table. In-flight resolutions keep the
    /// table they loaded.
    pub fn reload(&self, configs: &[RouteConfig]) {
        let table = RuleTable::compile(configs);
        tracing::info!(routes = table.len(), "Route table reloaded");
        self.table.store(Arc::new(table));
    }

    pub fn route_count(&self) -> usize {
        self.table.load().len()
    }
}
