//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing groups)
//! - Validate value ranges (timeouts > 0, weights > 0)
//! - Compile-check rewrite and header patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{HeaderActionConfig, ProxyConfig};

/// A single semantic problem found in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. "routes[0].backend_group".
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration. Returns every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "listener.bind_address".into(),
            message: format!("not a socket address: {}", config.listener.bind_address),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError {
            field: "listener.max_connections".into(),
            message: "must be at least 1".into(),
        });
    }

    let mut groups: HashSet<&str> = HashSet::new();
    let mut seen_names: HashSet<&str> = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        groups.insert(backend.group.as_str());
        if !seen_names.insert(backend.name.as_str()) {
            errors.push(ValidationError {
                field: format!("backends[{i}].name"),
                message: format!("duplicate backend name: {}", backend.name),
            });
        }
        if backend.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: format!("backends[{i}].address"),
                message: format!("not a socket address: {}", backend.address),
            });
        }
        if backend.weight == 0 {
            errors.push(ValidationError {
                field: format!("backends[{i}].weight"),
                message: "must be at least 1".into(),
            });
        }
        if backend.max_connections == 0 {
            errors.push(ValidationError {
                field: format!("backends[{i}].max_connections"),
                message: "must be at least 1".into(),
            });
        }
    }

    for (i, route) in config.routes.iter().enumerate() {
        if !groups.contains(route.backend_group.as_str()) {
            errors.push(ValidationError {
                field: format!("routes[{i}].backend_group"),
                message: format!("references unknown group: {}", route.backend_group),
            });
        }
        if route.host.is_none() && route.path_prefix.is_none() && route.methods.is_empty() {
            // Wildcard routes are allowed, but only as the final rule;
            // anything after one is unreachable.
            if i + 1 < config.routes.len() {
                errors.push(ValidationError {
                    field: format!("routes[{i}]"),
                    message: "wildcard route shadows all later routes".into(),
                });
            }
        }
        if let Some(rewrite) = &route.rewrite {
            if let Err(e) = regex::Regex::new(&rewrite.r#match) {
                errors.push(ValidationError {
                    field: format!("routes[{i}].rewrite.match"),
                    message: format!("invalid regex: {e}"),
                });
            }
        }
        for (name, action) in &route.headers {
            match action {
                HeaderActionConfig::Named(kind) => {
                    if kind != "passthrough" && kind != "ignore" {
                        errors.push(ValidationError {
                            field: format!("routes[{i}].headers.{name}"),
                            message: format!("unknown action: {kind}"),
                        });
                    }
                }
                HeaderActionConfig::Replace { r#match, .. } => {
                    if let Err(e) = regex::Regex::new(r#match) {
                        errors.push(ValidationError {
                            field: format!("routes[{i}].headers.{name}.match"),
                            message: format!("invalid regex: {e}"),
                        });
                    }
                }
            }
        }
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError {
                field: "health_check.interval_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        if config.health_check.unhealthy_threshold == 0 || config.health_check.healthy_threshold == 0
        {
            errors.push(ValidationError {
                field: "health_check".into(),
                message: "thresholds must be at least 1".into(),
            });
        }
    }

    if config.timeouts.request_secs == 0 || config.timeouts.connect_secs == 0 {
        errors.push(ValidationError {
            field: "timeouts".into(),
            message: "connect_secs and request_secs must be at least 1".into(),
        });
    }

    match config.load_balancing.algorithm.as_str() {
        "weighted" | "round_robin" | "least_connections" => {}
        other => errors.push(ValidationError {
            field: "load_balancing.algorithm".into(),
            message: format!("unknown algorithm: {other}"),
        }),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, RouteConfig, RewriteConfig};

    fn base_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends.push(BackendConfig {
            name: "b1".into(),
            group: "web".into(),
            address: "127.0.0.1:3000".into(),
            weight: 1,
            max_connections: 10,
        });
        config.routes.push(RouteConfig {
            name: "r1".into(),
            host: None,
            path_prefix: Some("/".into()),
            methods: vec![],
            backend_group: "web".into(),
            rewrite: None,
            headers: Default::default(),
        });
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn rejects_unknown_group() {
        let mut config = base_config();
        config.routes[0].backend_group = "missing".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "routes[0].backend_group"));
    }

    #[test]
    fn rejects_bad_rewrite_regex() {
        let mut config = base_config();
        config.routes[0].rewrite = Some(RewriteConfig {
            r#match: "(".into(),
            replace: "/".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field.contains("rewrite.match")));
    }

    #[test]
    fn rejects_zero_weight_and_bad_address() {
        let mut config = base_config();
        config.backends[0].weight = 0;
        config.backends[0].address = "not-an-addr".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn collects_every_error() {
        let mut config = base_config();
        config.listener.bind_address = "nope".into();
        config.routes[0].backend_group = "missing".into();
        config.load_balancing.algorithm = "bogus".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 3);
    }

    #[test]
    fn wildcard_route_must_be_last() {
        let mut config = base_config();
        config.routes[0].path_prefix = None;
        config.routes.push(RouteConfig {
            name: "r2".into(),
            host: None,
            path_prefix: Some("/api".into()),
            methods: vec![],
            backend_group: "web".into(),
            rewrite: None,
            headers: Default::default(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("shadows")));
    }
}
