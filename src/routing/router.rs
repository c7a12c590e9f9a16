//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Return the resolved route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order; ties go to the longer prefix

use std::sync::Arc;

use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher, RouteInput};

/// A compiled route.
#[derive(Debug)]
struct Route {
    matcher: AndMatcher,
    resolved: Arc<ResolvedRoute>,
}

/// What a matched route tells the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub name: String,
    pub service: String,
    pub endpoint_class: String,
    pub path_prefix: String,
    pub strip_prefix: bool,
}

impl ResolvedRoute {
    /// Path to send upstream for `path`.
    pub fn upstream_path<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        if !self.strip_prefix {
            return path.into();
        }
        match path.strip_prefix(self.path_prefix.trim_end_matches('/')) {
            Some("") => "/".into(),
            Some(rest) if rest.starts_with('/') => rest.into(),
            Some(rest) => format!("/{}", rest).into(),
            None => path.into(),
        }
    }
}

/// Immutable table of routes, checked in order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut configs: Vec<&RouteConfig> = configs.iter().collect();
        configs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.path_prefix.len().cmp(&a.path_prefix.len()))
        });

        let routes = configs
            .into_iter()
            .map(|config| {
                let mut matchers: Vec<Box<dyn Matcher>> =
                    vec![Box::new(PathPrefixMatcher::new(config.path_prefix.clone()))];
                if let Some(host) = &config.host {
                    matchers.push(Box::new(HostMatcher::new(host.clone())));
                }
                Route {
                    matcher: AndMatcher::new(matchers),
                    resolved: Arc::new(ResolvedRoute {
                        name: config.name.clone(),
                        service: config.service.clone(),
                        endpoint_class: config.endpoint_class().to_string(),
                        path_prefix: config.path_prefix.clone(),
                        strip_prefix: config.strip_prefix,
                    }),
                }
            })
            .collect();

        Self { routes }
    }

    /// First matching route, or `None`.
    pub fn resolve(&self, input: &RouteInput<'_>) -> Option<Arc<ResolvedRoute>> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(input))
            .map(|route| route.resolved.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, prefix: &str, service: &str, priority: u32) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            host: None,
            service: service.into(),
            endpoint_class: None,
            strip_prefix: false,
            priority,
        }
    }

    fn input(path: &str) -> RouteInput<'_> {
        RouteInput { host: None, path }
    }

    #[test]
    fn longest_prefix_wins_at_equal_priority() {
        let table = RouteTable::from_config(&[
            route("all", "/", "fallback", 0),
            route("campaigns", "/campaigns", "campaigns", 0),
        ]);

        assert_eq!(table.resolve(&input("/campaigns/7")).unwrap().service, "campaigns");
        assert_eq!(table.resolve(&input("/other")).unwrap().service, "fallback");
    }

    #[test]
    fn priority_beats_prefix_length() {
        let table = RouteTable::from_config(&[
            route("specific", "/campaigns/reports", "reports", 0),
            route("campaigns", "/campaigns", "campaigns", 10),
        ]);
        assert_eq!(
            table.resolve(&input("/campaigns/reports")).unwrap().service,
            "campaigns"
        );
    }

    #[test]
    fn no_match_is_none() {
        let table = RouteTable::from_config(&[route("campaigns", "/campaigns", "campaigns", 0)]);
        assert!(table.resolve(&input("/audiences")).is_none());
    }

    #[test]
    fn host_restricts_route() {
        let mut config = route("admin", "/", "admin", 5);
        config.host = Some("admin.example.com".into());
        let table = RouteTable::from_config(&[config, route("all", "/", "public", 0)]);

        let admin = RouteInput { host: Some("admin.example.com"), path: "/x" };
        assert_eq!(table.resolve(&admin).unwrap().service, "admin");
        assert_eq!(table.resolve(&input("/x")).unwrap().service, "public");
    }

    #[test]
    fn endpoint_class_defaults_to_route_name() {
        let mut config = route("bids", "/bids", "bidding", 0);
        let table = RouteTable::from_config(&[config.clone()]);
        assert_eq!(table.resolve(&input("/bids")).unwrap().endpoint_class, "bids");

        config.endpoint_class = Some("write-heavy".into());
        let table = RouteTable::from_config(&[config]);
        assert_eq!(table.resolve(&input("/bids")).unwrap().endpoint_class, "write-heavy");
    }

    #[test]
    fn strip_prefix_rewrites_path() {
        let mut config = route("campaigns", "/api/campaigns", "campaigns", 0);
        config.strip_prefix = true;
        let table = RouteTable::from_config(&[config]);
        let resolved = table.resolve(&input("/api/campaigns/9")).unwrap();

        assert_eq!(resolved.upstream_path("/api/campaigns/9"), "/9");
        assert_eq!(resolved.upstream_path("/api/campaigns"), "/");
    }
}
