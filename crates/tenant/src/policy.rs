//! Route policy
//!
//! An explicit table deciding which routes run without a tenant. Rules are
//! checked in order and the first match wins. Anything unmatched requires a
//! tenant context.
//!
//! Patterns support:
//!   - Exact: `/health`
//!   - Parameters: `/api/admin/tenants/:id`
//!   - Single wildcard: `/static/*`
//!   - Double wildcard: `/api/admin/**` (matches any depth)

use axum::http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Tenant,
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    pub pattern: String,
    /// Empty matches every method
    pub methods: Vec<Method>,
    pub access: RouteAccess,
}

#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    rules: Vec<RouteRule>,
}

impl RoutePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public(self, pattern: &str) -> Self {
        self.rule(pattern, &[], RouteAccess::Public)
    }

    pub fn tenant(self, pattern: &str) -> Self {
        self.rule(pattern, &[], RouteAccess::Tenant)
    }

    pub fn rule(mut self, pattern: &str, methods: &[Method], access: RouteAccess) -> Self {
        self.rules.push(RouteRule {
            pattern: pattern.to_string(),
            methods: methods.to_vec(),
            access,
        });
        self
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn access(&self, method: &Method, path: &str) -> RouteAccess {
        self.rules
            .iter()
            .find(|rule| {
                (rule.methods.is_empty() || rule.methods.contains(method))
                    && match_path(&rule.pattern, path)
            })
            .map(|rule| rule.access)
            .unwrap_or(RouteAccess::Tenant)
    }
}

fn match_path(pattern: &str, path: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut ri = 0;
    for pp in pattern_parts {
        if pp == "**" {
            return true;
        }
        let Some(segment) = path_parts.get(ri) else {
            return false;
        };
        if pp != "*" && !pp.starts_with(':') && pp != *segment {
            return false;
        }
        ri += 1;
    }

    ri == path_parts.len()
}
