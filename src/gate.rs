//! Route-level access checks.
//!
//! [`RouteTable`] maps path prefixes to the roles allowed in. [`AccessGate`]
//! evaluates it against the current session and tells the presentation
//! layer where to go when entry is refused.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{GateConfig, HomeRoute, RouteRule};
use crate::models::Role;
use crate::navigation::Navigation;
use crate::session::Session;

/// Result of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Allow,
    /// No valid session.
    Login,
    /// Signed in, but without a required role.
    Unauthorized,
}

impl GateOutcome {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }

    /// Where a refused caller should be sent.
    pub fn navigation(self) -> Option<Navigation> {
        match self {
            Self::Allow => None,
            Self::Login => Some(Navigation::Login),
            Self::Unauthorized => Some(Navigation::Unauthorized),
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Login => write!(f, "login"),
            Self::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

// =============================================================================
// RouteTable
// =============================================================================

#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    home: Vec<HomeRoute>,
    fallback_home: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

impl RouteTable {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            rules: config.routes.clone(),
            home: config.home.clone(),
            fallback_home: config.fallback_home.clone(),
        }
    }

    /// The rule with the longest prefix matching whole segments of `path`.
    pub fn rule_for(&self, path: &str) -> Option<&RouteRule> {
        let path = normalize(path);
        self.rules
            .iter()
            .filter(|rule| prefix_matches(normalize(&rule.prefix), path))
            .max_by_key(|rule| normalize(&rule.prefix).len())
    }

    /// Roles allowed on `path`. Empty means any signed-in user.
    pub fn required_roles(&self, path: &str) -> BTreeSet<Role> {
        self.rule_for(path)
            .map(|rule| rule.roles.clone())
            .unwrap_or_default()
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.rule_for(path).is_some_and(|rule| rule.public)
    }

    /// Landing page for the first home route whose role is held.
    pub fn home_for(&self, roles: &BTreeSet<Role>) -> &str {
        self.home
            .iter()
            .find(|h| roles.contains(&h.role))
            .map(|h| h.path.as_str())
            .unwrap_or(&self.fallback_home)
    }
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

// =============================================================================
// AccessGate
// =============================================================================

/// Answers "may the current user enter this route?".
#[derive(Debug, Clone)]
pub struct AccessGate {
    session: Arc<Session>,
    routes: RouteTable,
}

impl AccessGate {
    pub fn new(session: Arc<Session>, routes: RouteTable) -> Self {
        Self { session, routes }
    }

    pub fn from_config(session: Arc<Session>, config: &GateConfig) -> Self {
        Self::new(session, RouteTable::from_config(config))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Whether the user holds at least one of `required`. An empty set lets
    /// everyone in.
    pub fn can_enter(&self, required: &BTreeSet<Role>) -> bool {
        if required.is_empty() {
            return true;
        }
        let held = self.session.effective_roles();
        required.iter().any(|role| held.contains(role))
    }

    /// Session and role check, without side effects.
    pub fn check(&self, required: &BTreeSet<Role>) -> GateOutcome {
        if !self.session.has_valid_token() {
            return GateOutcome::Login;
        }
        if self.can_enter(required) {
            GateOutcome::Allow
        } else {
            GateOutcome::Unauthorized
        }
    }

    /// Check `path` against the route table and emit the matching
    /// navigation when entry is refused.
    pub fn authorize(&self, path: &str) -> GateOutcome {
        let outcome = if self.routes.is_public(path) {
            GateOutcome::Allow
        } else {
            self.check(&self.routes.required_roles(path))
        };

        if let Some(navigation) = outcome.navigation() {
            info!(path, %outcome, "Route refused");
            self.session.navigator().emit(navigation);
        } else {
            debug!(path, "Route allowed");
        }
        outcome
    }

    /// Landing page for the current user.
    pub fn home(&self) -> &str {
        self.routes.home_for(&self.session.effective_roles())
    }

    /// Send the user to their landing page, or to the sign-in screen without
    /// a valid session.
    pub fn land(&self) -> Navigation {
        let navigation = if self.session.has_valid_token() {
            Navigation::Home(self.home().to_string())
        } else {
            Navigation::Login
        };
        self.session.navigator().emit(navigation.clone());
        navigation
    }
}
