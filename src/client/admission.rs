//! Pre-navigation admission checks.
//!
//! Flow Overview (per navigation):
//! `CheckLocal -> (Allow | CheckServer) -> (Allow | DenyToLogin | DenyToForbidden)`
//!
//! A route without a role requirement is allowed straight from the local
//! credential cache. Anything else asks the server who the caller is, through
//! the coordinator so renewal happens transparently. "Who are you" failures go
//! to the login view with the requested path preserved; "you may not" goes to
//! the forbidden view and never to login.

use std::sync::Arc;
use tracing::{debug, trace};
use url::form_urlencoded;

use super::{coordinator::RefreshCoordinator, error::ClientError};
use crate::identity::Role;

pub const LOGIN_VIEW: &str = "/login";
pub const FORBIDDEN_VIEW: &str = "/forbidden";
const RETURN_PARAM: &str = "returnUrl";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Public,
    Authenticated,
    /// Any of the listed roles. An empty list means authenticated only.
    Roles(Vec<Role>),
}

/// Path prefix to requirement map. Matching is per path segment and the
/// longest prefix wins; unknown paths require authentication.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: Vec<(String, Requirement)>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_route(mut self, prefix: impl Into<String>, requirement: Requirement) -> Self {
        let prefix = prefix.into();
        let prefix = match prefix.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        self.routes.retain(|(existing, _)| *existing != prefix);
        self.routes.push((prefix, requirement));
        self
    }

    #[must_use]
    pub fn requirement(&self, path: &str) -> Requirement {
        let path = strip_query(path);
        self.routes
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(Requirement::Authenticated, |(_, requirement)| {
                requirement.clone()
            })
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or_default()
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Allow,
    RedirectToLogin { return_to: String },
    RedirectToForbidden,
}

impl Admission {
    /// Where to navigate instead, if anywhere.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RedirectToLogin { return_to } => Some(login_redirect(return_to)),
            Self::RedirectToForbidden => Some(FORBIDDEN_VIEW.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionStep {
    CheckLocal,
    CheckServer,
    Allow,
    DenyToLogin,
    DenyToForbidden,
}

pub struct RouteAdmission {
    coordinator: Arc<RefreshCoordinator>,
    routes: RouteTable,
}

impl RouteAdmission {
    #[must_use]
    pub fn new(coordinator: Arc<RefreshCoordinator>, routes: RouteTable) -> Self {
        Self {
            coordinator,
            routes,
        }
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide whether navigating to `path` may proceed.
    pub async fn admit(&self, path: &str) -> Admission {
        let roles = match self.routes.requirement(path) {
            Requirement::Public => return Admission::Allow,
            Requirement::Authenticated => None,
            Requirement::Roles(roles) if roles.is_empty() => None,
            Requirement::Roles(roles) => Some(roles),
        };

        step(path, AdmissionStep::CheckLocal);
        let Some(roles) = roles else {
            if self.coordinator.session().cache().valid_token().is_some() {
                return allow(path);
            }
            step(path, AdmissionStep::CheckServer);
            return match self.coordinator.renew().await {
                Ok(_) => allow(path),
                Err(err) => deny_to_login(path, &err),
            };
        };

        step(path, AdmissionStep::CheckServer);
        match self.coordinator.fetch_me().await {
            Ok(identity) if roles.contains(&identity.role) => allow(path),
            Ok(identity) => {
                debug!(path, role = %identity.role, "role requirement not met");
                step(path, AdmissionStep::DenyToForbidden);
                Admission::RedirectToForbidden
            }
            Err(ClientError::Forbidden) => {
                step(path, AdmissionStep::DenyToForbidden);
                Admission::RedirectToForbidden
            }
            Err(err) => deny_to_login(path, &err),
        }
    }
}

fn step(path: &str, step: AdmissionStep) {
    trace!(path, ?step, "admission");
}

fn allow(path: &str) -> Admission {
    step(path, AdmissionStep::Allow);
    Admission::Allow
}

fn deny_to_login(path: &str, err: &ClientError) -> Admission {
    debug!(path, "no session: {err}");
    step(path, AdmissionStep::DenyToLogin);
    Admission::RedirectToLogin {
        return_to: path.to_string(),
    }
}

/// Login view location that carries `path` for the post-login return.
#[must_use]
pub fn login_redirect(path: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(path.as_bytes()).collect();
    format!("{LOGIN_VIEW}?{RETURN_PARAM}={encoded}")
}

/// Recover the return path from a login view query string. Only same-origin
/// relative paths are accepted.
#[must_use]
pub fn return_path(query: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == RETURN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|path| {
            path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && !path.chars().any(char::is_control)
        })
}
