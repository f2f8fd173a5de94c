//! Path-prefix authorization by session role

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{AttendanceError, AttendanceResult, DenyReason};
use crate::models::Role;

pub const DEFAULT_PUBLIC_PREFIXES: &[&str] = &[
    "/",
    "/login",
    "/logout",
    "/static",
    "/css",
    "/js",
    "/images",
    "/error",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    Everything,
    Prefixes(Vec<&'static str>),
}

/// Decides whether a session role may reach a request path.
///
/// Each role owns one path prefix and inherits the prefixes of every role
/// ranked below it. Admin reaches every path. The table is computed once at
/// construction; evaluating a request never mutates it.
#[derive(Debug, Clone)]
pub struct RoleAuthorizationGate {
    public_prefixes: Vec<String>,
    table: HashMap<Role, Access>,
}

impl Default for RoleAuthorizationGate {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

/// Strip query, fragment and matrix parameters, then refuse anything that
/// is not a plain absolute path. Dot segments (literal or percent-encoded)
/// and backslashes never reach prefix matching.
fn request_path(raw: &str) -> Option<&str> {
    let end = raw.find(&['?', '#', ';'][..]).unwrap_or(raw.len());
    let path = &raw[..end];
    if !path.starts_with('/') || path.contains('\\') {
        return None;
    }
    let dotted = path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        !decoded.is_empty() && decoded.chars().all(|c| c == '.')
    });
    if dotted || path.to_ascii_lowercase().contains("%2f") {
        return None;
    }
    Some(path)
}

/// Segment-aware prefix match. The root prefix matches only the root itself.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path == "/";
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl RoleAuthorizationGate {
    pub fn new(public_prefixes: Vec<String>) -> Self {
        let table = Role::ALL
            .into_iter()
            .map(|role| {
                let access = if role == Role::Admin {
                    Access::Everything
                } else {
                    Access::Prefixes(
                        Role::ALL
                            .into_iter()
                            .filter(|other| *other >= role)
                            .map(|other| other.path_prefix())
                            .collect(),
                    )
                };
                (role, access)
            })
            .collect();

        Self {
            public_prefixes,
            table,
        }
    }

    /// Prefixes a role may reach, or `None` when it reaches everything.
    pub fn prefixes_for(&self, role: Role) -> Option<&[&'static str]> {
        match self.table.get(&role) {
            Some(Access::Prefixes(prefixes)) => Some(prefixes.as_slice()),
            _ => None,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        let Some(path) = request_path(path) else {
            return false;
        };
        self.public_prefixes
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }

    /// True iff the role is known and its inherited prefixes cover the path.
    pub fn authorize(&self, path: &str, role: Option<&str>) -> bool {
        let Some(role) = role.and_then(|value| value.parse::<Role>().ok()) else {
            return false;
        };
        let Some(path) = request_path(path) else {
            return false;
        };
        match self.table.get(&role) {
            Some(Access::Everything) => true,
            Some(Access::Prefixes(prefixes)) => {
                prefixes.iter().any(|prefix| matches_prefix(path, prefix))
            }
            None => false,
        }
    }

    /// Full per-request decision. Public paths pass without a session; a
    /// missing role is rejected as unauthenticated before the role table is
    /// consulted.
    pub fn check(&self, path: &str, session_role: Option<&str>) -> AttendanceResult<()> {
        if self.is_public(path) {
            return Ok(());
        }

        let Some(role) = session_role else {
            warn!(path, reason = %DenyReason::Unauthenticated, "access denied");
            return Err(AttendanceError::AccessDenied {
                path: path.to_string(),
                role: None,
                reason: DenyReason::Unauthenticated,
            });
        };

        if self.authorize(path, Some(role)) {
            debug!(path, role, "access granted");
            return Ok(());
        }

        warn!(path, role, reason = %DenyReason::InsufficientRole, "access denied");
        Err(AttendanceError::AccessDenied {
            path: path.to_string(),
            role: Some(role.to_string()),
            reason: DenyReason::InsufficientRole,
        })
    }
}
