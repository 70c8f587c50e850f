//! Error outcomes of the verify operations and of typed context lookups.

use crate::types::RoleRequirement;

/// Failure of an authorization gate.
///
/// Only the `verify_*` operations produce these; checks degrade to `false`
/// or `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No snapshot is attached to the calling chain.
    #[error("without system-context")]
    Unauthenticated,
    /// A snapshot is attached but its roles do not satisfy the requirement.
    #[error("verify has {requirement} roles failed: {required:?}")]
    PermissionDenied {
        requirement: RoleRequirement,
        required: Vec<String>,
    },
}

impl AuthError {
    /// HTTP-equivalent status code: 401 for missing identity, 403 otherwise.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Unauthenticated => 401,
            AuthError::PermissionDenied { .. } => 403,
        }
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, AuthError::Unauthenticated)
    }
}

/// Failure of a typed lookup in a context or in snapshot extras.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("value for key `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
}
