//! Authorization operations over the ambient [`Snapshot`].
//!
//! Two families, deliberately kept apart:
//!
//! - **checks** (`current_user`, `has_any_role`, `has_all_roles`, `has_roles`,
//!   `lookup_extra`) never fail. Without a snapshot they return `false`,
//!   `None`, or an all-`false` map, so they can drive plain branching.
//! - **verifies** (`verify_has_any_role`, `verify_has_all_roles`) gate a
//!   pipeline. They return [`AuthError::Unauthenticated`] when no snapshot is
//!   attached and [`AuthError::PermissionDenied`] when the roles fall short,
//!   so `?` short-circuits the rest of the chain.
//!
//! Every free function reads the snapshot at its own call site. The same
//! operations are available against an explicit [`Context`] through
//! [`SnapshotAccess`].

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{Context, ContextExt, Scoped};
use crate::error::{AuthError, ContextError};
use crate::types::{RoleRequirement, Snapshot, User};

/// Reserved context key the snapshot is bound under.
///
/// Snapshot extras live inside the snapshot, so no extras key can collide
/// with it.
pub const SYSTEM_CONTEXT_KEY: &str = "ST_SYSTEM_CONTEXT";

/// Runs `future` with `snapshot` attached as the active authorization context.
///
/// This is the hook the transport layer calls once per authenticated request.
pub fn attach_snapshot<F: Future>(future: F, snapshot: Snapshot) -> Scoped<F> {
    debug!(
        user_id = snapshot.user().id,
        account = %snapshot.user().account,
        roles = ?snapshot.roles(),
        "attaching system-context"
    );
    future.with_snapshot(snapshot)
}

// ---------------------------------------------------------------------------
// SnapshotAccess
// ---------------------------------------------------------------------------

/// Authorization operations against a source of at most one [`Snapshot`].
pub trait SnapshotAccess {
    /// The active snapshot, or `None` for an anonymous chain.
    fn snapshot(&self) -> Option<Arc<Snapshot>>;

    /// The snapshot's user, or `None` for an anonymous chain.
    #[must_use]
    fn user(&self) -> Option<User> {
        self.snapshot().map(|snapshot| snapshot.user().clone())
    }

    /// True iff a snapshot is present and holds at least one of `required`.
    #[must_use]
    fn has_any_role<I, R>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        self.snapshot()
            .is_some_and(|snapshot| snapshot.has_any_role(required))
    }

    /// True iff a snapshot is present and holds every one of `required`.
    #[must_use]
    fn has_all_roles<I, R>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        self.snapshot()
            .is_some_and(|snapshot| snapshot.has_all_roles(required))
    }

    /// Membership per requested role; every role maps to `false` without a snapshot.
    #[must_use]
    fn has_roles<I, R>(&self, roles: I) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        match self.snapshot() {
            Some(snapshot) => snapshot.has_roles(roles),
            None => roles
                .into_iter()
                .map(|role| (role.as_ref().to_string(), false))
                .collect(),
        }
    }

    /// Gate on a role requirement.
    ///
    /// # Errors
    ///
    /// [`AuthError::Unauthenticated`] without a snapshot,
    /// [`AuthError::PermissionDenied`] when the requirement is not met.
    fn verify_roles<I, R>(&self, requirement: RoleRequirement, required: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        let required: Vec<String> = required
            .into_iter()
            .map(|role| role.as_ref().to_string())
            .collect();

        let Some(snapshot) = self.snapshot() else {
            warn!(%requirement, ?required, "verify failed: without system-context");
            return Err(AuthError::Unauthenticated);
        };

        if snapshot.satisfies(requirement, &required) {
            Ok(())
        } else {
            warn!(
                user_id = snapshot.user().id,
                %requirement,
                ?required,
                held = ?snapshot.roles(),
                "verify failed: permission denied"
            );
            Err(AuthError::PermissionDenied {
                requirement,
                required,
            })
        }
    }

    /// # Errors
    ///
    /// See [`SnapshotAccess::verify_roles`].
    fn verify_has_any_role<I, R>(&self, required: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        self.verify_roles(RoleRequirement::Any, required)
    }

    /// # Errors
    ///
    /// See [`SnapshotAccess::verify_roles`].
    fn verify_has_all_roles<I, R>(&self, required: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        self.verify_roles(RoleRequirement::All, required)
    }

    /// Extras value for `key` as a `V`, or `None` when there is no snapshot,
    /// no such key, or the stored value has another type.
    fn extra<V>(&self, key: &str) -> Option<V>
    where
        V: Any + Send + Sync + Clone,
    {
        match self.try_extra(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "extras lookup ignored");
                None
            }
        }
    }

    /// Like [`SnapshotAccess::extra`], reporting a type mismatch.
    ///
    /// # Errors
    ///
    /// [`ContextError::TypeMismatch`] when the key holds another type.
    fn try_extra<V>(&self, key: &str) -> Result<Option<V>, ContextError>
    where
        V: Any + Send + Sync + Clone,
    {
        match self.snapshot() {
            None => Ok(None),
            Some(snapshot) => Ok(snapshot.extras().try_get::<V>(key)?.cloned()),
        }
    }
}

impl SnapshotAccess for Context {
    fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.get::<Snapshot>(SYSTEM_CONTEXT_KEY)
    }
}

// ---------------------------------------------------------------------------
// Ambient operations
// ---------------------------------------------------------------------------

/// The snapshot attached to the calling chain, if any. Never fails.
#[must_use]
pub fn current_snapshot() -> Option<Arc<Snapshot>> {
    Context::current().snapshot()
}

/// The authenticated user of the calling chain, if any. Never fails.
#[must_use]
pub fn current_user() -> Option<User> {
    Context::current().user()
}

/// True iff a snapshot is attached and holds at least one of `required`.
#[must_use]
pub fn has_any_role<I, R>(required: I) -> bool
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    Context::current().has_any_role(required)
}

/// True iff a snapshot is attached and holds every one of `required`.
#[must_use]
pub fn has_all_roles<I, R>(required: I) -> bool
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    Context::current().has_all_roles(required)
}

/// Membership of each role in the attached snapshot.
#[must_use]
pub fn has_roles<I, R>(roles: I) -> BTreeMap<String, bool>
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    Context::current().has_roles(roles)
}

/// # Errors
///
/// [`AuthError::Unauthenticated`] without a snapshot,
/// [`AuthError::PermissionDenied`] when none of `required` is held.
pub fn verify_has_any_role<I, R>(required: I) -> Result<(), AuthError>
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    Context::current().verify_has_any_role(required)
}

/// # Errors
///
/// [`AuthError::Unauthenticated`] without a snapshot,
/// [`AuthError::PermissionDenied`] when any of `required` is missing.
pub fn verify_has_all_roles<I, R>(required: I) -> Result<(), AuthError>
where
    I: IntoIterator<Item = R>,
    R: AsRef<str>,
{
    Context::current().verify_has_all_roles(required)
}

/// Extras value for `key` from the attached snapshot.
#[must_use]
pub fn lookup_extra<V>(key: &str) -> Option<V>
where
    V: Any + Send + Sync + Clone,
{
    Context::current().extra(key)
}

/// # Errors
///
/// [`ContextError::TypeMismatch`] when the key holds another type.
pub fn try_lookup_extra<V>(key: &str) -> Result<Option<V>, ContextError>
where
    V: Any + Send + Sync + Clone,
{
    Context::current().try_extra(key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
