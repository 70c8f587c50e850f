//! `syscontext` core: request-scoped authorization context for async call chains.
//!
//! A transport layer attaches a [`Snapshot`] (user, roles, extras) to the
//! future that serves a request; any code running inside that future can then
//! ask who the caller is and whether they hold the roles an operation needs,
//! without threading the snapshot through every signature.

pub mod context;
pub mod error;
pub mod system_context;
pub mod types;

pub use context::{spawn_with_context, with_context, Context, ContextExt, ContextValue, Scoped};
pub use error::{AuthError, ContextError};
pub use system_context::{
    attach_snapshot, current_snapshot, current_user, has_all_roles, has_any_role, has_roles,
    lookup_extra, try_lookup_extra, verify_has_all_roles, verify_has_any_role, SnapshotAccess,
    SYSTEM_CONTEXT_KEY,
};
pub use types::{Extras, RoleRequirement, Snapshot, User};
