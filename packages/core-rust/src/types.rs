//! Snapshot data: the user, the role set, and type-erased extras.

use std::any::{type_name, Any};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Authenticated user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Numeric user identifier.
    pub id: i64,
    /// Login account name.
    pub account: String,
    /// Display name.
    pub name: String,
}

impl User {
    #[must_use]
    pub fn new(id: i64, account: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            account: account.into(),
            name: name.into(),
        }
    }
}

/// Whether a role check needs any one of the required roles or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleRequirement {
    /// At least one required role must be held.
    Any,
    /// Every required role must be held.
    All,
}

impl fmt::Display for RoleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleRequirement::Any => f.write_str("any"),
            RoleRequirement::All => f.write_str("all"),
        }
    }
}

/// Open-ended, request-scoped values carried next to identity and roles.
///
/// Values are stored type-erased and recovered with a runtime type check;
/// asking for the wrong type never reinterprets memory.
#[derive(Clone, Default)]
pub struct Extras {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Extras {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value for `key`.
    pub fn insert<V>(&mut self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Builder form of [`Extras::insert`].
    #[must_use]
    pub fn with<V>(mut self, key: impl Into<String>, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        self.insert(key, value);
        self
    }

    /// Returns the value for `key` if present and of type `V`.
    #[must_use]
    pub fn get<V>(&self, key: &str) -> Option<&V>
    where
        V: Any + Send + Sync,
    {
        self.entries.get(key)?.downcast_ref::<V>()
    }

    /// Returns the value for `key`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::TypeMismatch`] when the key holds another type.
    pub fn try_get<V>(&self, key: &str) -> Result<Option<&V>, ContextError>
    where
        V: Any + Send + Sync,
    {
        match self.entries.get(key) {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<V>()
                .map(Some)
                .ok_or_else(|| ContextError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<V>(),
                }),
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// Immutable authorization data bound to one call chain.
///
/// Never mutated after construction: [`Snapshot::with_extra`] and
/// [`Snapshot::with_roles`] return new snapshots.
#[derive(Debug, Clone)]
pub struct Snapshot {
    user: User,
    roles: BTreeSet<String>,
    extras: Extras,
}

impl Snapshot {
    /// Creates a snapshot with no extras. An empty role set is allowed.
    pub fn new<I, R>(user: User, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            user,
            roles: roles.into_iter().map(Into::into).collect(),
            extras: Extras::new(),
        }
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    #[must_use]
    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    /// Returns a copy of this snapshot with `key` → `value` added to extras.
    #[must_use]
    pub fn with_extra<V>(&self, key: impl Into<String>, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        let mut next = self.clone();
        next.extras.insert(key, value);
        next
    }

    /// Returns a copy of this snapshot with its extras replaced.
    #[must_use]
    pub fn with_extras(&self, extras: Extras) -> Self {
        Self {
            extras,
            ..self.clone()
        }
    }

    /// Returns a copy of this snapshot with its role set replaced.
    #[must_use]
    pub fn with_roles<I, R>(&self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when at least one of `required` is held. False for an empty `required`.
    pub fn has_any_role<I, R>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        required.into_iter().any(|role| self.has_role(role.as_ref()))
    }

    /// True when every one of `required` is held. True for an empty `required`.
    pub fn has_all_roles<I, R>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        required.into_iter().all(|role| self.has_role(role.as_ref()))
    }

    /// Membership of each requested role.
    pub fn has_roles<I, R>(&self, roles: I) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        roles
            .into_iter()
            .map(|role| {
                let role = role.as_ref();
                (role.to_string(), self.has_role(role))
            })
            .collect()
    }

    /// Whether the roles satisfy `required` under `requirement`.
    pub fn satisfies<I, R>(&self, requirement: RoleRequirement, required: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        match requirement {
            RoleRequirement::Any => self.has_any_role(required),
            RoleRequirement::All => self.has_all_roles(required),
        }
    }
}
