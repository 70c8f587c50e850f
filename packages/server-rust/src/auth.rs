//! Request authentication: turns request headers into an optional snapshot.
//!
//! Authentication here is a lookup, not a protocol. Whatever actually proves
//! a caller's identity sits behind the [`Authenticator`] trait; a request it
//! cannot resolve simply proceeds without a snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use syscontext_core::Snapshot;

use crate::config::IdentityConfig;

/// Resolves the snapshot for an incoming request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns `None` for anonymous requests.
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Snapshot>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticator backed by a fixed bearer-token table.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    table: HashMap<String, Snapshot>,
}

impl StaticTokenAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_identities(identities: &[IdentityConfig]) -> Self {
        let mut authenticator = Self::new();
        for identity in identities {
            authenticator.insert(identity.token.clone(), identity.to_snapshot());
        }
        authenticator
    }

    pub fn insert(&mut self, token: impl Into<String>, snapshot: Snapshot) {
        self.table.insert(token.into(), snapshot);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Snapshot> {
        let token = bearer_token(headers)?;
        let snapshot = self.table.get(token).cloned();
        if snapshot.is_none() {
            tracing::debug!("bearer token not recognised, treating request as anonymous");
        }
        snapshot
    }
}
