//! Snapshot attachment middleware.
//!
//! Runs the inner service's whole future under the request's snapshot, so
//! every handler, gate, and helper downstream observes it through the
//! ambient context. A 401 coming back out gets a `WWW-Authenticate`
//! challenge naming the configured realm.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use syscontext_core::attach_snapshot;
use tower::{Layer, Service};

use crate::auth::Authenticator;

// ---------------------------------------------------------------------------
// SnapshotLayer
// ---------------------------------------------------------------------------

/// Tower layer that attaches the authenticated snapshot to each request chain.
#[derive(Clone)]
pub struct SnapshotLayer {
    authenticator: Arc<dyn Authenticator>,
    challenge: Option<HeaderValue>,
}

impl SnapshotLayer {
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            challenge: None,
        }
    }

    /// Adds `WWW-Authenticate: Bearer realm="<realm>"` to 401 responses.
    ///
    /// A realm that is not a valid header value is logged and ignored.
    #[must_use]
    pub fn with_realm(mut self, realm: &str) -> Self {
        match HeaderValue::from_str(&format!("Bearer realm=\"{realm}\"")) {
            Ok(value) => self.challenge = Some(value),
            Err(_) => tracing::warn!(realm, "realm is not a valid header value, challenge disabled"),
        }
        self
    }
}

impl<S> Layer<S> for SnapshotLayer {
    type Service = SnapshotService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SnapshotService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
            challenge: self.challenge.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`SnapshotLayer`].
#[derive(Clone)]
pub struct SnapshotService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
    challenge: Option<HeaderValue>,
}

impl<S> Service<Request<Body>> for SnapshotService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authenticator = Arc::clone(&self.authenticator);
        let challenge = self.challenge.clone();
        // The ready service goes into the future; a fresh clone stays behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let snapshot = authenticator.authenticate(&parts.headers).await;
            let req = Request::from_parts(parts, body);

            let result = match snapshot {
                Some(snapshot) => attach_snapshot(async move { inner.call(req).await }, snapshot).await,
                None => {
                    tracing::debug!(path = %req.uri().path(), "anonymous request");
                    inner.call(req).await
                }
            };

            result.map(|mut response| {
                if let Some(challenge) = challenge {
                    if response.status() == StatusCode::UNAUTHORIZED {
                        response
                            .headers_mut()
                            .entry(WWW_AUTHENTICATE)
                            .or_insert(challenge);
                    }
                }
                response
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
