//! Role gate middleware.
//!
//! Verifies the ambient snapshot against a role requirement before the inner
//! service runs. Failures short-circuit with 401 or 403 and never reach the
//! handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use syscontext_core::{AuthError, RoleRequirement, SnapshotAccess};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// RequireRolesLayer
// ---------------------------------------------------------------------------

/// Tower layer that gates requests on the roles of the ambient snapshot.
///
/// Must sit inside a [`SnapshotLayer`](super::SnapshotLayer); outside of one
/// every request is unauthenticated.
#[derive(Debug, Clone)]
pub struct RequireRolesLayer {
    requirement: RoleRequirement,
    roles: Arc<[String]>,
}

impl RequireRolesLayer {
    pub fn new<I, R>(requirement: RoleRequirement, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            requirement,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Admits callers holding at least one of `roles`.
    pub fn any<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::new(RoleRequirement::Any, roles)
    }

    /// Admits callers holding every one of `roles`.
    pub fn all<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::new(RoleRequirement::All, roles)
    }
}

impl<S> Layer<S> for RequireRolesLayer {
    type Service = RequireRolesService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRolesService {
            inner,
            requirement: self.requirement,
            roles: Arc::clone(&self.roles),
        }
    }
}

// ---------------------------------------------------------------------------
// RequireRolesService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`RequireRolesLayer`].
#[derive(Debug, Clone)]
pub struct RequireRolesService<S> {
    inner: S,
    requirement: RoleRequirement,
    roles: Arc<[String]>,
}

impl<S> Service<Request<Body>> for RequireRolesService<S>
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
        let requirement = self.requirement;
        let roles = Arc::clone(&self.roles);
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = info_span!(
            "authorize",
            %requirement,
            roles = ?roles,
            path = %req.uri().path(),
            outcome = tracing::field::Empty,
        );

        Box::pin(
            async move {
                // Read at poll time, inside whatever scope encloses the gate.
                let verdict =
                    syscontext_core::Context::current().verify_roles(requirement, roles.iter());

                let outcome = match &verdict {
                    Ok(()) => "granted",
                    Err(AuthError::Unauthenticated) => "unauthenticated",
                    Err(AuthError::PermissionDenied { .. }) => "denied",
                };
                tracing::Span::current().record("outcome", outcome);
                metrics::counter!(
                    "syscontext_authorization_total",
                    "requirement" => requirement.to_string(),
                    "outcome" => outcome
                )
                .increment(1);

                match verdict {
                    Ok(()) => inner.call(req).await,
                    Err(err) => Ok(ApiError::from(err).into_response()),
                }
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::convert::Infallible;

    use axum::http::StatusCode;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use syscontext_core::{ContextExt, Snapshot, User};
    use tower::ServiceExt;

    use super::*;

    /// Always answers 200.
    #[derive(Clone)]
    struct Ok200;

    impl Service<Request<Body>> for Ok200 {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            Box::pin(async { Ok(StatusCode::OK.into_response()) })
        }
    }

    fn tester() -> Snapshot {
        Snapshot::new(User::new(0, "tester", "Tester"), ["ADMIN", "COMMON", "TESTER"])
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/admin").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn grants_when_all_roles_held() {
        let svc = RequireRolesLayer::all(["COMMON", "ADMIN"]).layer(Ok200);
        let response = svc.oneshot(request()).with_snapshot(tester()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_without_snapshot_as_unauthorized() {
        let svc = RequireRolesLayer::any(["ADMIN"]).layer(Ok200);
        let response = svc.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_missing_role_as_forbidden() {
        let svc = RequireRolesLayer::all(["NOT_EXISTS", "ADMIN"]).layer(Ok200);
        let response = svc.oneshot(request()).with_snapshot(tester()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn any_requirement_needs_only_one_role() {
        let svc = RequireRolesLayer::any(["NOT_EXISTS", "TESTER"]).layer(Ok200);
        let response = svc.oneshot(request()).with_snapshot(tester()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn outcome_counts(snapshotter: &Snapshotter) -> BTreeMap<String, u64> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| {
                let key = key.key();
                if key.name() != "syscontext_authorization_total" {
                    return None;
                }
                let outcome = key.labels().find(|label| label.key() == "outcome")?;
                match value {
                    DebugValue::Counter(count) => Some((outcome.value().to_string(), count)),
                    _ => None,
                }
            })
            .collect()
    }

    #[test]
    fn counts_each_outcome_under_its_label() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let svc = RequireRolesLayer::all(["ADMIN"]).layer(Ok200);
                let granted = svc.clone().oneshot(request()).with_snapshot(tester());
                assert_eq!(granted.await.unwrap().status(), StatusCode::OK);

                let anonymous = svc.clone().oneshot(request());
                assert_eq!(anonymous.await.unwrap().status(), StatusCode::UNAUTHORIZED);

                let common = Snapshot::new(User::new(1, "joe", "Joe"), ["COMMON"]);
                let denied = svc.oneshot(request()).with_snapshot(common);
                assert_eq!(denied.await.unwrap().status(), StatusCode::FORBIDDEN);
            });
        });

        let counts = outcome_counts(&snapshotter);
        assert_eq!(
            counts,
            BTreeMap::from([
                ("denied".to_string(), 1),
                ("granted".to_string(), 1),
                ("unauthenticated".to_string(), 1),
            ])
        );
    }
}
