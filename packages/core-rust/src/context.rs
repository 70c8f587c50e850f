//! Ambient, immutable key-value scope carried through async call chains.
//!
//! A [`Context`] is a linked chain of bindings. Extending a context never
//! touches the receiver: it allocates a new head that points at the old chain,
//! so every clone handed out earlier keeps observing exactly what it observed
//! before. Lookups walk from the head outward and stop at the first binding
//! for the key, which is how the nearest enclosing attachment shadows the ones
//! further out.
//!
//! The ambient context is stored in a tokio task-local. It is only visible to
//! code that runs *inside* a future wrapped with [`ContextExt::with_entry`] or
//! [`ContextExt::in_context`], and the wrapper resolves its parent scope when
//! it is first polled rather than when it is built. Both properties together
//! give the scoping rules callers rely on:
//!
//! - a read observes the nearest attachment that encloses it,
//! - attachments made in sibling branches or after the read are invisible,
//! - concurrent requests never observe each other's bindings.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::iter;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use tokio::task::JoinHandle;

use crate::error::ContextError;
use crate::system_context::SYSTEM_CONTEXT_KEY;
use crate::types::Snapshot;

/// Type-erased value stored in a [`Context`] binding.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static CURRENT: Context;
}

struct Binding {
    key: String,
    value: ContextValue,
    parent: Option<Arc<Binding>>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Immutable scope chain of string keys to type-erased values.
///
/// Cloning is an `Arc` bump. An empty context is the `Default`.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Binding>>,
}

impl Context {
    /// Creates a context with no bindings.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the context ambient at the call site, or an empty one when the
    /// caller does not run inside any scope.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.try_with(Clone::clone).unwrap_or_default()
    }

    /// Returns a new context that binds `key` to `value` in front of `self`.
    #[must_use]
    pub fn with<T>(&self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.with_shared(key, Arc::new(value))
    }

    /// Like [`Context::with`], for a value that is already shared.
    #[must_use]
    pub fn with_shared(&self, key: impl Into<String>, value: ContextValue) -> Self {
        Self {
            head: Some(Arc::new(Binding {
                key: key.into(),
                value,
                parent: self.head.clone(),
            })),
        }
    }

    fn bindings(&self) -> impl Iterator<Item = &Binding> {
        iter::successors(self.head.as_deref(), |binding| binding.parent.as_deref())
    }

    fn lookup(&self, key: &str) -> Option<&ContextValue> {
        self.bindings()
            .find(|binding| binding.key == key)
            .map(|binding| &binding.value)
    }

    /// Returns the nearest value bound to `key` if it is a `T`.
    ///
    /// A binding of another type yields `None`; use [`Context::try_get`] to
    /// tell the two cases apart.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.try_get(key).ok().flatten()
    }

    /// Returns the nearest value bound to `key`, or `None` when unbound.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::TypeMismatch`] when the binding holds a value
    /// that is not a `T`.
    pub fn try_get<T>(&self, key: &str) -> Result<Option<Arc<T>>, ContextError>
    where
        T: Any + Send + Sync,
    {
        match self.lookup(key) {
            None => Ok(None),
            Some(value) => Arc::clone(value).downcast::<T>().map(Some).map_err(|_| {
                ContextError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<T>(),
                }
            }),
        }
    }

    /// Whether any binding exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Whether the context has no bindings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Distinct bound keys, nearest binding first.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for binding in self.bindings() {
            if !keys.contains(&binding.key.as_str()) {
                keys.push(&binding.key);
            }
        }
        keys
    }

    /// Runs a synchronous closure with `self` as the ambient context.
    ///
    /// The previous ambient context is restored when the closure returns.
    pub fn enter<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("keys", &self.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Scoped future
// ---------------------------------------------------------------------------

enum Scope {
    /// Extend whatever is ambient when the future is first polled.
    Extend { key: String, value: ContextValue },
    /// Fixed context, either given up front or resolved on first poll.
    Resolved(Context),
}

impl Scope {
    fn resolve(&mut self) -> Context {
        let ctx = match self {
            Scope::Resolved(ctx) => return ctx.clone(),
            Scope::Extend { key, value } => {
                Context::current().with_shared(key.clone(), Arc::clone(value))
            }
        };
        *self = Scope::Resolved(ctx.clone());
        ctx
    }
}

/// Future that runs its inner future with a context attached.
///
/// Created by [`ContextExt`]. The attached scope applies to every poll of the
/// inner future and nothing else.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Scoped<F> {
    future: Pin<Box<F>>,
    scope: Scope,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let ctx = this.scope.resolve();
        let future = this.future.as_mut();
        CURRENT.sync_scope(ctx, || future.poll(cx))
    }
}

impl<F> fmt::Debug for Scoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match &self.scope {
            Scope::Extend { key, .. } => format!("extend({key})"),
            Scope::Resolved(ctx) => format!("{ctx:?}"),
        };
        f.debug_struct("Scoped").field("scope", &scope).finish()
    }
}

/// Attaches context to any future.
pub trait ContextExt: Future + Sized {
    /// Runs `self` with the ambient context extended by `key` → `value`.
    ///
    /// The ambient context is read on first poll, so the binding stacks on
    /// top of whatever encloses the returned future at that point.
    fn with_entry<T>(self, key: impl Into<String>, value: T) -> Scoped<Self>
    where
        T: Any + Send + Sync,
    {
        Scoped {
            future: Box::pin(self),
            scope: Scope::Extend {
                key: key.into(),
                value: Arc::new(value),
            },
        }
    }

    /// Runs `self` with `ctx` as the ambient context, ignoring any enclosing one.
    fn in_context(self, ctx: Context) -> Scoped<Self> {
        Scoped {
            future: Box::pin(self),
            scope: Scope::Resolved(ctx),
        }
    }

    /// Runs `self` with `snapshot` bound under [`SYSTEM_CONTEXT_KEY`].
    fn with_snapshot(self, snapshot: Snapshot) -> Scoped<Self> {
        self.with_entry(SYSTEM_CONTEXT_KEY, snapshot)
    }
}

impl<F: Future> ContextExt for F {}

/// Runs `future` with `ctx` as its ambient context.
pub async fn with_context<F: Future>(ctx: Context, future: F) -> F::Output {
    future.in_context(ctx).await
}

/// Spawns `future` on the tokio runtime, carrying the caller's ambient context.
///
/// Task-locals do not cross `tokio::spawn` on their own.
pub fn spawn_with_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.in_context(Context::current()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "message";

    fn message_or(default: &str) -> String {
        Context::current()
            .get::<String>(KEY)
            .map_or_else(|| default.to_string(), |s| (*s).clone())
    }

    async fn hello() -> String {
        "Hello".to_string()
    }

    #[test]
    fn empty_context_has_no_bindings() {
        let ctx = Context::empty();
        assert!(ctx.is_empty());
        assert!(!ctx.contains(KEY));
        assert!(ctx.get::<String>(KEY).is_none());
        assert!(ctx.keys().is_empty());
    }

    #[test]
    fn with_does_not_mutate_receiver() {
        let base = Context::empty().with("a", 1_u32);
        let extended = base.with("b", 2_u32);

        assert!(!base.contains("b"));
        assert_eq!(*extended.get::<u32>("a").unwrap(), 1);
        assert_eq!(*extended.get::<u32>("b").unwrap(), 2);
    }

    #[test]
    fn nearest_binding_shadows_outer() {
        let ctx = Context::empty()
            .with(KEY, "World".to_string())
            .with(KEY, "Reactor".to_string());

        assert_eq!(*ctx.get::<String>(KEY).unwrap(), "Reactor");
        assert_eq!(ctx.keys(), vec![KEY]);
    }

    #[test]
    fn keys_are_nearest_first() {
        let ctx = Context::empty().with("a", 1_u8).with("b", 2_u8).with("a", 3_u8);
        assert_eq!(ctx.keys(), vec!["a", "b"]);
    }

    #[test]
    fn type_mismatch_is_none_for_get_and_error_for_try_get() {
        let ctx = Context::empty().with(KEY, 42_i32);

        assert!(ctx.get::<String>(KEY).is_none());
        let err = ctx.try_get::<String>(KEY).unwrap_err();
        assert!(matches!(err, ContextError::TypeMismatch { ref key, .. } if key == KEY));
        assert_eq!(ctx.try_get::<String>("missing").unwrap(), None);
    }

    #[test]
    fn current_is_empty_outside_any_scope() {
        assert!(Context::current().is_empty());
    }

    #[test]
    fn enter_sets_and_restores_ambient_context() {
        let ctx = Context::empty().with(KEY, "World".to_string());
        let seen = ctx.enter(|| message_or("Stranger"));
        assert_eq!(seen, "World");
        assert_eq!(message_or("Stranger"), "Stranger");
    }

    #[tokio::test]
    async fn read_inside_attached_future() {
        let r = async { format!("{} {}", hello().await, message_or("Stranger")) }
            .with_entry(KEY, "World".to_string())
            .await;
        assert_eq!(r, "Hello World");
    }

    #[tokio::test]
    async fn attachment_is_invisible_after_its_future_completes() {
        let greeting = hello().with_entry(KEY, "World".to_string());
        let r = async move { format!("{} {}", greeting.await, message_or("Stranger")) }.await;
        assert_eq!(r, "Hello Stranger");
    }

    #[tokio::test]
    async fn unattached_context_value_is_never_observed() {
        let r = async {
            // Building a context value does not attach it.
            let _detached = Context::current().with(KEY, "Hello".to_string());
            message_or("Default")
        }
        .await;
        assert_eq!(r, "Default");
    }

    #[tokio::test]
    async fn closest_enclosing_attachment_wins() {
        let r = async { format!("{} {}", hello().await, message_or("Stranger")) }
            .with_entry(KEY, "Reactor".to_string())
            .with_entry(KEY, "World".to_string())
            .await;
        assert_eq!(r, "Hello Reactor");
    }

    #[tokio::test]
    async fn each_step_observes_its_own_nearest_attachment() {
        let inner = async { format!("{} {}", hello().await, message_or("?")) }
            .with_entry(KEY, "Reactor".to_string());
        let r = async move { format!("{} {}", inner.await, message_or("?")) }
            .with_entry(KEY, "World".to_string())
            .await;
        assert_eq!(r, "Hello Reactor World");
    }

    #[tokio::test]
    async fn nested_attachment_only_affects_its_own_branch() {
        let r = async {
            let s = format!("{} {}", hello().await, message_or("?"));
            let s = async move { format!("{s} {}", message_or("?")) }
                .with_entry(KEY, "Reactor".to_string())
                .await;
            format!("{s} {}", message_or("?"))
        }
        .with_entry(KEY, "World".to_string())
        .await;
        assert_eq!(r, "Hello World Reactor World");
    }

    #[tokio::test]
    async fn parent_scope_is_resolved_on_first_poll() {
        // Built outside any scope, awaited inside one.
        let read_both = async {
            let ctx = Context::current();
            (ctx.get::<u32>("outer").map(|v| *v), ctx.get::<u32>("inner").map(|v| *v))
        }
        .with_entry("inner", 2_u32);

        let r = read_both.with_entry("outer", 1_u32).await;
        assert_eq!(r, (Some(1), Some(2)));
    }

    #[tokio::test]
    async fn in_context_replaces_enclosing_scope() {
        let r = async { (message_or("none"), Context::current().contains("other")) }
            .in_context(Context::empty().with(KEY, "Replaced".to_string()))
            .with_entry("other", 1_u8)
            .await;
        assert_eq!(r, ("Replaced".to_string(), false));
    }

    #[tokio::test]
    async fn concurrent_branches_do_not_observe_each_other() {
        async fn read_after_yield() -> String {
            tokio::task::yield_now().await;
            message_or("none")
        }

        let left = read_after_yield().with_entry(KEY, "left".to_string());
        let right = read_after_yield().with_entry(KEY, "right".to_string());
        let (l, r) = tokio::join!(left, right);

        assert_eq!(l, "left");
        assert_eq!(r, "right");
        assert_eq!(message_or("none"), "none");
    }

    #[tokio::test]
    async fn spawn_with_context_carries_ambient_context() {
        let (carried, plain) = async {
            let carried = spawn_with_context(async { message_or("none") });
            let plain = tokio::spawn(async { message_or("none") });
            (carried.await.unwrap(), plain.await.unwrap())
        }
        .with_entry(KEY, "World".to_string())
        .await;

        assert_eq!(carried, "World");
        assert_eq!(plain, "none");
    }

    #[tokio::test]
    async fn with_context_runs_future_under_given_context() {
        let ctx = Context::empty().with(KEY, "World".to_string());
        let r = with_context(ctx, async { message_or("none") }).await;
        assert_eq!(r, "World");
    }

    #[tokio::test]
    async fn correlation_id_is_read_where_the_request_is_built() {
        const CORRELATION_ID: &str = "reactive.http.library.correlationId";

        async fn put(url: &str, data: impl Future<Output = String>) -> (u16, String) {
            let body = data.await;
            let header = Context::current().get::<String>(CORRELATION_ID);
            let line = match header {
                Some(id) => format!("PUT <{body}> sent to {url} with header X-Correlation-ID = {id}"),
                None => format!("PUT <{body}> sent to {url}"),
            };
            (200, line)
        }

        let (status, line) = put("www.example.com", async { "Walter".to_string() })
            .with_entry(CORRELATION_ID, "2-1111-3333".to_string())
            .await;

        assert!(status < 300);
        assert_eq!(
            line,
            "PUT <Walter> sent to www.example.com with header X-Correlation-ID = 2-1111-3333"
        );
    }

    #[tokio::test]
    async fn dropping_a_pending_attachment_leaves_nothing_behind() {
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let mut pending = Box::pin(
            async move {
                flag.store(
                    Context::current().contains("k"),
                    std::sync::atomic::Ordering::SeqCst,
                );
                std::future::pending::<()>().await;
            }
            .with_entry("k", 1_u8),
        );

        tokio::select! {
            biased;
            () = &mut pending => unreachable!("pending future completed"),
            () = std::future::ready(()) => {}
        }
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));

        drop(pending);
        assert!(!Context::current().contains("k"));
    }
}
