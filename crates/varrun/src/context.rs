//! # Call Context
//!
//! A cancellation scope with a reason attached.
//!
//! ## Philosophy
//!
//! - **Tree-Shaped**: every context except `background()` has a parent.
//!   Cancelling a parent cancels all of its descendants; cancelling a child
//!   leaves the parent alone.
//! - **Advisory**: cancelling a context only signals. Code holding the
//!   context has to watch `cancelled()` and stop on its own.
//! - **Explained**: the first `cancel` records a cause. A context cancelled
//!   through its parent reports the parent's cause.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFuture;

/// Cause recorded when a `with_timeout` context runs out of time.
pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    cause: OnceLock<String>,
    parent: Option<Context>,
}

impl Context {
    /// A root context that is never cancelled unless someone cancels it.
    pub fn background() -> Self {
        Self::from_parts(CancellationToken::new(), None)
    }

    fn from_parts(token: CancellationToken, parent: Option<Context>) -> Self {
        Self {
            inner: Arc::new(Inner { token, cause: OnceLock::new(), parent }),
        }
    }

    /// A child that ends when this context ends, or when cancelled itself.
    pub fn with_cancel(&self) -> Self {
        Self::from_parts(self.inner.token.child_token(), Some(self.clone()))
    }

    /// A child that cancels itself with `DEADLINE_EXCEEDED` after `after`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_timeout(&self, after: Duration) -> Self {
        let child = self.with_cancel();
        let watch = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => watch.cancel(DEADLINE_EXCEEDED),
                _ = watch.cancelled() => {}
            }
        });
        child
    }

    /// Cancels this context and its descendants. Only the first cause sticks.
    pub fn cancel(&self, cause: impl Into<String>) {
        if !self.inner.token.is_cancelled() {
            let _ = self.inner.cause.set(cause.into());
        }
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Completes once the context is cancelled, directly or through a parent.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn cause(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        if let Some(cause) = self.inner.cause.get() {
            return Some(cause.clone());
        }
        match &self.inner.parent {
            Some(parent) => parent.cause(),
            None => Some("cancelled".to_string()),
        }
    }

    /// True when both handles refer to the same context.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.cause())
            .finish()
    }
}
