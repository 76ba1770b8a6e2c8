//! Cancellable call context.
//!
//! Every operation that can block on the container engine or on a readiness
//! probe takes a [`Context`]. A context can be cancelled explicitly and can
//! carry a deadline; children inherit both and may only tighten the deadline.
//!
//! ```ignore
//! use std::time::Duration;
//! use testpod::Context;
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(30));
//! let handle = manager.provision(&ctx, request).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context-bound operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The context (or one of its parents) was cancelled.
    Cancelled,
    /// The context deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "context cancelled"),
            Interrupted::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl std::error::Error for Interrupted {}

/// Cancellation token plus optional deadline, passed by reference through
/// every blocking call.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context: never cancelled unless [`Context::cancel`] is called on it,
    /// no deadline.
    pub fn background() -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Child context that is cancelled together with `self`.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context whose deadline is `timeout` from now, or the parent's
    /// deadline if that comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the earlier of `deadline` and the parent's deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Context {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns an error immediately if the context is already done.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `fut` to completion unless the context is cancelled or its
    /// deadline passes first. The future is dropped on interruption.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Interrupted::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Interrupted::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_completes_before_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let out = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                7
            })
            .await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let out = ctx.run(tokio::time::sleep(Duration::from_secs(60))).await;
        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        let grandchild = child.child();

        let waiter = tokio::spawn(async move {
            grandchild
                .run(tokio::time::sleep(Duration::from_secs(600)))
                .await
        });
        parent.cancel();

        let res = waiter.await.expect("join");
        assert_eq!(res, Err(Interrupted::Cancelled));
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn check_reports_cancellation_first() {
        let ctx = Context::background();
        assert_eq!(ctx.check(), Ok(()));
        ctx.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }
}
