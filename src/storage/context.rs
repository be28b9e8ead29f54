//! Transaction cancellation context.
//!
//! A [`Context`] bounds the lifetime of a transaction. It carries an
//! optional cancellation token and an optional deadline; when either fires,
//! the in-flight transaction future is dropped (which rolls it back) and the
//! store returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope for store calls. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that can be cancelled through the returned token.
    pub fn cancellable() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        (Self::with_cancel(token.clone()), token)
    }

    /// A context cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            deadline: None,
        }
    }

    /// Returns a copy of this context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a copy of this context that expires at `deadline`, or at the
    /// existing deadline if that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason this context is done, if it is.
    pub fn err(&self) -> Option<Error> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(at) if at <= Instant::now() => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drives `fut` to completion unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            res = fut => res,
            _ = cancelled => Err(Error::Cancelled),
            _ = wait_deadline(self.deadline) => Err(Error::DeadlineExceeded),
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        let res = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(res, 7);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let (ctx, handle) = Context::cancellable();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                ctx.run(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                })
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
        assert!(matches!(ctx.err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_interrupts() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let res = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = Context::cancellable();
        drop(handle);
        let res = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("done")
            })
            .await;
        assert_eq!(res.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_shared_token_cancels() {
        let token = CancellationToken::new();
        let ctx = Context::with_cancel(token.child_token()).with_timeout(Duration::from_secs(10));
        assert!(ctx.err().is_none());
        token.cancel();
        assert!(matches!(ctx.err(), Some(Error::Cancelled)));
        let res = ctx.run(async { Ok(()) }).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background().with_deadline(now + Duration::from_secs(1));
        let tighter = ctx.with_deadline(now + Duration::from_secs(5));
        assert_eq!(tighter.deadline(), Some(now + Duration::from_secs(1)));
    }
}
