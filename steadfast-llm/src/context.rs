//! Request-scoped cancellation and deadline propagation.
//!
//! A [`RequestContext`] travels down the middleware chain with every
//! request. It carries a [`CancellationToken`], an optional deadline, and
//! free-form labels. Middlewares derive tighter child contexts (the timeout
//! middleware) or suspend against it (rate-limit waits, retry sleeps,
//! provider I/O); a child deadline can only ever tighten the parent's.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ProviderError};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    labels: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child context whose deadline is `timeout` from now, or the
    /// parent deadline if that is tighter. Cancellation is inherited.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context with an absolute deadline. A looser deadline
    /// than the parent's is ignored; deadlines only tighten.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let tightened = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(tightened),
            labels: self.labels.clone(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` means unbounded; `Some(ZERO)`
    /// means already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// A classifiable error if the context is already finished.
    ///
    /// Cancellation maps to `network`, deadline expiry to `timeout`, so
    /// retry and metrics middlewares label both correctly.
    pub fn done(&self, provider: &str) -> Option<ClientError> {
        if self.cancel.is_cancelled() {
            return Some(ProviderError::canceled(provider).into());
        }
        if matches!(self.remaining(), Some(Duration::ZERO)) {
            return Some(ProviderError::deadline_exceeded(provider).into());
        }
        None
    }

    /// Drive `fut` to completion, aborting promptly on cancellation or
    /// deadline expiry. This is the single suspension-point helper used by
    /// every blocking primitive in the chain.
    pub async fn run<T>(
        &self,
        provider: &str,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        if let Some(err) = self.done(provider) {
            return Err(err);
        }
        let deadline = self.deadline.map(tokio::time::Instant::from_std);
        tokio::pin!(fut);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::canceled(provider).into()),
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => Err(ProviderError::deadline_exceeded(provider).into()),
            res = &mut fut => res,
        }
    }

    /// Context-aware sleep; returns early with an error when the context
    /// finishes first.
    pub async fn sleep(&self, provider: &str, duration: Duration) -> Result<(), ClientError> {
        self.run(provider, async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kind_of(err: &ClientError) -> ErrorKind {
        match err {
            ClientError::Provider(p) => p.kind,
            other => panic!("expected provider error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_aborts_promptly() {
        let ctx = RequestContext::new();
        ctx.cancel();

        let start = Instant::now();
        let result = ctx
            .run("test", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(kind_of(&result.unwrap_err()), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_deadline_aborts_with_timeout_kind() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));
        let result = ctx
            .run("test", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(kind_of(&result.unwrap_err()), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_child_deadline_never_widens() {
        let parent = RequestContext::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert!(child.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_already_expired() {
        let ctx = RequestContext::new().with_timeout(Duration::ZERO);
        let err = ctx.done("test").expect("context must be done");
        assert_eq!(kind_of(&err), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = RequestContext::new();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
