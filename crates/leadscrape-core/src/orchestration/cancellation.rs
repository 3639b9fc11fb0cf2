use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::models::CoreError;

/// Cooperative stop signal shared between a job and whoever controls it.
/// Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct TaskCancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl TaskCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.flag.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once `cancel` has been called.
    pub fn ensure_active(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::cancelled(None))
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CoreError> {
        self.run_until_cancelled(tokio::time::sleep(duration)).await
    }

    /// Drives `future` to completion, dropping it early when the token fires.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output, CoreError>
    where
        F: Future,
    {
        self.ensure_active()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CoreError::cancelled(None)),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TaskCancellationToken;

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancel() {
        let token = TaskCancellationToken::new();
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.cancel();
        });

        let started = std::time::Instant::now();
        let error = token.sleep(Duration::from_secs(30)).await.unwrap_err();
        assert!(error.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn completed_future_passes_its_output_through() {
        let token = TaskCancellationToken::new();
        let value = token.run_until_cancelled(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert!(token.ensure_active().is_ok());
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let token = TaskCancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.sleep(Duration::from_secs(30)).await.is_err());
        token.cancelled().await;
    }
}
