//! Per-call cancellation and deadline.
//!
//! Every network boundary in the pipeline runs through [`CallContext::run`],
//! which races the operation against the caller's cancellation token and the
//! effective deadline (the earlier of the caller's deadline and the
//! operation's own default timeout). Backoff waits go through
//! [`CallContext::sleep`] so they can be interrupted the same way.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context tied to an externally owned token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails fast if the call was cancelled or its deadline already passed.
    pub fn check(&self) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(IngestError::Timeout(Duration::ZERO));
            }
        }
        Ok(())
    }

    /// min(caller deadline, now + operation default).
    pub fn effective_deadline(&self, default_timeout: Duration) -> Instant {
        let own = Instant::now() + default_timeout;
        match self.deadline {
            Some(caller) => caller.min(own),
            None => own,
        }
    }

    /// Run `fut` until it completes, the token fires or the deadline passes.
    /// Dropping `fut` on the losing branches aborts any in-flight request.
    pub async fn run<T, F>(&self, default_timeout: Duration, fut: F) -> Result<T, IngestError>
    where
        F: Future<Output = Result<T, IngestError>>,
    {
        self.check()?;
        let deadline = self.effective_deadline(default_timeout);
        let budget = deadline.saturating_duration_since(Instant::now());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(IngestError::Timeout(budget)),
            result = fut => result,
        }
    }

    /// Cancellable sleep. Returns `Timeout` if the caller's deadline lands
    /// inside the wait.
    pub async fn sleep(&self, delay: Duration) -> Result<(), IngestError> {
        self.check()?;
        let wake = Instant::now() + delay;

        match self.deadline {
            Some(deadline) if deadline < wake => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(IngestError::Timeout(delay)),
                }
            }
            _ => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
                    _ = tokio::time::sleep_until(wake) => Ok(()),
                }
            }
        }
    }
}
