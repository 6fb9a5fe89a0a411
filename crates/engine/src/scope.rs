//! Cancellation, deadline, and correlation data carried through one execution.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identifiers that tie log lines and results back to the triggering event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("execution was cancelled")]
    Cancelled,
    #[error("execution deadline exceeded")]
    DeadlineExceeded,
}

/// Per-execution scope: every outbound call races against its cancellation token and deadline.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    correlation: Correlation,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    /// Returns the interruption reason if the scope is already done.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `future` to completion unless the scope is cancelled or its deadline passes first.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = expired => Err(Interrupted::DeadlineExceeded),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration`, waking early with an error on cancellation or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}
