use std::future::Future;

use tokio::time::{timeout_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::error::{CollectError, Stage};

/// Deadline and cancellation signal for one collection cycle.
///
/// Every command issued during the cycle is bounded by the same deadline, so
/// the whole cycle never outlives it.
#[derive(Debug, Clone)]
pub struct CollectContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CollectContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Runs `fut` until it completes, the deadline passes or the token fires.
    pub async fn run<T, F>(&self, stage: Stage, fut: F) -> Result<T, CollectError>
    where
        F: Future<Output = Result<T, CollectError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CollectError::Cancelled { stage });
        }
        if Instant::now() >= self.deadline {
            return Err(CollectError::Timeout { stage });
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CollectError::Cancelled { stage }),
            res = timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(CollectError::Timeout { stage }),
            },
        }
    }
}
