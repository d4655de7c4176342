use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::NetworkError;

/// Cancellation and deadline for a unit of work.
///
/// Cloning a context shares its token, so cancelling any clone cancels them
/// all.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context driven by an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A child context that additionally expires after `timeout`.
    ///
    /// Cancelling the parent cancels the child, never the other way round.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels this context and every child.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), NetworkError> {
        if self.token.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(NetworkError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `future` until it completes, the context is cancelled or the
    /// deadline passes, whichever comes first.
    pub async fn run<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<NetworkError>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("Request cancelled");
                Err(NetworkError::Cancelled.into())
            }
            _ = deadline => {
                debug!("Request deadline exceeded");
                Err(NetworkError::DeadlineExceeded.into())
            }
            result = future => result,
        }
    }
}
