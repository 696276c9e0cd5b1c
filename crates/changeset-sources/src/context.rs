//! Per-call cancellation context.
//!
//! Every adapter operation takes a [`CallContext`]. Outbound host calls are
//! raced against the context's cancellation token, so cancelling drops the
//! in-flight future instead of waiting for the network.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::HostApiError;

/// Cancellable context threaded through every changeset source call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
}

impl CallContext {
    /// Creates a context with a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context driven by an existing token.
    #[must_use]
    pub const fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Returns a child context that is cancelled with this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancels the context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs a host call, aborting it if the context is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, or a cancelled [`HostApiError`] when the
    /// context fires before the call completes.
    pub async fn run<T, F>(&self, call: F) -> Result<T, HostApiError>
    where
        F: Future<Output = Result<T, HostApiError>>,
    {
        if self.token.is_cancelled() {
            return Err(HostApiError::cancelled());
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(HostApiError::cancelled()),
            result = call => result,
        }
    }
}
