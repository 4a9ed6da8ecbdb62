//! Bounded waits for collaborator calls.
//!
//! A stalled camera, detector or transform lookup must never stall the
//! cycle loop.  [`call_with_deadline`] races the call against a timeout and
//! a [`CancelToken`]; expiry maps to [`OdomError::Timeout`], cancellation to
//! [`OdomError::Cancelled`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fidodom_types::OdomError;
use tokio::sync::watch;
use tracing::warn;

/// A cloneable, one-way cancellation flag.
///
/// All clones observe the same flag; once cancelled it stays cancelled.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Raise the flag and wake every task waiting in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives in `self`, so this is unreachable in practice.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Await `call` for at most `timeout`, giving up early if `cancel` fires.
///
/// `label` names the call in logs and in the returned error.
///
/// # Errors
///
/// - [`OdomError::Cancelled`] if the token is (or becomes) cancelled.
/// - [`OdomError::Timeout`] if `timeout` elapses first.
/// - Whatever error `call` itself returns.
pub async fn call_with_deadline<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancelToken,
    call: F,
) -> Result<T, OdomError>
where
    F: Future<Output = Result<T, OdomError>>,
{
    if cancel.is_cancelled() {
        return Err(OdomError::Cancelled(label.to_string()));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OdomError::Cancelled(label.to_string())),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => {
                let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(call = label, timeout_ms = after_ms, "collaborator call timed out");
                Err(OdomError::Timeout {
                    call: label.to_string(),
                    after_ms,
                })
            }
        },
    }
}
