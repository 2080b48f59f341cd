use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a future wrapped by [`cancellable_timeout`] did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    TimedOut(Duration),
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Cancelled => write!(f, "cancelled"),
            Interrupted::TimedOut(d) => write!(f, "timed out after {}s", d.as_secs_f64()),
        }
    }
}

impl std::error::Error for Interrupted {}

/// Drives a future to completion unless the token is cancelled or the optional
/// timeout elapses first. The future is dropped on interruption.
///
/// # Errors
///
/// - If the token is cancelled
/// - If the timeout is reached
pub async fn cancellable_timeout<T>(
    duration: Option<Duration>,
    token: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, Interrupted> {
    let bounded = async {
        match duration {
            Some(d) => tokio::time::timeout(d, future)
                .await
                .map_err(|_elapsed| Interrupted::TimedOut(d)),
            None => Ok(future.await),
        }
    };
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Interrupted::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes() {
        let token = CancellationToken::new();
        let got = cancellable_timeout(Some(Duration::from_secs(5)), &token, async { 7 }).await;
        assert_eq!(got, Ok(7));
    }

    #[tokio::test]
    async fn times_out() {
        let token = CancellationToken::new();
        let d = Duration::from_millis(10);
        let got = cancellable_timeout(Some(d), &token, std::future::pending::<()>()).await;
        assert_eq!(got, Err(Interrupted::TimedOut(d)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let got = cancellable_timeout(None, &token, async { 7 }).await;
        assert_eq!(got, Err(Interrupted::Cancelled));
    }
}
