//! Deadline helper for connect and receive.
//!
//! The wrapped future is dropped when the deadline passes, which cancels the
//! underlying socket operation. Callers fault the connection on timeout so a
//! half-read response is never reused.

use std::future::Future;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Runs `fut`, failing with `ClientError::Timeout` if `limit` elapses first.
///
/// `None` means no bound.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Option<Duration>,
    fut: F,
) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    let timeout = match limit {
        Some(timeout) => timeout,
        None => return fut.await,
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout { operation, timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let value = with_timeout("receive", Some(Duration::from_secs(1)), async { Ok(7) })
            .await
            .expect("value");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn unbounded_waits_for_completion() {
        let value = with_timeout("connect", None, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok("done")
        })
        .await
        .expect("value");
        assert_eq!(value, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let err = with_timeout("receive", Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .expect_err("timeout");
        assert!(matches!(
            err,
            ClientError::Timeout {
                operation: "receive",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn errors_are_not_swallowed() {
        let err = with_timeout::<(), _>("receive", Some(Duration::from_secs(1)), async {
            Err(ClientError::EndOfStream)
        })
        .await
        .expect_err("error");
        assert!(matches!(err, ClientError::EndOfStream));
    }
}
