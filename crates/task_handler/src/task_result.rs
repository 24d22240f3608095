use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::TaskError;

/// Why a spawned handler did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTaskError {
    #[error("handler panicked")]
    TaskPanic,
    #[error("handler aborted by shutdown")]
    TaskAborted,
    #[error("handler timed out after {0:?}")]
    TaskTimedOut(Duration),
    #[error("{0}")]
    TaskError(#[from] TaskError),
}

impl RunTaskError {
    /// Only an explicit fatal error from the handler is non-retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunTaskError::TaskError(e) => e.is_retryable(),
            RunTaskError::TaskPanic | RunTaskError::TaskAborted | RunTaskError::TaskTimedOut(_) => {
                true
            }
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, RunTaskError::TaskPanic)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunTaskError::TaskAborted)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RunTaskError::TaskTimedOut(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnTaskResult {
    pub duration: Duration,
    pub result: Result<(), RunTaskError>,
}

impl SpawnTaskResult {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn result(&self) -> &Result<(), RunTaskError> {
        &self.result
    }
}

/// Runs `task` on its own tokio task, bounded by `timeout`.
///
/// Once `shutdown` is cancelled the task gets `grace_period` to finish before
/// being aborted.
pub async fn spawn_task<F>(
    task: F,
    timeout: Duration,
    shutdown: CancellationToken,
    grace_period: Duration,
) -> SpawnTaskResult
where
    F: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let start = Instant::now();
    let handle = tokio::spawn(task);
    let abort_handle = handle.abort_handle();

    let shutdown_fut = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace_period).await;
    };

    let result = tokio::select! {
        res = tokio::time::timeout(timeout, handle) => match res {
            Err(_) => {
                abort_handle.abort();
                Err(RunTaskError::TaskTimedOut(timeout))
            }
            Ok(Err(_)) => Err(RunTaskError::TaskPanic),
            Ok(Ok(r)) => r.map_err(RunTaskError::TaskError),
        },
        _ = shutdown_fut => {
            abort_handle.abort();
            Err(RunTaskError::TaskAborted)
        }
    };

    SpawnTaskResult {
        duration: start.elapsed(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn success() {
        let res = spawn_task(async { Ok(()) }, LONG, CancellationToken::new(), LONG).await;
        assert_eq!(res.result, Ok(()));
    }

    #[tokio::test]
    async fn handler_error_is_passed_through() {
        let res = spawn_task(
            async { Err(TaskError::fatal("bad address")) },
            LONG,
            CancellationToken::new(),
            LONG,
        )
        .await;
        let err = res.result.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "bad address");
    }

    #[tokio::test]
    async fn panic_is_retryable() {
        let res = spawn_task(
            async { panic!("boom") },
            LONG,
            CancellationToken::new(),
            LONG,
        )
        .await;
        let err = res.result.unwrap_err();
        assert!(err.is_panic());
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_handler_times_out() {
        let res = spawn_task(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
            Duration::from_secs(1),
            CancellationToken::new(),
            LONG,
        )
        .await;
        let err = res.result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_after_grace_period() {
        let token = CancellationToken::new();
        token.cancel();
        let res = spawn_task(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            },
            LONG * 10,
            token,
            Duration::from_secs(5),
        )
        .await;
        assert!(res.result.unwrap_err().is_aborted());
        assert!(res.duration >= Duration::from_secs(5));
    }
}
