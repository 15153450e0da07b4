/*!
The timeout operator (spec §4.4): wraps a single call with a deadline
measured against `tokio::time`, so tests can drive it with
`tokio::time::pause`/`advance` the same as the collapser's own timers.
*/

use std::{future::Future, time::Duration};

use collapse_core::{BoxError, CollapseError};

/**
Run `fut` to completion, or fail with [`CollapseError::Timeout`] if it
hasn't resolved within `duration`.
*/
pub(crate) async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = Result<T, BoxError>>,
) -> Result<T, CollapseError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CollapseError::provider_msg(err.to_string())),
        Err(_elapsed) => Err(CollapseError::Timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn a_call_finishing_before_the_deadline_passes_through() {
        let result = with_timeout(Duration::from_millis(10), async { Ok::<_, BoxError>(42) }).await;
        assert!(matches!(result, Ok(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn a_call_exceeding_the_deadline_times_out() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, BoxError>(42)
        })
        .await;
        assert!(matches!(result, Err(CollapseError::Timeout(_))));
    }
}
