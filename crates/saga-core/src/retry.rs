use std::future::Future;

/// Run an async operation, retrying exactly once on failure.
///
/// This is the request-path policy for transient external errors: one silent
/// retry at the call site, then surface. Archival paths do not use this;
/// their failures are logged and swallowed, and the pending-flag re-run
/// provides the retry.
pub async fn retry_once<T, E, F, Fut>(op: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!(error = %first, "transient failure, retrying once");
            op().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn first_success_is_passed_through() {
        let calls = AtomicUsize::new(0);
        let out: Result<u32, String> = retry_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_failure_is_retried() {
        let calls = AtomicUsize::new(0);
        let out: Result<u32, String> = retry_once(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("flake".to_string())
            } else {
                Ok(9)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_failure_surfaces() {
        let out: Result<u32, String> = retry_once(|| async { Err("down".to_string()) }).await;
        assert_eq!(out.unwrap_err(), "down");
    }
}
