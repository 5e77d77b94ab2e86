//! Isolation of engine calls.
//!
//! Engines are third-party code. A panic inside `train`, `predict` or
//! `evaluate` must only take down the current recommender, not the task.
//! They are also CPU-bound and synchronous, so stages run them on the
//! blocking pool through [`guarded_blocking`]; that keeps runtime threads free
//! and lets the worker's task timeout fire while an engine is still busy.

use std::panic::{catch_unwind, AssertUnwindSafe};

use recsys_core::{Error, Result};

/// Run `f`, turning a panic into `Error::Engine`.
pub fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::Engine(format!("Engine panicked: {}", message)))
        }
    }
}

/// Run `f` on the blocking thread pool with panic isolation.
///
/// If the awaiting future is dropped (task timeout, cancellation) the engine
/// call runs to completion in the background and its result is discarded.
pub async fn guarded_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(move || guarded(f)).await {
        Ok(result) => result,
        Err(e) => Err(Error::Engine(format!("Engine call did not complete: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_passes_through_results() {
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
        assert!(matches!(
            guarded::<()>(|| Err(Error::Engine("bad".into()))),
            Err(Error::Engine(msg)) if msg == "bad"
        ));
    }

    #[test]
    fn test_converts_panic() {
        let result = guarded::<()>(|| panic!("model exploded"));
        match result {
            Err(Error::Engine(msg)) => assert!(msg.contains("model exploded")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_converts_formatted_panic() {
        let id = 4;
        let result = guarded::<()>(|| panic!("recommender {} failed", id));
        assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("recommender 4")));
    }

    #[tokio::test]
    async fn test_blocking_call_converts_panic() {
        let result = guarded_blocking::<(), _>(|| panic!("blocking engine exploded")).await;
        assert!(matches!(result, Err(Error::Engine(msg)) if msg.contains("blocking engine exploded")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_call_leaves_runtime_responsive() {
        let slow = tokio::spawn(guarded_blocking(|| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(1)
        }));

        // The only runtime thread is not held while the engine sleeps.
        let start = std::time::Instant::now();
        let timed_out = tokio::time::timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(timed_out.is_err());
        assert!(start.elapsed() < Duration::from_millis(400));
        assert_eq!(slow.await.unwrap().unwrap(), 1);
    }
}
