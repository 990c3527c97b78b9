use std::fmt::Display;
use std::future::Future;

use tokio::sync::watch;
use tracing::warn;

/// Apply a local delta, then commit it to the backend.
///
/// On success the delta stays. On failure the delta is discarded (the
/// pre-delta value is restored), `refetch` is awaited and its authoritative
/// value published, and the commit error is returned. A failed refetch is
/// logged and leaves the restored value in place.
pub async fn optimistic<S, T, E, C, R, RE, F>(
    state: &watch::Sender<S>,
    delta: impl FnOnce(&mut S),
    commit: C,
    refetch: F,
) -> Result<T, E>
where
    S: Clone,
    C: Future<Output = Result<T, E>>,
    F: FnOnce() -> R,
    R: Future<Output = Result<S, RE>>,
    E: Display,
    RE: Display,
{
    let snapshot = state.borrow().clone();
    state.send_modify(delta);

    match commit.await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("optimistic update rejected, reconciling: {}", e);
            state.send_replace(snapshot);
            match refetch().await {
                Ok(authoritative) => {
                    state.send_replace(authoritative);
                }
                Err(re) => warn!("reconciliation fetch failed: {}", re),
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_keeps_delta() {
        let (tx, rx) = watch::channel(5u32);
        let result: Result<(), String> = optimistic(
            &tx,
            |n| *n = 0,
            async { Ok(()) },
            || async { Err::<u32, String>("not called".into()) },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test]
    async fn failure_publishes_refetched_value() {
        let (tx, rx) = watch::channel(5u32);
        let result: Result<(), String> = optimistic(
            &tx,
            |n| *n = 0,
            async { Err("rejected".to_string()) },
            || async { Ok::<u32, String>(7) },
        )
        .await;
        assert_eq!(result, Err("rejected".to_string()));
        assert_eq!(*rx.borrow(), 7);
    }

    #[tokio::test]
    async fn failed_refetch_restores_snapshot() {
        let (tx, rx) = watch::channel(5u32);
        let result: Result<(), String> = optimistic(
            &tx,
            |n| *n -= 1,
            async { Err("rejected".to_string()) },
            || async { Err::<u32, String>("offline".into()) },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(*rx.borrow(), 5);
    }
}
