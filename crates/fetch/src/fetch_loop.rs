use crate::error::{ErrorKind, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Progress of a running [`FetchLoop`], reported after every settled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Drives many outstanding futures from a single task with a bounded number
/// in flight.
///
/// Cancellation is cooperative: the token is checked once per settled item.
/// Once it fires no new item is started, items already in flight are left to
/// settle and their outcomes are discarded, and [`run`](Self::run) then
/// returns [`Cancelled`](ErrorKind::Cancelled). Tasks with side effects should
/// check [`cancel_token`](Self::cancel_token) before committing them. A token
/// that is already cancelled starts nothing at all.
#[derive(Clone)]
pub struct FetchLoop {
    concurrency: usize,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for FetchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchLoop")
            .field("concurrency", &self.concurrency)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl FetchLoop {
    /// A concurrency of zero is treated as one.
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `task` for every `(key, value)` pair and collect each outcome next
    /// to its key, in completion order.
    ///
    /// Outcomes are returned as produced, so per-item failures never fail the
    /// loop; only cancellation does.
    pub async fn run<I, K, V, F, Fut, T>(&self, items: I, mut task: F) -> Result<Vec<(K, T)>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Clone,
        F: FnMut(K, V) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut pending: VecDeque<(K, V)> = items.into_iter().collect();
        let total = pending.len();
        let mut results = Vec::with_capacity(total);
        let mut in_flight = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                debug!(remaining = pending.len(), in_flight = in_flight.len(), "cancellation requested");
                cancelled = true;
            }
            if !cancelled {
                while in_flight.len() < self.concurrency {
                    let Some((key, value)) = pending.pop_front() else {
                        break;
                    };
                    let future = task(key.clone(), value);
                    in_flight.push(async move { (key, future.await) });
                }
            }
            let Some(outcome) = in_flight.next().await else {
                break;
            };
            results.push(outcome);
            let progress = Progress {
                completed: results.len(),
                total,
            };
            if let Some(report) = &self.progress {
                report(progress);
            }
            if progress.completed % 100 == 0 {
                info!(completed = progress.completed, total, "fetch progress");
            }
        }

        if cancelled {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_every_item() {
        let fetch = FetchLoop::new(3, CancellationToken::new());
        let results = fetch.run((0..10).map(|i| (i, i * 2)), |_, v| async move { v + 1 }).await.unwrap();
        assert_eq!(results.len(), 10);
        for (key, value) in results {
            assert_eq!(value, key * 2 + 1);
        }
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fetch = FetchLoop::new(2, CancellationToken::new());
        fetch
            .run((0..8).map(|i| (i, ())), |_, _| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pre_cancelled_starts_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let started = AtomicUsize::new(0);
        let fetch = FetchLoop::new(10, token);
        let err = fetch
            .run((0..10).map(|i| (i, ())), |_, _| {
                started.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::Cancelled);
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_settles_in_flight() {
        let token = CancellationToken::new();
        let settled = Arc::new(AtomicUsize::new(0));
        let fetch = FetchLoop::new(2, token.clone());
        let err = fetch
            .run((0..10).map(|i| (i, ())), |key, _| {
                let token = token.clone();
                let settled = settled.clone();
                async move {
                    if key == 0 {
                        token.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    settled.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::Cancelled);
        // The first two items were already in flight when the token fired.
        assert_eq!(settled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reports_progress() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let fetch = FetchLoop::new(4, CancellationToken::new()).with_progress(move |progress| {
            assert_eq!(progress.total, 5);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fetch.run((0..5).map(|i| (i, ())), |_, _| async {}).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
