//! Cancellable recurring fetches
//!
//! A subscription invokes its fetch immediately, then once per interval until
//! cancelled. Ticks never wait for earlier fetches: overlapping fetches are
//! allowed and each one overwrites the shared state when it resolves, so the
//! state always reflects whichever fetch finished last.

use crate::error::FleetResult;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Latest observed outcome of a subscription
#[derive(Debug, Clone)]
pub struct PollState<T> {
    /// Last successfully fetched value; kept when a later fetch fails
    pub data: Option<T>,
    /// Error from the most recent resolved fetch, cleared on success
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Fetches issued but not yet resolved
    pub in_flight: usize,
    /// Fetches resolved so far, successful or not
    pub resolved: u64,
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            updated_at: None,
            in_flight: 0,
            resolved: 0,
        }
    }
}

impl<T> PollState<T> {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    /// True when data is being shown despite the latest fetch failing
    pub fn is_stale(&self) -> bool {
        self.data.is_some() && self.error.is_some()
    }

    fn apply(&mut self, target: &str, result: FleetResult<T>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.resolved += 1;
        self.updated_at = Some(Utc::now());

        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(e) => {
                tracing::warn!(target_name = %target, error = %e, "Poll fetch failed");
                crate::metrics::record_poll_failure(target);
                self.error = Some(e.to_string());
            }
        }
    }
}

/// Handle that stops a subscription's schedule
///
/// Cancelling stops future ticks only; fetches already issued run to
/// completion and still apply their result. Dropping the handle cancels.
#[derive(Debug)]
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
    scheduler: JoinHandle<()>,
}

impl PollHandle {
    /// Safe to call any number of times
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.scheduler.abort();
            tracing::debug!("Poll subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A running poll schedule plus a view onto its latest state
pub struct PollSubscription<T> {
    handle: PollHandle,
    state: watch::Receiver<PollState<T>>,
}

impl<T: Clone> PollSubscription<T> {
    /// Copy of the current state
    pub fn current(&self) -> PollState<T> {
        self.state.borrow().clone()
    }

    /// Another receiver for the same state
    pub fn subscribe(&self) -> watch::Receiver<PollState<T>> {
        self.state.clone()
    }

    /// Wait until another fetch resolves
    pub async fn changed(&mut self) -> PollState<T> {
        let seen = self.state.borrow_and_update().resolved;

        // The sender lives as long as any issued fetch; once gone nothing changes
        while self.state.changed().await.is_ok() {
            if self.state.borrow_and_update().resolved != seen {
                break;
            }
        }
        self.state.borrow().clone()
    }
}

impl<T> PollSubscription<T> {
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

/// Start polling `fetch` every `every`, beginning immediately
///
/// `target` names the subscription in logs and metrics.
pub fn start<T, F, Fut>(
    target: impl Into<String>,
    every: Duration,
    fetch: F,
) -> PollSubscription<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FleetResult<T>> + Send + 'static,
{
    let target: Arc<str> = Arc::from(target.into());
    let (tx, rx) = watch::channel(PollState::default());
    let cancelled = Arc::new(AtomicBool::new(false));

    let scheduler = tokio::spawn({
        let cancelled = cancelled.clone();
        async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // First tick completes immediately
                ticker.tick().await;
                if cancelled.load(Ordering::Acquire) {
                    break;
                }

                tx.send_modify(|state| state.in_flight += 1);

                let pending = fetch();
                let tx = tx.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    let result = pending.await;
                    tx.send_modify(|state| state.apply(&target, result));
                });
            }
        }
    });

    PollSubscription {
        handle: PollHandle {
            cancelled,
            scheduler,
        },
        state: rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = start("counter", Duration::from_millis(100), {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move { Ok::<_, FleetError>(calls.fetch_add(1, Ordering::SeqCst)) }
            }
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sub.current().data, Some(0));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sub.current().data, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fetches_last_resolved_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = start("overlap", Duration::from_millis(100), {
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => {
                            sleep(Duration::from_millis(300)).await;
                            Ok::<_, FleetError>("first")
                        }
                        1 => {
                            sleep(Duration::from_millis(10)).await;
                            Ok("second")
                        }
                        _ => std::future::pending().await,
                    }
                }
            }
        });

        sleep(Duration::from_millis(150)).await;
        assert_eq!(sub.current().data, Some("second"));

        sleep(Duration::from_millis(250)).await;
        let state = sub.current();
        assert_eq!(state.data, Some("first"));
        assert!(state.is_loading());
        sub.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_stale_data_and_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = start("flaky", Duration::from_millis(100), {
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 1 {
                        Err(FleetError::gateway("connection refused"))
                    } else {
                        Ok(n)
                    }
                }
            }
        });

        sleep(Duration::from_millis(150)).await;
        let state = sub.current();
        assert_eq!(state.data, Some(0));
        assert!(state.error.is_some());
        assert!(state.is_stale());

        sleep(Duration::from_millis(100)).await;
        let state = sub.current();
        assert_eq!(state.data, Some(2));
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_schedule_but_in_flight_applies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = start("slow", Duration::from_millis(100), {
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    sleep(Duration::from_millis(250)).await;
                    Ok::<_, FleetError>("done")
                }
            }
        });

        sleep(Duration::from_millis(50)).await;
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());

        sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sub.current().data, Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_drop_is_silent() {
        let sub = start("gone", Duration::from_millis(100), || async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, FleetError>(1u32)
        });
        let rx = sub.subscribe();
        drop(sub);
        drop(rx);

        // In-flight fetch resolves with no receivers left
        sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_does_not_hang_after_cancel() {
        let mut sub = start("idle", Duration::from_millis(100), || async {
            Ok::<_, FleetError>(7u8)
        });
        sub.changed().await;
        sub.cancel();

        // Scheduler and fetches are gone, so no sender is left
        sleep(Duration::from_secs(1)).await;
        let mut next = tokio_test::task::spawn(sub.changed());
        let state = tokio_test::assert_ready!(next.poll());
        assert_eq!(state.data, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_observes_next_resolution() {
        let mut sub = start("watch", Duration::from_secs(5), || async {
            Ok::<_, FleetError>("info")
        });
        let state = sub.changed().await;
        assert_eq!(state.data, Some("info"));
        assert_eq!(state.resolved, 1);
        assert_eq!(state.in_flight, 0);
    }
}
