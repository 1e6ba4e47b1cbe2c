//! A small cancellable-timer abstraction (Design Notes §9).
//!
//! The source expresses timer-heavy control flow with closures captured by
//! `setTimeout`/`setInterval` and cancels them implicitly by letting the
//! closure's captured state go stale. Here every timer is an explicit,
//! named handle owned by the state it serves (one `ActiveRollout`, one
//! `HouseActivity` key, or the watcher/controller singleton); dropping or
//! calling `cancel()` on a handle is idempotent, and every acquisition path
//! in this crate releases its handles on every exit path (scoped
//! acquisition, guaranteed release).

use tokio::task::JoinHandle;

/// A cancellable, idempotent-to-cancel timer handle. Wraps a Tokio task so
/// cancellation is immediate (no polling for a stop flag) and safe to call
/// more than once or after the task has already finished.
pub struct TimerHandle {
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self { join: Some(tokio::spawn(future)) }
    }

    /// Cancel the timer. Safe to call more than once; a second call is a
    /// no-op because the handle was already consumed.
    pub fn cancel(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A periodic repeating timer, used by `VersionWatcher` (one per source)
/// and `RolloutController` (one process-wide tick).
pub struct IntervalTimer {
    handle: TimerHandle,
}

impl IntervalTimer {
    pub fn start<F, Fut>(period: std::time::Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }

    pub fn stop(&mut self) {
        self.handle.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let mut handle = TimerHandle::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        });
        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn interval_timer_ticks_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let mut timer = IntervalTimer::start(std::time::Duration::from_millis(5), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        timer.stop();
        let stopped_at = counter.load(Ordering::SeqCst);
        assert!(stopped_at >= 2, "expected several ticks, got {stopped_at}");

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), stopped_at, "timer kept ticking after stop()");
    }
}
