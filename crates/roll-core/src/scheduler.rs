//! Debounced rescan scheduling
//!
//! Bursts of media-relevant document mutations collapse into one rescan per
//! tab: every new signal cancels the pending timer and starts a fresh one.
//! Expired timers deliver the tab id on the channel returned by
//! [`RescanScheduler::new`].

use crate::types::TabId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Cancel-and-reschedule timer per tab
pub struct RescanScheduler {
    window: Duration,
    tx: mpsc::UnboundedSender<TabId>,
    timers: Mutex<HashMap<TabId, JoinHandle<()>>>,
}

impl RescanScheduler {
    /// Create a scheduler and the receiver of due rescans
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<TabId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                tx,
                timers: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)start the timer of `tab`; returns true when a pending timer was
    /// cancelled
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, tab: TabId) -> bool {
        let tx = self.tx.clone();
        let window = self.window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx.send(tab);
        });

        let replaced = self.timers().insert(tab, handle);
        let cancelled = match replaced {
            Some(previous) if !previous.is_finished() => {
                previous.abort();
                true
            }
            _ => false,
        };
        trace!(tab = %tab, cancelled, "Rescan scheduled");
        cancelled
    }

    /// Drop the pending timer of `tab`; returns false when none was pending
    pub fn cancel(&self, tab: TabId) -> bool {
        match self.timers().remove(&tab) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Drop every timer; returns how many were still pending
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.timers();
        let pending = timers.values().filter(|h| !h.is_finished()).count();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        pending
    }

    /// Whether `tab` has a timer that has not fired yet
    pub fn is_pending(&self, tab: TabId) -> bool {
        self.timers()
            .get(&tab)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TabId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RescanScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(rx: &mut mpsc::UnboundedReceiver<TabId>) -> Vec<TabId> {
        let mut tabs = Vec::new();
        while let Ok(tab) = rx.try_recv() {
            tabs.push(tab);
        }
        tabs.sort();
        tabs
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces() {
        let (scheduler, mut rx) = RescanScheduler::new(DEFAULT_DEBOUNCE);

        assert!(!scheduler.schedule(TabId(1)));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(scheduler.schedule(TabId(1)));
        }
        assert!(scheduler.is_pending(TabId(1)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(received(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(received(&mut rx), vec![TabId(1)]);
        assert!(!scheduler.is_pending(TabId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (scheduler, mut rx) = RescanScheduler::new(DEFAULT_DEBOUNCE);

        scheduler.schedule(TabId(1));
        assert!(scheduler.cancel(TabId(1)));
        assert!(!scheduler.cancel(TabId(1)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tabs_are_independent() {
        let (scheduler, mut rx) = RescanScheduler::new(Duration::from_millis(50));

        scheduler.schedule(TabId(2));
        scheduler.schedule(TabId(1));
        scheduler.schedule(TabId(3));
        assert_eq!(scheduler.cancel_all(), 3);

        scheduler.schedule(TabId(2));
        scheduler.schedule(TabId(1));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(received(&mut rx), vec![TabId(1), TabId(2)]);
    }
}
