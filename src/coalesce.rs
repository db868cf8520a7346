// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rate-limited commits of pull progress to observers.
//!
//! Pull events arrive at network speed, often many per second. The
//! coalescer holds the most recent pending snapshot and commits it to a
//! watch channel at most once per interval, so observers see a steady
//! cadence while never missing the latest value. The timer task is spawned
//! lazily on the first pending update and torn down when the owning request
//! finishes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::progress::PullProgress;

/// Minimum interval between committed progress updates.
pub const COMMIT_INTERVAL: Duration = Duration::from_millis(500);

/// Coalesces pending progress snapshots onto a watch channel.
pub struct StatusCoalescer {
    pending: Arc<Mutex<Option<PullProgress>>>,
    tx: watch::Sender<PullProgress>,
    timer: Option<JoinHandle<()>>,
}

impl StatusCoalescer {
    pub fn new(tx: watch::Sender<PullProgress>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            tx,
            timer: None,
        }
    }

    /// Replace the pending snapshot; the latest value always wins.
    ///
    /// The first call starts the commit timer, whose first tick fires
    /// immediately so the opening status is not delayed.
    pub fn offer(&mut self, value: PullProgress) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = Some(value);
        }
        if self.timer.is_none() {
            let pending = Arc::clone(&self.pending);
            let tx = self.tx.clone();
            self.timer = Some(tokio::spawn(async move {
                let mut tick = tokio::time::interval(COMMIT_INTERVAL);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    let value = {
                        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                        pending.take()
                    };
                    if let Some(value) = value {
                        if tx.send(value).is_err() {
                            // No receivers left.
                            return;
                        }
                    }
                }
            }));
        }
    }

    /// Commit a terminal value immediately and stop the timer.
    ///
    /// Terminal transitions (completed, failed, cancelled) must never wait
    /// out the interval, and nothing pending may overwrite them afterwards.
    pub fn finish(mut self, value: PullProgress) {
        self.stop_timer();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = None;
        }
        let _ = self.tx.send(value);
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for StatusCoalescer {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PullPhase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn running(completed: u64) -> PullProgress {
        PullProgress {
            phase: PullPhase::Running,
            status: "downloading".to_string(),
            completed,
            ..Default::default()
        }
    }

    /// Counts every commit the coalescer makes.
    fn spawn_counter(
        mut rx: watch::Receiver<PullProgress>,
        count: Arc<AtomicUsize>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce_to_latest() {
        let (tx, rx) = watch::channel(PullProgress::default());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = spawn_counter(rx.clone(), Arc::clone(&count));

        let mut co = StatusCoalescer::new(tx);
        for i in 1..=100 {
            co.offer(running(i));
        }
        // Let the first (immediate) tick commit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(rx.borrow().completed, 100);

        // No pending value left: the next tick commits nothing.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        counter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commits_at_most_once_per_interval() {
        let (tx, rx) = watch::channel(PullProgress::default());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = spawn_counter(rx.clone(), Arc::clone(&count));

        let mut co = StatusCoalescer::new(tx);
        // Updates spread over ~1.2s of paused time.
        for i in 0..12u64 {
            co.offer(running(i * 100));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Ticks at 0ms, 500ms, 1000ms: three commits.
        let commits = count.load(Ordering::SeqCst);
        assert!(commits <= 3, "saw {} commits", commits);
        counter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_commits_immediately() {
        let (tx, rx) = watch::channel(PullProgress::default());
        let mut co = StatusCoalescer::new(tx);

        co.offer(running(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let done = PullProgress {
            phase: PullPhase::Completed,
            status: "Completed".to_string(),
            fraction: 1.0,
            ..Default::default()
        };
        co.finish(done.clone());
        // No interval wait: terminal value is visible at once.
        assert_eq!(*rx.borrow(), done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_lazy_until_first_offer() {
        let (tx, rx) = watch::channel(PullProgress::default());
        let _co = StatusCoalescer::new(tx);
        tokio::time::sleep(Duration::from_secs(2)).await;
        // No offers, no commits.
        assert_eq!(*rx.borrow(), PullProgress::default());
    }
}
