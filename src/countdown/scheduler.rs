//! Countdown scheduler
//!
//! Owns one interval task at a time. Every tick publishes a [`TickState`] on
//! a watch channel; when the boundary is reached the task reports it on the
//! crossing channel and stops. [`CountdownScheduler::reset`] cancels the
//! current interval before scheduling the next boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::tick::{BoundaryQueue, TickState, SECONDS_ONLY_THRESHOLD};
use crate::clock::Clock;
use crate::config::CountdownConfig;
use crate::metrics::metrics;
use crate::types::Boundary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    /// No boundary ahead
    Idle,
    /// An interval is counting down to a boundary
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownSettings {
    pub period: Duration,
    pub seconds_only_threshold: Duration,
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            seconds_only_threshold: SECONDS_ONLY_THRESHOLD,
        }
    }
}

impl From<&CountdownConfig> for CountdownSettings {
    fn from(config: &CountdownConfig) -> Self {
        Self {
            period: Duration::from_millis(config.tick_interval_ms),
            seconds_only_threshold: Duration::from_secs(config.seconds_only_threshold_secs),
        }
    }
}

/// Receives each boundary the countdown reached
pub type CrossingReceiver = mpsc::UnboundedReceiver<Boundary>;

#[derive(Debug)]
pub struct CountdownScheduler {
    clock: Arc<dyn Clock>,
    settings: CountdownSettings,
    boundaries: Mutex<BoundaryQueue>,
    interval: Mutex<Option<JoinHandle<()>>>,
    ticks: Arc<watch::Sender<TickState>>,
    crossings: mpsc::UnboundedSender<Boundary>,
    live_intervals: Arc<AtomicUsize>,
}

impl CountdownScheduler {
    pub fn new(clock: Arc<dyn Clock>, settings: CountdownSettings) -> (Self, CrossingReceiver) {
        let (ticks, _) = watch::channel(TickState::idle());
        let (crossings, crossing_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            clock,
            settings,
            boundaries: Mutex::new(BoundaryQueue::default()),
            interval: Mutex::new(None),
            ticks: Arc::new(ticks),
            crossings,
            live_intervals: Arc::new(AtomicUsize::new(0)),
        };
        (scheduler, crossing_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<TickState> {
        self.ticks.subscribe()
    }

    pub fn current(&self) -> TickState {
        self.ticks.borrow().clone()
    }

    /// `Idle` once the interval stopped itself at a boundary, until the next reset
    pub fn state(&self) -> SchedulerState {
        match self.interval.lock().as_ref() {
            Some(handle) if !handle.is_finished() => SchedulerState::Scheduled,
            _ => SchedulerState::Idle,
        }
    }

    /// Interval tasks still alive, including ones cancelled but not yet dropped
    pub fn live_intervals(&self) -> usize {
        self.live_intervals.load(Ordering::SeqCst)
    }

    /// Replace the boundary list and start counting towards its first entry
    pub fn load(&self, boundaries: BoundaryQueue) -> SchedulerState {
        self.cancel();
        *self.boundaries.lock() = boundaries;
        self.set_timers()
    }

    /// Cancel the running interval, then schedule the next boundary
    pub fn reset(&self) -> SchedulerState {
        self.cancel();
        self.set_timers()
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.interval.lock().take() {
            handle.abort();
        }
    }

    fn set_timers(&self) -> SchedulerState {
        let now = self.clock.now_ms();
        let next = self.boundaries.lock().pop_next(now);
        let Some(boundary) = next else {
            self.ticks.send_replace(TickState::idle());
            info!("no boundary left, countdown idle");
            return SchedulerState::Idle;
        };

        self.ticks.send_replace(TickState::compute(
            boundary,
            now,
            self.settings.seconds_only_threshold,
        ));
        metrics().countdown_reschedules.inc();
        debug!(?boundary, ms_to_boundary = boundary.timestamp_ms - now, "countdown scheduled");

        let handle = self.spawn_interval(boundary);
        if let Some(previous) = self.interval.lock().replace(handle) {
            previous.abort();
        }
        SchedulerState::Scheduled
    }

    fn spawn_interval(&self, boundary: Boundary) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        let ticks = Arc::clone(&self.ticks);
        let crossings = self.crossings.clone();
        let settings = self.settings;

        // Counted at spawn; the guard travels with the future so an abort
        // before the first poll still decrements.
        self.live_intervals.fetch_add(1, Ordering::SeqCst);
        metrics().countdown_live_intervals.inc();
        let live = scopeguard::guard(Arc::clone(&self.live_intervals), |live| {
            live.fetch_sub(1, Ordering::SeqCst);
            metrics().countdown_live_intervals.dec();
        });

        tokio::spawn(async move {
            let _live = live;
            let mut interval = tokio::time::interval(settings.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let state =
                    TickState::compute(boundary, clock.now_ms(), settings.seconds_only_threshold);
                let elapsed = state.has_elapsed();
                ticks.send_replace(state);
                if elapsed {
                    metrics().boundary_crossings.inc();
                    info!(?boundary, "countdown boundary reached");
                    // Receiver gone means the session was closed
                    let _ = crossings.send(boundary);
                    break;
                }
            }
        })
    }
}

impl Drop for CountdownScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::types::{BoundaryKind, TierWindow};

    const NOW: i64 = 1_700_000_000_000;

    fn scheduler() -> (CountdownScheduler, CrossingReceiver) {
        CountdownScheduler::new(
            Arc::new(TokioClock::starting_at(NOW)),
            CountdownSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_without_boundaries() {
        let (scheduler, _rx) = scheduler();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.load(BoundaryQueue::default()), SchedulerState::Idle);
        assert!(scheduler.current().is_idle());
        assert_eq!(scheduler.live_intervals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_values() {
        let (scheduler, _rx) = scheduler();
        let windows = [TierWindow::new(NOW + 3_661_000, NOW + 7_200_000)];
        assert_eq!(
            scheduler.load(BoundaryQueue::from_windows(&windows)),
            SchedulerState::Scheduled
        );

        let state = scheduler.current();
        assert_eq!(state.remaining.hours, 1);
        assert_eq!(state.remaining.minutes, 1);
        assert_eq!(state.remaining.seconds, 1);
        assert_eq!(state.label(1), "to start of tier 1 of 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period() {
        let (scheduler, _rx) = scheduler();
        let mut ticks = scheduler.subscribe();
        scheduler.load(BoundaryQueue::from_windows(&[TierWindow::new(NOW + 10_000, NOW + 20_000)]));

        ticks.changed().await.unwrap();
        assert_eq!(ticks.borrow_and_update().remaining.seconds, 10);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks.borrow_and_update().remaining.seconds, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switches_to_seconds_only() {
        let (scheduler, _rx) = scheduler();
        scheduler.load(BoundaryQueue::from_windows(&[TierWindow::new(NOW - 1, NOW + 302_000)]));
        assert!(!scheduler.current().display_seconds_only);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let state = scheduler.current();
        assert_eq!(state.ms_to_next_boundary, 299_000);
        assert!(state.display_seconds_only);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossing_is_signalled_and_reset_moves_on() {
        let (scheduler, mut rx) = scheduler();
        scheduler.load(BoundaryQueue::from_windows(&[TierWindow::new(NOW + 2_000, NOW + 5_000)]));

        let crossed = rx.recv().await.unwrap();
        assert_eq!(crossed.kind, BoundaryKind::Start);
        assert!(scheduler.current().has_elapsed());
        // The task stopped itself
        assert_eq!(scheduler.live_intervals(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        assert_eq!(scheduler.reset(), SchedulerState::Scheduled);
        assert_eq!(scheduler.current().next_boundary.unwrap().kind, BoundaryKind::End);

        let crossed = rx.recv().await.unwrap();
        assert_eq!(crossed.kind, BoundaryKind::End);
        assert_eq!(scheduler.reset(), SchedulerState::Idle);
        assert_eq!(scheduler.current().label(1), "crowdsale has ended");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_interval_after_many_crossings() {
        let (scheduler, mut rx) = scheduler();
        let windows: Vec<_> = (0..5)
            .map(|i| TierWindow::new(NOW + 1_000 + i * 2_000, NOW + 2_000 + i * 2_000))
            .collect();
        scheduler.load(BoundaryQueue::from_windows(&windows));

        for _ in 0..6 {
            rx.recv().await.unwrap();
            scheduler.reset();
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(scheduler.live_intervals(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_while_running_cancels_previous() {
        let (scheduler, _rx) = scheduler();
        let windows = [TierWindow::new(NOW + 60_000, NOW + 120_000)];
        scheduler.load(BoundaryQueue::from_windows(&windows));
        for _ in 0..3 {
            scheduler.load(BoundaryQueue::from_windows(&windows));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.live_intervals(), 1);

        let mut ticks = scheduler.subscribe();
        let mut seen = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(5_500);
        while tokio::time::timeout_at(deadline, ticks.changed()).await.is_ok() {
            seen += 1;
        }
        // One tick per second from a single interval
        assert_eq!(seen, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_stop_the_interval() {
        let (scheduler, _rx) = scheduler();
        scheduler.load(BoundaryQueue::from_windows(&[TierWindow::new(NOW + 60_000, NOW + 70_000)]));
        scheduler.cancel();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.live_intervals(), 0);

        scheduler.reset();
        let live = Arc::clone(&scheduler.live_intervals);
        drop(scheduler);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
