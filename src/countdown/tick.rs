//! Countdown values: boundary queue, remaining time, tick state

use std::collections::VecDeque;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{Boundary, BoundaryKind, TierWindow};

/// Below this the countdown shows minutes and seconds only
pub const SECONDS_ONLY_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Remaining time split for display, all fields clamped at zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remaining {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Remaining {
    pub fn from_millis(ms: i64) -> Self {
        let total_secs = (ms.max(0) / 1_000) as u64;
        Self {
            days: total_secs / 86_400,
            hours: (total_secs % 86_400) / 3_600,
            minutes: (total_secs % 3_600) / 60,
            seconds: total_secs % 60,
        }
    }
}

/// What the countdown shows right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickState {
    pub next_boundary: Option<Boundary>,
    pub remaining: Remaining,
    pub ms_to_next_boundary: i64,
    pub display_seconds_only: bool,
}

impl Default for TickState {
    fn default() -> Self {
        Self::idle()
    }
}

impl TickState {
    /// No boundary left: the sale is over or nothing is loaded
    pub fn idle() -> Self {
        Self {
            next_boundary: None,
            remaining: Remaining::default(),
            ms_to_next_boundary: 0,
            display_seconds_only: false,
        }
    }

    pub fn compute(boundary: Boundary, now_ms: i64, seconds_only_threshold: Duration) -> Self {
        let ms_to_next_boundary = (boundary.timestamp_ms - now_ms).max(0);
        Self {
            next_boundary: Some(boundary),
            remaining: Remaining::from_millis(ms_to_next_boundary),
            ms_to_next_boundary,
            display_seconds_only: ms_to_next_boundary <= seconds_only_threshold.as_millis() as i64,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.next_boundary.is_none()
    }

    /// The boundary has been reached
    pub fn has_elapsed(&self) -> bool {
        self.next_boundary.is_some() && self.ms_to_next_boundary == 0
    }

    /// Caption under the countdown, tiers numbered from 1
    pub fn label(&self, tier_count: usize) -> String {
        match self.next_boundary {
            Some(Boundary {
                kind: BoundaryKind::Start,
                tier_index,
                ..
            }) => format!("to start of tier {} of {}", tier_index + 1, tier_count),
            Some(Boundary {
                kind: BoundaryKind::End,
                tier_index,
                ..
            }) => format!("to end of tier {} of {}", tier_index + 1, tier_count),
            None => "crowdsale has ended".to_string(),
        }
    }
}

/// Upcoming boundaries, earliest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryQueue {
    boundaries: VecDeque<Boundary>,
}

impl BoundaryQueue {
    /// Start and end of every tier, in time order
    pub fn from_windows(windows: &[TierWindow]) -> Self {
        let boundaries = windows
            .iter()
            .enumerate()
            .flat_map(|(index, window)| {
                [
                    Boundary::start(index, window.start_ms),
                    Boundary::end(index, window.end_ms),
                ]
            })
            .sorted_by_key(|boundary| boundary.timestamp_ms)
            .collect();
        Self { boundaries }
    }

    /// Drop boundaries already reached and pop the earliest future one
    pub fn pop_next(&mut self, now_ms: i64) -> Option<Boundary> {
        while let Some(boundary) = self.boundaries.pop_front() {
            if boundary.timestamp_ms > now_ms {
                return Some(boundary);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_remaining_split() {
        let state = TickState::compute(Boundary::start(0, NOW + 3_661_000), NOW, SECONDS_ONLY_THRESHOLD);
        assert_eq!(
            state.remaining,
            Remaining {
                days: 0,
                hours: 1,
                minutes: 1,
                seconds: 1
            }
        );
        assert!(!state.display_seconds_only);

        let two_days = Remaining::from_millis(2 * 86_400_000 + 5_999);
        assert_eq!(two_days.days, 2);
        assert_eq!(two_days.seconds, 5);
    }

    #[test]
    fn test_seconds_only_under_five_minutes() {
        let boundary = Boundary::end(0, NOW + 299_000);
        let state = TickState::compute(boundary, NOW, SECONDS_ONLY_THRESHOLD);
        assert!(state.display_seconds_only);
        assert_eq!(state.remaining.minutes, 4);
        assert_eq!(state.remaining.seconds, 59);

        let state = TickState::compute(Boundary::end(0, NOW + 301_000), NOW, SECONDS_ONLY_THRESHOLD);
        assert!(!state.display_seconds_only);
    }

    #[test]
    fn test_past_boundary_clamps_to_zero() {
        let state = TickState::compute(Boundary::end(1, NOW - 5_000), NOW, SECONDS_ONLY_THRESHOLD);
        assert_eq!(state.remaining, Remaining::default());
        assert!(state.has_elapsed());
    }

    #[test]
    fn test_labels() {
        let start = TickState::compute(Boundary::start(0, NOW + 1), NOW, SECONDS_ONLY_THRESHOLD);
        assert_eq!(start.label(3), "to start of tier 1 of 3");
        let end = TickState::compute(Boundary::end(2, NOW + 1), NOW, SECONDS_ONLY_THRESHOLD);
        assert_eq!(end.label(3), "to end of tier 3 of 3");
        assert_eq!(TickState::idle().label(3), "crowdsale has ended");
    }

    #[test]
    fn test_queue_orders_and_skips_past() {
        let windows = [
            TierWindow::new(NOW + 10_000, NOW + 20_000),
            TierWindow::new(NOW - 5_000, NOW + 5_000),
        ];
        let mut queue = BoundaryQueue::from_windows(&windows);
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.pop_next(NOW), Some(Boundary::end(1, NOW + 5_000)));
        assert_eq!(queue.pop_next(NOW), Some(Boundary::start(0, NOW + 10_000)));
        // Jumping past the last boundary empties the queue
        assert_eq!(queue.pop_next(NOW + 20_000), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_boundary_equal_to_now_is_past() {
        let mut queue = BoundaryQueue::from_windows(&[TierWindow::new(NOW, NOW + 1)]);
        assert_eq!(queue.pop_next(NOW), Some(Boundary::end(0, NOW + 1)));
    }
}
