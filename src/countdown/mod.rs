//! Countdown to the next tier boundary
//!
//! - **tick**: boundary queue and the per-tick display values
//! - **scheduler**: the single interval task driving the ticks

pub mod scheduler;
pub mod tick;

pub use scheduler::{CountdownScheduler, CountdownSettings, CrossingReceiver, SchedulerState};
pub use tick::{BoundaryQueue, Remaining, TickState, SECONDS_ONLY_THRESHOLD};
