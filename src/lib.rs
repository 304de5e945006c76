//! Invest - client for multi-tier token sales
//!
//! Resolves the active tier of a sale, prices and submits purchases with a
//! bounded gas fallback, waits for confirmation and counts down to the next
//! tier boundary. The chain is reached only through [`chain::ChainClient`].
//!
//! ## Layout
//!
//! - [`purchase`]: resolver, pricing, submitter, confirmation poller
//! - [`countdown`]: tier boundary countdown
//! - [`session`]: orchestration of one open invest page
//! - [`chain`]: chain client trait and the in-memory simulation

pub mod alerts;
pub mod chain;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod errors;
pub mod metrics;
pub mod purchase;
pub mod session;
pub mod structured_logging;
pub mod types;

pub use alerts::{Alert, Alerter, QueueAlerter, TracingAlerter};
pub use chain::{ChainClient, SimulatedChain};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::Config;
pub use errors::{ChainError, InvestError};
pub use session::{
    InvestSession, MountStatus, PaymentMethod, PurchaseOutcome, SessionContext, ViewState,
};
pub use types::{Address, Boundary, BoundaryKind, Tier, TierWindow, TokenInfo, TxHash};
