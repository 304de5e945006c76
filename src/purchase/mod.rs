//! Purchase pipeline
//!
//! Strictly sequential stages, each a separate component:
//! - **resolver**: active tier discovery and rate lookup
//! - **pricing**: token amount validation and payment computation
//! - **submitter**: gas estimation with ceiling fallback, single send
//! - **confirmation**: receipt polling until mined
//!
//! [`InvestSession`](crate::session::InvestSession) wires them together.

pub mod confirmation;
pub mod pricing;
pub mod resolver;
pub mod submitter;

pub use confirmation::{ConfirmationPoller, RECEIPT_POLL_INTERVAL};
pub use pricing::{compute_payment, is_valid_token, TokenAmount};
pub use resolver::{ActiveTier, Sale, TierResolver};
pub use submitter::{
    GasLimitSource, GasPlan, GasPolicy, PendingPurchase, PurchaseOrder, TransactionSubmitter,
    GAS_HEADROOM, GAS_LIMIT_CEILING,
};
