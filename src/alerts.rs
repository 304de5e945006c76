//! User-facing alert signals and the sinks that present them

use std::fmt;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Closed set of signals the investment flow raises towards the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Alert {
    InvalidSaleAddress,
    NoWalletAvailable,
    #[serde(rename_all = "camelCase")]
    InvestmentWindowNotOpen { starts_at_ms: i64 },
    NoGasPriceAvailable,
    PurchaseSucceeded { amount: String },
    TransactionFailed,
    NetworkMismatch { expected: u64, actual: u64 },
}

impl Alert {
    pub fn is_error(&self) -> bool {
        !matches!(self, Alert::PurchaseSucceeded { .. })
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::InvalidSaleAddress => write!(f, "The crowdsale address is invalid"),
            Alert::NoWalletAvailable => {
                write!(f, "No wallet account available to sign the purchase")
            }
            Alert::InvestmentWindowNotOpen { starts_at_ms } => {
                match Utc.timestamp_millis_opt(*starts_at_ms).single() {
                    Some(date) => write!(
                        f,
                        "Investment is not open yet, the sale starts at {}",
                        date.to_rfc3339()
                    ),
                    None => write!(f, "Investment is not open yet"),
                }
            }
            Alert::NoGasPriceAvailable => write!(f, "No gas price available"),
            Alert::PurchaseSucceeded { amount } => {
                write!(f, "Congrats! You successfully bought {} tokens", amount)
            }
            Alert::TransactionFailed => write!(f, "Transaction failed"),
            Alert::NetworkMismatch { expected, actual } => write!(
                f,
                "Wallet is connected to network {} but the sale lives on network {}",
                actual, expected
            ),
        }
    }
}

/// Presentation collaborator for alerts
pub trait Alerter: Send + Sync + fmt::Debug {
    fn alert(&self, alert: Alert);
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerter;

impl Alerter for TracingAlerter {
    fn alert(&self, alert: Alert) {
        if alert.is_error() {
            tracing::warn!(alert = ?alert, "{}", alert);
        } else {
            tracing::info!(alert = ?alert, "{}", alert);
        }
    }
}

/// Collects alerts so a front-end can drain and render them
#[derive(Debug, Default, Clone)]
pub struct QueueAlerter {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl QueueAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued alert, oldest first
    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl Alerter for QueueAlerter {
    fn alert(&self, alert: Alert) {
        tracing::debug!(alert = ?alert, "alert queued");
        self.alerts.lock().push(alert);
    }
}
