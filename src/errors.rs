//! Error taxonomy for the investment pipeline
//!
//! Two layers:
//! - [`ChainError`]: whatever the chain client reports (transport, RPC, revert)
//! - [`InvestError`]: what the pipeline decided, including local validation
//!
//! Validation errors are raised before any network call. Chain errors are
//! caught at the pipeline boundary and mapped to a single [`Alert`].

use thiserror::Error;

use crate::alerts::Alert;
use crate::types::{Address, AddressParseError};

/// Errors reported by a [`ChainClient`](crate::chain::ChainClient)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Network-level failure talking to the node
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error response from the node
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Contract execution reverted
    #[error("Execution reverted: {0}")]
    Reverted(String),

    /// The wallet owner declined to sign
    #[error("Transaction rejected by the wallet owner")]
    UserRejected,

    /// No contract known at this address
    #[error("Unknown contract: {0}")]
    UnknownContract(Address),

    /// The node answered with something we cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors produced by the investment flow
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvestError {
    /// Missing or malformed sale address, or a sale with no tiers
    #[error("Invalid sale address: {0}")]
    InvalidSaleAddress(String),

    /// Configured network differs from the connected wallet's network
    #[error("Network mismatch: configured {expected}, connected {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },

    /// No signing account is available
    #[error("No wallet available")]
    NoWalletAvailable,

    /// Token amount is not positive or has too many fractional digits
    #[error("Invalid token amount {input:?} (max {decimals} decimals)")]
    InvalidTokenAmount { input: String, decimals: u32 },

    /// The sale has not started yet
    #[error("Investment window not open until {starts_at_ms}")]
    InvestmentWindowClosed { starts_at_ms: i64 },

    /// No tier is active any more
    #[error("Sale exhausted: no active tier")]
    SaleExhausted,

    /// Sale data was never loaded for this session
    #[error("Sale data not loaded")]
    SaleNotLoaded,

    #[error("No gas price available")]
    NoGasPriceAvailable,

    /// The investor chose to pay by QR code; no transaction is built here
    #[error("QR payment selected")]
    QrPaymentSelected,

    /// Another purchase is still pending in this session
    #[error("Purchase already in progress")]
    PurchaseInProgress,

    #[error("Payment amount overflows: {tokens} tokens at rate {rate}")]
    PaymentOverflow { tokens: String, rate: u128 },

    /// The purchase transaction was not accepted
    #[error("Transaction rejected: {0}")]
    TransactionRejected(ChainError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<AddressParseError> for InvestError {
    fn from(err: AddressParseError) -> Self {
        InvestError::InvalidSaleAddress(err.to_string())
    }
}

impl InvestError {
    /// The user-facing alert for this error, `None` for silent stops
    pub fn alert(&self) -> Option<Alert> {
        match self {
            InvestError::InvalidSaleAddress(_) => Some(Alert::InvalidSaleAddress),
            InvestError::NetworkMismatch { expected, actual } => Some(Alert::NetworkMismatch {
                expected: *expected,
                actual: *actual,
            }),
            InvestError::NoWalletAvailable => Some(Alert::NoWalletAvailable),
            InvestError::InvestmentWindowClosed { starts_at_ms } => {
                Some(Alert::InvestmentWindowNotOpen {
                    starts_at_ms: *starts_at_ms,
                })
            }
            InvestError::NoGasPriceAvailable => Some(Alert::NoGasPriceAvailable),
            InvestError::TransactionRejected(_)
            | InvestError::PaymentOverflow { .. }
            | InvestError::Chain(_) => Some(Alert::TransactionFailed),

            // Shown inline next to the input, or a silent stop
            InvestError::InvalidTokenAmount { .. }
            | InvestError::SaleExhausted
            | InvestError::SaleNotLoaded
            | InvestError::PurchaseInProgress
            | InvestError::QrPaymentSelected
            | InvestError::Configuration(_) => None,
        }
    }

    /// Silent stops only clear the loading indicator
    pub fn is_silent(&self) -> bool {
        self.alert().is_none()
    }

    /// Raised by local validation, before any chain call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            InvestError::InvalidSaleAddress(_)
                | InvestError::InvalidTokenAmount { .. }
                | InvestError::QrPaymentSelected
                | InvestError::Configuration(_)
        )
    }
}
