//! Common types used throughout the investment client

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an account or contract identifier cannot be parsed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,

    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("address must be 20 bytes of hex, got {len} hex chars: {input}")]
    InvalidLength { input: String, len: usize },

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

/// 20-byte account / contract identifier, rendered as `0x`-prefixed hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    /// Parse a `0x`-prefixed, 40 hex character identifier
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressParseError::Empty);
        }
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressParseError::MissingPrefix(trimmed.to_string()))?;
        if digits.len() != 40 {
            return Err(AddressParseError::InvalidLength {
                input: trimmed.to_string(),
                len: digits.len(),
            });
        }
        let bytes = hex::decode(digits)
            .map_err(|_| AddressParseError::InvalidHex(trimmed.to_string()))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Address validity check used before any chain call
    pub fn is_valid(input: &str) -> bool {
        Self::parse(input).is_ok()
    }

    /// Deterministic address derived from a small integer (simulation and tests)
    pub fn from_low_u64(n: u64) -> Self {
        let mut out = [0u8; 20];
        out[12..].copy_from_slice(&n.to_be_bytes());
        Self(out)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Transaction hash returned by the chain when a transaction is accepted
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn from_low_u64(n: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&n.to_be_bytes());
        Self(out)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Active time window of a tier, `[start_ms, end_ms)` in unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TierWindow {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn contains(&self, now_ms: i64) -> bool {
        self.start_ms <= now_ms && now_ms < self.end_ms
    }

    pub fn has_ended(&self, now_ms: i64) -> bool {
        now_ms >= self.end_ms
    }
}

/// Snapshot of one sale stage, fetched fresh from its contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Position in the sale's tier list
    pub index: usize,
    pub address: Address,
    pub window: TierWindow,
    /// Smallest payment units charged per whole token
    pub rate: u128,
}

/// Token metadata declared by the sale's token contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub decimals: u32,
    pub ticker: String,
    pub name: String,
}

/// Chain-confirmed record of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `None` while the transaction is still pending
    pub block_number: Option<u64>,
}

impl Receipt {
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }
}

/// Options used for gas estimation (no limit yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
    pub sender: Address,
    pub value: u128,
    pub gas_price: u64,
}

/// Options the purchase transaction is sent with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub sender: Address,
    pub value: u128,
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl TransactionOptions {
    pub fn from_call(call: CallOptions, gas_limit: u64) -> Self {
        Self {
            sender: call.sender,
            value: call.value,
            gas_price: call.gas_price,
            gas_limit,
        }
    }
}

/// Which edge of a tier window a boundary marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Start,
    End,
}

/// A tier start or end timestamp the countdown targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub tier_index: usize,
    pub timestamp_ms: i64,
}

impl Boundary {
    pub fn start(tier_index: usize, timestamp_ms: i64) -> Self {
        Self {
            kind: BoundaryKind::Start,
            tier_index,
            timestamp_ms,
        }
    }

    pub fn end(tier_index: usize, timestamp_ms: i64) -> Self {
        Self {
            kind: BoundaryKind::End,
            tier_index,
            timestamp_ms,
        }
    }
}
