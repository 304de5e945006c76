//! Chain client abstraction
//!
//! The investment flow never talks to a node directly. Everything it needs
//! from the chain goes through [`ChainClient`], which a wallet provider,
//! an RPC adapter or the in-memory [`SimulatedChain`] implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ChainError;
use crate::types::{Address, CallOptions, Receipt, TierWindow, TokenInfo, TransactionOptions, TxHash};

pub mod simulated;

pub use simulated::{GasEstimateBehavior, SimulatedChain, SimulatedTier};

pub type ChainResult<T> = Result<T, ChainError>;

/// A state-changing contract call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    /// Payable `buy()` on a tier contract
    Buy { tier: Address },
}

impl ContractCall {
    pub fn buy(tier: Address) -> Self {
        ContractCall::Buy { tier }
    }

    pub fn to(&self) -> Address {
        match self {
            ContractCall::Buy { tier } => *tier,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::Buy { .. } => "buy",
        }
    }
}

impl fmt::Display for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}()", self.to(), self.method())
    }
}

/// Everything the investment flow reads from or sends to the chain
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Network id of the connected wallet
    async fn network_id(&self) -> ChainResult<u64>;

    /// Accounts the wallet can sign for, first one is the sender
    async fn accounts(&self) -> ChainResult<Vec<Address>>;

    /// Tier contracts joined into the sale, in chronological order
    async fn joined_tiers(&self, sale: &Address) -> ChainResult<Vec<Address>>;

    /// Timestamp of the latest block, unix milliseconds
    async fn block_timestamp_ms(&self) -> ChainResult<i64>;

    async fn tier_window(&self, tier: &Address) -> ChainResult<TierWindow>;

    /// Current rate of a tier: smallest payment units per whole token
    async fn tier_rate(&self, tier: &Address) -> ChainResult<u128>;

    async fn token_info(&self, sale: &Address) -> ChainResult<TokenInfo>;

    /// Token base units a tier may sell
    async fn max_sellable_tokens(&self, tier: &Address) -> ChainResult<u128>;

    /// Token base units `investor` bought from a tier
    async fn token_amount_of(&self, tier: &Address, investor: &Address) -> ChainResult<u128>;

    async fn gas_price(&self) -> ChainResult<u64>;

    async fn estimate_gas(&self, call: &ContractCall, opts: &CallOptions) -> ChainResult<u64>;

    /// Sign and broadcast; resolves once the node accepted the transaction
    async fn send(&self, call: &ContractCall, opts: &TransactionOptions) -> ChainResult<TxHash>;

    /// `Ok(None)` while the node has not seen the transaction
    async fn receipt(&self, tx: &TxHash) -> ChainResult<Option<Receipt>>;
}
