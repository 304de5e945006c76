//! In-memory chain used in simulation mode and tests
//!
//! Deterministic: transaction hashes and block numbers are counters, block
//! time comes from the injected [`Clock`], and failures are scripted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChainClient, ChainResult, ContractCall};
use crate::clock::Clock;
use crate::config::SimulationConfig;
use crate::errors::ChainError;
use crate::types::{
    Address, CallOptions, Receipt, TierWindow, TokenInfo, TransactionOptions, TxHash,
};

/// One tier contract of a simulated sale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedTier {
    pub address: Address,
    pub window: TierWindow,
    pub rate: u128,
    pub max_sellable: u128,
}

/// How `estimate_gas` answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasEstimateBehavior {
    Fixed(u64),
    Fail(ChainError),
}

#[derive(Debug)]
struct SaleEntry {
    tiers: Vec<Address>,
    token: TokenInfo,
}

#[derive(Debug)]
struct PendingTx {
    polls_left: u32,
    block_number: Option<u64>,
}

#[derive(Debug)]
struct ChainState {
    network_id: u64,
    accounts: Vec<Address>,
    sales: HashMap<Address, SaleEntry>,
    tiers: HashMap<Address, SimulatedTier>,
    purchases: HashMap<(Address, Address), u128>,
    gas_price: Option<u64>,
    gas_estimate: GasEstimateBehavior,
    send_failure: Option<ChainError>,
    confirm_after_polls: u32,
    transactions: HashMap<TxHash, PendingTx>,
    sent: Vec<(ContractCall, TransactionOptions)>,
    block_number: u64,
    next_tx: u64,
    estimate_calls: usize,
    receipt_polls: usize,
}

impl ChainState {
    fn tier(&self, address: &Address) -> ChainResult<&SimulatedTier> {
        self.tiers
            .get(address)
            .ok_or(ChainError::UnknownContract(*address))
    }

    fn decimals_for_tier(&self, tier: &Address) -> Option<u32> {
        self.sales
            .values()
            .find(|sale| sale.tiers.contains(tier))
            .map(|sale| sale.token.decimals)
    }
}

/// Scriptable in-memory [`ChainClient`]
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
    clock: Arc<dyn Clock>,
}

impl SimulatedChain {
    pub fn new(network_id: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                network_id,
                accounts: Vec::new(),
                sales: HashMap::new(),
                tiers: HashMap::new(),
                purchases: HashMap::new(),
                gas_price: Some(1_000_000_000),
                gas_estimate: GasEstimateBehavior::Fixed(150_000),
                send_failure: None,
                confirm_after_polls: 0,
                transactions: HashMap::new(),
                sent: Vec::new(),
                block_number: 1,
                next_tx: 1,
                estimate_calls: 0,
                receipt_polls: 0,
            })),
            clock,
        }
    }

    /// Build a chain from the `[simulation]` config section.
    ///
    /// Tier offsets are relative to the clock's current time.
    pub fn from_config(config: &SimulationConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let now = clock.now_ms();
        let sale = Address::parse(&config.sale_address)?;
        let mut tiers = Vec::with_capacity(config.tiers.len());
        for tier in &config.tiers {
            tiers.push(SimulatedTier {
                address: Address::parse(&tier.address)?,
                window: TierWindow::new(
                    now + tier.start_offset_secs * 1_000,
                    now + tier.end_offset_secs * 1_000,
                ),
                rate: u128::from(tier.rate),
                max_sellable: u128::from(tier.max_sellable),
            });
        }

        let mut chain = Self::new(config.network_id, clock)
            .with_sale(
                sale,
                TokenInfo {
                    decimals: config.token_decimals,
                    ticker: config.token_ticker.clone(),
                    name: config.token_name.clone(),
                },
                tiers,
            )
            .with_gas_price(config.gas_price_wei)
            .with_confirmation_after(config.confirm_after_polls);
        for account in &config.accounts {
            chain = chain.with_account(Address::parse(account)?);
        }
        if let Some(estimate) = config.gas_estimate {
            chain = chain.with_gas_estimate(GasEstimateBehavior::Fixed(estimate));
        }
        Ok(chain)
    }

    pub fn with_account(self, account: Address) -> Self {
        self.state.lock().accounts.push(account);
        self
    }

    pub fn with_sale(self, sale: Address, token: TokenInfo, tiers: Vec<SimulatedTier>) -> Self {
        {
            let mut state = self.state.lock();
            let addresses = tiers.iter().map(|t| t.address).collect();
            for tier in tiers {
                state.tiers.insert(tier.address, tier);
            }
            state.sales.insert(
                sale,
                SaleEntry {
                    tiers: addresses,
                    token,
                },
            );
        }
        self
    }

    pub fn with_gas_price(self, gas_price: Option<u64>) -> Self {
        self.state.lock().gas_price = gas_price;
        self
    }

    pub fn with_gas_estimate(self, behavior: GasEstimateBehavior) -> Self {
        self.set_gas_estimate(behavior);
        self
    }

    /// Receipts stay pending for `polls` receipt queries before being mined
    pub fn with_confirmation_after(self, polls: u32) -> Self {
        self.state.lock().confirm_after_polls = polls;
        self
    }

    pub fn set_gas_estimate(&self, behavior: GasEstimateBehavior) {
        self.state.lock().gas_estimate = behavior;
    }

    /// Make every following `send` fail with `error` (`None` restores sends)
    pub fn fail_sends(&self, error: Option<ChainError>) {
        self.state.lock().send_failure = error;
    }

    pub fn set_tier_rate(&self, tier: &Address, rate: u128) {
        if let Some(entry) = self.state.lock().tiers.get_mut(tier) {
            entry.rate = rate;
        }
    }

    pub fn clear_accounts(&self) {
        self.state.lock().accounts.clear();
    }

    pub fn sent_transactions(&self) -> Vec<(ContractCall, TransactionOptions)> {
        self.state.lock().sent.clone()
    }

    pub fn send_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn estimate_count(&self) -> usize {
        self.state.lock().estimate_calls
    }

    pub fn receipt_polls(&self) -> usize {
        self.state.lock().receipt_polls
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn network_id(&self) -> ChainResult<u64> {
        Ok(self.state.lock().network_id)
    }

    async fn accounts(&self) -> ChainResult<Vec<Address>> {
        Ok(self.state.lock().accounts.clone())
    }

    async fn joined_tiers(&self, sale: &Address) -> ChainResult<Vec<Address>> {
        let state = self.state.lock();
        state
            .sales
            .get(sale)
            .map(|entry| entry.tiers.clone())
            .ok_or(ChainError::UnknownContract(*sale))
    }

    async fn block_timestamp_ms(&self) -> ChainResult<i64> {
        Ok(self.clock.now_ms())
    }

    async fn tier_window(&self, tier: &Address) -> ChainResult<TierWindow> {
        Ok(self.state.lock().tier(tier)?.window)
    }

    async fn tier_rate(&self, tier: &Address) -> ChainResult<u128> {
        Ok(self.state.lock().tier(tier)?.rate)
    }

    async fn token_info(&self, sale: &Address) -> ChainResult<TokenInfo> {
        let state = self.state.lock();
        state
            .sales
            .get(sale)
            .map(|entry| entry.token.clone())
            .ok_or(ChainError::UnknownContract(*sale))
    }

    async fn max_sellable_tokens(&self, tier: &Address) -> ChainResult<u128> {
        Ok(self.state.lock().tier(tier)?.max_sellable)
    }

    async fn token_amount_of(&self, tier: &Address, investor: &Address) -> ChainResult<u128> {
        let state = self.state.lock();
        state.tier(tier)?;
        Ok(state
            .purchases
            .get(&(*tier, *investor))
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> ChainResult<u64> {
        self.state
            .lock()
            .gas_price
            .ok_or_else(|| ChainError::Transport("gas price oracle unavailable".to_string()))
    }

    async fn estimate_gas(&self, call: &ContractCall, _opts: &CallOptions) -> ChainResult<u64> {
        let mut state = self.state.lock();
        state.estimate_calls += 1;
        state.tier(&call.to())?;
        match &state.gas_estimate {
            GasEstimateBehavior::Fixed(gas) => Ok(*gas),
            GasEstimateBehavior::Fail(err) => Err(err.clone()),
        }
    }

    async fn send(&self, call: &ContractCall, opts: &TransactionOptions) -> ChainResult<TxHash> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(err) = state.send_failure.clone() {
            return Err(err);
        }
        let tier = call.to();
        let rate = state.tier(&tier)?.rate;

        // value = tokens * rate, so tokens in base units = value * 10^decimals / rate
        let decimals = state.decimals_for_tier(&tier).unwrap_or(0);
        let bought = 10u128
            .checked_pow(decimals)
            .and_then(|scale| opts.value.checked_mul(scale))
            .and_then(|scaled| scaled.checked_div(rate))
            .unwrap_or_default();
        *state.purchases.entry((tier, opts.sender)).or_default() += bought;

        let hash = TxHash::from_low_u64(state.next_tx);
        state.next_tx += 1;
        let polls_left = state.confirm_after_polls;
        state.transactions.insert(
            hash,
            PendingTx {
                polls_left,
                block_number: None,
            },
        );
        state.sent.push((*call, *opts));
        tracing::debug!(tx = %hash, call = %call, value = opts.value, "simulated transaction accepted");
        Ok(hash)
    }

    async fn receipt(&self, tx: &TxHash) -> ChainResult<Option<Receipt>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.receipt_polls += 1;
        let Some(pending) = state.transactions.get_mut(tx) else {
            return Ok(None);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(Some(Receipt {
                tx_hash: *tx,
                block_number: None,
            }));
        }
        let block_number = match pending.block_number {
            Some(block) => block,
            None => {
                state.block_number += 1;
                pending.block_number = Some(state.block_number);
                state.block_number
            }
        };
        Ok(Some(Receipt {
            tx_hash: *tx,
            block_number: Some(block_number),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn chain() -> (SimulatedChain, Address, Address) {
        let sale = Address::from_low_u64(0x5a1e);
        let tier = Address::from_low_u64(0x71e7);
        let chain = SimulatedChain::new(1, Arc::new(ManualClock::new(0)))
            .with_account(Address::from_low_u64(1))
            .with_sale(
                sale,
                TokenInfo {
                    decimals: 2,
                    ticker: "TKN".into(),
                    name: "Token".into(),
                },
                vec![SimulatedTier {
                    address: tier,
                    window: TierWindow::new(0, 1_000),
                    rate: 50,
                    max_sellable: 1_000_000,
                }],
            )
            .with_confirmation_after(2);
        (chain, sale, tier)
    }

    #[tokio::test]
    async fn test_send_records_purchase_in_base_units() {
        let (chain, _, tier) = chain();
        let buyer = Address::from_low_u64(1);
        let opts = TransactionOptions {
            sender: buyer,
            value: 150,
            gas_price: 1,
            gas_limit: 100_000,
        };
        chain.send(&ContractCall::buy(tier), &opts).await.unwrap();

        // 150 / 50 = 3 tokens = 300 base units with 2 decimals
        assert_eq!(chain.token_amount_of(&tier, &buyer).await.unwrap(), 300);
        assert_eq!(chain.send_count(), 1);
    }

    #[tokio::test]
    async fn test_receipt_mined_after_configured_polls() {
        let (chain, _, tier) = chain();
        let opts = TransactionOptions {
            sender: Address::from_low_u64(1),
            value: 50,
            gas_price: 1,
            gas_limit: 100_000,
        };
        let tx = chain.send(&ContractCall::buy(tier), &opts).await.unwrap();

        assert!(!chain.receipt(&tx).await.unwrap().unwrap().is_mined());
        assert!(!chain.receipt(&tx).await.unwrap().unwrap().is_mined());
        let mined = chain.receipt(&tx).await.unwrap().unwrap();
        assert_eq!(mined.block_number, Some(2));
        // Stable once mined
        assert_eq!(chain.receipt(&tx).await.unwrap().unwrap(), mined);
        assert_eq!(chain.receipt(&TxHash::from_low_u64(99)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_contracts_error() {
        let (chain, _, _) = chain();
        let stranger = Address::from_low_u64(0xdead);
        assert_eq!(
            chain.joined_tiers(&stranger).await,
            Err(ChainError::UnknownContract(stranger))
        );
        assert!(chain.tier_rate(&stranger).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let (chain, _, tier) = chain();
        chain.set_gas_estimate(GasEstimateBehavior::Fail(ChainError::Reverted("x".into())));
        let call_opts = CallOptions {
            sender: Address::from_low_u64(1),
            value: 1,
            gas_price: 1,
        };
        assert!(chain.estimate_gas(&ContractCall::buy(tier), &call_opts).await.is_err());

        chain.fail_sends(Some(ChainError::UserRejected));
        let opts = TransactionOptions::from_call(call_opts, 21_000);
        assert_eq!(
            chain.send(&ContractCall::buy(tier), &opts).await,
            Err(ChainError::UserRejected)
        );
        assert_eq!(chain.send_count(), 0);
    }

    #[tokio::test]
    async fn test_from_example_config() {
        let config = crate::config::Config::from_toml_str(include_str!("../../invest.example.toml")).unwrap();
        let simulation = config.simulation.unwrap();
        let clock = ManualClock::new(1_700_000_000_000);
        let chain = SimulatedChain::from_config(&simulation, Arc::new(clock)).unwrap();

        let sale = Address::parse(&simulation.sale_address).unwrap();
        let tiers = chain.joined_tiers(&sale).await.unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(chain.tier_rate(&tiers[1]).await.unwrap(), 2_000);
        assert_eq!(chain.max_sellable_tokens(&tiers[0]).await.unwrap(), 1_000_000_000_000);
        assert_eq!(
            chain.tier_window(&tiers[0]).await.unwrap(),
            TierWindow::new(1_700_000_000_000 - 60_000, 1_700_000_000_000 + 120_000)
        );
    }
}
