//! Rate & tier resolver
//!
//! Walks the sale's tier list looking for the tier whose window contains the
//! chain's current block time. Nothing here is cached: block time and tier
//! state are queried on every call, because a boundary may pass between page
//! load and the purchase click.

use std::sync::Arc;

use nonempty::NonEmpty;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::chain::ChainClient;
use crate::errors::{ChainError, InvestError};
use crate::metrics::metrics;
use crate::types::{Address, Tier, TierWindow};

/// A sale and its tier contracts in chronological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sale {
    pub address: Address,
    pub tiers: NonEmpty<Address>,
}

impl Sale {
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn tier(&self, index: usize) -> Option<&Address> {
        self.tiers.get(index)
    }

    /// Address shown as "the" sale contract: the first tier
    pub fn primary_tier(&self) -> &Address {
        self.tiers.first()
    }
}

/// The tier found active, before its rate is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveTier {
    pub index: usize,
    pub address: Address,
    pub window: TierWindow,
}

#[derive(Debug, Clone)]
pub struct TierResolver {
    chain: Arc<dyn ChainClient>,
}

impl TierResolver {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Fail with `NetworkMismatch` when the wallet is on another network
    pub async fn ensure_network(&self, expected: Option<u64>) -> Result<(), InvestError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let actual = self.chain.network_id().await?;
        if actual != expected {
            return Err(InvestError::NetworkMismatch { expected, actual });
        }
        Ok(())
    }

    /// Read the joined tiers of an already parsed sale address
    #[instrument(skip(self))]
    pub async fn fetch_sale(&self, address: Address) -> Result<Sale, InvestError> {
        let tiers = match self.chain.joined_tiers(&address).await {
            Ok(tiers) => tiers,
            Err(ChainError::UnknownContract(_)) => {
                return Err(InvestError::InvalidSaleAddress(format!(
                    "no sale contract at {}",
                    address
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let tiers = NonEmpty::from_vec(tiers).ok_or_else(|| {
            InvestError::InvalidSaleAddress(format!("sale {} has no tiers", address))
        })?;
        debug!(sale = %address, tiers = tiers.len(), "joined tiers fetched");
        Ok(Sale { address, tiers })
    }

    /// First tier at or after `start_index` whose window contains block time.
    ///
    /// `None` means the list is exhausted: the sale is over or unavailable.
    #[instrument(skip(self, sale), fields(sale = %sale.address))]
    pub async fn find_active_tier(
        &self,
        sale: &Sale,
        start_index: usize,
    ) -> Result<Option<ActiveTier>, InvestError> {
        metrics().tier_lookups.inc();
        for (index, address) in sale.tiers.iter().enumerate().skip(start_index) {
            let (window, now) = futures::try_join!(
                self.chain.tier_window(address),
                self.chain.block_timestamp_ms()
            )?;
            if window.contains(now) {
                debug!(index, tier = %address, "active tier found");
                return Ok(Some(ActiveTier {
                    index,
                    address: *address,
                    window,
                }));
            }
            debug!(index, tier = %address, now, start = window.start_ms, end = window.end_ms, "tier not active");
        }
        Ok(None)
    }

    /// Read the current rate of an active tier
    pub async fn load_tier(&self, active: ActiveTier) -> Result<Tier, InvestError> {
        let rate = self.chain.tier_rate(&active.address).await?;
        if rate == 0 {
            return Err(ChainError::InvalidResponse(format!(
                "tier {} reports a zero rate",
                active.address
            ))
            .into());
        }
        Ok(Tier {
            index: active.index,
            address: active.address,
            window: active.window,
            rate,
        })
    }

    /// Windows of every tier, in sale order
    pub async fn tier_windows(&self, sale: &Sale) -> Result<Vec<TierWindow>, InvestError> {
        let mut windows = Vec::with_capacity(sale.tier_count());
        for address in sale.tiers.iter() {
            windows.push(self.chain.tier_window(address).await?);
        }
        Ok(windows)
    }
}
