//! Transaction submitter: gas estimation with a bounded fallback, then one send

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::chain::{ChainClient, ContractCall};
use crate::config::GasConfig;
use crate::errors::{ChainError, InvestError};
use crate::metrics::metrics;
use crate::types::{Address, CallOptions, Tier, TransactionOptions, TxHash};

/// Hard ceiling for the purchase gas limit
pub const GAS_LIMIT_CEILING: u64 = 4_016_260;

/// Headroom added on top of a successful estimate
pub const GAS_HEADROOM: u64 = 100_000;

/// Where the gas limit came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GasLimitSource {
    /// Estimate plus headroom
    Estimate { estimate: u64 },
    /// Estimate was over the ceiling
    CeilingExceeded { estimate: u64 },
    /// Estimation failed or returned nothing usable
    EstimationFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GasPlan {
    pub limit: u64,
    pub source: GasLimitSource,
}

impl GasPlan {
    pub fn is_fallback(&self) -> bool {
        !matches!(self.source, GasLimitSource::Estimate { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub ceiling: u64,
    pub headroom: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            ceiling: GAS_LIMIT_CEILING,
            headroom: GAS_HEADROOM,
        }
    }
}

impl From<&GasConfig> for GasPolicy {
    fn from(config: &GasConfig) -> Self {
        Self {
            ceiling: config.limit_ceiling,
            headroom: config.headroom,
        }
    }
}

impl GasPolicy {
    /// Gas limit for an estimation outcome; never above the ceiling
    pub fn plan(&self, estimate: Result<u64, ChainError>) -> GasPlan {
        match estimate {
            Ok(0) => GasPlan {
                limit: self.ceiling,
                source: GasLimitSource::EstimationFailed {
                    reason: "estimate was zero".to_string(),
                },
            },
            Ok(estimate) if estimate > self.ceiling => GasPlan {
                limit: self.ceiling,
                source: GasLimitSource::CeilingExceeded { estimate },
            },
            Ok(estimate) => GasPlan {
                limit: estimate.saturating_add(self.headroom).min(self.ceiling),
                source: GasLimitSource::Estimate { estimate },
            },
            Err(e) => GasPlan {
                limit: self.ceiling,
                source: GasLimitSource::EstimationFailed {
                    reason: e.to_string(),
                },
            },
        }
    }
}

/// What the buyer pays and signs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub sender: Address,
    pub value: u128,
    pub gas_price: u64,
}

/// A purchase the node accepted, not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingPurchase {
    pub tx_hash: TxHash,
    pub tier_index: usize,
    pub options: TransactionOptions,
    pub gas: GasPlan,
}

#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    policy: GasPolicy,
}

impl TransactionSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>, policy: GasPolicy) -> Self {
        Self { chain, policy }
    }

    /// Estimate, size the gas limit, send once. No retry on failure.
    #[instrument(skip(self, tier, order), fields(tier = %tier.address, index = tier.index, value = order.value))]
    pub async fn submit_purchase(
        &self,
        tier: &Tier,
        order: &PurchaseOrder,
    ) -> Result<PendingPurchase, InvestError> {
        let call = ContractCall::buy(tier.address);
        let call_opts = CallOptions {
            sender: order.sender,
            value: order.value,
            gas_price: order.gas_price,
        };

        let gas = self.policy.plan(self.chain.estimate_gas(&call, &call_opts).await);
        if gas.is_fallback() {
            metrics().gas_estimate_fallbacks.inc();
            warn!(limit = gas.limit, source = ?gas.source, "gas estimate unusable, using ceiling");
        }

        let options = TransactionOptions::from_call(call_opts, gas.limit);
        let tx_hash = self
            .chain
            .send(&call, &options)
            .await
            .map_err(InvestError::TransactionRejected)?;

        info!(tx = %tx_hash, gas_limit = gas.limit, "purchase transaction sent");
        Ok(PendingPurchase {
            tx_hash,
            tier_index: tier.index,
            options,
            gas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{GasEstimateBehavior, SimulatedChain, SimulatedTier};
    use crate::clock::ManualClock;
    use crate::types::{TierWindow, TokenInfo};

    #[test]
    fn test_estimate_plus_headroom() {
        let plan = GasPolicy::default().plan(Ok(3_000_000));
        assert_eq!(plan.limit, 3_100_000);
        assert!(!plan.is_fallback());
    }

    #[test]
    fn test_over_ceiling_uses_ceiling() {
        let plan = GasPolicy::default().plan(Ok(4_500_000));
        assert_eq!(plan.limit, 4_016_260);
        assert_eq!(plan.source, GasLimitSource::CeilingExceeded { estimate: 4_500_000 });
    }

    #[test]
    fn test_estimation_failure_uses_ceiling() {
        let plan = GasPolicy::default().plan(Err(ChainError::Reverted("sold out".into())));
        assert_eq!(plan.limit, 4_016_260);
        assert!(plan.is_fallback());

        let plan = GasPolicy::default().plan(Ok(0));
        assert_eq!(plan.limit, 4_016_260);
    }

    #[test]
    fn test_headroom_never_exceeds_ceiling() {
        let plan = GasPolicy::default().plan(Ok(3_990_000));
        assert_eq!(plan.limit, GAS_LIMIT_CEILING);
        assert!(!plan.is_fallback());

        let plan = GasPolicy::default().plan(Ok(GAS_LIMIT_CEILING));
        assert_eq!(plan.limit, GAS_LIMIT_CEILING);
    }

    fn setup() -> (SimulatedChain, Tier) {
        let tier_address = Address::from_low_u64(0x101);
        let chain = SimulatedChain::new(1, Arc::new(ManualClock::new(0))).with_sale(
            Address::from_low_u64(0x5a1e),
            TokenInfo {
                decimals: 18,
                ticker: "TKN".into(),
                name: "Token".into(),
            },
            vec![SimulatedTier {
                address: tier_address,
                window: TierWindow::new(0, 1_000),
                rate: 1_000,
                max_sellable: 0,
            }],
        );
        let tier = Tier {
            index: 0,
            address: tier_address,
            window: TierWindow::new(0, 1_000),
            rate: 1_000,
        };
        (chain, tier)
    }

    fn order() -> PurchaseOrder {
        PurchaseOrder {
            sender: Address::from_low_u64(1),
            value: 2_000,
            gas_price: 5,
        }
    }

    #[tokio::test]
    async fn test_submit_sends_exactly_once() {
        let (chain, tier) = setup();
        let chain = chain.with_gas_estimate(GasEstimateBehavior::Fixed(3_000_000));
        let submitter = TransactionSubmitter::new(Arc::new(chain.clone()), GasPolicy::default());

        let pending = submitter.submit_purchase(&tier, &order()).await.unwrap();
        assert_eq!(pending.options.gas_limit, 3_100_000);
        assert_eq!(pending.options.value, 2_000);
        assert_eq!(pending.options.gas_price, 5);
        assert_eq!(chain.send_count(), 1);

        let (call, opts) = chain.sent_transactions().remove(0);
        assert_eq!(call, ContractCall::buy(tier.address));
        assert_eq!(opts, pending.options);
    }

    #[tokio::test]
    async fn test_estimation_failure_still_sends_with_ceiling() {
        let (chain, tier) = setup();
        let chain = chain.with_gas_estimate(GasEstimateBehavior::Fail(ChainError::Transport(
            "timeout".into(),
        )));
        let submitter = TransactionSubmitter::new(Arc::new(chain.clone()), GasPolicy::default());

        let pending = submitter.submit_purchase(&tier, &order()).await.unwrap();
        assert_eq!(pending.options.gas_limit, GAS_LIMIT_CEILING);
        assert_eq!(chain.send_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (chain, tier) = setup();
        chain.fail_sends(Some(ChainError::UserRejected));
        let submitter = TransactionSubmitter::new(Arc::new(chain.clone()), GasPolicy::default());

        let err = submitter.submit_purchase(&tier, &order()).await.unwrap_err();
        assert_eq!(err, InvestError::TransactionRejected(ChainError::UserRejected));
        assert_eq!(chain.estimate_count(), 1);
        assert_eq!(chain.send_count(), 0);
    }
}
