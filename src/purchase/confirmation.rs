//! Receipt polling after a purchase was sent

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::chain::ChainClient;
use crate::metrics::{metrics, Timer};
use crate::types::{Receipt, TxHash};

pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls until the transaction is mined. There is no timeout: wrap
/// [`ConfirmationPoller::await_confirmation`] in `tokio::time::timeout`
/// for a bounded wait.
#[derive(Debug, Clone)]
pub struct ConfirmationPoller {
    chain: Arc<dyn ChainClient>,
    interval: Duration,
}

impl ConfirmationPoller {
    pub fn new(chain: Arc<dyn ChainClient>, interval: Duration) -> Self {
        Self { chain, interval }
    }

    #[instrument(skip(self))]
    pub async fn await_confirmation(&self, tx: &TxHash) -> Receipt {
        let timer = Timer::new();
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            metrics().receipt_polls.inc();
            match self.chain.receipt(tx).await {
                Ok(Some(receipt)) if receipt.is_mined() => {
                    debug!(attempts, block = ?receipt.block_number, "transaction mined");
                    timer.observe_duration(&metrics().confirmation_latency);
                    return receipt;
                }
                Ok(_) => debug!(attempts, "transaction not mined yet"),
                Err(e) => warn!(attempts, error = %e, "receipt query failed, polling again"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainResult, ContractCall, SimulatedChain, SimulatedTier};
    use crate::clock::ManualClock;
    use crate::errors::ChainError;
    use crate::types::{
        Address, CallOptions, TierWindow, TokenInfo, TransactionOptions,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_mined() {
        let tier = Address::from_low_u64(0x101);
        let chain = SimulatedChain::new(1, Arc::new(ManualClock::new(0)))
            .with_sale(
                Address::from_low_u64(0x5a1e),
                TokenInfo {
                    decimals: 0,
                    ticker: "T".into(),
                    name: "T".into(),
                },
                vec![SimulatedTier {
                    address: tier,
                    window: TierWindow::new(0, 10),
                    rate: 1,
                    max_sellable: 0,
                }],
            )
            .with_confirmation_after(3);
        let opts = TransactionOptions {
            sender: Address::from_low_u64(1),
            value: 1,
            gas_price: 1,
            gas_limit: 21_000,
        };
        let tx = chain.send(&ContractCall::buy(tier), &opts).await.unwrap();

        let poller = ConfirmationPoller::new(Arc::new(chain.clone()), RECEIPT_POLL_INTERVAL);
        let started = tokio::time::Instant::now();
        let receipt = poller.await_confirmation(&tx).await;

        assert!(receipt.is_mined());
        assert_eq!(chain.receipt_polls(), 4);
        // Three pending answers, three sleeps
        assert_eq!(started.elapsed(), RECEIPT_POLL_INTERVAL * 3);
    }

    /// Fails a fixed number of receipt queries, then reports the tx mined
    #[derive(Debug)]
    struct FlakyReceipts {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl ChainClient for FlakyReceipts {
        async fn network_id(&self) -> ChainResult<u64> {
            Ok(1)
        }
        async fn accounts(&self) -> ChainResult<Vec<Address>> {
            Ok(vec![])
        }
        async fn joined_tiers(&self, _: &Address) -> ChainResult<Vec<Address>> {
            Ok(vec![])
        }
        async fn block_timestamp_ms(&self) -> ChainResult<i64> {
            Ok(0)
        }
        async fn tier_window(&self, _: &Address) -> ChainResult<TierWindow> {
            Ok(TierWindow::new(0, 1))
        }
        async fn tier_rate(&self, _: &Address) -> ChainResult<u128> {
            Ok(1)
        }
        async fn token_info(&self, _: &Address) -> ChainResult<TokenInfo> {
            Err(ChainError::Transport("unused".into()))
        }
        async fn max_sellable_tokens(&self, _: &Address) -> ChainResult<u128> {
            Ok(0)
        }
        async fn token_amount_of(&self, _: &Address, _: &Address) -> ChainResult<u128> {
            Ok(0)
        }
        async fn gas_price(&self) -> ChainResult<u64> {
            Ok(1)
        }
        async fn estimate_gas(&self, _: &ContractCall, _: &CallOptions) -> ChainResult<u64> {
            Ok(1)
        }
        async fn send(&self, _: &ContractCall, _: &TransactionOptions) -> ChainResult<TxHash> {
            Ok(TxHash::from_low_u64(1))
        }
        async fn receipt(&self, tx: &TxHash) -> ChainResult<Option<Receipt>> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(ChainError::Transport("connection reset".into()));
            }
            Ok(Some(Receipt {
                tx_hash: *tx,
                block_number: Some(7),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_errors_keep_polling() {
        let chain = Arc::new(FlakyReceipts {
            failures_left: Mutex::new(5),
        });
        let poller = ConfirmationPoller::new(chain, Duration::from_millis(500));
        let receipt = poller.await_confirmation(&TxHash::from_low_u64(1)).await;
        assert_eq!(receipt.block_number, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tx_polls_forever() {
        let chain = SimulatedChain::new(1, Arc::new(ManualClock::new(0)));
        let poller = ConfirmationPoller::new(Arc::new(chain), RECEIPT_POLL_INTERVAL);
        let tx = TxHash::from_low_u64(42);
        let outcome =
            tokio::time::timeout(Duration::from_secs(60), poller.await_confirmation(&tx)).await;
        assert!(outcome.is_err());
    }
}
