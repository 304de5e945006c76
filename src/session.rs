//! Investment session
//!
//! One session backs one open "invest" page: it loads the sale when mounted,
//! runs purchases one at a time and keeps the tier countdown going. Every
//! failure is turned into at most one [`Alert`] here and nowhere else.
//!
//! After [`InvestSession::close`] network calls already in flight may still
//! complete, but nothing they return is written to the view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::alerts::{Alert, Alerter};
use crate::chain::ChainClient;
use crate::clock::Clock;
use crate::config::Config;
use crate::countdown::{
    BoundaryQueue, CountdownScheduler, CountdownSettings, CrossingReceiver, SchedulerState,
    TickState,
};
use crate::errors::InvestError;
use crate::metrics::{metrics, Timer};
use crate::purchase::{
    compute_payment, is_valid_token, ConfirmationPoller, GasPlan, GasPolicy, PurchaseOrder, Sale,
    TierResolver, TokenAmount, TransactionSubmitter,
};
use crate::structured_logging::PipelineContext;
use crate::types::{Address, Boundary, Receipt, Tier, TierWindow, TokenInfo, TxHash};

/// Everything a session needs to know before it talks to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Raw sale address, validated on mount
    pub sale_address: String,
    /// Expected network; no check when unset
    pub network_id: Option<u64>,
    /// Fixed gas price used instead of the chain's
    pub gas_price_override: Option<u64>,
    pub gas_policy: GasPolicy,
    pub poll_interval: Duration,
    pub countdown: CountdownSettings,
}

impl SessionContext {
    pub fn from_config(config: &Config, query: Option<&str>) -> Self {
        let source = config.sale_source(query);
        Self {
            sale_address: source.address,
            network_id: source.network_id,
            gas_price_override: config.gas.price_wei,
            gas_policy: GasPolicy::from(&config.gas),
            poll_interval: Duration::from_millis(config.confirmation.poll_interval_ms),
            countdown: CountdownSettings::from(&config.countdown),
        }
    }
}

/// How the investor pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Transfer to the sale address from any wallet, shown as a QR code
    Qr,
    /// Signed and sent through the connected wallet
    Wallet,
}

/// What the page shows
#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub loading: bool,
    pub sale: Option<Sale>,
    pub token: Option<TokenInfo>,
    pub tier_windows: Vec<TierWindow>,
    /// Start of the first tier, unix milliseconds
    pub sale_start_ms: Option<i64>,
    /// End of the last tier, unix milliseconds
    pub sale_end_ms: Option<i64>,
    pub active_tier: Option<Tier>,
    pub current_rate: Option<u128>,
    pub gas_price: Option<u64>,
    pub wallet_available: bool,
    /// QR until the wallet proves usable at mount
    pub payment_method: PaymentMethod,
    pub current_account: Option<Address>,
    /// Sum of every tier's supply cap, in token base units
    pub total_sellable: u128,
    /// Tokens the current account bought across all tiers, in base units
    pub investor_balance: u128,
    pub tokens_to_invest: String,
    pub input_pristine: bool,
    pub last_payment: Option<u128>,
    pub last_tx: Option<TxHash>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            loading: false,
            sale: None,
            token: None,
            tier_windows: Vec::new(),
            sale_start_ms: None,
            sale_end_ms: None,
            active_tier: None,
            current_rate: None,
            gas_price: None,
            wallet_available: false,
            payment_method: PaymentMethod::Qr,
            current_account: None,
            total_sellable: 0,
            investor_balance: 0,
            tokens_to_invest: String::new(),
            input_pristine: true,
            last_payment: None,
            last_tx: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MountStatus {
    /// Sale data and countdown loaded
    Ready,
    /// Wallet exposes no account; nothing else was loaded
    NoAccounts,
    /// Every tier has already ended
    SaleUnavailable,
}

/// A confirmed purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOutcome {
    pub tokens: String,
    pub payment: u128,
    pub tier_index: usize,
    pub gas: GasPlan,
    pub receipt: Receipt,
}

#[derive(Debug)]
pub struct InvestSession {
    context: SessionContext,
    chain: Arc<dyn ChainClient>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    resolver: TierResolver,
    submitter: TransactionSubmitter,
    poller: ConfirmationPoller,
    scheduler: CountdownScheduler,
    crossings: Mutex<Option<CrossingReceiver>>,
    view: Mutex<ViewState>,
    pending_purchase: AtomicBool,
    closed: watch::Sender<bool>,
}

impl InvestSession {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
        context: SessionContext,
    ) -> Self {
        let (scheduler, crossings) = CountdownScheduler::new(Arc::clone(&clock), context.countdown);
        let (closed, _) = watch::channel(false);
        Self {
            resolver: TierResolver::new(Arc::clone(&chain)),
            submitter: TransactionSubmitter::new(Arc::clone(&chain), context.gas_policy),
            poller: ConfirmationPoller::new(Arc::clone(&chain), context.poll_interval),
            scheduler,
            crossings: Mutex::new(Some(crossings)),
            view: Mutex::new(ViewState::default()),
            pending_purchase: AtomicBool::new(false),
            closed,
            context,
            chain,
            alerter,
            clock,
        }
    }

    pub fn view(&self) -> ViewState {
        self.view.lock().clone()
    }

    pub fn ticks(&self) -> watch::Receiver<TickState> {
        self.scheduler.subscribe()
    }

    pub fn countdown_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Caption for the current countdown tick
    pub fn countdown_label(&self) -> String {
        let tier_count = self.view.lock().tier_windows.len();
        self.scheduler.current().label(tier_count)
    }

    pub fn live_countdown_intervals(&self) -> usize {
        self.scheduler.live_intervals()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Write to the view unless the session was closed
    fn update_view(&self, update: impl FnOnce(&mut ViewState)) {
        if self.is_closed() {
            debug!("session closed, view update dropped");
            return;
        }
        update(&mut self.view.lock());
    }

    /// Sets `loading` until the returned guard drops
    fn loading(&self) -> scopeguard::ScopeGuard<(), impl FnOnce(()) + '_> {
        self.update_view(|view| view.loading = true);
        scopeguard::guard((), move |_| self.update_view(|view| view.loading = false))
    }

    fn report(&self, err: &InvestError) {
        match err.alert() {
            Some(alert) => self.alerter.alert(alert),
            None => debug!(error = %err, "silent stop"),
        }
    }

    /// Configured price, else the chain's; `None` when neither is available
    async fn resolve_gas_price(&self) -> Option<u64> {
        if let Some(price) = self.context.gas_price_override {
            return Some(price);
        }
        match self.chain.gas_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(error = %e, "gas price unavailable");
                None
            }
        }
    }

    /// Load sale, token, balances and countdown
    #[instrument(skip(self), fields(sale = %self.context.sale_address))]
    pub async fn mount(&self) -> Result<MountStatus, InvestError> {
        let pipeline = PipelineContext::new("mount");
        let _loading = self.loading();
        debug!(request_id = %pipeline.request_id, "mounting invest session");

        let result = self.load_sale().await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    async fn load_sale(&self) -> Result<MountStatus, InvestError> {
        let sale_address = Address::parse(&self.context.sale_address)?;
        self.resolver.ensure_network(self.context.network_id).await?;

        // A missing price only matters once the investor buys
        let gas_price = self.resolve_gas_price().await;
        if gas_price.is_none() {
            self.alerter.alert(Alert::NoGasPriceAvailable);
        }
        self.update_view(|view| view.gas_price = gas_price);

        let sale = self.resolver.fetch_sale(sale_address).await?;
        self.update_view(|view| view.sale = Some(sale.clone()));

        let accounts = self.chain.accounts().await?;
        let Some(account) = accounts.first().copied() else {
            info!("wallet exposes no account, sale data not loaded");
            self.update_view(|view| view.wallet_available = false);
            return Ok(MountStatus::NoAccounts);
        };

        let (token, windows) = futures::try_join!(
            async { self.chain.token_info(&sale.address).await.map_err(InvestError::from) },
            self.resolver.tier_windows(&sale)
        )?;

        let active = match self.resolver.find_active_tier(&sale, 0).await? {
            Some(active) => Some(self.resolver.load_tier(active).await?),
            None => None,
        };
        let (total_sellable, investor_balance) = self.read_balances(&sale, &account).await?;

        info!(
            sale = %sale.address,
            tiers = sale.tier_count(),
            token = %token.ticker,
            active_tier = ?active.as_ref().map(|tier| tier.index),
            "sale loaded"
        );

        let now = self.clock.now_ms();
        let all_ended = windows.iter().all(|window| window.has_ended(now));
        let boundaries = BoundaryQueue::from_windows(&windows);
        self.update_view(|view| {
            view.wallet_available = true;
            view.payment_method = PaymentMethod::Wallet;
            view.current_account = Some(account);
            view.token = Some(token);
            view.sale_start_ms = windows.first().map(|window| window.start_ms);
            view.sale_end_ms = windows.last().map(|window| window.end_ms);
            view.tier_windows = windows;
            view.current_rate = active.as_ref().map(|tier| tier.rate);
            view.active_tier = active;
            view.total_sellable = total_sellable;
            view.investor_balance = investor_balance;
        });
        if !self.is_closed() {
            self.scheduler.load(boundaries);
        }

        Ok(if all_ended {
            MountStatus::SaleUnavailable
        } else {
            MountStatus::Ready
        })
    }

    /// Store the raw amount typed by the investor
    pub fn set_tokens_to_invest(&self, input: &str) {
        self.update_view(|view| {
            view.tokens_to_invest = input.to_string();
            view.input_pristine = false;
        });
    }

    /// Switch payment method; the wallet can only be chosen when usable
    pub fn select_payment_method(&self, method: PaymentMethod) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut view = self.view.lock();
        if method == PaymentMethod::Wallet && !view.wallet_available {
            debug!("wallet payment unavailable");
            return false;
        }
        view.payment_method = method;
        true
    }

    /// Inline validation message for the amount field, `None` when fine or untouched
    pub fn token_input_error(&self) -> Option<String> {
        let view = self.view.lock();
        if view.input_pristine {
            return None;
        }
        let decimals = view.token.as_ref().map(|token| token.decimals)?;
        if is_valid_token(&view.tokens_to_invest, decimals) {
            None
        } else {
            Some(format!(
                "Number of tokens to buy should be positive and should not exceed {} decimals.",
                decimals
            ))
        }
    }

    /// Buy the amount currently entered; one purchase at a time
    #[instrument(skip(self), fields(sale = %self.context.sale_address))]
    pub async fn invest(&self) -> Result<PurchaseOutcome, InvestError> {
        let pipeline = PipelineContext::new("invest");
        let timer = Timer::new();
        metrics().purchases_attempted.inc();

        let result = self.run_purchase(&pipeline).await;
        match &result {
            Ok(outcome) => {
                metrics().purchases_succeeded.inc();
                timer.observe_duration(&metrics().purchase_latency);
                pipeline
                    .logger
                    .log_purchase_confirmed(&outcome.receipt, timer.elapsed_ms());
                self.alerter.alert(Alert::PurchaseSucceeded {
                    amount: outcome.tokens.clone(),
                });
            }
            Err(e) => {
                if e.is_validation() {
                    metrics().purchases_rejected_locally.inc();
                } else {
                    metrics().purchases_failed.inc();
                }
                pipeline
                    .logger
                    .log_purchase_failed(&e.to_string(), timer.elapsed_ms());
                self.report(e);
            }
        }
        result
    }

    async fn run_purchase(&self, pipeline: &PipelineContext) -> Result<PurchaseOutcome, InvestError> {
        let (decimals, input, method) = {
            let view = self.view.lock();
            (
                view.token.as_ref().map(|token| token.decimals),
                view.tokens_to_invest.clone(),
                view.payment_method,
            )
        };
        let decimals = decimals.ok_or(InvestError::SaleNotLoaded)?;
        if method == PaymentMethod::Qr {
            return Err(InvestError::QrPaymentSelected);
        }
        let amount = match TokenAmount::parse(&input, decimals) {
            Ok(amount) => amount,
            Err(e) => {
                // Surfaces the inline message even when the field was never touched
                self.update_view(|view| view.input_pristine = false);
                return Err(e);
            }
        };

        if self
            .pending_purchase
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InvestError::PurchaseInProgress);
        }
        metrics().purchase_in_flight.inc();
        let _pending = scopeguard::guard((), |_| {
            self.pending_purchase.store(false, Ordering::SeqCst);
            metrics().purchase_in_flight.dec();
        });
        let _loading = self.loading();

        let sale = self
            .view
            .lock()
            .sale
            .clone()
            .ok_or(InvestError::SaleNotLoaded)?;
        pipeline.logger.log_purchase_attempt(amount.as_str(), &sale.address);

        let sender = match self.chain.accounts().await {
            Ok(accounts) => accounts.first().copied(),
            Err(e) => {
                warn!(error = %e, "account query failed");
                None
            }
        }
        .ok_or(InvestError::NoWalletAvailable)?;

        let (first_window, now) = futures::try_join!(
            self.chain.tier_window(sale.primary_tier()),
            self.chain.block_timestamp_ms()
        )?;
        if now < first_window.start_ms {
            return Err(InvestError::InvestmentWindowClosed {
                starts_at_ms: first_window.start_ms,
            });
        }

        let active = self
            .resolver
            .find_active_tier(&sale, 0)
            .await?
            .ok_or(InvestError::SaleExhausted)?;
        let tier = self.resolver.load_tier(active).await?;
        self.update_view(|view| {
            view.current_rate = Some(tier.rate);
            view.active_tier = Some(tier.clone());
        });

        let gas_price = self
            .resolve_gas_price()
            .await
            .ok_or(InvestError::NoGasPriceAvailable)?;
        let payment = compute_payment(&amount, tier.rate)?;
        self.update_view(|view| view.last_payment = Some(payment));

        let order = PurchaseOrder {
            sender,
            value: payment,
            gas_price,
        };
        let pending = self.submitter.submit_purchase(&tier, &order).await?;
        pipeline.logger.log_gas_plan(&pending.gas);
        pipeline.logger.log_purchase_sent(&pending);
        self.update_view(|view| view.last_tx = Some(pending.tx_hash));

        let confirming = pipeline.child("confirm");
        debug!(
            request_id = %confirming.request_id,
            span_id = %confirming.span_id,
            parent_span_id = ?confirming.parent_span_id,
            tx = %pending.tx_hash,
            "awaiting confirmation"
        );
        let receipt = self.poller.await_confirmation(&pending.tx_hash).await;
        self.refresh_balances(&sale, &sender).await;

        Ok(PurchaseOutcome {
            tokens: amount.as_str().to_string(),
            payment,
            tier_index: tier.index,
            gas: pending.gas,
            receipt,
        })
    }

    /// Supply and investor holdings summed over every tier
    async fn read_balances(&self, sale: &Sale, account: &Address) -> Result<(u128, u128), InvestError> {
        let mut total_sellable: u128 = 0;
        let mut investor_balance: u128 = 0;
        for tier in sale.tiers.iter() {
            let (sellable, bought) = futures::try_join!(
                self.chain.max_sellable_tokens(tier),
                self.chain.token_amount_of(tier, account)
            )?;
            total_sellable = total_sellable.saturating_add(sellable);
            investor_balance = investor_balance.saturating_add(bought);
        }
        Ok((total_sellable, investor_balance))
    }

    async fn refresh_balances(&self, sale: &Sale, account: &Address) {
        match self.read_balances(sale, account).await {
            Ok((total_sellable, investor_balance)) => self.update_view(|view| {
                view.total_sellable = total_sellable;
                view.investor_balance = investor_balance;
            }),
            Err(e) => warn!(sale = %sale.address, error = %e, "balance refresh failed"),
        }
    }

    /// Reschedule the countdown, then reload the active tier and balances
    #[instrument(skip(self))]
    pub async fn on_boundary_crossed(&self, boundary: Boundary) {
        if self.is_closed() {
            return;
        }
        PipelineContext::new("boundary")
            .logger
            .log_boundary_crossed(&boundary);
        self.scheduler.reset();

        let sale = self.view.lock().sale.clone();
        let Some(sale) = sale else {
            return;
        };
        let active = match self.resolver.find_active_tier(&sale, 0).await {
            Ok(Some(active)) => active,
            Ok(None) => {
                info!("no tier active after boundary");
                self.update_view(|view| {
                    view.active_tier = None;
                    view.current_rate = None;
                });
                return;
            }
            Err(e) => {
                warn!(error = %e, "tier refresh failed");
                return;
            }
        };
        match self.resolver.load_tier(active).await {
            Ok(tier) => self.update_view(|view| {
                view.current_rate = Some(tier.rate);
                view.active_tier = Some(tier);
            }),
            Err(e) => warn!(error = %e, "rate refresh failed"),
        }
        let account = self.view.lock().current_account;
        if let Some(account) = account {
            self.refresh_balances(&sale, &account).await;
        }
    }

    /// React to countdown boundaries until the session is closed.
    ///
    /// Only the first caller gets the crossings; later calls return at once.
    pub async fn drive_countdown(self: Arc<Self>) {
        let crossings = self.crossings.lock().take();
        let Some(mut crossings) = crossings else {
            warn!("countdown driver already running");
            return;
        };
        let mut closed = self.closed.subscribe();
        loop {
            tokio::select! {
                crossed = crossings.recv() => match crossed {
                    Some(boundary) => self.on_boundary_crossed(boundary).await,
                    None => break,
                },
                _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            }
        }
        debug!("countdown driver stopped");
    }

    pub fn spawn_countdown_driver(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).drive_countdown())
    }

    /// Unmount: stop the countdown and ignore every later view write
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.scheduler.cancel();
        info!("invest session closed");
    }
}
