//! Invest - command line client for multi-tier token sales
//!
//! Loads a sale from the configured chain, optionally buys tokens and keeps
//! the tier countdown running until interrupted.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invest::alerts::TracingAlerter;
use invest::chain::SimulatedChain;
use invest::clock::SystemClock;
use invest::config::Config;
use invest::metrics::metrics;
use invest::session::{InvestSession, MountStatus, PaymentMethod, SessionContext};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "invest.toml", env = "INVEST_CONFIG")]
    config: String,

    /// Query string carrying `addr` and `networkID`, used when the config leaves them unset
    #[arg(short, long)]
    query: Option<String>,

    /// Buy this many tokens after loading the sale
    #[arg(short, long)]
    tokens: Option<String>,

    /// Pay by transfer to the sale address instead of through the wallet
    #[arg(long)]
    qr: bool,

    /// Keep the countdown running until Ctrl-C
    #[arg(short, long)]
    watch: bool,

    /// Give up waiting for the purchase receipt after this many seconds
    #[arg(long, default_value = "300")]
    confirm_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!("Starting invest client v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;

    let simulation = config
        .simulation
        .as_ref()
        .ok_or_else(|| anyhow!("config has no [simulation] section describing the chain"))?;
    let clock = Arc::new(SystemClock);
    let chain = SimulatedChain::from_config(simulation, clock.clone())
        .context("Failed to build simulated chain")?;

    let context = SessionContext::from_config(&config, args.query.as_deref());
    info!(sale = %context.sale_address, network = ?context.network_id, "Sale source resolved");

    let session = Arc::new(InvestSession::new(
        Arc::new(chain),
        Arc::new(TracingAlerter),
        clock,
        context,
    ));

    let status = session.mount().await.context("Failed to load the sale")?;
    report_view(&session, status);

    if args.qr {
        session.select_payment_method(PaymentMethod::Qr);
        if let Some(sale) = &session.view().sale {
            info!(address = %sale.address, "Pay by transfer to the sale address");
        }
    } else if let Some(tokens) = &args.tokens {
        buy(&session, tokens, Duration::from_secs(args.confirm_timeout_secs)).await;
    }

    if args.watch && status != MountStatus::NoAccounts {
        run_event_loop(&session).await?;
    }

    session.close();

    if args.dump_metrics {
        println!("{}", metrics().render()?);
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose { "invest=debug,info" } else { "invest=info,warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}

fn report_view(session: &InvestSession, status: MountStatus) {
    let view = session.view();
    if let Ok(json) = serde_json::to_string(&view) {
        debug!(view = %json, "View state");
    }
    match status {
        MountStatus::NoAccounts => {
            warn!("Wallet exposes no account, nothing to show");
            return;
        }
        MountStatus::SaleUnavailable => info!("Every tier of this sale has ended"),
        MountStatus::Ready => {}
    }
    if let Some(token) = &view.token {
        info!(name = %token.name, ticker = %token.ticker, decimals = token.decimals, "Token");
    }
    match &view.active_tier {
        Some(tier) => info!(tier = tier.index + 1, rate = tier.rate, address = %tier.address, "Active tier"),
        None => info!("No tier is active right now"),
    }
    info!(
        total_sellable = view.total_sellable,
        investor_balance = view.investor_balance,
        gas_price = ?view.gas_price,
        "Balances"
    );
    info!("Countdown: {}", session.countdown_label());
}

async fn buy(session: &InvestSession, tokens: &str, confirm_timeout: Duration) {
    session.set_tokens_to_invest(tokens);
    if let Some(message) = session.token_input_error() {
        warn!("{}", message);
        return;
    }
    match tokio::time::timeout(confirm_timeout, session.invest()).await {
        Ok(Ok(outcome)) => info!(
            tokens = %outcome.tokens,
            payment = outcome.payment,
            tx = %outcome.receipt.tx_hash,
            block = ?outcome.receipt.block_number,
            "Purchase confirmed"
        ),
        // Already alerted by the session
        Ok(Err(e)) => error!("Purchase failed: {}", e),
        Err(_) => warn!(
            "No receipt after {}s, the transaction may still be mined",
            confirm_timeout.as_secs()
        ),
    }
}

/// Countdown loop until Ctrl-C or the sale ends
async fn run_event_loop(session: &Arc<InvestSession>) -> Result<()> {
    info!("Watching countdown, Ctrl-C to stop");
    let driver = session.spawn_countdown_driver();
    let mut ticks = session.ticks();

    loop {
        tokio::select! {
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
                let tick = ticks.borrow_and_update().clone();
                if tick.is_idle() {
                    info!("Crowdsale has ended");
                    break;
                }
                let r = tick.remaining;
                if tick.display_seconds_only {
                    info!("{:02}m {:02}s {}", r.minutes, r.seconds, session.countdown_label());
                } else {
                    info!("{}d {:02}h {:02}m {:02}s {}", r.days, r.hours, r.minutes, r.seconds, session.countdown_label());
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.close();
    driver.await.context("countdown driver panicked")?;
    info!("Shutting down gracefully...");
    Ok(())
}
