//! Configuration module for the investment client
//!
//! Loaded from a TOML file, with a `.env` file and `INVEST_*` environment
//! variables layered on top. The sale address and network id may also come
//! from a URL query string (`?addr=0x...&networkID=1`) when the file leaves
//! them unset.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which sale to invest in
    #[serde(default)]
    pub sale: SaleConfig,

    /// Gas pricing and limit policy
    #[serde(default)]
    pub gas: GasConfig,

    /// Tier countdown
    #[serde(default)]
    pub countdown: CountdownConfig,

    /// Receipt polling
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    /// In-memory chain description, used by the CLI
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaleConfig {
    /// Sale contract address
    #[serde(default)]
    pub address: Option<String>,

    /// Network the sale is deployed on
    #[serde(default)]
    pub network_id: Option<u64>,

    /// Fallback query string carrying `addr` / `networkID`
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Fixed gas price; the chain's price is used when unset
    #[serde(default)]
    pub price_wei: Option<u64>,

    /// Hard ceiling for the purchase gas limit
    #[serde(default = "default_gas_limit_ceiling")]
    pub limit_ceiling: u64,

    /// Added on top of the estimate
    #[serde(default = "default_gas_headroom")]
    pub headroom: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Below this many seconds the countdown shows minutes and seconds only
    #[serde(default = "default_seconds_only_threshold_secs")]
    pub seconds_only_threshold_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_network_id")]
    pub network_id: u64,

    pub sale_address: String,

    /// Wallet accounts, first one signs
    #[serde(default)]
    pub accounts: Vec<String>,

    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,

    #[serde(default = "default_token_ticker")]
    pub token_ticker: String,

    #[serde(default = "default_token_name")]
    pub token_name: String,

    /// Price reported by the simulated oracle, `None` simulates an outage
    #[serde(default = "default_simulated_gas_price")]
    pub gas_price_wei: Option<u64>,

    /// Fixed gas estimate for `buy()`
    #[serde(default)]
    pub gas_estimate: Option<u64>,

    /// Receipt queries answered as pending before the transaction is mined
    #[serde(default = "default_confirm_after_polls")]
    pub confirm_after_polls: u32,

    pub tiers: Vec<SimulatedTierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTierConfig {
    pub address: String,

    /// Seconds from startup until the tier opens (may be negative)
    pub start_offset_secs: i64,

    pub end_offset_secs: i64,

    /// Smallest payment units per whole token; TOML integers stop at i64
    pub rate: u64,

    #[serde(default)]
    pub max_sellable: u64,
}

// Default value functions
fn default_gas_limit_ceiling() -> u64 { 4_016_260 }
fn default_gas_headroom() -> u64 { 100_000 }
fn default_tick_interval_ms() -> u64 { 1_000 }
fn default_seconds_only_threshold_secs() -> u64 { 300 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_network_id() -> u64 { 1 }
fn default_token_decimals() -> u32 { 18 }
fn default_token_ticker() -> String { "TKN".to_string() }
fn default_token_name() -> String { "Token".to_string() }
fn default_simulated_gas_price() -> Option<u64> { Some(1_000_000_000) }
fn default_confirm_after_polls() -> u32 { 2 }

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            price_wei: None,
            limit_ceiling: default_gas_limit_ceiling(),
            headroom: default_gas_headroom(),
        }
    }
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            seconds_only_threshold_secs: default_seconds_only_threshold_secs(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sale: SaleConfig::default(),
            gas: GasConfig::default(),
            countdown: CountdownConfig::default(),
            confirmation: ConfirmationConfig::default(),
            simulation: None,
        }
    }
}

/// Where the sale lives, after config and query string are combined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleSource {
    /// Raw address, validated later by the session
    pub address: String,
    pub network_id: Option<u64>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `INVEST_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("INVEST_SALE_ADDRESS") {
            self.sale.address = Some(address);
        }
        if let Some(network) = lookup("INVEST_NETWORK_ID") {
            let id = network
                .trim()
                .parse()
                .with_context(|| format!("INVEST_NETWORK_ID is not a number: {}", network))?;
            self.sale.network_id = Some(id);
        }
        if let Some(price) = lookup("INVEST_GAS_PRICE_WEI") {
            let wei = price
                .trim()
                .parse()
                .with_context(|| format!("INVEST_GAS_PRICE_WEI is not a number: {}", price))?;
            self.gas.price_wei = Some(wei);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gas.limit_ceiling == 0 {
            return Err(anyhow!("gas.limit_ceiling must be positive"));
        }
        if self.gas.headroom >= self.gas.limit_ceiling {
            return Err(anyhow!(
                "gas.headroom {} must be below gas.limit_ceiling {}",
                self.gas.headroom,
                self.gas.limit_ceiling
            ));
        }
        if self.gas.price_wei == Some(0) {
            return Err(anyhow!("gas.price_wei must be positive"));
        }
        if self.countdown.tick_interval_ms == 0 {
            return Err(anyhow!("countdown.tick_interval_ms must be positive"));
        }
        if self.confirmation.poll_interval_ms == 0 {
            return Err(anyhow!("confirmation.poll_interval_ms must be positive"));
        }
        if let Some(sim) = &self.simulation {
            if sim.tiers.is_empty() {
                return Err(anyhow!("simulation.tiers must not be empty"));
            }
            for (i, tier) in sim.tiers.iter().enumerate() {
                if tier.start_offset_secs >= tier.end_offset_secs {
                    return Err(anyhow!("simulation tier {} starts after it ends", i));
                }
                if tier.rate == 0 {
                    return Err(anyhow!("simulation tier {} has a zero rate", i));
                }
            }
        }
        Ok(())
    }

    /// Resolve the sale address and network, config first, then the query string
    pub fn sale_source(&self, query: Option<&str>) -> SaleSource {
        let query = query.or(self.sale.query.as_deref()).unwrap_or_default();
        let address = self
            .sale
            .address
            .clone()
            .or_else(|| query_variable(query, "addr"))
            .unwrap_or_default();
        let network_id = self.sale.network_id.or_else(|| {
            query_variable(query, "networkID").and_then(|id| id.trim().parse().ok())
        });
        SaleSource {
            address,
            network_id,
        }
    }
}

/// Value of `name` in a URL query string, with or without the leading `?`
pub fn query_variable(query: &str, name: &str) -> Option<String> {
    let query = match query.split_once('?') {
        Some((_, rest)) => rest,
        None => query,
    };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
