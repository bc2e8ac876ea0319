use anyhow::{Result, anyhow};
use std::path::PathBuf;
use std::str::FromStr;

pub const BSC_USDT_CONTRACT: &str = "0x55d398326f99059ff775485246999027b3197955";

/// Where new pump.fun launches are collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// PumpPortal `subscribeNewToken` WebSocket, kept open by a background task
    PumpPortal,
    /// Moralis pump.fun `new` listing over HTTP (needs `MORALIS_API_KEY`)
    Moralis,
}

impl FromStr for FeedSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pumpportal" | "pump_portal" => Ok(FeedSource::PumpPortal),
            "moralis" => Ok(FeedSource::Moralis),
            other => Err(anyhow!("unknown feed source: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_id: i64,
    pub moralis_key: Option<String>,
    pub dexscreener_key: Option<String>,
    pub etherscan_key: Option<String>,
    /// BSC address premium payments are sent to
    pub payment_wallet: String,
    /// BEP-20 USDT contract; transfers of any other token named USDT are refused
    pub usdt_contract: String,
    /// Jupiter platform fee account
    pub fee_wallet: Option<String>,
    pub solana_rpc_url: String,
    pub jupiter_api_url: String,
    pub feed_source: FeedSource,
    /// Watch Moralis `graduated` listings for volume spikes (needs `MORALIS_API_KEY`)
    pub market_scan: bool,
    pub data_file: PathBuf,
    pub save_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub auto_sell_interval_secs: u64,
    pub free_alerts: u32,
    pub premium_price_usd: f64,
    pub premium_days: i64,
    pub slippage_bps: u16,
    pub platform_fee_bps: Option<u16>,
    /// Take-profit / stop-loss multipliers recorded on new trades
    pub take_profit: f64,
    pub stop_loss: f64,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bot_token =
            env_opt("BOT_TOKEN").ok_or_else(|| anyhow!("BOT_TOKEN is missing, check your .env"))?;

        let feed_source = match env_opt("FEED_SOURCE") {
            Some(s) => s.parse()?,
            None => FeedSource::PumpPortal,
        };

        Ok(Config {
            bot_token,
            admin_id: env_parse("ADMIN_ID", 0),
            moralis_key: env_opt("MORALIS_API_KEY"),
            dexscreener_key: env_opt("DEXSCREENER_KEY"),
            etherscan_key: env_opt("ETHERSCAN_KEY"),
            payment_wallet: env_opt("WALLET_BSC").unwrap_or_else(|| "0xYourWallet".to_string()),
            usdt_contract: env_opt("USDT_CONTRACT")
                .unwrap_or_else(|| BSC_USDT_CONTRACT.to_string()),
            fee_wallet: env_opt("FEE_WALLET"),
            solana_rpc_url: env_opt("SOLANA_RPC_URL")
                .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".to_string()),
            jupiter_api_url: env_opt("JUPITER_API_URL")
                .unwrap_or_else(|| "https://quote-api.jup.ag/v6".to_string()),
            feed_source,
            market_scan: env_parse("MARKET_SCAN", true),
            data_file: PathBuf::from(env_opt("DATA_FILE").unwrap_or_else(|| "data.json".into())),
            save_interval_secs: env_parse("SAVE_INTERVAL_SECS", 30),
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", 12),
            auto_sell_interval_secs: env_parse("AUTO_SELL_INTERVAL_SECS", 60),
            free_alerts: env_parse("FREE_ALERTS", 3),
            premium_price_usd: env_parse("PREMIUM_PRICE_USD", 29.99),
            premium_days: env_parse("PREMIUM_DAYS", 30),
            slippage_bps: env_parse("SLIPPAGE_BPS", 50),
            platform_fee_bps: env_opt("PLATFORM_FEE_BPS").and_then(|v| v.parse().ok()),
            take_profit: env_parse("TAKE_PROFIT", 2.0),
            stop_loss: env_parse("STOP_LOSS", 0.7),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id != 0 && self.admin_id == user_id
    }
}
