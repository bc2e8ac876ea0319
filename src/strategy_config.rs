/// Centralized configuration for the alert filters
/// All thresholds a token must clear before it becomes a GOLD alert live here

use anyhow::{Result, anyhow};

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    // === ENTRY FILTERS ===
    /// Minimum fully diluted valuation in USD
    pub min_fdv_usd: f64,

    /// Maximum fully diluted valuation in USD
    pub max_fdv_usd: f64,

    /// Minimum liquidity as a fraction of FDV (e.g., 0.1 = 10%)
    pub liq_fdv_ratio: f64,

    /// Maximum 5 minute volume in USD (tokens already pumping are skipped)
    pub max_volume_5m_usd: f64,

    /// Minimum number of holders required
    pub min_holders: u32,

    /// Reject tokens whose mint authority is still set
    pub reject_mint_authority: bool,

    /// Case-insensitive substrings that disqualify a symbol
    pub symbol_blacklist: Vec<String>,

    // === QUEUE RULES ===
    /// Tokens older than this at first sight are ignored
    pub max_token_age_secs: i64,

    /// Tokens younger than this are left in the queue for the next cycle
    pub min_token_age_secs: i64,

    /// Maximum number of mints waiting for evaluation
    pub max_queue: usize,

    /// Mints evaluated per polling cycle
    pub batch_size: usize,

    /// Known tokens are forgotten after this long
    pub token_ttl_secs: i64,

    // === ALERT LEVELS ===
    /// Snipe: FDV at least this while 5m volume is still below `snipe_max_volume_usd`
    pub snipe_min_fdv_usd: f64,
    pub snipe_max_volume_usd: f64,

    /// Confirm: FDV and 5m volume both at least these
    pub confirm_min_fdv_usd: f64,
    pub confirm_min_volume_usd: f64,

    /// Pump: latest 5m volume over the earlier samples' mean, with a volume floor
    pub pump_spike_ratio: f64,
    pub pump_min_volume_usd: f64,

    /// Whale: largest recent buy in USD
    pub whale_min_buy_usd: f64,

    /// Market pump on graduated tokens
    pub market_spike_ratio: f64,
    pub market_min_volume_usd: f64,

    /// Alerted tokens are watched for higher tiers this long after first sight
    pub follow_up_secs: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            // === ENTRY FILTERS ===
            min_fdv_usd: 300.0,          // relaxed, catches launches almost immediately
            max_fdv_usd: 500_000.0,      // $500k maximum
            liq_fdv_ratio: 0.1,          // liquidity must be >= 10% of FDV
            max_volume_5m_usd: 20_000.0, // $20k per 5m cap
            min_holders: 5,              // 5 holders minimum
            reject_mint_authority: true,
            symbol_blacklist: ["rug", "scam", "honeypot", "test", "fake"]
                .iter()
                .map(|s| s.to_string())
                .collect(),

            // === QUEUE RULES ===
            max_token_age_secs: 300, // only tokens < 5 min old
            min_token_age_secs: 6,   // give DexScreener a moment to index
            max_queue: 200,
            batch_size: 10,
            token_ttl_secs: 6 * 60 * 60,

            // === ALERT LEVELS ===
            snipe_min_fdv_usd: 3_000.0,
            snipe_max_volume_usd: 100.0,
            confirm_min_fdv_usd: 10_000.0,
            confirm_min_volume_usd: 300.0,
            pump_spike_ratio: 2.0,
            pump_min_volume_usd: 800.0,
            whale_min_buy_usd: 1_000.0,
            market_spike_ratio: 2.5,
            market_min_volume_usd: 1_000.0,
            follow_up_secs: 30 * 60,
        }
    }
}

impl StrategyConfig {
    /// Preset for safer, slightly more established tokens
    pub fn conservative() -> Self {
        Self {
            min_fdv_usd: 10_000.0,     // $10k minimum
            max_fdv_usd: 300_000.0,    // $300k maximum
            liq_fdv_ratio: 0.15,       // 15% liquidity
            max_volume_5m_usd: 10_000.0,
            min_holders: 50,           // 50 holders minimum
            min_token_age_secs: 30,
            pump_spike_ratio: 2.5,
            whale_min_buy_usd: 2_500.0,
            ..Default::default()
        }
    }

    /// Preset that alerts on nearly everything that launches
    pub fn aggressive() -> Self {
        Self {
            min_fdv_usd: 100.0,
            max_fdv_usd: 1_000_000.0,
            liq_fdv_ratio: 0.05,
            max_volume_5m_usd: 50_000.0,
            min_holders: 1,
            reject_mint_authority: false,
            min_token_age_secs: 0,
            pump_spike_ratio: 1.5,
            whale_min_buy_usd: 500.0,
            ..Default::default()
        }
    }

    pub fn from_preset(name: &str) -> Result<Self> {
        match name {
            "default" | "relaxed" => Ok(Self::default()),
            "conservative" => Ok(Self::conservative()),
            "aggressive" => Ok(Self::aggressive()),
            other => Err(anyhow!("unknown strategy preset: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_tighten_and_loosen_the_default() {
        let base = StrategyConfig::default();
        let safe = StrategyConfig::conservative();
        let loose = StrategyConfig::aggressive();

        assert!(safe.min_fdv_usd > base.min_fdv_usd);
        assert!(safe.min_holders > base.min_holders);
        assert!(loose.min_holders < base.min_holders);
        assert!(!loose.reject_mint_authority);
        // untouched fields fall through to the default
        assert_eq!(safe.max_queue, base.max_queue);
    }

    #[test]
    fn rejects_unknown_preset() {
        assert!(StrategyConfig::from_preset("conservative").is_ok());
        assert!(StrategyConfig::from_preset("yolo").is_err());
    }
}
