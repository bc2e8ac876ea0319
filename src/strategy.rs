use crate::strategy_config::StrategyConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// 5m volume samples kept per token for spike detection
pub const VOLUME_SAMPLES: usize = 3;

/// Alert tiers. Each one goes out at most once per mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// early: priced in but barely traded yet
    Snipe,
    /// FDV and volume both picked up
    Confirm,
    /// 5m volume spiked against its recent samples
    Pump,
    /// a single recent buy above the whale threshold
    Whale,
    /// graduated token whose volume spiked
    Market,
}

impl AlertLevel {
    pub fn label(&self) -> &'static str {
        match self {
            AlertLevel::Snipe => "SNIPE",
            AlertLevel::Confirm => "CONFIRM",
            AlertLevel::Pump => "PUMP",
            AlertLevel::Whale => "WHALE",
            AlertLevel::Market => "MARKET PUMP",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub mint: String,
    pub symbol: String,
    pub fdv: f64,
    pub liquidity: f64,
    pub volume_5m: f64,
    /// 0 when the holder count could not be fetched
    pub holders: u32,
    /// `None` when the authority check was not performed
    #[serde(default)]
    pub mint_authority: Option<bool>,
    pub launched_at: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub alerted: bool,
    #[serde(default)]
    pub volume_hist: VecDeque<f64>,
    #[serde(default)]
    pub levels_sent: BTreeSet<AlertLevel>,
}

impl Token {
    /// Push the current 5m volume onto the sample history.
    pub fn record_volume(&mut self) {
        self.volume_hist.push_back(self.volume_5m);
        while self.volume_hist.len() > VOLUME_SAMPLES {
            self.volume_hist.pop_front();
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.launched_at).num_seconds()
    }

    pub fn short_mint(&self) -> String {
        short_addr(&self.mint)
    }
}

pub fn short_addr(addr: &str) -> String {
    if addr.len() > 10 {
        format!("{}...{}", &addr[..6], &addr[addr.len() - 4..])
    } else {
        addr.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    AlreadyAlerted,
    TooYoung { age_secs: i64 },
    BlacklistedSymbol(String),
    FdvOutOfRange(f64),
    LowLiquidity { liquidity: f64, required: f64 },
    VolumeTooHigh(f64),
    TooFewHolders(u32),
    MintAuthoritySet,
}

impl Rejection {
    /// Rejections that may clear on a later cycle; the token stays queued for these.
    pub fn is_transient(&self) -> bool {
        matches!(self, Rejection::TooYoung { .. })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyAlerted => write!(f, "already alerted"),
            Rejection::TooYoung { age_secs } => write!(f, "too young ({}s)", age_secs),
            Rejection::BlacklistedSymbol(kw) => write!(f, "symbol matches blacklist '{}'", kw),
            Rejection::FdvOutOfRange(fdv) => write!(f, "fdv ${:.0} out of range", fdv),
            Rejection::LowLiquidity { liquidity, required } => {
                write!(f, "liquidity ${:.0} < required ${:.0}", liquidity, required)
            }
            Rejection::VolumeTooHigh(vol) => write!(f, "5m volume ${:.0} above cap", vol),
            Rejection::TooFewHolders(h) => write!(f, "only {} holders", h),
            Rejection::MintAuthoritySet => write!(f, "mint authority still set"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertDecision {
    pub should_alert: bool,
    pub rejection: Option<Rejection>,
}

impl AlertDecision {
    fn reject(r: Rejection) -> Self {
        AlertDecision {
            should_alert: false,
            rejection: Some(r),
        }
    }
}

/// Run the filter chain; the first failing check wins.
pub fn decide(token: &Token, cfg: &StrategyConfig, now: DateTime<Utc>) -> AlertDecision {
    if token.alerted {
        return AlertDecision::reject(Rejection::AlreadyAlerted);
    }

    let age = token.age_secs(now);
    if age < cfg.min_token_age_secs {
        return AlertDecision::reject(Rejection::TooYoung { age_secs: age });
    }

    let symbol = token.symbol.to_lowercase();
    if let Some(kw) = cfg
        .symbol_blacklist
        .iter()
        .find(|kw| !kw.is_empty() && symbol.contains(&kw.to_lowercase()))
    {
        return AlertDecision::reject(Rejection::BlacklistedSymbol(kw.clone()));
    }

    if token.fdv < cfg.min_fdv_usd || token.fdv > cfg.max_fdv_usd {
        return AlertDecision::reject(Rejection::FdvOutOfRange(token.fdv));
    }

    let required = cfg.liq_fdv_ratio * token.fdv;
    if token.liquidity < required {
        return AlertDecision::reject(Rejection::LowLiquidity {
            liquidity: token.liquidity,
            required,
        });
    }

    if token.volume_5m > cfg.max_volume_5m_usd {
        return AlertDecision::reject(Rejection::VolumeTooHigh(token.volume_5m));
    }

    if token.holders < cfg.min_holders {
        return AlertDecision::reject(Rejection::TooFewHolders(token.holders));
    }

    if cfg.reject_mint_authority && token.mint_authority == Some(true) {
        return AlertDecision::reject(Rejection::MintAuthoritySet);
    }

    AlertDecision {
        should_alert: true,
        rejection: None,
    }
}

/// Latest volume sample over the mean of the earlier ones.
pub fn volume_spike(hist: &VecDeque<f64>) -> Option<f64> {
    if hist.len() < 2 {
        return None;
    }
    let last = *hist.back()?;
    let earlier = hist.len() - 1;
    let avg = hist.iter().take(earlier).sum::<f64>() / earlier as f64;
    (avg > 0.0).then(|| last / avg)
}

/// Every tier the token qualifies for right now, whale first.
pub fn matching_levels(token: &Token, cfg: &StrategyConfig, largest_buy_usd: f64) -> Vec<AlertLevel> {
    let mut levels = Vec::new();
    if largest_buy_usd >= cfg.whale_min_buy_usd {
        levels.push(AlertLevel::Whale);
    }
    if token.fdv >= cfg.snipe_min_fdv_usd && token.volume_5m < cfg.snipe_max_volume_usd {
        levels.push(AlertLevel::Snipe);
    }
    if token.fdv >= cfg.confirm_min_fdv_usd && token.volume_5m >= cfg.confirm_min_volume_usd {
        levels.push(AlertLevel::Confirm);
    }
    if token.volume_5m >= cfg.pump_min_volume_usd
        && volume_spike(&token.volume_hist).is_some_and(|r| r >= cfg.pump_spike_ratio)
    {
        levels.push(AlertLevel::Pump);
    }
    levels
}

/// Spike ratio for a graduated token, when it clears the market thresholds.
pub fn market_spike(token: &Token, cfg: &StrategyConfig) -> Option<f64> {
    if token.volume_5m < cfg.market_min_volume_usd {
        return None;
    }
    volume_spike(&token.volume_hist).filter(|r| *r >= cfg.market_spike_ratio)
}
