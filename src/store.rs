use crate::strategy::{AlertLevel, Token, market_spike};
use crate::strategy_config::StrategyConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedStore = Arc<Mutex<Store>>;

/// A USD buy request lapses if no amount arrives within this window
pub const PENDING_BUY_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBuy {
    pub mint: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingBuyState {
    Ready(PendingBuy),
    Expired,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Sold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub mint: String,
    pub symbol: String,
    pub cost_usd: f64,
    pub sol_amount: f64,
    pub status: TradeStatus,
    /// take-profit multiple of cost
    pub tp: f64,
    /// stop-loss multiple of cost
    pub sl: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pnl_usd: Option<f64>,
    /// set when the swap was signed and submitted by the bot
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub chat_id: i64,
    pub free_alerts: u32,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub paid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wallet: Option<String>,
    /// base58 secret key, only present after /connect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub pending_buy: Option<PendingBuy>,
    #[serde(default)]
    pub referral: Option<String>,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

impl User {
    pub fn new(id: i64, chat_id: i64, free_alerts: u32) -> Self {
        User {
            id,
            chat_id,
            free_alerts,
            paid: false,
            paid_until: None,
            wallet: None,
            private_key: None,
            pending_buy: None,
            referral: None,
            trades: Vec::new(),
        }
    }

    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        self.paid && self.paid_until.map_or(true, |until| until > now)
    }

    pub fn can_receive_alert(&self, now: DateTime<Utc>) -> bool {
        self.chat_id != 0 && (self.is_premium(now) || self.free_alerts > 0)
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| t.status == TradeStatus::Open)
    }

    /// Look at the pending USD buy. An expired request is cleared here.
    pub fn pending_buy_state(&mut self, now: DateTime<Utc>) -> PendingBuyState {
        let Some(pending) = self.pending_buy.clone() else {
            return PendingBuyState::Missing;
        };
        if (now - pending.requested_at).num_seconds() > PENDING_BUY_SECS {
            self.pending_buy = None;
            return PendingBuyState::Expired;
        }
        PendingBuyState::Ready(pending)
    }

    /// Returns whether there was anything to cancel.
    pub fn cancel_pending_buy(&mut self) -> bool {
        self.pending_buy.take().is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Referral {
    pub joins: u32,
    pub subs: u32,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub users: usize,
    pub premium: usize,
    pub revenue: f64,
    pub open_trades: usize,
    pub tracked_tokens: usize,
    pub alerted_tokens: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub users: HashMap<i64, User>,
    pub tokens: HashMap<String, Token>,
    pub queue: VecDeque<String>,
    /// graduated tokens sampled by the market scan
    pub market: HashMap<String, Token>,
    pub redeemed_payments: HashSet<String>,
    pub tracker: HashMap<String, Referral>,
    pub revenue: f64,
}

impl Store {
    pub fn load(path: &Path) -> Result<Store> {
        if !path.is_file() {
            info!("No data file at {}, starting fresh", path.display());
            return Ok(Store::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let store: Store = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!(
            "Loaded {} users and {} tokens from {}",
            store.users.len(),
            store.tokens.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns true when the user was not known before.
    pub fn register_user(
        &mut self,
        id: i64,
        chat_id: i64,
        free_alerts: u32,
        referral: Option<&str>,
    ) -> bool {
        if let Some(user) = self.users.get_mut(&id) {
            user.chat_id = chat_id;
            return false;
        }

        let mut user = User::new(id, chat_id, free_alerts);
        if let Some(src) = referral {
            self.tracker.entry(src.to_string()).or_default().joins += 1;
            user.referral = Some(src.to_string());
        }
        self.users.insert(id, user);
        true
    }

    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: i64) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn is_known(&self, mint: &str) -> bool {
        self.tokens.contains_key(mint)
    }

    /// Record a freshly observed token and queue it for evaluation.
    /// Known mints and tokens older than the configured age are ignored.
    pub fn observe(&mut self, token: Token, cfg: &StrategyConfig, now: DateTime<Utc>) -> bool {
        if self.is_known(&token.mint) || token.age_secs(now) > cfg.max_token_age_secs {
            return false;
        }
        self.queue.push_back(token.mint.clone());
        while self.queue.len() > cfg.max_queue {
            self.queue.pop_front();
        }
        self.tokens.insert(token.mint.clone(), token);
        true
    }

    /// Oldest queued mints, up to `n`, still present in the token table.
    pub fn next_batch(&self, n: usize) -> Vec<Token> {
        self.queue
            .iter()
            .filter_map(|m| self.tokens.get(m))
            .filter(|t| !t.alerted)
            .take(n)
            .cloned()
            .collect()
    }

    pub fn dequeue(&mut self, mint: &str) {
        self.queue.retain(|m| m != mint);
    }

    /// Move a still-pending mint to the back so the rest of the queue gets a turn.
    pub fn requeue(&mut self, mint: &str) {
        self.dequeue(mint);
        if self.tokens.contains_key(mint) {
            self.queue.push_back(mint.to_string());
        }
    }

    /// Flag the mint as alerted along with the levels it matched. Returns
    /// false when it already was, so a mint is never broadcast twice.
    pub fn mark_alerted(&mut self, mint: &str, levels: &[AlertLevel]) -> bool {
        self.dequeue(mint);
        match self.tokens.get_mut(mint) {
            Some(t) if !t.alerted => {
                t.alerted = true;
                t.levels_sent.extend(levels.iter().copied());
                true
            }
            _ => false,
        }
    }

    /// Reserve the levels not yet announced for this mint and return them.
    pub fn claim_levels(&mut self, mint: &str, levels: &[AlertLevel]) -> Vec<AlertLevel> {
        let Some(token) = self.tokens.get_mut(mint) else {
            return Vec::new();
        };
        levels
            .iter()
            .copied()
            .filter(|l| token.levels_sent.insert(*l))
            .collect()
    }

    /// Swap in refreshed market data, keeping the alert flags and adding the
    /// new volume sample. Returns the stored token.
    pub fn update_token(&mut self, token: Token) -> Option<Token> {
        let existing = self.tokens.get_mut(&token.mint)?;
        let alerted = existing.alerted;
        let levels = std::mem::take(&mut existing.levels_sent);
        let hist = std::mem::take(&mut existing.volume_hist);
        *existing = token;
        existing.alerted = alerted;
        existing.levels_sent = levels;
        existing.volume_hist = hist;
        existing.record_volume();
        Some(existing.clone())
    }

    /// Alerted tokens still inside the follow-up window, oldest alert first.
    pub fn follow_up_candidates(&self, window_secs: i64, now: DateTime<Utc>, n: usize) -> Vec<Token> {
        let mut tokens: Vec<&Token> = self
            .tokens
            .values()
            .filter(|t| t.alerted && t.age_secs(now) <= window_secs)
            .collect();
        tokens.sort_by_key(|t| t.launched_at);
        tokens.into_iter().take(n).cloned().collect()
    }

    /// Add one sample for a graduated token. Returns the spike ratio the first
    /// time the token crosses the market thresholds.
    pub fn record_market_sample(
        &mut self,
        token: Token,
        cfg: &StrategyConfig,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let entry = self
            .market
            .entry(token.mint.clone())
            .or_insert_with(|| Token { first_seen: now, ..token.clone() });
        entry.volume_5m = token.volume_5m;
        entry.fdv = token.fdv;
        entry.liquidity = token.liquidity;
        entry.record_volume();
        if entry.levels_sent.contains(&AlertLevel::Market) {
            return None;
        }
        let ratio = market_spike(entry, cfg)?;
        entry.levels_sent.insert(AlertLevel::Market);
        Some(ratio)
    }

    /// Forget tokens first seen more than `ttl_secs` ago.
    pub fn evict_stale(&mut self, ttl_secs: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(ttl_secs);
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.first_seen >= cutoff);
        self.market.retain(|_, t| t.first_seen >= cutoff);
        let tokens = &self.tokens;
        self.queue.retain(|m| tokens.contains_key(m));
        before - self.tokens.len()
    }

    /// Pick every user eligible for an alert and charge free users one
    /// alert each. Returns the chat ids to deliver to.
    pub fn claim_alert_recipients(&mut self, now: DateTime<Utc>) -> Vec<i64> {
        let mut chats = Vec::new();
        for user in self.users.values_mut() {
            if !user.can_receive_alert(now) {
                continue;
            }
            if !user.is_premium(now) {
                user.free_alerts -= 1;
            }
            chats.push(user.chat_id);
        }
        chats
    }

    pub fn activate_premium(
        &mut self,
        user_id: i64,
        tx_hash: &str,
        amount_usd: f64,
        days: i64,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let user = self.users.get_mut(&user_id)?;
        // renewals extend from the current expiry
        let start = user.paid_until.filter(|u| *u > now).unwrap_or(now);
        let until = start + Duration::days(days);
        user.paid = true;
        user.paid_until = Some(until);
        let referral = user.referral.clone();

        self.redeemed_payments.insert(tx_hash.to_lowercase());
        self.revenue += amount_usd;
        if let Some(src) = referral {
            let r = self.tracker.entry(src).or_default();
            r.subs += 1;
            r.revenue += amount_usd;
        }
        Some(until)
    }

    pub fn is_redeemed(&self, tx_hash: &str) -> bool {
        self.redeemed_payments.contains(&tx_hash.to_lowercase())
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Stats {
        Stats {
            users: self.users.len(),
            premium: self.users.values().filter(|u| u.is_premium(now)).count(),
            revenue: self.revenue,
            open_trades: self.users.values().map(|u| u.open_trades().count()).sum(),
            tracked_tokens: self.tokens.len(),
            alerted_tokens: self.tokens.values().filter(|t| t.alerted).count(),
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Serialize under the lock, write outside of it.
pub async fn save_shared(store: &SharedStore, path: &Path) -> Result<()> {
    let json = store.lock().await.to_json()?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &json)).await??;
    Ok(())
}

pub async fn run_autosave(store: SharedStore, path: PathBuf, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    // first tick fires immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = save_shared(&store, &path).await {
            error!("Save error: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::sample_token;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[test]
    fn register_counts_referrals_once() {
        let mut store = Store::default();
        assert!(store.register_user(1, 100, 3, Some("alice")));
        assert!(!store.register_user(1, 101, 3, Some("alice")));
        assert_eq!(store.tracker["alice"].joins, 1);
        assert_eq!(store.user(1).unwrap().chat_id, 101);
    }

    #[test]
    fn free_users_are_charged_per_alert() {
        let now = Utc::now();
        let mut store = Store::default();
        store.register_user(1, 100, 2, None);
        store.register_user(2, 200, 0, None);
        store.register_user(3, 300, 0, None);
        store.user_mut(3).unwrap().paid = true;

        let mut first = store.claim_alert_recipients(now);
        first.sort();
        assert_eq!(first, vec![100, 300]);
        assert_eq!(store.user(1).unwrap().free_alerts, 1);

        store.claim_alert_recipients(now);
        let third = store.claim_alert_recipients(now);
        assert_eq!(third, vec![300]);
        assert_eq!(store.user(1).unwrap().free_alerts, 0);
    }

    #[test]
    fn expired_premium_falls_back_to_free_counter() {
        let now = Utc::now();
        let mut user = User::new(1, 100, 0);
        user.paid = true;
        user.paid_until = Some(now - Duration::days(1));
        assert!(!user.is_premium(now));
        assert!(!user.can_receive_alert(now));
    }

    #[test]
    fn observe_ignores_known_and_old_tokens_and_bounds_queue() {
        let now = Utc::now();
        let cfg = StrategyConfig {
            max_queue: 2,
            ..Default::default()
        };
        let mut store = Store::default();

        assert!(store.observe(sample_token("A", now), &cfg, now));
        assert!(!store.observe(sample_token("A", now), &cfg, now));

        let mut old = sample_token("OLD", now);
        old.launched_at = now - Duration::seconds(cfg.max_token_age_secs + 1);
        assert!(!store.observe(old, &cfg, now));

        store.observe(sample_token("B", now), &cfg, now);
        store.observe(sample_token("C", now), &cfg, now);
        assert_eq!(store.queue, VecDeque::from(vec!["B".to_string(), "C".to_string()]));
    }

    #[test]
    fn a_mint_is_alerted_only_once() {
        let now = Utc::now();
        let mut store = Store::default();
        store.observe(sample_token("A", now), &StrategyConfig::default(), now);
        assert!(store.mark_alerted("A", &[AlertLevel::Snipe]));
        assert!(!store.mark_alerted("A", &[AlertLevel::Confirm]));
        assert!(store.next_batch(10).is_empty());

        // refreshed market data keeps the flags
        let updated = store.update_token(sample_token("A", now)).unwrap();
        assert!(updated.alerted);
        assert_eq!(updated.levels_sent, BTreeSet::from([AlertLevel::Snipe]));
        assert!(store.update_token(sample_token("unknown", now)).is_none());
    }

    #[test]
    fn levels_are_claimed_once_per_mint() {
        let now = Utc::now();
        let mut store = Store::default();
        store.observe(sample_token("A", now), &StrategyConfig::default(), now);
        store.mark_alerted("A", &[AlertLevel::Snipe]);

        let claimed = store.claim_levels("A", &[AlertLevel::Snipe, AlertLevel::Confirm, AlertLevel::Whale]);
        assert_eq!(claimed, vec![AlertLevel::Confirm, AlertLevel::Whale]);
        assert!(store.claim_levels("A", &[AlertLevel::Confirm]).is_empty());
        assert!(store.claim_levels("gone", &[AlertLevel::Pump]).is_empty());
    }

    #[test]
    fn updates_build_volume_history() {
        let now = Utc::now();
        let mut store = Store::default();
        store.observe(sample_token("A", now), &StrategyConfig::default(), now);
        for vol in [100.0, 120.0, 110.0, 400.0] {
            let mut t = sample_token("A", now);
            t.volume_5m = vol;
            store.update_token(t);
        }
        assert_eq!(store.tokens["A"].volume_hist, VecDeque::from(vec![120.0, 110.0, 400.0]));
    }

    #[test]
    fn follow_ups_cover_recent_alerted_tokens() {
        let now = Utc::now();
        let mut store = Store::default();
        let cfg = StrategyConfig::default();
        for mint in ["A", "B", "C"] {
            store.observe(sample_token(mint, now), &cfg, now);
        }
        store.mark_alerted("A", &[]);
        store.mark_alerted("C", &[]);
        store.tokens.get_mut("C").unwrap().launched_at = now - Duration::hours(2);

        let mints: Vec<String> = store
            .follow_up_candidates(1800, now, 10)
            .into_iter()
            .map(|t| t.mint)
            .collect();
        assert_eq!(mints, vec!["A".to_string()]);
    }

    #[test]
    fn market_spike_is_reported_once() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut store = Store::default();
        let sample = |vol: f64| {
            let mut t = sample_token("Grad", now);
            t.volume_5m = vol;
            t
        };

        assert_eq!(store.record_market_sample(sample(1_000.0), &cfg, now), None);
        assert_eq!(store.record_market_sample(sample(1_000.0), &cfg, now), None);
        assert_eq!(store.record_market_sample(sample(3_000.0), &cfg, now), Some(3.0));
        assert_eq!(store.record_market_sample(sample(9_000.0), &cfg, now), None);
        assert!(!store.is_known("Grad"));

        store.market.get_mut("Grad").unwrap().first_seen = now - Duration::hours(7);
        store.evict_stale(cfg.token_ttl_secs, now);
        assert!(store.market.is_empty());
    }

    #[test]
    fn fresh_pending_buy_is_ready() {
        let now = Utc::now();
        let mut user = User::new(1, 100, 3);
        let pending = PendingBuy {
            mint: "Mint111".to_string(),
            requested_at: now - Duration::seconds(30),
        };
        user.pending_buy = Some(pending.clone());
        assert_eq!(user.pending_buy_state(now), PendingBuyState::Ready(pending));
        assert!(user.pending_buy.is_some());
    }

    #[test]
    fn pending_buy_expires_after_a_minute() {
        let now = Utc::now();
        let mut user = User::new(1, 100, 3);
        user.pending_buy = Some(PendingBuy {
            mint: "Mint111".to_string(),
            requested_at: now - Duration::seconds(PENDING_BUY_SECS + 1),
        });
        assert_eq!(user.pending_buy_state(now), PendingBuyState::Expired);
        assert!(user.pending_buy.is_none());
        assert_eq!(user.pending_buy_state(now), PendingBuyState::Missing);
    }

    #[test]
    fn cancel_clears_pending_buy() {
        let now = Utc::now();
        let mut user = User::new(1, 100, 3);
        assert!(!user.cancel_pending_buy());
        user.pending_buy = Some(PendingBuy {
            mint: "Mint111".to_string(),
            requested_at: now,
        });
        assert!(user.cancel_pending_buy());
        assert_eq!(user.pending_buy_state(now), PendingBuyState::Missing);
    }

    #[test]
    fn requeue_moves_mint_to_the_back() {
        let now = Utc::now();
        let mut store = Store::default();
        let cfg = StrategyConfig::default();
        store.observe(sample_token("A", now), &cfg, now);
        store.observe(sample_token("B", now), &cfg, now);
        store.requeue("A");
        assert_eq!(store.queue, VecDeque::from(vec!["B".to_string(), "A".to_string()]));

        store.requeue("gone");
        assert_eq!(store.queue.len(), 2);
    }

    #[test]
    fn evicts_stale_tokens_from_table_and_queue() {
        let now = Utc::now();
        let mut store = Store::default();
        let cfg = StrategyConfig::default();
        store.observe(sample_token("A", now), &cfg, now);
        store.observe(sample_token("B", now), &cfg, now);
        store.tokens.get_mut("A").unwrap().first_seen = now - Duration::hours(7);

        assert_eq!(store.evict_stale(cfg.token_ttl_secs, now), 1);
        assert!(!store.is_known("A"));
        assert_eq!(store.queue, VecDeque::from(vec!["B".to_string()]));
    }

    #[test]
    fn premium_activation_updates_revenue_and_referrals() {
        let now = Utc::now();
        let mut store = Store::default();
        store.register_user(7, 700, 3, Some("bob"));

        let until = store.activate_premium(7, "0xABC", 29.99, 30, now).unwrap();
        assert_eq!(until, now + Duration::days(30));
        assert!(store.is_redeemed("0xabc"));
        assert_eq!(store.tracker["bob"].subs, 1);
        assert!((store.revenue - 29.99).abs() < 1e-9);

        // renewing stacks on top of the running subscription
        let renewed = store.activate_premium(7, "0xdef", 29.99, 30, now).unwrap();
        assert_eq!(renewed, now + Duration::days(60));
        assert_eq!(store.stats(now).premium, 1);
    }

    #[test]
    fn save_and_load_preserve_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let now = Utc::now();

        let mut store = Store::default();
        store.register_user(42, 4200, 3, None);
        store.user_mut(42).unwrap().private_key = Some("secret".to_string());
        store.observe(sample_token("A", now), &StrategyConfig::default(), now);
        write_atomic(&path, &store.to_json().unwrap()).unwrap();

        let loaded = Store::load(&path).unwrap();
        let user = loaded.user(42).unwrap();
        assert_eq!(user.chat_id, 4200);
        assert_eq!(user.private_key.as_deref(), Some("secret"));
        assert!(loaded.is_known("A"));
        assert_eq!(loaded.queue.len(), 1);
    }

    #[test]
    fn load_fills_defaults_for_sparse_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"users":{"5":{"id":5,"chat_id":50,"free_alerts":1}},"revenue":12.5}"#,
        )
        .unwrap();

        let store = Store::load(&path).unwrap();
        let user = store.user(5).unwrap();
        assert!(!user.paid);
        assert!(user.trades.is_empty());
        assert!(store.tokens.is_empty());
        assert_eq!(store.revenue, 12.5);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = Store::load(&dir.path().join("nope.json")).unwrap();
        assert!(store.users.is_empty());
    }

    #[tokio::test]
    async fn shared_save_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store: SharedStore = Arc::new(Mutex::new(Store::default()));
        store.lock().await.register_user(1, 10, 3, None);

        save_shared(&store, &path).await.unwrap();
        let loaded = Store::load(&path).unwrap();
        assert_eq!(loaded.users.len(), 1);
    }
}
