use crate::app::App;
use crate::config::FeedSource;
use crate::models::PumpPortalNewToken;
use crate::notifier::{broadcast_alert, broadcast_level, usd};
use crate::scanner::{drain_launches, log_new_token, run_pumpportal_feed};
use crate::store::Store;
use crate::strategy::{AlertDecision, AlertLevel, Rejection, Token, decide, matching_levels, volume_spike};
use crate::strategy_config::StrategyConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const MORALIS_LIMIT: u32 = 100;
const MARKET_LIMIT: u32 = 100;
/// launches buffered between cycles before the feed task waits
const LAUNCH_BUFFER: usize = 1024;
/// Refresh the cached SOL price every this many cycles
const SOL_PRICE_EVERY: u64 = 25;
/// Sample graduated tokens every this many cycles
const MARKET_EVERY: u64 = 5;
const FALLBACK_SOL_USD: f64 = 150.0;

/// What happens to a queued mint after one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueueAction {
    Alert,
    /// back of the queue, looked at again next cycle
    Retry,
    Drop,
}

pub fn queue_action(decision: &AlertDecision, token: &Token, max_age_secs: i64, now: DateTime<Utc>) -> QueueAction {
    if decision.should_alert {
        return QueueAction::Alert;
    }
    match &decision.rejection {
        Some(Rejection::AlreadyAlerted) => QueueAction::Drop,
        Some(r) if r.is_transient() => QueueAction::Retry,
        // market data moves, keep trying while the token is still fresh
        _ if token.age_secs(now) <= max_age_secs => QueueAction::Retry,
        _ => QueueAction::Drop,
    }
}

/// Queue new listings, drop stale tokens and hand back the next batch.
pub fn ingest(store: &mut Store, listings: Vec<Token>, cfg: &StrategyConfig, now: DateTime<Utc>) -> Vec<Token> {
    for token in listings {
        let snapshot = token.clone();
        if store.observe(token, cfg, now) {
            log_new_token(&snapshot);
        }
    }
    let evicted = store.evict_stale(cfg.token_ttl_secs, now);
    if evicted > 0 {
        debug!("Evicted {} stale tokens", evicted);
    }
    store.next_batch(cfg.batch_size)
}

/// Apply one evaluation to the queue. Returns true only when this call
/// claimed the GOLD alert for the mint.
pub fn settle(store: &mut Store, token: &Token, action: QueueAction, levels: &[AlertLevel]) -> bool {
    match action {
        QueueAction::Alert => store.mark_alerted(&token.mint, levels),
        QueueAction::Retry => {
            store.requeue(&token.mint);
            false
        }
        QueueAction::Drop => {
            store.dequeue(&token.mint);
            false
        }
    }
}

/// Extra line shown under an alert header.
pub fn level_note(level: AlertLevel, token: &Token, largest_buy_usd: f64) -> Option<String> {
    match level {
        AlertLevel::Whale => Some(format!("Largest buy ${}", usd(largest_buy_usd))),
        AlertLevel::Pump | AlertLevel::Market => {
            volume_spike(&token.volume_hist).map(|r| format!("5m volume x{:.1}", r))
        }
        AlertLevel::Snipe | AlertLevel::Confirm => None,
    }
}

pub async fn run_poller(app: Arc<App>) {
    let interval = Duration::from_secs(app.cfg.poll_interval_secs.max(1));
    let mut sol_usd = FALLBACK_SOL_USD;
    let mut cycle: u64 = 0;
    info!(
        "Poller started: feed={:?} every {}s, market scan {}",
        app.cfg.feed_source,
        app.cfg.poll_interval_secs,
        if market_enabled(&app) { "on" } else { "off" }
    );

    let (tx, mut rx) = mpsc::channel(LAUNCH_BUFFER);
    if app.cfg.feed_source == FeedSource::PumpPortal {
        tokio::spawn(run_pumpportal_feed(app.scanner.clone(), tx));
    }

    loop {
        if cycle % SOL_PRICE_EVERY == 0 {
            match app.scanner.fetch_sol_price().await {
                Ok(p) => sol_usd = p,
                Err(e) => warn!("SOL price refresh failed, keeping ${:.2}: {:#}", sol_usd, e),
            }
        }

        // a feed error only costs this cycle's ingest, the queue still gets evaluated
        let listings = match fetch_listings(&app, &mut rx, sol_usd).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Feed fetch failed: {:#}", e);
                Vec::new()
            }
        };
        scan_cycle(&app, listings).await;
        follow_up_cycle(&app).await;
        if market_enabled(&app) && cycle % MARKET_EVERY == 0 {
            if let Err(e) = market_cycle(&app).await {
                warn!("Market scan failed: {:#}", e);
            }
        }

        cycle += 1;
        tokio::time::sleep(interval).await;
    }
}

fn market_enabled(app: &App) -> bool {
    app.cfg.market_scan && app.scanner.has_moralis_key()
}

async fn fetch_listings(
    app: &App,
    rx: &mut mpsc::Receiver<PumpPortalNewToken>,
    sol_usd: f64,
) -> Result<Vec<Token>> {
    match app.cfg.feed_source {
        FeedSource::PumpPortal => Ok(drain_launches(rx, sol_usd, Utc::now())),
        FeedSource::Moralis => app.scanner.fetch_moralis_listings(MORALIS_LIMIT).await,
    }
}

async fn largest_buy(app: &App, token: &Token) -> f64 {
    match app.scanner.largest_recent_buy(&token.mint).await {
        Ok(v) => v,
        Err(e) => {
            debug!("Buy lookup failed for {}: {:#}", token.short_mint(), e);
            0.0
        }
    }
}

/// One evaluate pass over the queue. Returns the number of GOLD alerts sent.
pub async fn scan_cycle(app: &App, listings: Vec<Token>) -> usize {
    let strat = &app.strategy;
    let batch = ingest(&mut *app.store.lock().await, listings, strat, Utc::now());

    let mut alerts = 0;
    for token in batch {
        let now = Utc::now();
        // too young for DexScreener to have indexed it, no point asking yet
        let token = if token.age_secs(now) < strat.min_token_age_secs {
            token
        } else {
            let enriched = app.scanner.enrich(token).await;
            let stored = app.store.lock().await.update_token(enriched.clone());
            stored.unwrap_or(enriched)
        };

        let decision = decide(&token, strat, now);
        let action = queue_action(&decision, &token, strat.max_token_age_secs, now);
        if let Some(r) = &decision.rejection {
            match action {
                QueueAction::Retry => debug!("{} waiting: {}", token.short_mint(), r),
                _ => debug!("{} rejected: {}", token.short_mint(), r),
            }
        }

        let (levels, buy) = if action == QueueAction::Alert {
            let buy = largest_buy(app, &token).await;
            (matching_levels(&token, strat, buy), buy)
        } else {
            (Vec::new(), 0.0)
        };
        if settle(&mut *app.store.lock().await, &token, action, &levels) {
            let level = levels.first().copied();
            let note = level.and_then(|l| level_note(l, &token, buy));
            broadcast_alert(app, &token, level, note.as_deref()).await;
            alerts += 1;
        }
    }
    alerts
}

/// Re-check recently alerted mints and announce each newly reached level once.
pub async fn follow_up_cycle(app: &App) -> usize {
    let strat = &app.strategy;
    let candidates = app
        .store
        .lock()
        .await
        .follow_up_candidates(strat.follow_up_secs, Utc::now(), strat.batch_size);

    let mut sent = 0;
    for token in candidates {
        let enriched = app.scanner.enrich(token).await;
        let Some(token) = app.store.lock().await.update_token(enriched) else {
            continue;
        };
        let buy = if token.levels_sent.contains(&AlertLevel::Whale) {
            0.0
        } else {
            largest_buy(app, &token).await
        };
        let levels: Vec<AlertLevel> = matching_levels(&token, strat, buy)
            .into_iter()
            .filter(|l| *l != AlertLevel::Snipe)
            .collect();
        let claimed = app.store.lock().await.claim_levels(&token.mint, &levels);
        for level in claimed {
            let note = level_note(level, &token, buy);
            broadcast_level(app, &token, level, note.as_deref()).await;
            sent += 1;
        }
    }
    sent
}

/// Sample graduated tokens and announce volume spikes.
pub async fn market_cycle(app: &App) -> Result<usize> {
    let listings = app.scanner.fetch_moralis_graduated(MARKET_LIMIT).await?;
    let now = Utc::now();
    let spikes: Vec<(Token, f64)> = {
        let mut store = app.store.lock().await;
        listings
            .into_iter()
            .filter_map(|t| {
                store
                    .record_market_sample(t.clone(), &app.strategy, now)
                    .map(|ratio| (t, ratio))
            })
            .collect()
    };
    for (token, ratio) in &spikes {
        let note = format!("5m volume x{:.1}", ratio);
        broadcast_level(app, token, AlertLevel::Market, Some(&note)).await;
    }
    Ok(spikes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::sample_token;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn passing_token_is_alerted() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let token = sample_token("Mint1", now);
        let decision = decide(&token, &cfg, now);
        assert_eq!(queue_action(&decision, &token, cfg.max_token_age_secs, now), QueueAction::Alert);
    }

    #[test]
    fn young_tokens_wait_their_turn() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut token = sample_token("Mint1", now);
        token.launched_at = now - ChronoDuration::seconds(2);
        let decision = decide(&token, &cfg, now);
        assert_eq!(queue_action(&decision, &token, cfg.max_token_age_secs, now), QueueAction::Retry);
    }

    #[test]
    fn failing_tokens_retry_until_too_old() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut token = sample_token("Mint1", now);
        token.holders = 1;
        let decision = decide(&token, &cfg, now);
        assert_eq!(queue_action(&decision, &token, cfg.max_token_age_secs, now), QueueAction::Retry);

        token.launched_at = now - ChronoDuration::seconds(cfg.max_token_age_secs + 1);
        let decision = decide(&token, &cfg, now);
        assert_eq!(queue_action(&decision, &token, cfg.max_token_age_secs, now), QueueAction::Drop);
    }

    #[test]
    fn mint_in_two_batches_is_alerted_once() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut store = Store::default();

        // the mint shows up in two consecutive feed batches before either is settled
        let first = ingest(&mut store, vec![sample_token("Mint1", now)], &cfg, now);
        let second = ingest(&mut store, vec![sample_token("Mint1", now)], &cfg, now);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);

        let mut broadcasts = 0;
        for token in first.iter().chain(second.iter()) {
            let decision = decide(token, &cfg, now);
            let action = queue_action(&decision, token, cfg.max_token_age_secs, now);
            let levels = matching_levels(token, &cfg, 0.0);
            if settle(&mut store, token, action, &levels) {
                broadcasts += 1;
            }
        }
        assert_eq!(broadcasts, 1);

        // a later cycle no longer sees it
        assert!(ingest(&mut store, vec![sample_token("Mint1", now)], &cfg, now).is_empty());
        assert!(store.tokens["Mint1"].levels_sent.contains(&AlertLevel::Confirm));
    }

    #[test]
    fn retry_and_drop_settle_the_queue() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut store = Store::default();
        ingest(&mut store, vec![sample_token("A", now), sample_token("B", now)], &cfg, now);

        assert!(!settle(&mut store, &sample_token("A", now), QueueAction::Retry, &[]));
        assert_eq!(store.queue.back().map(String::as_str), Some("A"));
        assert!(!settle(&mut store, &sample_token("B", now), QueueAction::Drop, &[]));
        assert_eq!(store.queue.len(), 1);
        assert!(!store.tokens["B"].alerted);
    }

    #[test]
    fn notes_describe_the_level() {
        let now = Utc::now();
        let mut token = sample_token("Mint1", now);
        token.volume_hist = [400.0, 400.0, 1_200.0].into_iter().collect();
        assert_eq!(level_note(AlertLevel::Whale, &token, 1_234.0).as_deref(), Some("Largest buy $1,234"));
        assert_eq!(level_note(AlertLevel::Pump, &token, 0.0).as_deref(), Some("5m volume x3.0"));
        assert_eq!(level_note(AlertLevel::Snipe, &token, 0.0), None);
    }

    #[test]
    fn already_alerted_is_dropped() {
        let now = Utc::now();
        let cfg = StrategyConfig::default();
        let mut token = sample_token("Mint1", now);
        token.alerted = true;
        let decision = decide(&token, &cfg, now);
        assert_eq!(queue_action(&decision, &token, cfg.max_token_age_secs, now), QueueAction::Drop);
    }
}
