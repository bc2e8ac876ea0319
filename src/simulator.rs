use crate::app::App;
use crate::notifier::usd;
use crate::store::{Store, Trade, TradeStatus};
use crate::strategy::short_addr;
use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::Rng;
use std::sync::Arc;

/// Positions still open after this long are sold at whatever the last roll was
const MAX_HOLD_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
}

impl ExitReason {
    fn label(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TAKE PROFIT",
            ExitReason::StopLoss => "STOP LOSS",
            ExitReason::Timeout => "TIME EXIT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitDecision {
    pub reason: ExitReason,
    /// exit value as a multiple of cost
    pub mult: f64,
}

/// Roll a simulated price move for an open trade. There is no price feed
/// behind this; the multiple is drawn uniformly and compared with tp/sl.
pub fn roll_exit<R: Rng>(trade: &Trade, rng: &mut R, now: DateTime<Utc>) -> Option<ExitDecision> {
    if trade.status != TradeStatus::Open {
        return None;
    }
    let mult = rng.gen_range(0.4..2.5);
    if mult >= trade.tp {
        return Some(ExitDecision {
            reason: ExitReason::TakeProfit,
            mult: trade.tp,
        });
    }
    if mult <= trade.sl {
        return Some(ExitDecision {
            reason: ExitReason::StopLoss,
            mult: trade.sl,
        });
    }
    if now - trade.opened_at >= Duration::minutes(MAX_HOLD_MINUTES) {
        return Some(ExitDecision {
            reason: ExitReason::Timeout,
            mult,
        });
    }
    None
}

pub fn close_trade(trade: &mut Trade, exit: &ExitDecision, now: DateTime<Utc>) -> f64 {
    let pnl = trade.cost_usd * (exit.mult - 1.0);
    trade.status = TradeStatus::Sold;
    trade.closed_at = Some(now);
    trade.pnl_usd = Some(pnl);
    pnl
}

fn exit_message(trade: &Trade, exit: &ExitDecision, pnl: f64) -> String {
    let sign = if pnl >= 0.0 { "+" } else { "-" };
    format!(
        "<b>AUTO-SELL: {}</b>\n\
        <b>{}</b> <code>{}</code>\n\
        {:.2}x | PnL: {}${}\n\
        <i>Simulated exit</i>",
        exit.reason.label(),
        crate::telegram::html_escape(&trade.symbol),
        short_addr(&trade.mint),
        exit.mult,
        sign,
        usd(pnl.abs()),
    )
}

/// Close whatever the dice say across all users. Returns (chat_id, message)
/// pairs to notify once the lock is released.
pub fn settle_open_trades<R: Rng>(store: &mut Store, rng: &mut R, now: DateTime<Utc>) -> Vec<(i64, String)> {
    let mut notices = Vec::new();
    for user in store.users.values_mut() {
        let chat_id = user.chat_id;
        for trade in user.trades.iter_mut() {
            if let Some(exit) = roll_exit(trade, rng, now) {
                let pnl = close_trade(trade, &exit, now);
                info!(
                    "Exit: {} reason={:?} mult={:.2}x pnl=${:.2}",
                    trade.mint, exit.reason, exit.mult, pnl
                );
                notices.push((chat_id, exit_message(trade, &exit, pnl)));
            }
        }
    }
    notices
}

pub async fn run_auto_sell(app: Arc<App>) {
    let interval = std::time::Duration::from_secs(app.cfg.auto_sell_interval_secs.max(1));
    loop {
        tokio::time::sleep(interval).await;
        let notices = {
            let mut store = app.store.lock().await;
            let mut rng = rand::thread_rng();
            settle_open_trades(&mut store, &mut rng, Utc::now())
        };
        for (chat_id, text) in notices {
            app.telegram.safe_send(chat_id, &text, None).await;
        }
    }
}
