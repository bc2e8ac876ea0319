use crate::app::App;
use crate::jupiter::{PurchaseOutcome, WSOL_MINT, is_valid_pubkey, parse_keypair};
use crate::notifier::{alert_keyboard, format_alert, usd};
use crate::payment::PaymentError;
use crate::store::{PendingBuy, PendingBuyState, Stats, Trade, TradeStatus};
use crate::strategy::{AlertLevel, Token, short_addr};
use crate::telegram::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, TelegramMessage, TelegramUpdate,
    html_escape,
};
use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use solana_sdk::signature::Signer;
use std::collections::HashMap;
use std::sync::Arc;

const MIN_USD_BUY: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(Option<String>),
    Menu,
    Help,
    Pay(Option<String>),
    Wallet(Option<String>),
    Connect(Option<String>),
    Cancel,
    Admin,
}

impl Command {
    /// Parse `/name[@bot] [arg]`; anything that is not a known command is `None`.
    pub fn parse(text: &str) -> Option<Command> {
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let head = parts.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let arg = parts
            .next()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        Some(match name.as_str() {
            "start" => Command::Start(arg),
            "menu" => Command::Menu,
            "help" => Command::Help,
            "pay" => Command::Pay(arg),
            "wallet" => Command::Wallet(arg),
            "connect" => Command::Connect(arg),
            "cancel" => Command::Cancel,
            "admin" | "stats" => Command::Admin,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    Buy { mint: String, sol: f64 },
    AskBuy(String),
    Copy(String),
    Menu,
    Status,
    Premium,
    Test,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<CallbackAction> {
        let mut parts = data.split(':');
        let action = match parts.next()? {
            "buy" => {
                let mint = parts.next()?.to_string();
                let sol = parts.next()?.parse::<f64>().ok().filter(|s| *s > 0.0)?;
                CallbackAction::Buy { mint, sol }
            }
            "askbuy" => CallbackAction::AskBuy(parts.next()?.to_string()),
            "copy" => CallbackAction::Copy(parts.next()?.to_string()),
            "menu" => CallbackAction::Menu,
            "status" => CallbackAction::Status,
            "premium" => CallbackAction::Premium,
            "test" => CallbackAction::Test,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }
}

/// Referral source from a `/start track_<source>` deep link
pub fn referral_source(arg: Option<&str>) -> Option<&str> {
    arg?.strip_prefix("track_").filter(|s| !s.is_empty())
}

pub fn welcome_text(free_alerts: u32, price_usd: f64, pay_wallet: &str) -> String {
    format!(
        "<b>PUMP GOLD ALERTS</b>\n\n\
        {} free GOLD alerts included\n\
        Premium: <code>${:.2}/mo</code> (USDT on BSC)\n\
        Pay to: <code>{}</code>\n\n\
        <code>/pay TXID</code> - activate premium\n\
        <code>/wallet SOL_ADDRESS</code> - buy through Phantom\n\
        <code>/connect PRIVATE_KEY</code> - let the bot sign buys\n\
        <code>/menu</code> - options",
        free_alerts,
        price_usd,
        html_escape(pay_wallet)
    )
}

fn help_text() -> &'static str {
    "<b>Commands</b>\n\
    /start - register\n\
    /menu - options\n\
    /pay TXID - verify a USDT (BSC) payment\n\
    /wallet ADDRESS - link a Solana wallet (Phantom deep links)\n\
    /connect KEY - store a private key so buys are signed for you\n\
    /cancel - drop a pending buy"
}

pub fn stats_text(stats: &Stats, referrals: &[(String, u32, u32, f64)]) -> String {
    let mut text = format!(
        "<b>ADMIN DASHBOARD</b>\n\
        Users: {}\n\
        Premium: {}\n\
        Revenue: ${:.2}\n\
        Open trades: {}\n\
        Tokens tracked: {} ({} alerted)",
        stats.users,
        stats.premium,
        stats.revenue,
        stats.open_trades,
        stats.tracked_tokens,
        stats.alerted_tokens
    );
    if !referrals.is_empty() {
        text.push_str("\n\n<b>Referrals</b> (joins / subs / revenue)");
        for (src, joins, subs, rev) in referrals {
            text.push_str(&format!("\n{}: {} / {} / ${:.2}", html_escape(src), joins, subs, rev));
        }
    }
    text
}

fn menu_keyboard(is_admin: bool) -> InlineKeyboardMarkup {
    let mut rows = vec![vec![
        InlineKeyboardButton::callback("My Status", "status"),
        InlineKeyboardButton::callback("Premium", "premium"),
    ]];
    if is_admin {
        rows.push(vec![InlineKeyboardButton::callback("Force Test Alert", "test")]);
    }
    InlineKeyboardMarkup { inline_keyboard: rows }
}

fn test_token() -> Token {
    let now = Utc::now();
    Token {
        mint: WSOL_MINT.to_string(),
        symbol: "TESTCOIN".to_string(),
        fdv: 69_696.0,
        liquidity: 12_000.0,
        volume_5m: 1_500.0,
        holders: 42,
        mint_authority: Some(false),
        launched_at: now,
        first_seen: now,
        alerted: false,
        volume_hist: Default::default(),
        levels_sent: Default::default(),
    }
}

/// Parse a typed USD amount; `None` for anything below the minimum.
pub fn parse_usd_amount(text: &str) -> Option<f64> {
    let v: f64 = text.trim().trim_start_matches('$').replace(',', "").parse().ok()?;
    (v.is_finite() && v >= MIN_USD_BUY).then_some(v)
}

pub async fn run_updates(app: Arc<App>) {
    let mut offset = 0i64;
    info!("Telegram update polling started");
    loop {
        match app.telegram.get_updates(offset, 30).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let app = app.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_update(&app, update).await {
                            warn!("Update handling failed: {:#}", e);
                        }
                    });
                }
            }
            Err(e) => {
                error!("Error polling Telegram updates: {:#}", e);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

pub async fn handle_update(app: &App, update: TelegramUpdate) -> Result<()> {
    if let Some(cb) = update.callback_query {
        return handle_callback(app, cb).await;
    }
    if let Some(msg) = update.message {
        return handle_message(app, msg).await;
    }
    Ok(())
}

async fn reply(app: &App, chat_id: i64, text: &str) {
    app.telegram.safe_send(chat_id, text, None).await;
}

async fn handle_message(app: &App, msg: TelegramMessage) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text.as_deref() else {
        return Ok(());
    };
    let uid = from.id;
    let chat_id = msg.chat.id;

    let Some(cmd) = Command::parse(text) else {
        if !text.trim_start().starts_with('/') {
            handle_amount(app, uid, chat_id, text).await;
        }
        return Ok(());
    };

    // every command registers the user so later lookups cannot miss
    {
        let referral = match &cmd {
            Command::Start(arg) => referral_source(arg.as_deref()).map(str::to_string),
            _ => None,
        };
        let mut store = app.store.lock().await;
        if store.register_user(uid, chat_id, app.cfg.free_alerts, referral.as_deref()) {
            info!(
                "New user {} @{} (ref: {})",
                uid,
                from.username.as_deref().unwrap_or("-"),
                referral.as_deref().unwrap_or("organic")
            );
        }
    }

    match cmd {
        Command::Start(_) => {
            let text = welcome_text(
                app.cfg.free_alerts,
                app.payments.price_usd(),
                app.payments.wallet(),
            );
            reply(app, chat_id, &text).await;
        }
        Command::Menu => {
            let kb = menu_keyboard(app.cfg.is_admin(uid));
            app.telegram.safe_send(chat_id, "<b>Menu</b>", Some(&kb)).await;
        }
        Command::Help => reply(app, chat_id, help_text()).await,
        Command::Pay(arg) => cmd_pay(app, uid, chat_id, arg).await,
        Command::Wallet(arg) => cmd_wallet(app, uid, chat_id, arg).await,
        Command::Connect(arg) => cmd_connect(app, uid, chat_id, msg.message_id, arg).await,
        Command::Cancel => {
            let had = app
                .store
                .lock()
                .await
                .user_mut(uid)
                .is_some_and(|u| u.cancel_pending_buy());
            if had {
                reply(app, chat_id, "Cancelled.").await;
            }
        }
        Command::Admin => {
            // silently ignored for everyone else
            if app.cfg.is_admin(uid) {
                let text = {
                    let store = app.store.lock().await;
                    stats_text(&store.stats(Utc::now()), &referral_rows(&store.tracker))
                };
                reply(app, chat_id, &text).await;
            }
        }
    }
    Ok(())
}

async fn cmd_pay(app: &App, uid: i64, chat_id: i64, arg: Option<String>) {
    let Some(txid) = arg else {
        reply(app, chat_id, "Usage: /pay TXID").await;
        return;
    };
    if app.store.lock().await.is_redeemed(&txid) {
        reply(app, chat_id, &PaymentError::AlreadyRedeemed.to_string()).await;
        return;
    }

    match app.payments.verify(&txid).await {
        Ok(paid) => {
            let until = {
                let mut store = app.store.lock().await;
                // two users racing on one hash: first one in wins
                if store.is_redeemed(&txid) {
                    None
                } else {
                    store.activate_premium(uid, &txid, paid, app.cfg.premium_days, Utc::now())
                }
            };
            match until {
                Some(until) => {
                    info!("Premium activated for {} until {}", uid, until);
                    let text = format!(
                        "<b>PREMIUM ACTIVATED</b>\nUnlimited alerts until {}",
                        until.format("%Y-%m-%d")
                    );
                    reply(app, chat_id, &text).await;
                }
                None => reply(app, chat_id, &PaymentError::AlreadyRedeemed.to_string()).await,
            }
        }
        Err(e) => {
            warn!("Payment check for {} failed: {}", uid, e);
            reply(app, chat_id, &format!("Payment not verified: {}", html_escape(&e.to_string()))).await;
        }
    }
}

async fn cmd_wallet(app: &App, uid: i64, chat_id: i64, arg: Option<String>) {
    let Some(addr) = arg else {
        reply(app, chat_id, "Usage: /wallet YOUR_SOLANA_ADDRESS").await;
        return;
    };
    if !is_valid_pubkey(&addr) {
        reply(app, chat_id, "Invalid Solana address.").await;
        return;
    }
    if let Some(user) = app.store.lock().await.user_mut(uid) {
        user.wallet = Some(addr.clone());
        // a linked address switches buys to Phantom links
        user.private_key = None;
    }
    reply(app, chat_id, &format!("Wallet linked: <code>{}</code>", short_addr(&addr))).await;
}

async fn cmd_connect(app: &App, uid: i64, chat_id: i64, message_id: i64, arg: Option<String>) {
    let Some(secret) = arg else {
        reply(app, chat_id, "Usage: /connect BASE58_PRIVATE_KEY").await;
        return;
    };
    // the key should not linger in the chat history either way
    if let Err(e) = app.telegram.delete_message(chat_id, message_id).await {
        warn!("Could not delete /connect message for {}: {:#}", uid, e);
    }

    let keypair = match parse_keypair(&secret) {
        Ok(k) => k,
        Err(_) => {
            reply(app, chat_id, "That is not a valid Solana private key.").await;
            return;
        }
    };
    let pubkey = keypair.pubkey().to_string();
    if let Some(user) = app.store.lock().await.user_mut(uid) {
        user.wallet = Some(pubkey.clone());
        user.private_key = Some(secret.trim().to_string());
    }
    let text = format!(
        "Key connected for <code>{}</code>.\nBuys will be signed and sent automatically. Use a burner wallet.",
        short_addr(&pubkey)
    );
    reply(app, chat_id, &text).await;
}

async fn handle_amount(app: &App, uid: i64, chat_id: i64, text: &str) {
    let state = match app.store.lock().await.user_mut(uid) {
        Some(user) => user.pending_buy_state(Utc::now()),
        None => return,
    };
    let pending = match state {
        PendingBuyState::Ready(p) => p,
        PendingBuyState::Expired => {
            reply(app, chat_id, "Expired.").await;
            return;
        }
        PendingBuyState::Missing => return,
    };

    let Some(usd_amount) = parse_usd_amount(text) else {
        reply(app, chat_id, "Enter a number (e.g. 50)").await;
        return;
    };
    if let Some(user) = app.store.lock().await.user_mut(uid) {
        user.cancel_pending_buy();
    }

    let sol_price = match app.scanner.fetch_sol_price().await {
        Ok(p) => p,
        Err(e) => {
            warn!("SOL price lookup failed: {:#}", e);
            reply(app, chat_id, "Could not fetch the SOL price, try again.").await;
            return;
        }
    };
    let sol_amount = usd_amount / sol_price;
    let text = execute_purchase(app, uid, &pending.mint, sol_amount, Some(usd_amount)).await;
    reply(app, chat_id, &text).await;
}

async fn handle_callback(app: &App, cb: CallbackQuery) -> Result<()> {
    let uid = cb.from.id;
    let chat_id = cb.message.as_ref().map(|m| m.chat.id).unwrap_or(uid);
    let message_id = cb.message.as_ref().map(|m| m.message_id);

    let Some(action) = cb.data.as_deref().and_then(CallbackAction::parse) else {
        app.telegram.answer_callback_query(&cb.id, None).await?;
        return Ok(());
    };

    // alerts can outlive a lost data file, make sure the user exists
    app.store
        .lock()
        .await
        .register_user(uid, chat_id, app.cfg.free_alerts, None);

    match action {
        CallbackAction::Buy { mint, sol } => {
            app.telegram
                .answer_callback_query(&cb.id, Some("Processing buy..."))
                .await?;
            let text = execute_purchase(app, uid, &mint, sol, None).await;
            reply(app, chat_id, &text).await;
        }
        CallbackAction::AskBuy(mint) => {
            app.telegram.answer_callback_query(&cb.id, None).await?;
            let allowed = {
                let mut store = app.store.lock().await;
                match store.user_mut(uid) {
                    Some(u) if u.is_premium(Utc::now()) && u.wallet.is_some() => {
                        u.pending_buy = Some(PendingBuy {
                            mint: mint.clone(),
                            requested_at: Utc::now(),
                        });
                        true
                    }
                    _ => false,
                }
            };
            let text = if allowed {
                format!(
                    "Enter amount in <b>$USD</b> (e.g. 50):\n<code>{}</code>\nCancel: /cancel",
                    short_addr(&mint)
                )
            } else {
                "Premium and a linked wallet are required: /pay then /wallet ADDRESS".to_string()
            };
            reply(app, chat_id, &text).await;
        }
        CallbackAction::Copy(mint) => {
            app.telegram.answer_callback_query(&cb.id, Some("CA sent")).await?;
            reply(app, chat_id, &format!("<code>{}</code>", mint)).await;
        }
        CallbackAction::Menu => {
            app.telegram.answer_callback_query(&cb.id, None).await?;
            let kb = menu_keyboard(app.cfg.is_admin(uid));
            app.telegram.safe_send(chat_id, "<b>Menu</b>", Some(&kb)).await;
        }
        CallbackAction::Status => {
            app.telegram.answer_callback_query(&cb.id, None).await?;
            let text = {
                let store = app.store.lock().await;
                match store.user(uid) {
                    Some(u) => status_text(u),
                    None => "Send /start first.".to_string(),
                }
            };
            match message_id {
                Some(mid) => {
                    if let Err(e) = app.telegram.edit_message_text(chat_id, mid, &text, None).await {
                        warn!("Edit failed: {:#}", e);
                        reply(app, chat_id, &text).await;
                    }
                }
                None => reply(app, chat_id, &text).await,
            }
        }
        CallbackAction::Premium => {
            app.telegram.answer_callback_query(&cb.id, None).await?;
            let text = format!(
                "Send <code>${:.2}</code> USDT (BSC) to\n<code>{}</code>\nthen <code>/pay TXID</code>",
                app.payments.price_usd(),
                html_escape(app.payments.wallet())
            );
            reply(app, chat_id, &text).await;
        }
        CallbackAction::Test => {
            app.telegram.answer_callback_query(&cb.id, None).await?;
            if app.cfg.is_admin(uid) {
                let token = test_token();
                app.telegram
                    .safe_send(
                        chat_id,
                        &format_alert(&token, Some(AlertLevel::Snipe), None),
                        Some(&alert_keyboard(&token.mint)),
                    )
                    .await;
            }
        }
    }
    Ok(())
}

fn status_text(user: &crate::store::User) -> String {
    let now = Utc::now();
    let plan = if user.is_premium(now) {
        match user.paid_until {
            Some(until) => format!("Premium until {}", until.format("%Y-%m-%d")),
            None => "Premium".to_string(),
        }
    } else {
        format!("Free ({} alerts left)", user.free_alerts)
    };
    let wallet = match (&user.wallet, user.private_key.is_some()) {
        (Some(w), true) => format!("<code>{}</code> (auto-sign)", short_addr(w)),
        (Some(w), false) => format!("<code>{}</code> (Phantom)", short_addr(w)),
        (None, _) => "not linked".to_string(),
    };
    let closed_pnl: f64 = user.trades.iter().filter_map(|t| t.pnl_usd).sum();
    format!(
        "<b>Your status</b>\nPlan: {}\nWallet: {}\nOpen trades: {}\nRealized PnL: {}${}",
        plan,
        wallet,
        user.open_trades().count(),
        if closed_pnl < 0.0 { "-" } else { "" },
        usd(closed_pnl.abs())
    )
}

/// Run the Jupiter flow for a user and record the trade. Returns the reply text.
async fn execute_purchase(
    app: &App,
    uid: i64,
    mint: &str,
    sol_amount: f64,
    cost_usd: Option<f64>,
) -> String {
    let (wallet, key, symbol) = {
        let store = app.store.lock().await;
        let Some(user) = store.user(uid) else {
            return "Send /start first.".to_string();
        };
        if !user.is_premium(Utc::now()) {
            return "Buying is a Premium feature: /pay TXID".to_string();
        }
        let symbol = store
            .tokens
            .get(mint)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| short_addr(mint));
        (user.wallet.clone(), user.private_key.clone(), symbol)
    };

    let outcome = match app
        .jupiter
        .buy(wallet.as_deref(), key.as_deref(), mint, sol_amount)
        .await
    {
        Ok(o) => o,
        Err(e) => {
            warn!("Buy of {} for {} failed: {}", mint, uid, e);
            return format!("Buy failed: {}", html_escape(&e.to_string()));
        }
    };

    let cost_usd = match cost_usd {
        Some(c) => c,
        None => match app.scanner.fetch_sol_price().await {
            Ok(p) => sol_amount * p,
            Err(e) => {
                warn!("SOL price lookup failed, recording trade without cost: {:#}", e);
                0.0
            }
        },
    };

    let signature = match &outcome {
        PurchaseOutcome::Submitted { signature, .. } => Some(signature.clone()),
        PurchaseOutcome::DeepLink { .. } => None,
    };
    let trade = Trade {
        mint: mint.to_string(),
        symbol: symbol.clone(),
        cost_usd,
        sol_amount,
        status: TradeStatus::Open,
        tp: app.cfg.take_profit,
        sl: app.cfg.stop_loss,
        opened_at: Utc::now(),
        closed_at: None,
        pnl_usd: None,
        signature,
    };
    if let Some(user) = app.store.lock().await.user_mut(uid) {
        user.trades.push(trade);
    }

    purchase_text(&outcome, &symbol, sol_amount, cost_usd)
}

pub fn purchase_text(outcome: &PurchaseOutcome, symbol: &str, sol_amount: f64, cost_usd: f64) -> String {
    match outcome {
        PurchaseOutcome::Submitted { signature, out_amount } => format!(
            "BOUGHT <b>{}</b> with {:.4} SOL (~${})\nQuoted: ~{} tokens\n<a href=\"https://solscan.io/tx/{}\">View Tx</a>",
            html_escape(symbol),
            sol_amount,
            usd(cost_usd),
            usd(token_units(*out_amount)),
            signature
        ),
        PurchaseOutcome::DeepLink { url, out_amount } => format!(
            "Swap {:.4} SOL (~${}) for ~{} <b>{}</b> in Phantom:\n<a href=\"{}\">Open Phantom</a>",
            sol_amount,
            usd(cost_usd),
            usd(token_units(*out_amount)),
            html_escape(symbol),
            url
        ),
    }
}

// pump.fun mints use 6 decimals
fn token_units(raw: u64) -> f64 {
    raw as f64 / 1_000_000.0
}

/// Referral rows sorted by joins, for the admin dashboard.
pub fn referral_rows(tracker: &HashMap<String, crate::store::Referral>) -> Vec<(String, u32, u32, f64)> {
    let mut rows: Vec<_> = tracker
        .iter()
        .map(|(k, r)| (k.clone(), r.joins, r.subs, r.revenue))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start(None)));
        assert_eq!(
            Command::parse("/start track_alice"),
            Some(Command::Start(Some("track_alice".to_string())))
        );
        assert_eq!(
            Command::parse("/pay@PumpGoldBot  0xabc "),
            Some(Command::Pay(Some("0xabc".to_string())))
        );
        assert_eq!(Command::parse("/STATS"), Some(Command::Admin));
        assert_eq!(Command::parse("/wallet"), Some(Command::Wallet(None)));
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("50"), None);
    }

    #[test]
    fn parses_callbacks() {
        let mint = "So11111111111111111111111111111111111111112";
        assert_eq!(
            CallbackAction::parse(&format!("buy:{}:0.5", mint)),
            Some(CallbackAction::Buy {
                mint: mint.to_string(),
                sol: 0.5
            })
        );
        assert_eq!(
            CallbackAction::parse(&format!("askbuy:{}", mint)),
            Some(CallbackAction::AskBuy(mint.to_string()))
        );
        assert_eq!(CallbackAction::parse("menu"), Some(CallbackAction::Menu));
        assert_eq!(CallbackAction::parse("buy:M:-1"), None);
        assert_eq!(CallbackAction::parse("buy:M"), None);
        assert_eq!(CallbackAction::parse("copy:M:extra"), None);
        assert_eq!(CallbackAction::parse("toggle_volume"), None);
    }

    #[test]
    fn reads_referral_source() {
        assert_eq!(referral_source(Some("track_alice")), Some("alice"));
        assert_eq!(referral_source(Some("track_")), None);
        assert_eq!(referral_source(Some("hello")), None);
        assert_eq!(referral_source(None), None);
    }

    #[test]
    fn parses_usd_amounts() {
        assert_eq!(parse_usd_amount("50"), Some(50.0));
        assert_eq!(parse_usd_amount(" $1,250.5 "), Some(1250.5));
        assert_eq!(parse_usd_amount("0.5"), None);
        assert_eq!(parse_usd_amount("fifty"), None);
        assert_eq!(parse_usd_amount("inf"), None);
    }

    #[test]
    fn admin_dashboard_lists_referrals() {
        let stats = Stats {
            users: 10,
            premium: 2,
            revenue: 59.98,
            open_trades: 1,
            tracked_tokens: 120,
            alerted_tokens: 4,
        };
        let text = stats_text(&stats, &[("alice".to_string(), 5, 2, 59.98)]);
        assert!(text.contains("Users: 10"));
        assert!(text.contains("Revenue: $59.98"));
        assert!(text.contains("alice: 5 / 2 / $59.98"));
        assert!(!stats_text(&stats, &[]).contains("Referrals"));
    }

    #[test]
    fn purchase_messages_link_out() {
        let submitted = PurchaseOutcome::Submitted {
            signature: "5igSig".to_string(),
            out_amount: 2_500_000_000_000,
        };
        let text = purchase_text(&submitted, "ONION", 0.1, 20.0);
        assert!(text.contains("https://solscan.io/tx/5igSig"));
        assert!(text.contains("~2,500,000 tokens"));

        let link = PurchaseOutcome::DeepLink {
            url: "https://phantom.app/ul/browse/x".to_string(),
            out_amount: 1,
        };
        let text = purchase_text(&link, "A&B", 0.5, 100.0);
        assert!(text.contains("A&amp;B"));
        assert!(text.contains("~$100"));
    }

    #[test]
    fn referral_rows_sort_by_joins() {
        let mut tracker = HashMap::new();
        tracker.insert(
            "bob".to_string(),
            crate::store::Referral { joins: 1, subs: 0, revenue: 0.0 },
        );
        tracker.insert(
            "alice".to_string(),
            crate::store::Referral { joins: 4, subs: 1, revenue: 29.99 },
        );
        let rows = referral_rows(&tracker);
        assert_eq!(rows[0].0, "alice");
        assert_eq!(rows[1], ("bob".to_string(), 1, 0, 0.0));
    }

    #[test]
    fn welcome_mentions_price_and_wallet() {
        let text = welcome_text(3, 29.99, "0xPay");
        assert!(text.contains("3 free GOLD alerts"));
        assert!(text.contains("$29.99/mo"));
        assert!(text.contains("0xPay"));
    }
}
