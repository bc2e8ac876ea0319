use crate::app::App;
use crate::strategy::{AlertLevel, Token};
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, html_escape};
use chrono::Utc;
use log::info;

pub fn pump_url(mint: &str) -> String {
    format!("https://pump.fun/{}", mint)
}

/// Thousands-separated whole dollars, e.g. `31,200`
pub fn usd(v: f64) -> String {
    let whole = v.max(0.0).round() as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn chart_url(mint: &str) -> String {
    format!("https://dexscreener.com/solana/{}", mint)
}

fn token_body(token: &Token) -> String {
    format!(
        "<b>{}</b>\n\
        CA: <code>{}</code>\n\
        FDV: <code>${}</code>\n\
        Liq: <code>${}</code> | 5m Vol: <code>${}</code>\n\
        Holders: {}\n\n\
        <a href=\"{}\">View on pump.fun</a>",
        html_escape(&token.symbol),
        token.mint,
        usd(token.fdv),
        usd(token.liquidity),
        usd(token.volume_5m),
        token.holders,
        pump_url(&token.mint),
    )
}

fn with_note(header: String, token: &Token, note: Option<&str>) -> String {
    match note {
        Some(n) => format!("{}\n<i>{}</i>\n\n{}", header, html_escape(n), token_body(token)),
        None => format!("{}\n\n{}", header, token_body(token)),
    }
}

/// The first alert for a mint, tagged with the strongest level it matched.
pub fn format_alert(token: &Token, level: Option<AlertLevel>, note: Option<&str>) -> String {
    let header = match level {
        Some(l) => format!("<b>GOLD ALERT | {}</b>", l.label()),
        None => "<b>GOLD ALERT</b>".to_string(),
    };
    with_note(header, token, note)
}

/// A later level reached by a mint that was already announced.
pub fn format_level_alert(token: &Token, level: AlertLevel, note: Option<&str>) -> String {
    with_note(format!("<b>{} ALERT</b>", level.label()), token, note)
}

pub fn alert_keyboard(mint: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![
                InlineKeyboardButton::callback("BUY 0.1 SOL", format!("buy:{}:0.1", mint)),
                InlineKeyboardButton::callback("BUY 0.5 SOL", format!("buy:{}:0.5", mint)),
            ],
            vec![InlineKeyboardButton::callback("BUY $ amount", format!("askbuy:{}", mint))],
            vec![
                InlineKeyboardButton::callback("Copy CA", format!("copy:{}", mint)),
                InlineKeyboardButton::link("Chart", chart_url(mint)),
                InlineKeyboardButton::callback("Menu", "menu"),
            ],
        ],
    }
}

/// Deliver one message to every eligible user. Free users are charged
/// before the send, so a failed delivery still costs one alert.
/// Returns delivered and attempted counts.
pub async fn broadcast(app: &App, text: &str, keyboard: Option<&InlineKeyboardMarkup>) -> (usize, usize) {
    let chats = app.store.lock().await.claim_alert_recipients(Utc::now());
    let mut delivered = 0;
    for chat_id in &chats {
        if app.telegram.safe_send(*chat_id, text, keyboard).await {
            delivered += 1;
        }
    }
    (delivered, chats.len())
}

pub async fn broadcast_alert(app: &App, token: &Token, level: Option<AlertLevel>, note: Option<&str>) -> usize {
    let text = format_alert(token, level, note);
    let (delivered, total) = broadcast(app, &text, Some(&alert_keyboard(&token.mint))).await;
    info!(
        "GOLD ALERT -> {} | {} | ${} | delivered {}/{}",
        token.symbol,
        token.short_mint(),
        usd(token.fdv),
        delivered,
        total
    );
    delivered
}

pub async fn broadcast_level(app: &App, token: &Token, level: AlertLevel, note: Option<&str>) -> usize {
    let text = format_level_alert(token, level, note);
    let (delivered, total) = broadcast(app, &text, Some(&alert_keyboard(&token.mint))).await;
    info!(
        "{} ALERT -> {} | {} | delivered {}/{}",
        level.label(),
        token.symbol,
        token.short_mint(),
        delivered,
        total
    );
    delivered
}
