use anyhow::{Context, Result, anyhow};
use log::warn;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const TELEGRAM_API: &str = "https://api.telegram.org";

// Envelope every Bot API method answers with
#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

// Telegram keyboard button, either a callback or a link
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: &str, data: impl Into<String>) -> Self {
        InlineKeyboardButton {
            text: text.to_string(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn link(text: &str, url: impl Into<String>) -> Self {
        InlineKeyboardButton {
            text: text.to_string(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// Escape the three characters Telegram's HTML parse mode cares about.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Drop tags and decode the escapes, used for the plain-text resend.
fn strip_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramService {
    bot_token: String,
    api_base: String,
    client: Client,
}

impl TelegramService {
    pub fn new(bot_token: String) -> Result<Self> {
        // long polls hold the connection for up to 30s
        let client = Client::builder()
            .timeout(Duration::from_secs(35))
            .build()
            .context("building telegram client")?;
        Ok(Self {
            bot_token,
            api_base: TELEGRAM_API.to_string(),
            client,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let res: TelegramResponse<T> = self
            .client
            .post(self.url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", method, e.without_url()))?
            .json()
            .await
            .with_context(|| format!("decoding telegram {} response", method))?;

        if !res.ok {
            return Err(anyhow!(
                "telegram {} failed: {}",
                method,
                res.description.unwrap_or_default()
            ));
        }
        res.result
            .ok_or_else(|| anyhow!("telegram {} returned no result", method))
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<TelegramUpdate>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        let _: serde_json::Value = self.call("sendMessage", body).await?;
        Ok(())
    }

    /// Send as HTML, fall back to plain text once, log if both fail.
    pub async fn safe_send(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> bool {
        if let Err(e) = self.send_message(chat_id, text, keyboard).await {
            let mut body = json!({ "chat_id": chat_id, "text": strip_html(text) });
            if let Some(kb) = keyboard {
                body["reply_markup"] = serde_json::to_value(kb).unwrap_or_default();
            }
            if let Err(e2) = self.call::<serde_json::Value>("sendMessage", body).await {
                warn!("Send failed to {}: {} / {}", chat_id, e, e2);
                return false;
            }
        }
        true
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        let _: serde_json::Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    // Answer a callback query to stop the loading indicator
    pub async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        let _: bool = self.call("answerCallbackQuery", body).await?;
        Ok(())
    }
}
