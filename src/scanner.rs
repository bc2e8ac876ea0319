use crate::models::*;
use crate::strategy::Token;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;

const PUMPPORTAL_WS: &str = "wss://pumpportal.fun/api/data";
const MORALIS_PUMPFUN: &str = "https://solana-gateway.moralis.io/token/mainnet/exchange/pumpfun";
/// 24h volume spread over 5 minute buckets
const BUCKETS_PER_DAY: f64 = 288.0;
const WHALE_LOOKBACK_TXS: usize = 5;
const DEXSCREENER_TOKENS: &str = "https://api.dexscreener.com/latest/dex/tokens";
const COINGECKO_SOL_PRICE: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd";
const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Clone)]
pub struct Scanner {
    client: Client,
    rpc_url: String,
    moralis_key: Option<String>,
    dexscreener_key: Option<String>,
}

// Solana RPC structures
#[derive(Debug, serde::Serialize)]
pub(crate) struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProgramAccount {
    account: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    data: Vec<String>, // [base64_data, encoding]
}

#[derive(Debug, Deserialize)]
struct AccountInfoValue<T> {
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SignatureInfo {
    signature: String,
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalance {
    account_index: u32,
    mint: String,
    owner: Option<String>,
    ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiTokenAmount {
    ui_amount: Option<f64>,
}

impl Scanner {
    pub fn new(
        rpc_url: String,
        moralis_key: Option<String>,
        dexscreener_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("pump-alert-bot/0.1")
            .build()
            .context("building market data client")?;

        Ok(Scanner {
            client,
            rpc_url,
            moralis_key,
            dexscreener_key,
        })
    }

    /// Hold one PumpPortal `subscribeNewToken` connection open and forward
    /// every launch into `tx`. Returns `Ok` only once the receiver is gone.
    pub async fn stream_pumpportal(&self, tx: &mpsc::Sender<PumpPortalNewToken>) -> Result<()> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        let (ws_stream, _) = connect_async(PUMPPORTAL_WS)
            .await
            .context("connecting to PumpPortal")?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe_msg = serde_json::json!({ "method": "subscribeNewToken" });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .context("subscribing to new tokens")?;
        info!("PumpPortal stream subscribed");

        while let Some(msg) = read.next().await {
            match msg.context("reading PumpPortal stream")? {
                Message::Text(text) => {
                    // the first frame is a subscription ack without a mint
                    if let Ok(ev) = serde_json::from_str::<PumpPortalNewToken>(&text) {
                        debug!("PumpPortal launch {}", ev.mint);
                        if tx.send(ev).await.is_err() {
                            // poller is gone, nothing left to feed
                            return Ok(());
                        }
                    }
                }
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(anyhow!("PumpPortal stream closed"))
    }

    async fn fetch_moralis(&self, listing: &str, limit: u32, order: Option<&str>) -> Result<Vec<Token>> {
        let key = self
            .moralis_key
            .as_deref()
            .ok_or_else(|| anyhow!("MORALIS_API_KEY is not set"))?;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(o) = order {
            query.push(("order", o.to_string()));
        }
        let resp = self
            .client
            .get(format!("{}/{}", MORALIS_PUMPFUN, listing))
            .header("X-API-Key", key)
            .query(&query)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("moralis {} returned {}", listing, resp.status()));
        }
        let body: PumpFunResponse = resp.json().await?;
        Ok(body
            .result
            .unwrap_or_default()
            .into_iter()
            .map(Token::from)
            .collect())
    }

    /// Fresh launches from the Moralis pump.fun `new` listing
    pub async fn fetch_moralis_listings(&self, limit: u32) -> Result<Vec<Token>> {
        self.fetch_moralis("new", limit, None).await
    }

    /// Tokens that left the bonding curve, busiest first
    pub async fn fetch_moralis_graduated(&self, limit: u32) -> Result<Vec<Token>> {
        self.fetch_moralis("graduated", limit, Some("volume.desc")).await
    }

    pub fn has_moralis_key(&self) -> bool {
        self.moralis_key.is_some()
    }

    /// Query DEX-Screener and return the pair with the deepest USD liquidity
    pub async fn query_dexscreener_pair(&self, mint: &str) -> Result<Option<DexPair>> {
        let url = format!("{}/{}", DEXSCREENER_TOKENS, mint);
        let mut req = self.client.get(&url);
        if let Some(k) = &self.dexscreener_key {
            req = req.header("x-api-key", k);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: DexScreenerResponse = resp.json().await?;
        Ok(body.pairs.and_then(most_liquid_pair))
    }

    /// USD value of the largest buy among the pool's last few transactions.
    pub async fn largest_recent_buy(&self, mint: &str) -> Result<f64> {
        let Some(pair) = self.query_dexscreener_pair(mint).await? else {
            return Ok(0.0);
        };
        let (Some(pool), price) = (pair.pair_address.clone(), pair.price()) else {
            return Ok(0.0);
        };
        if price <= 0.0 {
            return Ok(0.0);
        }

        let request = RpcRequest::new(
            "getSignaturesForAddress",
            serde_json::json!([pool, { "limit": WHALE_LOOKBACK_TXS }]),
        );
        let sigs: RpcResponse<Vec<SignatureInfo>> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        let mut largest = 0.0f64;
        for sig in sigs.result.unwrap_or_default().into_iter().filter(|s| s.err.is_none()) {
            let request = RpcRequest::new(
                "getTransaction",
                serde_json::json!([
                    sig.signature,
                    { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }
                ]),
            );
            let tx: RpcResponse<TransactionResult> = match self
                .client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp.json().await?,
                Err(e) => {
                    debug!("getTransaction {} failed: {}", sig.signature, e);
                    continue;
                }
            };
            if let Some(meta) = tx.result.and_then(|r| r.meta) {
                largest = largest.max(largest_buy_usd(&meta, mint, &pool, price));
            }
        }
        Ok(largest)
    }

    /// Count token accounts holding a non-zero balance of the mint
    pub async fn query_token_holder_count(&self, mint: &str) -> Result<Option<u32>> {
        let request = RpcRequest::new(
            "getProgramAccounts",
            serde_json::json!([
                SPL_TOKEN_PROGRAM,
                {
                    "encoding": "base64",
                    "filters": [
                        { "dataSize": 165 },
                        { "memcmp": { "offset": 0, "bytes": mint } }
                    ]
                }
            ]),
        );

        let response = self.client.post(&self.rpc_url).json(&request).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let rpc_response: RpcResponse<Vec<ProgramAccount>> = response.json().await?;
        if let Some(err) = rpc_response.error {
            debug!("getProgramAccounts failed for {}: {}", mint, err);
            return Ok(None);
        }
        Ok(rpc_response.result.map(|accounts| {
            accounts
                .iter()
                .filter_map(|a| a.account.data.first())
                .filter(|data| token_account_amount(data).unwrap_or(0) > 0)
                .count() as u32
        }))
    }

    /// `Some(true)` while the mint can still print supply
    pub async fn query_mint_authority(&self, mint: &str) -> Result<Option<bool>> {
        let request = RpcRequest::new(
            "getAccountInfo",
            serde_json::json!([mint, { "encoding": "jsonParsed" }]),
        );
        let response = self.client.post(&self.rpc_url).json(&request).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let rpc_response: RpcResponse<AccountInfoValue<ParsedAccount>> = response.json().await?;
        Ok(rpc_response
            .result
            .and_then(|r| r.value)
            .and_then(|acc| mint_authority_set(&acc.data)))
    }

    pub async fn fetch_sol_price(&self) -> Result<f64> {
        let price: SimplePrice = self
            .client
            .get(COINGECKO_SOL_PRICE)
            .send()
            .await?
            .json()
            .await?;
        price
            .solana
            .map(|p| p.usd)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| anyhow!("coingecko returned no SOL price"))
    }

    /// Fill in market data, holders and authority for a queued token.
    /// Individual lookups that fail leave the previous values in place.
    pub async fn enrich(&self, mut token: Token) -> Token {
        match self.query_dexscreener_pair(&token.mint).await {
            Ok(Some(pair)) => apply_pair(&mut token, &pair),
            Ok(None) => {}
            Err(e) => warn!("DexScreener lookup failed for {}: {}", token.short_mint(), e),
        }
        match self.query_token_holder_count(&token.mint).await {
            Ok(Some(holders)) => token.holders = holders,
            Ok(None) => {}
            Err(e) => warn!("Holder lookup failed for {}: {}", token.short_mint(), e),
        }
        if token.mint_authority.is_none() {
            match self.query_mint_authority(&token.mint).await {
                Ok(authority) => token.mint_authority = authority,
                Err(e) => warn!("Authority lookup failed for {}: {}", token.short_mint(), e),
            }
        }
        token
    }
}

fn apply_pair(token: &mut Token, pair: &DexPair) {
    let liquidity = pair.liquidity_usd();
    if liquidity > 0.0 {
        token.liquidity = liquidity;
    }
    let fdv = pair.fdv_usd();
    if fdv > 0.0 {
        token.fdv = fdv;
    }
    token.volume_5m = pair.volume_5m();
    if token.symbol == "???" {
        if let Some(sym) = pair.base_token.as_ref().and_then(|b| b.symbol.clone()) {
            token.symbol = truncate_symbol(&sym);
        }
    }
}

fn most_liquid_pair(pairs: Vec<DexPair>) -> Option<DexPair> {
    pairs
        .into_iter()
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

/// Biggest token balance increase for `mint` in one transaction, priced in USD.
/// Accounts owned by the pool itself grow on sells, so they are skipped.
fn largest_buy_usd(meta: &TransactionMeta, mint: &str, pool: &str, price_usd: f64) -> f64 {
    let bought = meta
        .post_token_balances
        .iter()
        .filter(|b| b.mint == mint && b.owner.as_deref() != Some(pool))
        .map(|post| {
            let before = meta
                .pre_token_balances
                .iter()
                .find(|pre| pre.account_index == post.account_index && pre.mint == mint)
                .and_then(|pre| pre.ui_token_amount.ui_amount)
                .unwrap_or(0.0);
            post.ui_token_amount.ui_amount.unwrap_or(0.0) - before
        })
        .fold(0.0f64, f64::max);
    bought * price_usd
}

/// Keep a PumpPortal subscription alive for the life of the process.
pub async fn run_pumpportal_feed(scanner: Scanner, tx: mpsc::Sender<PumpPortalNewToken>) {
    let mut backoff = Duration::from_secs(2);
    loop {
        match scanner.stream_pumpportal(&tx).await {
            Ok(()) => return,
            Err(e) => warn!("PumpPortal feed dropped: {:#}, reconnecting in {:?}", e, backoff),
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(60));
    }
}

/// Pull every launch buffered since the last cycle.
pub fn drain_launches(
    rx: &mut mpsc::Receiver<PumpPortalNewToken>,
    sol_usd: f64,
    now: DateTime<Utc>,
) -> Vec<Token> {
    let mut tokens = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        tokens.push(token_from_pumpportal(ev, sol_usd, now));
    }
    tokens
}

/// SPL token account layout: mint (32) | owner (32) | amount (u64 LE) | ...
fn token_account_amount(base64_data: &str) -> Option<u64> {
    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD
        .decode(base64_data)
        .ok()?;
    let bytes: [u8; 8] = data.get(64..72)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

fn mint_authority_set(data: &serde_json::Value) -> Option<bool> {
    let info = data.get("parsed")?.get("info")?;
    Some(!info.get("mintAuthority").map_or(true, |v| v.is_null()))
}

fn truncate_symbol(s: &str) -> String {
    s.chars().take(12).collect()
}

fn amount(a: Option<&Amount>) -> f64 {
    a.map_or(0.0, Amount::value)
}

pub fn token_from_pumpportal(ev: PumpPortalNewToken, sol_usd: f64, now: DateTime<Utc>) -> Token {
    Token {
        mint: ev.mint,
        symbol: truncate_symbol(ev.symbol.as_deref().unwrap_or("???")),
        fdv: ev.market_cap_sol.unwrap_or(0.0) * sol_usd,
        liquidity: ev.v_sol_in_bonding_curve.unwrap_or(0.0) * sol_usd,
        volume_5m: ev.sol_amount.unwrap_or(0.0) * sol_usd,
        holders: 0,
        mint_authority: None,
        launched_at: now,
        first_seen: now,
        alerted: false,
        volume_hist: VecDeque::new(),
        levels_sent: BTreeSet::new(),
    }
}

impl From<PumpFunListing> for Token {
    fn from(p: PumpFunListing) -> Self {
        let now = Utc::now();
        let launched_at = p
            .created_at
            .as_deref()
            .or(p.graduated_at.as_deref())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(now);
        let volume_5m = match &p.volume_5m {
            Some(v) => v.value(),
            None => amount(p.volume.as_ref()) / BUCKETS_PER_DAY,
        };

        Token {
            mint: p.token_address,
            symbol: truncate_symbol(p.symbol.as_deref().unwrap_or("???")),
            fdv: amount(p.fully_diluted_valuation.as_ref()),
            liquidity: amount(p.liquidity.as_ref()),
            volume_5m,
            holders: 0,
            mint_authority: None,
            launched_at,
            first_seen: now,
            alerted: false,
            volume_hist: VecDeque::new(),
            levels_sent: BTreeSet::new(),
        }
    }
}

pub fn log_new_token(token: &Token) {
    info!(
        "NEW -> {} | {} | FDV ${:.0}",
        token.symbol,
        token.short_mint(),
        token.fdv
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn converts_moralis_listing() {
        let listing: PumpFunListing = serde_json::from_str(
            r#"{"tokenAddress":"Mint111","name":"Onion","symbol":"ONIONONIONONION",
                "priceUsd":"0.00001","liquidity":"4,200.5","fullyDilutedValuation":"31000",
                "createdAt":"2025-10-18T11:38:03.000Z"}"#,
        )
        .unwrap();
        let token = Token::from(listing);
        assert_eq!(token.mint, "Mint111");
        assert_eq!(token.symbol, "ONIONONIONON");
        assert_eq!(token.liquidity, 4200.5);
        assert_eq!(token.fdv, 31000.0);
        assert_eq!(token.launched_at.to_rfc3339(), "2025-10-18T11:38:03+00:00");
    }

    #[test]
    fn converts_pumpportal_event_to_usd() {
        let ev: PumpPortalNewToken = serde_json::from_str(
            r#"{"signature":"sig","mint":"Mint222","traderPublicKey":"Dev",
                "txType":"create","initialBuy":1000000,"solAmount":1.5,
                "vTokensInBondingCurve":1000,"vSolInBondingCurve":31.5,
                "marketCapSol":30.0,"name":"Test","symbol":"TST","uri":"x","pool":"pump"}"#,
        )
        .unwrap();
        let now = Utc::now();
        let token = token_from_pumpportal(ev, 200.0, now);
        assert_eq!(token.fdv, 6000.0);
        assert_eq!(token.liquidity, 6300.0);
        assert_eq!(token.volume_5m, 300.0);
        assert_eq!(token.launched_at, now);
    }

    #[test]
    fn graduated_listing_spreads_daily_volume() {
        let listing: PumpFunListing = serde_json::from_str(
            r#"{"tokenAddress":"Grad111","symbol":"ONION","fullyDilutedValuation":"88000",
                "volume":576000,"graduatedAt":"2025-10-18T10:00:00.000Z"}"#,
        )
        .unwrap();
        let token = Token::from(listing);
        assert_eq!(token.volume_5m, 2000.0);
        assert_eq!(token.launched_at.to_rfc3339(), "2025-10-18T10:00:00+00:00");
    }

    #[tokio::test]
    async fn drains_buffered_launches() {
        let (tx, mut rx) = mpsc::channel(8);
        for mint in ["A", "B"] {
            let ev: PumpPortalNewToken =
                serde_json::from_str(&format!(r#"{{"mint":"{}","marketCapSol":10.0}}"#, mint)).unwrap();
            tx.send(ev).await.unwrap();
        }
        let now = Utc::now();
        let tokens = drain_launches(&mut rx, 150.0, now);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].mint, "B");
        assert_eq!(tokens[0].fdv, 1500.0);
        assert!(drain_launches(&mut rx, 150.0, now).is_empty());
    }

    #[test]
    fn picks_most_liquid_pair() {
        let parsed: DexScreenerResponse = serde_json::from_str(
            r#"{"pairs":[{"pairAddress":"Thin","liquidity":{"usd":500}},
                         {"pairAddress":"Deep","liquidity":{"usd":9000}},
                         {"pairAddress":"None"}]}"#,
        )
        .unwrap();
        let pair = most_liquid_pair(parsed.pairs.unwrap()).unwrap();
        assert_eq!(pair.pair_address.as_deref(), Some("Deep"));
    }

    #[test]
    fn largest_buy_ignores_pool_side_and_sells() {
        let meta: TransactionMeta = serde_json::from_str(
            r#"{"preTokenBalances":[
                  {"accountIndex":1,"mint":"Mint111","owner":"Buyer1","uiTokenAmount":{"uiAmount":100.0}},
                  {"accountIndex":2,"mint":"Mint111","owner":"Pool111","uiTokenAmount":{"uiAmount":900000.0}},
                  {"accountIndex":3,"mint":"Mint111","owner":"Seller","uiTokenAmount":{"uiAmount":5000.0}}],
                "postTokenBalances":[
                  {"accountIndex":1,"mint":"Mint111","owner":"Buyer1","uiTokenAmount":{"uiAmount":40100.0}},
                  {"accountIndex":2,"mint":"Mint111","owner":"Pool111","uiTokenAmount":{"uiAmount":865000.0}},
                  {"accountIndex":3,"mint":"Mint111","owner":"Seller","uiTokenAmount":{"uiAmount":0.0}},
                  {"accountIndex":4,"mint":"Other","owner":"Buyer1","uiTokenAmount":{"uiAmount":1e9}}]}"#,
        )
        .unwrap();
        // 40,000 tokens at $0.03
        let usd = largest_buy_usd(&meta, "Mint111", "Pool111", 0.03);
        assert!((usd - 1200.0).abs() < 1e-6);

        let fresh: TransactionMeta = serde_json::from_str(
            r#"{"postTokenBalances":[{"accountIndex":5,"mint":"Mint111","uiTokenAmount":{"uiAmount":10.0}}]}"#,
        )
        .unwrap();
        assert!((largest_buy_usd(&fresh, "Mint111", "Pool111", 2.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn subscription_ack_is_not_a_launch() {
        let ack = r#"{"message":"Successfully subscribed to token creation events."}"#;
        assert!(serde_json::from_str::<PumpPortalNewToken>(ack).is_err());
    }

    #[test]
    fn reads_token_account_amount() {
        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&42u64.to_le_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        assert_eq!(token_account_amount(&encoded), Some(42));
        assert_eq!(token_account_amount("AAAA"), None);
    }

    #[test]
    fn detects_mint_authority() {
        let set = serde_json::json!({"parsed":{"info":{"mintAuthority":"Auth111","supply":"1"}}});
        let revoked = serde_json::json!({"parsed":{"info":{"mintAuthority":null}}});
        let raw = serde_json::json!(["AAAA", "base64"]);
        assert_eq!(mint_authority_set(&set), Some(true));
        assert_eq!(mint_authority_set(&revoked), Some(false));
        assert_eq!(mint_authority_set(&raw), None);
    }

    #[test]
    fn pair_data_overrides_listing_values() {
        let now = Utc::now();
        let mut token = token_from_pumpportal(
            serde_json::from_str(r#"{"mint":"M","marketCapSol":10.0}"#).unwrap(),
            100.0,
            now,
        );
        let pair: DexPair = serde_json::from_str(
            r#"{"baseToken":{"symbol":"ONION"},"liquidity":{"usd":800},
                "volume":{"m5":55},"fdv":1200}"#,
        )
        .unwrap();
        apply_pair(&mut token, &pair);
        assert_eq!(token.symbol, "ONION");
        assert_eq!(token.liquidity, 800.0);
        assert_eq!(token.fdv, 1200.0);
        assert_eq!(token.volume_5m, 55.0);
    }
}
