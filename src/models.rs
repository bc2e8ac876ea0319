use serde::{Deserialize, Serialize};

// Pump.fun listing structures (Moralis pump.fun exchange endpoint)
#[derive(Debug, Deserialize)]
pub struct PumpFunResponse {
    pub result: Option<Vec<PumpFunListing>>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpFunListing {
    pub token_address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub price_usd: Option<Amount>,
    pub liquidity: Option<Amount>,
    pub fully_diluted_valuation: Option<Amount>,
    pub created_at: Option<String>,
    pub graduated_at: Option<String>,
    #[serde(rename = "volume_5m")]
    pub volume_5m: Option<Amount>,
    /// 24h volume on the graduated listing
    pub volume: Option<Amount>,
}

/// Moralis sends numbers either as JSON numbers or as strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    pub fn value(&self) -> f64 {
        match self {
            Amount::Number(n) => *n,
            Amount::Text(s) => s.replace(',', "").trim().parse().unwrap_or(0.0),
        }
    }
}

// PumpPortal `subscribeNewToken` event
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpPortalNewToken {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub trader_public_key: Option<String>,
    pub initial_buy: Option<f64>,
    pub sol_amount: Option<f64>,
    pub v_sol_in_bonding_curve: Option<f64>,
    pub market_cap_sol: Option<f64>,
}

// DEX Screener structures
#[derive(Debug, Clone, Deserialize)]
pub struct DexScreenerResponse {
    pub pairs: Option<Vec<DexPair>>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexPair {
    pub pair_address: Option<String>,
    pub base_token: Option<DexToken>,
    pub quote_token: Option<DexToken>,
    pub price_usd: Option<String>,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    pub liquidity: Option<DexLiquidity>,
    pub volume: Option<DexVolume>,
    /// milliseconds since epoch
    pub pair_created_at: Option<i64>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct DexToken {
    pub address: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexLiquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexVolume {
    pub m5: Option<f64>,
}

impl DexPair {
    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    pub fn volume_5m(&self) -> f64 {
        self.volume.as_ref().and_then(|v| v.m5).unwrap_or(0.0)
    }

    pub fn fdv_usd(&self) -> f64 {
        self.fdv.or(self.market_cap).unwrap_or(0.0)
    }

    pub fn price(&self) -> f64 {
        self.price_usd
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0.0)
    }
}

// CoinGecko simple price
#[derive(Debug, Deserialize)]
pub struct SimplePrice {
    pub solana: Option<UsdPrice>,
}

#[derive(Debug, Deserialize)]
pub struct UsdPrice {
    pub usd: f64,
}

// Jupiter V6 structures
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub quote_response: serde_json::Value,
    pub user_public_key: String,
    pub wrap_and_unwrap_sol: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,
    pub dynamic_compute_unit_limit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub swap_transaction: Option<String>,
    pub error: Option<String>,
}

// Etherscan v2 `tokentx` structures
#[derive(Debug, Deserialize)]
pub struct EtherscanResponse {
    pub status: String,
    pub message: String,
    pub result: EtherscanResult,
}

/// `result` is a list on success and an error string otherwise
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EtherscanResult {
    Transfers(Vec<TokenTransfer>),
    Message(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub contract_address: String,
    pub token_symbol: String,
    pub token_decimal: String,
}
