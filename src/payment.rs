use crate::models::{EtherscanResponse, EtherscanResult, TokenTransfer};
use anyhow::{Context, Result};
use log::info;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

const ETHERSCAN_V2: &str = "https://api.etherscan.io/v2/api";
const BSC_CHAIN_ID: &str = "56";

#[derive(Debug, Error, PartialEq)]
pub enum PaymentError {
    #[error("that does not look like a transaction hash")]
    InvalidHash,
    #[error("this transaction was already redeemed")]
    AlreadyRedeemed,
    #[error("no USDT transfer to the payment wallet with that hash yet")]
    NotFound,
    #[error("transfer is {0}, not USDT")]
    WrongToken(String),
    #[error("token contract {0} is not the USDT contract")]
    WrongContract(String),
    #[error("transfer of ${paid:.2} is below the ${required:.2} price")]
    Underpaid { paid: f64, required: f64 },
    #[error("verification service unavailable: {0}")]
    Api(String),
}

pub struct PaymentVerifier {
    client: Client,
    api_key: Option<String>,
    wallet: String,
    usdt_contract: String,
    price_usd: f64,
}

pub fn is_tx_hash(s: &str) -> bool {
    let s = s.trim();
    s.len() == 66
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Scale a raw token amount by its decimals without going through u64,
/// 18-decimal BEP-20 USDT overflows it.
fn scaled_amount(value: &str, decimals: &str) -> Option<f64> {
    let raw: f64 = value.parse().ok()?;
    let decimals: i32 = decimals.parse().ok()?;
    Some(raw / 10f64.powi(decimals))
}

/// Find the transfer with `tx_hash` into `wallet` and check token and amount.
/// Anyone can deploy a token called USDT, so the contract is what counts.
pub fn evaluate_transfers<'a>(
    transfers: &'a [TokenTransfer],
    tx_hash: &str,
    wallet: &str,
    usdt_contract: &str,
    price_usd: f64,
) -> Result<(f64, &'a TokenTransfer), PaymentError> {
    let transfer = transfers
        .iter()
        .find(|t| t.hash.eq_ignore_ascii_case(tx_hash) && t.to.eq_ignore_ascii_case(wallet))
        .ok_or(PaymentError::NotFound)?;

    if !transfer.contract_address.eq_ignore_ascii_case(usdt_contract) {
        if !transfer.token_symbol.eq_ignore_ascii_case("USDT") {
            return Err(PaymentError::WrongToken(transfer.token_symbol.clone()));
        }
        return Err(PaymentError::WrongContract(transfer.contract_address.clone()));
    }

    let paid = scaled_amount(&transfer.value, &transfer.token_decimal)
        .ok_or_else(|| PaymentError::Api(format!("unreadable amount {}", transfer.value)))?;
    // a cent of tolerance for rounding in wallets
    if paid + 0.01 < price_usd {
        return Err(PaymentError::Underpaid {
            paid,
            required: price_usd,
        });
    }
    Ok((paid, transfer))
}

impl PaymentVerifier {
    pub fn new(
        api_key: Option<String>,
        wallet: String,
        usdt_contract: String,
        price_usd: f64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building etherscan client")?;
        Ok(Self {
            client,
            api_key,
            wallet,
            usdt_contract,
            price_usd,
        })
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn price_usd(&self) -> f64 {
        self.price_usd
    }

    async fn recent_transfers(&self) -> Result<Vec<TokenTransfer>, PaymentError> {
        let mut query = vec![
            ("chainid", BSC_CHAIN_ID),
            ("module", "account"),
            ("action", "tokentx"),
            ("address", self.wallet.as_str()),
            ("page", "1"),
            ("offset", "100"),
            ("sort", "desc"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        let resp: EtherscanResponse = self
            .client
            .get(ETHERSCAN_V2)
            .query(&query)
            .send()
            .await
            .map_err(|e| PaymentError::Api(e.to_string()))?
            .json()
            .await
            .map_err(|e| PaymentError::Api(e.to_string()))?;

        match resp.result {
            EtherscanResult::Transfers(list) => Ok(list),
            // "No transactions found" comes back as status 0 with a string result
            EtherscanResult::Message(_)
                if resp.status == "0" && resp.message.starts_with("No transactions") =>
            {
                Ok(vec![])
            }
            EtherscanResult::Message(m) => Err(PaymentError::Api(format!("{} ({})", resp.message, m))),
        }
    }

    /// Verify a BSC USDT payment by hash, returning the USD amount paid.
    pub async fn verify(&self, tx_hash: &str) -> Result<f64, PaymentError> {
        let tx_hash = tx_hash.trim();
        if !is_tx_hash(tx_hash) {
            return Err(PaymentError::InvalidHash);
        }
        let transfers = self.recent_transfers().await?;
        let (paid, transfer) = evaluate_transfers(
            &transfers,
            tx_hash,
            &self.wallet,
            &self.usdt_contract,
            self.price_usd,
        )?;
        info!("Verified payment {} of ${:.2} from {}", tx_hash, paid, transfer.from);
        Ok(paid)
    }
}
