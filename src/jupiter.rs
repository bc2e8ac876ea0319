use crate::models::{SwapRequest, SwapResponse};
use crate::scanner::{RpcRequest, RpcResponse};
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::info;
use reqwest::Client;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("no wallet linked, use /wallet or /connect first")]
    NoWallet,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("stored private key is invalid: {0}")]
    BadKey(String),
    #[error("quote failed: {0}")]
    Quote(String),
    #[error("swap failed: {0}")]
    Swap(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("submit failed: {0}")]
    Submit(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// Signed by the bot and sent to the cluster
    Submitted { signature: String, out_amount: u64 },
    /// The user finishes the swap in Phantom
    DeepLink { url: String, out_amount: u64 },
}

pub struct JupiterClient {
    client: Client,
    api_url: String,
    rpc_url: String,
    slippage_bps: u16,
    platform_fee_bps: Option<u16>,
    fee_account: Option<String>,
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL).round() as u64
}

pub fn is_valid_pubkey(addr: &str) -> bool {
    Pubkey::from_str(addr.trim()).is_ok()
}

/// Decode a base58 secret key as exported by Phantom / solana-keygen.
pub fn parse_keypair(secret: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret.trim())
        .into_vec()
        .context("secret key is not base58")?;
    #[allow(deprecated)]
    let keypair = Keypair::from_bytes(&bytes)
        .map_err(|e| anyhow::anyhow!("secret key is not a valid ed25519 keypair: {}", e))?;
    Ok(keypair)
}

/// Phantom browse link opening the Jupiter swap page for the mint.
pub fn phantom_deep_link(mint: &str) -> String {
    let target = format!("https://jup.ag/swap/SOL-{}", mint);
    let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
    format!(
        "https://phantom.app/ul/browse/{}?ref={}",
        encode(&target),
        encode("https://jup.ag")
    )
}

/// Re-sign a Jupiter swap transaction (base64, bincode) with the user's key.
pub fn sign_transaction(swap_tx_b64: &str, keypair: &Keypair) -> Result<String, PurchaseError> {
    let bytes = STANDARD
        .decode(swap_tx_b64)
        .map_err(|e| PurchaseError::Signing(e.to_string()))?;
    let tx: VersionedTransaction =
        bincode::deserialize(&bytes).map_err(|e| PurchaseError::Signing(e.to_string()))?;
    let signed = VersionedTransaction::try_new(tx.message, &[keypair])
        .map_err(|e| PurchaseError::Signing(e.to_string()))?;
    let out = bincode::serialize(&signed).map_err(|e| PurchaseError::Signing(e.to_string()))?;
    Ok(STANDARD.encode(out))
}

fn out_amount(quote: &serde_json::Value) -> u64 {
    quote
        .get("outAmount")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

impl JupiterClient {
    pub fn new(
        api_url: String,
        rpc_url: String,
        slippage_bps: u16,
        platform_fee_bps: Option<u16>,
        fee_account: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building jupiter client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            rpc_url,
            slippage_bps,
            // a platform fee is only charged when there is an account to collect it
            platform_fee_bps: platform_fee_bps.filter(|_| fee_account.is_some()),
            fee_account,
        })
    }

    fn quote_params(&self, mint: &str, lamports: u64) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("inputMint", WSOL_MINT.to_string()),
            ("outputMint", mint.to_string()),
            ("amount", lamports.to_string()),
            ("slippageBps", self.slippage_bps.to_string()),
        ];
        if let Some(fee) = self.platform_fee_bps {
            params.push(("platformFeeBps", fee.to_string()));
        }
        params
    }

    pub async fn quote(&self, mint: &str, lamports: u64) -> Result<serde_json::Value, PurchaseError> {
        let resp = self
            .client
            .get(format!("{}/quote", self.api_url))
            .query(&self.quote_params(mint, lamports))
            .send()
            .await
            .map_err(|e| PurchaseError::Quote(e.to_string()))?;
        let status = resp.status();
        let quote: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PurchaseError::Quote(e.to_string()))?;
        if !status.is_success() || quote.get("error").is_some() {
            let msg = quote
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(PurchaseError::Quote(msg));
        }
        Ok(quote)
    }

    pub async fn swap_transaction(
        &self,
        quote: serde_json::Value,
        user_public_key: &str,
    ) -> Result<String, PurchaseError> {
        let request = SwapRequest {
            quote_response: quote,
            user_public_key: user_public_key.to_string(),
            wrap_and_unwrap_sol: true,
            fee_account: self.fee_account.clone(),
            dynamic_compute_unit_limit: true,
        };
        let swap: SwapResponse = self
            .client
            .post(format!("{}/swap", self.api_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PurchaseError::Swap(e.to_string()))?
            .json()
            .await
            .map_err(|e| PurchaseError::Swap(e.to_string()))?;
        match swap.swap_transaction {
            Some(tx) => Ok(tx),
            None => Err(PurchaseError::Swap(
                swap.error.unwrap_or_else(|| "no transaction returned".to_string()),
            )),
        }
    }

    pub async fn send_transaction(&self, signed_b64: &str) -> Result<String, PurchaseError> {
        let request = RpcRequest::new(
            "sendTransaction",
            serde_json::json!([
                signed_b64,
                { "encoding": "base64", "skipPreflight": true, "maxRetries": 3 }
            ]),
        );
        let resp: RpcResponse<String> = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PurchaseError::Submit(e.to_string()))?
            .json()
            .await
            .map_err(|e| PurchaseError::Submit(e.to_string()))?;
        if let Some(err) = resp.error {
            return Err(PurchaseError::Submit(err.to_string()));
        }
        resp.result
            .ok_or_else(|| PurchaseError::Submit("rpc returned no signature".to_string()))
    }

    /// Buy `sol_amount` SOL worth of `mint`. With a private key the swap is
    /// signed and sent; with only a wallet address a Phantom link is returned.
    pub async fn buy(
        &self,
        wallet: Option<&str>,
        private_key: Option<&str>,
        mint: &str,
        sol_amount: f64,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        if !(sol_amount > 0.0) {
            return Err(PurchaseError::InvalidAmount);
        }
        let lamports = sol_to_lamports(sol_amount);

        if let Some(secret) = private_key {
            let keypair = parse_keypair(secret).map_err(|e| PurchaseError::BadKey(e.to_string()))?;
            let owner = keypair.pubkey().to_string();

            let quote = self.quote(mint, lamports).await?;
            let out_amount = out_amount(&quote);
            let swap_tx = self.swap_transaction(quote, &owner).await?;
            let signed = sign_transaction(&swap_tx, &keypair)?;
            let signature = self.send_transaction(&signed).await?;
            info!("Submitted buy of {} SOL -> {} ({})", sol_amount, mint, signature);
            return Ok(PurchaseOutcome::Submitted { signature, out_amount });
        }

        if wallet.is_none() {
            return Err(PurchaseError::NoWallet);
        }
        let quote = self.quote(mint, lamports).await?;
        Ok(PurchaseOutcome::DeepLink {
            url: phantom_deep_link(mint),
            out_amount: out_amount(&quote),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::signature::Signature;

    fn client(fee_account: Option<&str>) -> JupiterClient {
        JupiterClient::new(
            "https://quote-api.jup.ag/v6/".to_string(),
            "http://localhost:8899".to_string(),
            50,
            Some(100),
            fee_account.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn converts_sol_to_lamports() {
        assert_eq!(sol_to_lamports(0.1), 100_000_000);
        assert_eq!(sol_to_lamports(1.5), 1_500_000_000);
    }

    #[test]
    fn quote_params_include_fee_only_with_account() {
        let with_fee = client(Some("Fee111"));
        let params = with_fee.quote_params("Mint111", 42);
        assert!(params.contains(&("inputMint", WSOL_MINT.to_string())));
        assert!(params.contains(&("slippageBps", "50".to_string())));
        assert!(params.contains(&("platformFeeBps", "100".to_string())));

        let no_fee = client(None);
        assert!(!no_fee.quote_params("Mint111", 42).iter().any(|(k, _)| *k == "platformFeeBps"));
        assert_eq!(no_fee.api_url, "https://quote-api.jup.ag/v6");
    }

    #[test]
    fn builds_phantom_link() {
        let link = phantom_deep_link("Mint111");
        assert_eq!(
            link,
            "https://phantom.app/ul/browse/https%3A%2F%2Fjup.ag%2Fswap%2FSOL-Mint111?ref=https%3A%2F%2Fjup.ag"
        );
    }

    #[test]
    fn validates_pubkeys() {
        assert!(is_valid_pubkey(WSOL_MINT));
        assert!(!is_valid_pubkey("not-a-key"));
        assert!(!is_valid_pubkey("0x1234"));
    }

    #[test]
    fn keypair_round_trips_through_base58() {
        let kp = Keypair::new();
        let secret = bs58::encode(kp.to_bytes()).into_string();
        let parsed = parse_keypair(&secret).unwrap();
        assert_eq!(parsed.pubkey(), kp.pubkey());
        assert!(parse_keypair("abc").is_err());
    }

    #[test]
    fn signs_swap_transaction_for_the_payer() {
        let kp = Keypair::new();
        let message = VersionedMessage::Legacy(Message::new(&[], Some(&kp.pubkey())));
        let unsigned = VersionedTransaction {
            signatures: vec![Signature::default()],
            message,
        };
        let b64 = STANDARD.encode(bincode::serialize(&unsigned).unwrap());

        let signed_b64 = sign_transaction(&b64, &kp).unwrap();
        let signed: VersionedTransaction =
            bincode::deserialize(&STANDARD.decode(signed_b64).unwrap()).unwrap();
        assert_ne!(signed.signatures[0], Signature::default());
        assert!(signed.signatures[0].verify(kp.pubkey().as_ref(), &signed.message.serialize()));

        // someone else's transaction cannot be signed by this key
        let other = Keypair::new();
        assert!(matches!(sign_transaction(&b64, &other), Err(PurchaseError::Signing(_))));
    }

    #[test]
    fn reads_out_amount_from_quote() {
        let quote = serde_json::json!({"inAmount":"100000000","outAmount":"123456"});
        assert_eq!(out_amount(&quote), 123456);
        assert_eq!(out_amount(&serde_json::json!({})), 0);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts_and_missing_wallet() {
        let c = client(None);
        assert!(matches!(c.buy(Some("W"), None, "M", 0.0).await, Err(PurchaseError::InvalidAmount)));
        assert!(matches!(c.buy(None, None, "M", 0.1).await, Err(PurchaseError::NoWallet)));
    }
}
