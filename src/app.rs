use crate::config::Config;
use crate::jupiter::JupiterClient;
use crate::payment::PaymentVerifier;
use crate::scanner::Scanner;
use crate::store::SharedStore;
use crate::strategy_config::StrategyConfig;
use crate::telegram::TelegramService;
use anyhow::Result;

/// Everything the background tasks and handlers share.
pub struct App {
    pub cfg: Config,
    pub strategy: StrategyConfig,
    pub store: SharedStore,
    pub telegram: TelegramService,
    pub scanner: Scanner,
    pub jupiter: JupiterClient,
    pub payments: PaymentVerifier,
}

impl App {
    pub fn new(cfg: Config, strategy: StrategyConfig, store: SharedStore) -> Result<Self> {
        let telegram = TelegramService::new(cfg.bot_token.clone())?;
        let scanner = Scanner::new(
            cfg.solana_rpc_url.clone(),
            cfg.moralis_key.clone(),
            cfg.dexscreener_key.clone(),
        )?;
        let jupiter = JupiterClient::new(
            cfg.jupiter_api_url.clone(),
            cfg.solana_rpc_url.clone(),
            cfg.slippage_bps,
            cfg.platform_fee_bps,
            cfg.fee_wallet.clone(),
        )?;
        let payments = PaymentVerifier::new(
            cfg.etherscan_key.clone(),
            cfg.payment_wallet.clone(),
            cfg.usdt_contract.clone(),
            cfg.premium_price_usd,
        )?;

        Ok(App {
            cfg,
            strategy,
            store,
            telegram,
            scanner,
            jupiter,
            payments,
        })
    }
}
