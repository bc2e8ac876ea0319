mod app;
mod bot;
mod config;
mod jupiter;
mod models;
mod notifier;
mod payment;
mod poller;
mod scanner;
mod simulator;
mod store;
mod strategy;
mod strategy_config;
mod telegram;

use crate::app::App;
use crate::config::Config;
use crate::store::{Store, run_autosave, save_shared};
use crate::strategy_config::StrategyConfig;
use anyhow::Result;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::sync::Mutex;

#[derive(StructOpt, Debug)]
#[structopt(name = "pump-alert-bot")]
struct Opt {
    /// filter preset: default, conservative or aggressive
    #[structopt(long, default_value = "default")]
    preset: String,

    /// overrides DATA_FILE
    #[structopt(long, parse(from_os_str))]
    data_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::from_args();

    let mut cfg = Config::from_env()?;
    if let Some(path) = opt.data_file {
        cfg.data_file = path;
    }
    let strategy = StrategyConfig::from_preset(&opt.preset)?;
    let data_file = cfg.data_file.clone();

    let store = Store::load(&data_file)?;
    info!(
        "Loaded {} users, {} tokens from {}",
        store.users.len(),
        store.tokens.len(),
        data_file.display()
    );
    let store = Arc::new(Mutex::new(store));

    let app = Arc::new(App::new(cfg, strategy, store.clone())?);
    info!("Filter preset '{}': {:?}", opt.preset, app.strategy);

    tokio::spawn(bot::run_updates(app.clone()));
    tokio::spawn(poller::run_poller(app.clone()));
    tokio::spawn(simulator::run_auto_sell(app.clone()));
    tokio::spawn(run_autosave(
        store.clone(),
        data_file.clone(),
        app.cfg.save_interval_secs,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, saving state");
    if let Err(e) = save_shared(&store, &data_file).await {
        error!("Final save failed: {:#}", e);
    }
    Ok(())
}
