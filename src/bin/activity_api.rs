//! activity_api - HTTP API over the activity log

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::Ordering;

use activity_tracker::api::{ApiConfig, ApiServer};
use activity_tracker::config::TrackerdConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address; overrides configuration.
    #[arg(long)]
    addr: Option<String>,
    /// Activity database; overrides configuration.
    #[arg(long)]
    db_path: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = TrackerdConfig::load()?;

    let api_config = ApiConfig {
        addr: args.addr.unwrap_or(cfg.api_addr),
        db_path: args.db_path.unwrap_or(cfg.db_path),
    };
    let db_path = api_config.db_path.clone();
    let handle = ApiServer::new(api_config).spawn()?;
    log::info!("activity api listening on {} (db {})", handle.addr, db_path);

    let shutdown = handle.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })?;
    handle.wait()?;
    log::info!("activity api stopped");
    Ok(())
}
