use clap::Parser;

use optix::cli::{Cli, Commands};
use optix::config::AppConfig;
use optix::runtime;
use optix::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load_from(&cli.config_dir)?;
    let _log_guard = runtime::init_logging(&cfg.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => runtime::run(cfg).await?,
        Commands::Params => {
            let store = SqliteStore::connect(&cfg.database.url, 1).await?;
            store.migrate().await?;
            let mut params: Vec<_> = store.all_params().await?.into_iter().collect();
            params.sort();
            for (key, value) in params {
                println!("{key} = {value}");
            }
        }
        Commands::History { limit } => {
            let store = SqliteStore::connect(&cfg.database.url, 1).await?;
            store.migrate().await?;
            for trade in store.recent_trades(limit).await? {
                let exit = trade
                    .exit_price
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".into());
                let pnl = trade
                    .pnl
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{} {} {} {} | entry {} exit {} pnl {} [{}]",
                    trade.date,
                    trade.mode,
                    trade.side,
                    trade.symbol,
                    trade.entry_price,
                    exit,
                    pnl,
                    trade.status
                );
            }
        }
    }

    Ok(())
}
