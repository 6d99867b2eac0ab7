use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "optix", about = "Intraday index options breakout bot", version)]
pub struct Cli {
    /// Configuration directory (default.toml plus OPTIX_ENV overlay)
    #[arg(long, default_value = "config")]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot
    Run,
    /// Print the stored strategy parameters
    Params,
    /// Print recent trades
    History {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}
