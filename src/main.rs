use anyhow::Context;
use candlebot::config::AppConfig;
use candlebot::coordinator::Runtime;
use candlebot::strategy::TradeLog;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, shutdown_signal};

#[derive(Parser)]
#[command(name = "candlebot")]
#[command(version)]
#[command(about = "Streaming candle predictor with a Q-table signal policy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration directory (default.toml, <CANDLEBOT_ENV>.toml)
    #[arg(short, long, default_value = "config", env = "CANDLEBOT_CONFIG_DIR")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest candles and emit signals every minute (default)
    Run,
    /// Train the predictor once on the stored history and exit
    Train,
    /// Print trade log statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_logging(&config.logging);
            let runtime = Runtime::bootstrap(config).await?;

            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown requested");
                let _ = shutdown_tx.send(());
            });

            runtime.run(shutdown_rx).await?;
        }
        Commands::Train => {
            init_logging(&config.logging);
            let runtime = Runtime::bootstrap(config).await?;
            match runtime.initial_train().await? {
                Some(report) => {
                    println!("Trained on {} windows", report.windows);
                    println!("Train accuracy:      {:.2}%", report.train_accuracy * 100.0);
                    match report.validation_accuracy {
                        Some(acc) => println!("Validation accuracy: {:.2}%", acc * 100.0),
                        None => println!("Validation accuracy: N/A"),
                    }
                }
                None => println!(
                    "Not enough history to train (need more than {} candles)",
                    runtime.predictor().window_len()
                ),
            }
        }
        Commands::Stats => {
            init_logging_simple();
            let tz = config.timezone()?;
            let log = TradeLog::new(&config.paths.trade_log, tz);
            log.open().await?;
            println!("{}", log.stats().await);
        }
    }

    Ok(())
}
