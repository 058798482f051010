use anyhow::Result;
use cam_alarm::config::{self, Config};
use cam_alarm::ingest::EventFormat;
use cam_alarm::Application;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

/// Camera alert gateway: debounces camera events per serial and rolls up state on a schedule
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP address to listen to
    #[arg(long)]
    addr: Option<String>,

    /// Camera state store URL (memory:// or postgres://...)
    #[arg(long)]
    store: Option<String>,

    /// Enable transparent response compression
    #[arg(long)]
    compress: bool,

    /// Event payload format (auto, xml, json)
    #[arg(long)]
    format: Option<EventFormat>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.api.address = addr;
        }
        if let Some(store) = self.store {
            config.store.url = store;
        }
        if self.compress {
            config.api.compress = true;
        }
        if let Some(format) = self.format {
            config.ingest.format = format;
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.as_str()),
    )
    .init();
    info!("Starting camera alert gateway");
    info!(
        "Debounce window {} ms, rollup {:?}, archive {}",
        config.debounce.window_ms,
        config.rollup.cadence,
        config.archive.path.display()
    );

    let app = Application::build(config).await?;
    let shutdown = app.shutdown_token();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down...");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    app.run().await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_app(cli).await {
        error!("Application error: {:#}", e);
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
