use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use careline_call_engine::logging::{setup_logging, LoggingConfig};
use careline_call_engine::{CallEngineConfig, CallEngineServerBuilder};

#[derive(Parser, Debug)]
#[command(name = "call-engine", version, about = "Hunt-group call routing and post-call correlation")]
struct Args {
    /// TOML configuration file; CALL_ENGINE__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides general.bind_addr
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error), overrides logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CallEngineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.general.bind_addr = bind;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }

    setup_logging(LoggingConfig::from_settings(&config.logging)?)?;
    info!("🚀 Starting call engine v{}", env!("CARGO_PKG_VERSION"));

    let server = CallEngineServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("failed to build call engine server")?;
    server.run().await?;
    Ok(())
}
