use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inference_gateway::config::GatewayConfig;
use inference_gateway::core::{spawn_config_watcher, GatewayCore};
use inference_gateway::server;

#[derive(Parser)]
#[command(name = "inference-gateway")]
#[command(version)]
#[command(about = "OpenAI-compatible inference gateway with weighted routing and circuit breaking")]
struct Cli {
    /// Configuration file path (watched for changes)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listening IP address (overrides config)
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port (overrides config)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        GatewayConfig::load(&cli.config)
            .with_context(|| format!("loading config from {}", cli.config.display()))?
    } else {
        GatewayConfig::default()
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().context("validating configuration")?;

    let log_filter = format!("inference_gateway={0},tower_http={0}", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting inference gateway");
    if cli.config.exists() {
        info!(path = %cli.config.display(), "configuration loaded");
    } else {
        warn!(
            path = %cli.config.display(),
            "config file not found, running with built-in defaults"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;

    let core = GatewayCore::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("building gateway core: {e}"))?;

    let watcher = spawn_config_watcher(core.clone(), cli.config.clone());

    server::serve(core, addr).await?;

    watcher.abort();
    Ok(())
}
