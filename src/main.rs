use anyhow::{Context, bail};
use clap::Parser;
use log::info;
use relay_proxy::config::{Config, LoggingConfig};
use relay_proxy::{ProxyServer, logging};
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Forward HTTP proxy with CONNECT tunneling and optional upstream proxy"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., localhost:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "ADDR", help = "Upstream proxy address (e.g., localhost:3128)")]
    proxy: Option<String>,

    #[clap(long, conflicts_with = "proxy", help = "Connect to every origin directly, without an upstream proxy")]
    direct: bool,

    #[clap(short, long, value_name = "HOST", help = "Host that bypasses the upstream proxy (can be used multiple times)")]
    exclude: Vec<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default().to_file(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;

    let mut logging_config = config.logging.clone().unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging_config.level = Some(logging::parse_log_level(level)?);
    }
    if let Some(format) = &args.log_format {
        logging_config.format = Some(logging::parse_log_format(format)?);
    }
    logging::init(&logging_config)?;

    info!("Config: {:?}", config);
    info!("Starting proxy server...");

    let server = ProxyServer::bind(config).await?;
    server
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, no longer accepting connections");
        })
        .await?;

    info!("Proxy server stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                bail!("Configuration file not found: {}", config_file);
            }
            Config::from_file(config_file)
                .with_context(|| format!("loading {}", config_file))?
        }
        None => Config::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if args.direct {
        config.upstream_proxy = None;
    } else if let Some(proxy) = &args.proxy {
        config.upstream_proxy = Some(proxy.clone());
    }
    if !args.exclude.is_empty() {
        config.excluded_hosts = args.exclude.iter().cloned().collect();
    }
    if config.logging.is_none() {
        config.logging = Some(LoggingConfig::default());
    }

    config.validate()?;
    Ok(config)
}
