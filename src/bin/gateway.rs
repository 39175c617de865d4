use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use music_stream_gateway as lib;
use lib::config::Config;
use lib::server::AppState;

#[derive(Parser)]
#[command(name = "music-stream-gateway", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (long-running)
    Serve,
    /// Validate config file and exit
    ConfigValidate,
    /// Run a federated search and print the results as JSON
    Search {
        query: String,

        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Explicit --config wins; otherwise the system-wide file if present,
    // else built-in defaults plus environment.
    let resolved_config_path: Option<PathBuf> = match &cli.config {
        Some(p) => Some(p.clone()),
        None => {
            let etc_path = Path::new("/etc/music-stream-gateway/config.toml");
            etc_path.exists().then(|| etc_path.to_path_buf())
        }
    };

    let cfg = Config::load(resolved_config_path.as_deref()).with_context(|| match &resolved_config_path {
        Some(p) => format!("loading config from {}", p.display()),
        None => "loading default config".to_string(),
    })?;

    // log->tracing bridge, then stdout plus a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "music-stream-gateway.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    tracing_subscriber_global::set_global_default(subscriber)
        .context("installing global tracing subscriber")?;

    match cli.command {
        Commands::Serve => {
            lib::server::serve(cfg).await.context("running gateway")?;
        }
        Commands::Search { query, limit } => {
            let limit = limit.unwrap_or(cfg.server.default_search_limit);
            let base = cfg
                .server
                .public_url
                .clone()
                .unwrap_or_else(|| format!("http://{}", cfg.server.bind));
            let state = AppState::from_config(cfg);
            if state.federator.providers().is_empty() {
                anyhow::bail!("no provider has credentials configured");
            }
            let results = state.federator.search(&query, limit, &base).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::ConfigValidate => match resolved_config_path.as_deref() {
            Some(path) => match Config::from_path(path) {
                Ok(_) => println!("OK"),
                Err(e) => {
                    eprintln!("Config validation failed: {}", e);
                    std::process::exit(2);
                }
            },
            None => println!("OK (no config file, using defaults)"),
        },
    }

    Ok(())
}
