//! tus-s3-store - resumable upload storage backend for S3-compatible stores

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tus_s3_store::{config::Config, server::Server};

#[derive(Parser, Debug)]
#[command(name = "tus-s3-store")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting tus-s3-store v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)?;
    info!("loaded configuration from {:?}", args.config);

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
