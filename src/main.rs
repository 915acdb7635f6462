//! ResendProxy - Main entry point
//!
//! A minimal CORS-enabled reverse proxy for the Resend email API

use anyhow::Result;
use clap::Parser;
use resend_proxy::{ProxyConfig, ProxyServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// ResendProxy - Forward browser email requests to Resend
#[derive(Parser, Debug)]
#[command(name = "resend-proxy")]
#[command(author = "ResendProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "A minimal CORS-enabled reverse proxy for the Resend email API")]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3001")]
    port: u16,

    /// Public base URL, shown in the startup log
    #[arg(long, env = "API_URL", default_value = "http://localhost:3001")]
    api_url: String,

    /// Directory served for non-API paths
    #[arg(long, env = "STATIC_DIR", default_value = "./public")]
    static_dir: PathBuf,

    /// Upstream email API base URL
    #[arg(long, env = "UPSTREAM_URL", default_value = "https://api.resend.com")]
    upstream_url: String,

    /// Upstream request timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "30")]
    upstream_timeout_secs: u64,

    /// Inbound body read timeout in seconds
    #[arg(long, env = "BODY_TIMEOUT_SECS", default_value = "30")]
    body_timeout_secs: u64,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "10485760")]
    max_body_bytes: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting ResendProxy v{}", env!("CARGO_PKG_VERSION"));

    let config = ProxyConfig {
        host: args.host,
        port: args.port,
        public_url: args.api_url,
        static_dir: args.static_dir,
        upstream_url: args.upstream_url,
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        body_timeout: Duration::from_secs(args.body_timeout_secs),
        max_body_size: args.max_body_bytes,
        ..ProxyConfig::default()
    };

    info!("Upstream: {}", config.upstream_url);

    let server = Arc::new(ProxyServer::from_config(config)?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupt received, shutting down"),
    }

    Ok(())
}
