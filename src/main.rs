//! vhost-balancer
//!
//! Multi-tenant HTTP/WebSocket reverse proxy and load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::HttpServer ──▶ engine::ProxyEngine
//!                (plain / TLS+SNI)   (hyper conn,          │
//!                                     Axum router)         ▼
//!                                                   routing::RouteTable
//!                                                   (vhost, wildcards)
//!                                                          │
//!                                                          ▼
//!                                                   routing::Route
//!                                                   queue → strategy → host
//!                                                          │
//!     Client ◀── error page / streamed body ◀── http::forward ──▶ Backend
//!
//!     admin API ──▶ engine control plane      config watcher ──▶ engine.sync
//! ```

use std::path::PathBuf;

use clap::Parser;

use vhost_balancer::config::load_config;
use vhost_balancer::lifecycle::{self, signals};
use vhost_balancer::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "vhost-balancer", version, about = "Multi-tenant HTTP/WebSocket reverse proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Do not re-sync routes when the configuration file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "vhost-balancer starting"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let watch_path = (!args.no_watch).then(|| args.config.clone());
    let proxy = lifecycle::start(config, watch_path).await?;

    signals::wait_for_shutdown_signal().await;
    proxy.shutdown().await;
    Ok(())
}
