// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! svcbus routing service.
//!
//! Standalone TCP router connecting svcbus processes: every client gets a
//! unique cookie, and frames are forwarded by their target cookie.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (8181)
//! svcbus-router
//!
//! # Custom port and config file
//! svcbus-router --port 9300 --config router.json
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod router;

pub use config::RouterConfig;
pub use router::Router;

/// svcbus routing service - cookie-addressed frame forwarding
#[derive(Parser, Debug)]
#[command(name = "svcbus-router")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8181")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of connected clients
    #[arg(long, default_value = "64")]
    max_clients: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
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
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    // The library logs through the `log` facade; bridge it into tracing.
    tracing_log::LogTracer::init()?;

    let config = if let Some(config_path) = args.config {
        info!("loading config from {:?}", config_path);
        RouterConfig::from_file(&config_path)?
    } else {
        let config = RouterConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            max_clients: args.max_clients,
        };
        config.validate()?;
        config
    };

    let router = Router::new(&config)?;
    router.run();
    Ok(())
}
