//! SSH-HTTP bridge (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!   SSH client                          BRIDGE
//!   ──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//!   TCP conn ─┼──▶│   net    │──▶│    ssh     │──▶│   tunnel     │
//!             │   │ listener │   │ session    │   │ channel (×N) │
//!             │   └──────────┘   └────────────┘   └──────┬───────┘
//!             │                                          │ envelope
//!             │                                          ▼
//!             │   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//!   body   ◀──┼───│  relay   │◀──│  handler   │◀──│   routing    │
//!             │   └──────────┘   └────────────┘   │   table      │
//!   ──────────┘                                   └──────────────┘
//! ```
//!
//! Built-in routes: `/status` and `/echo`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ssh_http_bridge::config::{read_config, validate_config, BridgeConfig};
use ssh_http_bridge::http::BuiltinRoutes;
use ssh_http_bridge::lifecycle;
use ssh_http_bridge::observability::logging;

#[derive(Parser)]
#[command(name = "ssh-http-bridge")]
#[command(about = "Serve HTTP routes over SSH channels", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `observability.log_level`
    #[arg(long)]
    log_level: Option<String>,

    /// Accept `none` authentication
    #[arg(long)]
    allow_anonymous: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match read_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => BridgeConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    if args.allow_anonymous {
        config.auth.allow_anonymous = true;
    }
    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("invalid configuration: {error}");
        }
        return ExitCode::FAILURE;
    }

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_payload_bytes = config.tunnel.max_payload_bytes,
        "ssh-http-bridge starting"
    );

    match lifecycle::run(config, BuiltinRoutes).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Bridge failed");
            ExitCode::FAILURE
        }
    }
}
