//! Standalone signaling relay
//!
//! ```text
//! callrelay-relay --bind 0.0.0.0:8000 --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use callrelay_signaling::logging::{init_logging, LogFormat};
use callrelay_signaling::SignalingRelay;

#[derive(Parser, Debug)]
#[command(name = "callrelay-relay")]
#[command(about = "WebSocket relay for call signaling")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    bind: String,

    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level.as_deref(), LogFormat::from_json_flag(args.json_logs))?;
    info!("Starting callrelay-relay v{}", env!("CARGO_PKG_VERSION"));

    let relay = SignalingRelay::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let addr = relay.local_addr()?;
    let server = relay.spawn();

    info!("Relay ready on ws://{}/ws/{{user_id}}", addr);

    tokio::select! {
        result = server => {
            result.context("relay task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
        }
    }

    Ok(())
}
