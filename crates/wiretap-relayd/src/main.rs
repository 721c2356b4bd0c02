//! wiretap-relayd - transport relay daemon
//!
//! Stateless broadcaster between instrumented producers and viewers: every
//! frame from one connection is forwarded verbatim to all other open
//! connections. Run it, point the producer and the viewer at the same
//! port, and the event stream flows.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use wiretap_core::{Relay, RelayOptions};

#[derive(Parser, Debug)]
#[command(name = "wiretap-relayd")]
#[command(about = "Broadcast relay for wiretap console/network events")]
#[command(version)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on; the next higher port is tried when occupied
    #[arg(short, long, default_value_t = 8989)]
    port: u16,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("WIRETAP_LOG_LEVEL") {
        match v.as_str() {
            "silent" => "off".to_string(),
            "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    } else {
        "info".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let args = Args::parse();

    let mut relay = Relay::new(RelayOptions {
        host: args.host.clone(),
        port: args.port,
    });
    relay.start().await?;

    let port = relay.bound_port().unwrap_or(args.port);
    info!("viewer endpoint: ws://{}:{}", args.host, port);
    info!(
        "device without direct network access? run: adb reverse tcp:{} tcp:{}",
        port, port
    );

    tokio::signal::ctrl_c().await?;
    relay.stop().await;

    Ok(())
}
