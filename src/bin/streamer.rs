//! Microphone streaming daemon.
//!
//! Binds the configured TCP port, waits for a single receiver, and streams
//! the default microphone as raw 48 kHz mono 16-bit PCM until Ctrl-C.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mic_streamer::{
    config::{self, Permissions, ServerConfig},
    constants::DEFAULT_PORT,
    StreamService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Port from args, falling back to the last persisted value
    let config = match std::env::args().nth(1) {
        Some(raw) => {
            let port: u32 = raw.parse().context("port must be a number")?;
            ServerConfig::new(port)?
        }
        None => ServerConfig {
            port: config::load_port().unwrap_or(DEFAULT_PORT),
            bind_address: None,
        },
    };

    if let Err(e) = config::save_port(config.port) {
        tracing::warn!("could not persist port: {e}");
    }

    let service = StreamService::with_defaults();
    service.start(config, Permissions::granted()).await?;

    if let Some(addr) = service.bound_addr() {
        tracing::info!(
            "streaming on {addr}; receive with e.g. `nc {} {} | aplay -f S16_LE -r 48000 -c 1`",
            addr.ip(),
            addr.port()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    service.stop().await;
    Ok(())
}
