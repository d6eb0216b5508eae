//! Frame Viewer Application
//!
//! Subscribes to a publisher and writes each received JPEG to
//! `<output dir>/latest.jpg`.
//!
//! Usage: `viewer [endpoint] [output dir]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_publisher::{
    config::AppConfig,
    error::NetworkError,
    network::{wire::Protocol, Endpoint, PeerConnection, TcpOptions},
};

fn main() -> Result<()> {
    let config = AppConfig::load_or_default(None)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Frame Viewer");

    let endpoint: Endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("tcp://127.0.0.1:{}", config.network.publish_endpoint.port()))
        .parse()
        .context("Invalid publisher endpoint")?;
    let output_dir = PathBuf::from(std::env::args().nth(2).unwrap_or_else(|| "frames".into()));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Cannot create {}", output_dir.display()))?;
    let latest = output_dir.join("latest.jpg");

    let options = TcpOptions::from(&config.network);
    let mut connection = PeerConnection::connect(&endpoint, Protocol::Sub, &options)?;
    tracing::info!("Subscribed to {}", endpoint);

    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;
    let mut last_stats_time = Instant::now();

    loop {
        let jpeg = match connection.recv() {
            Ok(jpeg) => jpeg,
            Err(NetworkError::Closed) => {
                tracing::info!("Publisher closed the connection");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        match image::load_from_memory(&jpeg) {
            Ok(img) => tracing::debug!("Frame {}: {}x{}, {} bytes", frames, img.width(), img.height(), jpeg.len()),
            Err(e) => tracing::warn!("Frame {} is not a valid image: {}", frames, e),
        }
        std::fs::write(&latest, &jpeg)?;

        frames += 1;
        bytes += jpeg.len() as u64;

        // Periodic stats
        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            tracing::info!(
                "Viewer stats: {} frames, {:.1} KB received",
                frames,
                bytes as f64 / 1024.0
            );
        }
    }

    Ok(())
}
