//! Frame Publisher Application
//!
//! Publishes test-pattern frames as JPEG images and logs control signals.
//!
//! Usage: `publisher [config.toml]`

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frame_publisher::{
    config::AppConfig,
    control::ControlReceiver,
    error::{Error, NetworkError},
    network::{CancelToken, RecvOptions, SocketManager, Transport},
    publisher::FramePublisher,
    video::TestPattern,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Frame Publisher");
    tracing::info!(
        "Publishing on {}, control on {}",
        config.network.publish_endpoint,
        config.network.control_endpoint
    );
    if !config.network.control_endpoint.is_loopback() {
        tracing::warn!("Control endpoint accepts connections from other hosts");
    }

    let sockets = Arc::new(SocketManager::from_config(&config.network));
    let cancel = CancelToken::new();

    // Control channel runs on its own blocking thread
    let control_sockets = sockets.clone();
    let control_cancel = cancel.clone();
    let control_task = tokio::task::spawn_blocking(move || {
        let receiver = ControlReceiver::new(&*control_sockets);
        let options = RecvOptions::default().with_cancel(control_cancel);
        loop {
            match receiver.receive_control_signal_with(&options) {
                Ok(signal) => tracing::info!(
                    "Control signal received ({} bytes{})",
                    signal.len,
                    if signal.truncated { ", truncated" } else { "" }
                ),
                Err(Error::Network(NetworkError::Cancelled)) => break,
                Err(e) => {
                    tracing::warn!("Control receive failed: {}", e);
                    std::thread::sleep(Duration::from_secs(1));
                    if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                        break;
                    }
                }
            }
        }
    });

    let publisher = FramePublisher::new(&*sockets);
    let mut pattern = TestPattern::new(
        config.source.width,
        config.source.height,
        config.source.pixel_format,
    );
    let mut ticker = tokio::time::interval(Duration::from_millis(config.source.interval_ms));

    tracing::info!("Starting main loop - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                publish_next(&publisher, &mut pattern);

                if pattern.frames_generated() % 250 == 0 {
                    let stats = publisher.stats();
                    let encoder_stats = publisher.encoder().stats();
                    tracing::info!(
                        "Stats: {} frames published, {:.1} KB sent, avg frame {:.0} bytes, {} encode / {} send failures",
                        stats.frames_published,
                        stats.bytes_published as f64 / 1024.0,
                        encoder_stats.average_frame_size,
                        stats.encode_failures,
                        stats.send_failures
                    );
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = control_task.await {
        tracing::warn!("Control thread ended abnormally: {}", e);
    }
    sockets.shutdown();
    Ok(())
}

/// Publish the next pattern frame. Encoding and the fan-out write both block,
/// so they run outside the async worker.
fn publish_next<T: Transport>(publisher: &FramePublisher<'_, T>, pattern: &mut TestPattern) {
    let frame = pattern.next_frame();
    let result = tokio::task::block_in_place(|| publisher.publish_frame(&frame));
    if let Err(e) = result {
        tracing::warn!("Failed to publish frame {}: {}", pattern.frames_generated(), e);
    }
}
