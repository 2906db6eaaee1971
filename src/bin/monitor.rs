//! Source Monitor Application
//!
//! Discovers sources on the LAN, connects to the first one found and
//! reports frame throughput for a few seconds before shutting down.

use anyhow::Result;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_video_monitor::{MonitorConfig, SessionSupervisor, SourceRecord};

/// How long to wait for the first real source
const DISCOVERY_WAIT: Duration = Duration::from_secs(10);

/// How long to count frames once streaming
const RECEIVE_WINDOW: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Video Monitor");

    let config_path = std::env::var_os("MONITOR_CONFIG").map(PathBuf::from);
    let config = MonitorConfig::load_or_default(config_path.as_deref());

    // No native library is linked into this binary; discovery runs in
    // network fallback (or synthetic) mode and receiving is simulated.
    let supervisor = SessionSupervisor::new(config, None);
    supervisor.start().await?;

    let source = tokio::select! {
        source = first_source(&supervisor) => source,
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(source) = source else {
        tracing::warn!("No sources found");
        supervisor.shutdown().await;
        return Ok(());
    };

    let list = supervisor.engine().sources();
    println!("\n=== Discovered Sources ===");
    println!("{}", serde_json::to_string_pretty(list.as_slice())?);
    println!();

    if supervisor.connect(&source).await && supervisor.start_receiving() {
        let frames = count_frames(&supervisor).await;
        let stats = supervisor.session().stats();
        tracing::info!(
            "Received {} frames from {} in {:?} ({:.1} fps, {} rejected)",
            frames,
            source.display_name(),
            RECEIVE_WINDOW,
            frames as f32 / RECEIVE_WINDOW.as_secs_f32(),
            stats.frames_rejected
        );
    } else if let Some(err) = supervisor.session().last_error() {
        tracing::error!("Could not receive from {}: {}", source.name, err);
    }

    let stats = supervisor.engine().stats();
    tracing::info!(
        "Discovery stats: {} discovered, {} online",
        stats.total_discovered,
        stats.online
    );

    supervisor.shutdown().await;
    Ok(())
}

/// First non-placeholder source published within the wait window
async fn first_source(supervisor: &SessionSupervisor) -> Option<SourceRecord> {
    let mut sources = supervisor.engine().subscribe();
    let deadline = tokio::time::Instant::now() + DISCOVERY_WAIT;

    loop {
        let found = sources
            .borrow_and_update()
            .iter()
            .find(|record| !record.is_placeholder())
            .cloned();
        if found.is_some() {
            return found;
        }

        match tokio::time::timeout_at(deadline, sources.changed()).await {
            Ok(Ok(())) => {
                let state = supervisor.engine().scan_state();
                if let Some(progress) = state.progress {
                    tracing::info!("{} ({}/{})", state.status, progress.checked, progress.total);
                }
            }
            _ => return None,
        }
    }
}

async fn count_frames(supervisor: &SessionSupervisor) -> usize {
    let frames = supervisor.session().frames();
    frames
        .take_until(tokio::time::sleep(RECEIVE_WINDOW))
        .count()
        .await
}
