//! tagcast-collector: base-station receiver for the window stream.
//!
//! Listens on one UDP port per camera, decodes every window, and optionally
//! writes each one to disk with a JSON-lines index beside it.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use tagcast_core::config::TagcastConfig;
use tagcast_services::{CameraStats, CameraTable, Collector, WindowSink};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CollectorSummary {
    windows: u64,
    cameras: BTreeMap<u16, CameraStats>,
}

fn summarize(windows: u64, table: &CameraTable) -> CollectorSummary {
    CollectorSummary {
        windows,
        cameras: table.iter().map(|e| (*e.key(), *e.value())).collect(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = TagcastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TagcastConfig::load_or_default().context("failed to load config")?;
    let cfg = &config.collector;

    tracing::info!(
        bind = %cfg.bind_address,
        start_port = cfg.start_port,
        cameras = cfg.cameras,
        output_dir = ?cfg.output_dir,
        index_file = ?cfg.index_file,
        "tagcast-collector starting"
    );

    let collector = Collector::bind(cfg)?;
    let table = collector.stats();
    let mut sink = WindowSink::open(cfg)
        .await
        .context("failed to open window sink")?
        .with_marker_value(config.detection.marker_value);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let (window_tx, mut window_rx) = mpsc::channel(cfg.channel_capacity.max(1));
    let receivers = collector.spawn(window_tx, &shutdown_tx);

    // ── Consume ──────────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;
    let mut windows = 0u64;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let summary = summarize(windows, &table);
                tracing::info!(stats = %serde_json::to_string(&summary)?, "collector stats");
            }
            received = window_rx.recv() => {
                let Some(window) = received else {
                    tracing::info!("all camera receivers exited");
                    break;
                };
                windows += 1;
                match sink.record(&window).await {
                    Ok(record) => tracing::debug!(
                        camera = record.camera,
                        sequence = record.sequence,
                        cx = record.center_x,
                        cy = record.center_y,
                        width = record.window_width,
                        foreground = record.foreground,
                        "window"
                    ),
                    Err(e) => tracing::warn!(error = %e, "failed to persist window"),
                }
            }
        }
    }

    drop(window_rx);
    for r in receivers {
        r.await.ok();
    }
    sink.flush().await?;

    tracing::info!(
        summary = %serde_json::to_string(&summarize(windows, &table))?,
        "tagcast-collector stopped"
    );
    Ok(())
}
