//! tagcastd: camera-side daemon. Scans binary frames for markers and
//! streams a window around each one to the collector over UDP.

use std::time::Duration;

use anyhow::{Context, Result};

use tagcast_core::config::TagcastConfig;
use tagcast_services::{ConfiguredProvider, Pipeline, PipelineStats, UdpTransport};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TagcastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TagcastConfig::load_or_default().context("failed to load config")?;

    // Optional collector address on the command line wins over the file.
    if let Some(peer) = std::env::args().nth(1) {
        config.transport.peer = peer
            .parse()
            .with_context(|| format!("invalid collector address {peer:?}"))?;
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(
        peer = %config.transport.peer,
        source = ?config.source.kind,
        width = config.source.width,
        height = config.source.height,
        dec_rate = config.detection.dec_rate,
        min_valid_width = config.detection.min_valid_width,
        window = ?config.detection.window,
        max_in_flight = config.transport.max_in_flight,
        "tagcastd starting"
    );

    let transport = UdpTransport::bind(&config.transport)?;
    let provider = ConfiguredProvider::from_config(&config)
        .await
        .context("failed to open frame source")?;
    let mut pipeline = Pipeline::from_config(&config, provider, transport);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let stats_printer = tokio::spawn(stats_loop(
        pipeline.stats().clone(),
        shutdown_tx.subscribe(),
    ));

    // ── Run ──────────────────────────────────────────────────────────────────
    let result = pipeline.run(shutdown_tx.subscribe()).await;

    let _ = shutdown_tx.send(());
    stats_printer.await.ok();

    let summary = pipeline.stats().snapshot();
    tracing::info!(
        summary = %serde_json::to_string(&summary)?,
        "tagcastd stopped"
    );

    let frames = result.context("pipeline failed")?;
    tracing::info!(frames, "frames processed");
    Ok(())
}

async fn stats_loop(stats: PipelineStats, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = interval.tick() => {
                match serde_json::to_string(&stats.snapshot()) {
                    Ok(json) => tracing::info!(stats = %json, "pipeline stats"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode stats"),
                }
            }
        }
    }
}
