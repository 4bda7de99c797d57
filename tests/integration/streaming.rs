use crate::*;

use tagcast_core::config::SourceConfig;
use tagcast_core::MARKER_VALUE;
use tagcast_services::SyntheticProvider;

// ── Single marker ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_marker_yields_one_full_window() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    // Defaults: fixed 96-pixel window.
    let mut config = TagcastConfig::default();
    config.transport.peer = collector.addrs[0];
    config.transport.bind = "127.0.0.1:0".parse()?;

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(vec![frame_with_markers(&[(100, 100)])]))?;
    assert_eq!(run_to_end(&mut pipeline).await?, 1);
    assert_eq!(pipeline.provider().released, 1);

    let windows = collector.collect(1).await?;
    let w = &windows[0];
    assert_eq!(w.window_width(), 96);
    assert_eq!(w.pixels.len(), 96 * 96);
    assert!(w.header.center_x().abs_diff(100) <= 10);
    assert!(w.header.center_y().abs_diff(100) <= 10);
    // The whole 20x20 marker sits inside the window.
    assert_eq!(w.foreground(MARKER_VALUE), 400);
    collector.expect_silence(Duration::from_millis(200)).await?;

    let snap = pipeline.stats().snapshot();
    assert_eq!(snap.candidates, 1);
    assert_eq!(snap.datagrams_sent, 1);
    collector.stop().await
}

#[tokio::test]
async fn marker_at_frame_corner_sends_nothing() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let mut config = TagcastConfig::default();
    config.transport.peer = collector.addrs[0];
    config.transport.bind = "127.0.0.1:0".parse()?;

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(vec![frame_with_markers(&[(5, 5)])]))?;
    run_to_end(&mut pipeline).await?;

    collector.expect_silence(Duration::from_millis(200)).await?;
    let snap = pipeline.stats().snapshot();
    assert_eq!(snap.datagrams_sent, 0);
    assert!(snap.cropped > 0);
    assert_eq!(pipeline.provider().released, 1);
    collector.stop().await
}

// ── Synthetic stream ──────────────────────────────────────────────────────────

#[tokio::test]
async fn synthetic_stream_arrives_intact() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let mut config = pipeline_config(collector.addrs[0]);
    config.source = SourceConfig {
        frames: 20,
        markers: 2,
        marker_size: 12,
        seed: 99,
        ..SourceConfig::default()
    };

    let mut pipeline = udp_pipeline(&config, SyntheticProvider::new(&config.source))?;
    assert_eq!(run_to_end(&mut pipeline).await?, 20);

    let snap = pipeline.stats().snapshot();
    assert!(snap.datagrams_sent > 0);
    assert_eq!(snap.datagrams_sent, snap.candidates);
    assert_eq!(snap.send_failures, 0);

    let windows = collector.collect(snap.datagrams_sent as usize).await?;
    for w in &windows {
        assert_eq!(w.window_width(), 32);
        assert!(w.header.sequence() < 20);
        assert!(w.pixels.iter().any(|&p| p == MARKER_VALUE));
    }
    collector.expect_silence(Duration::from_millis(200)).await?;

    let cam = *collector.stats.get(&0).context("camera 0 saw nothing")?;
    assert_eq!(cam.packets, snap.datagrams_sent);
    assert_eq!(cam.malformed, 0);
    assert!(cam.frames_seen <= 20);
    collector.stop().await
}

#[tokio::test]
async fn empty_frames_send_nothing() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let mut config = pipeline_config(collector.addrs[0]);
    config.source.frames = 5;
    config.source.markers = 0;

    let mut pipeline = udp_pipeline(&config, SyntheticProvider::new(&config.source))?;
    assert_eq!(run_to_end(&mut pipeline).await?, 5);
    assert_eq!(pipeline.sequence(), 5);

    collector.expect_silence(Duration::from_millis(200)).await?;
    assert_eq!(pipeline.stats().snapshot().datagrams_sent, 0);
    collector.stop().await
}

#[tokio::test]
async fn windows_from_one_frame_share_a_sequence() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let config = pipeline_config(collector.addrs[0]);
    let frames = vec![
        frame_with_markers(&[(60, 60), (250, 60), (60, 180), (250, 180)]),
        frame_with_markers(&[(160, 120)]),
    ];

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(frames))?;
    run_to_end(&mut pipeline).await?;

    let windows = collector.collect(5).await?;
    let first: Vec<_> = windows.iter().filter(|w| w.header.sequence() == 0).collect();
    let second: Vec<_> = windows.iter().filter(|w| w.header.sequence() == 1).collect();
    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 1);
    assert!(pipeline.stats().snapshot().peak_outstanding >= 1);
    collector.stop().await
}
