use crate::*;

use tagcast_services::BarrierPhase;

// ── Delivery faults ───────────────────────────────────────────────────────────

#[tokio::test]
async fn nobody_listening_does_not_stall_the_pipeline() -> Result<()> {
    // Reserve a port, then free it so nothing is bound there.
    let peer = std::net::UdpSocket::bind("127.0.0.1:0")?.local_addr()?;
    let config = pipeline_config(peer);
    let frames = (0..10)
        .map(|i| frame_with_markers(&[(40 + i * 20, 120)]))
        .collect();

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(frames))?;
    assert_eq!(run_to_end(&mut pipeline).await?, 10);
    assert_eq!(pipeline.provider().released, 10);
    assert_eq!(pipeline.barrier().phase(), BarrierPhase::Idle);
    assert_eq!(pipeline.barrier().outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn in_flight_limit_drops_excess_candidates() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let mut config = pipeline_config(collector.addrs[0]);
    config.transport.max_in_flight = 1;
    let frame = frame_with_markers(&[(60, 60), (250, 60), (60, 180), (250, 180)]);

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(vec![frame]))?;
    let report = pipeline
        .step()
        .await?
        .context("frame queue was empty")?;

    // The scan runs before any send task gets polled, so only the first
    // candidate finds a free buffer.
    assert_eq!(report.scan.accepted, 4);
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.schedule_failures, 3);
    assert_eq!(report.peak_outstanding, 1);

    let windows = collector.collect(1).await?;
    assert!(windows[0].header.center_x() < 100 && windows[0].header.center_y() < 100);
    collector.expect_silence(Duration::from_millis(200)).await?;
    collector.stop().await
}

// ── Collector bookkeeping ─────────────────────────────────────────────────────

#[tokio::test]
async fn frames_without_markers_show_up_as_sequence_gaps() -> Result<()> {
    let mut collector = CollectorHarness::start(1)?;
    let config = pipeline_config(collector.addrs[0]);
    let frames = vec![
        frame_with_markers(&[(160, 120)]),
        frame_with_markers(&[]),
        frame_with_markers(&[]),
        frame_with_markers(&[(160, 120)]),
    ];

    let mut pipeline = udp_pipeline(&config, FrameQueue::new(frames))?;
    run_to_end(&mut pipeline).await?;
    collector.collect(2).await?;

    let cam = *collector.stats.get(&0).context("camera 0 saw nothing")?;
    assert_eq!(cam.frames_seen, 2);
    assert_eq!(cam.sequence_gaps, 2);
    assert_eq!(cam.last_sequence, Some(3));
    collector.stop().await
}

#[tokio::test]
async fn cameras_are_kept_apart() -> Result<()> {
    let mut collector = CollectorHarness::start(2)?;
    let left = pipeline_config(collector.addrs[0]);
    let right = pipeline_config(collector.addrs[1]);

    let mut a = udp_pipeline(
        &left,
        FrameQueue::new(vec![frame_with_markers(&[(60, 60)]); 3]),
    )?;
    let mut b = udp_pipeline(
        &right,
        FrameQueue::new(vec![frame_with_markers(&[(250, 180)]); 2]),
    )?;
    let (ra, rb) = tokio::join!(run_to_end(&mut a), run_to_end(&mut b));
    assert_eq!(ra?, 3);
    assert_eq!(rb?, 2);

    let windows = collector.collect(5).await?;
    let from = |camera: u16| windows.iter().filter(|w| w.camera == camera).count();
    assert_eq!(from(0), 3);
    assert_eq!(from(1), 2);
    assert!(windows
        .iter()
        .filter(|w| w.camera == 1)
        .all(|w| w.header.center_x() > 200));

    assert_eq!(collector.stats.get(&0).context("camera 0")?.packets, 3);
    assert_eq!(collector.stats.get(&1).context("camera 1")?.packets, 2);
    collector.stop().await
}
