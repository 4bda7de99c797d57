use crate::*;

use std::path::PathBuf;

use tagcast_core::config::{SourceConfig, SourceKind};
use tagcast_core::MARKER_VALUE;
use tagcast_services::ConfiguredProvider;

/// Removes the replay file when the test ends, pass or fail.
struct ReplayFile(PathBuf);

impl Drop for ReplayFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn write_replay(name: &str, frames: &[BinaryFrame]) -> Result<ReplayFile> {
    let path = std::env::temp_dir().join(format!("tagcast-{name}-{}.raw", std::process::id()));
    let bytes: Vec<u8> = frames.iter().flat_map(|f| f.samples().to_vec()).collect();
    std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(ReplayFile(path))
}

fn replay_source(path: &std::path::Path) -> SourceConfig {
    SourceConfig {
        kind: SourceKind::RawFile,
        width: 320,
        height: 240,
        path: Some(path.to_path_buf()),
        ..SourceConfig::default()
    }
}

#[tokio::test]
async fn recorded_frames_replay_in_order() -> Result<()> {
    let file = write_replay(
        "order",
        &[
            frame_with_markers(&[(80, 80)]),
            frame_with_markers(&[(160, 120)]),
            frame_with_markers(&[(240, 160)]),
        ],
    )?;
    let mut collector = CollectorHarness::start(1)?;
    let mut config = pipeline_config(collector.addrs[0]);
    config.source = replay_source(&file.0);

    let provider = ConfiguredProvider::from_config(&config).await?;
    let mut pipeline = udp_pipeline(&config, provider)?;
    assert_eq!(run_to_end(&mut pipeline).await?, 3);

    let mut windows = collector.collect(3).await?;
    windows.sort_by_key(|w| w.header.sequence());
    let expected = [(80u16, 80u16), (160, 120), (240, 160)];
    for (w, (ex, ey)) in windows.iter().zip(expected) {
        assert!(w.header.center_x().abs_diff(ex) <= 10, "{:?}", w.header);
        assert!(w.header.center_y().abs_diff(ey) <= 10, "{:?}", w.header);
        // A 32-pixel window centered on the first scanned hit clips the
        // marker's far edges.
        assert!(w.foreground(MARKER_VALUE) >= 16 * 16);
    }
    let sequences: Vec<u32> = windows.iter().map(|w| w.header.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    collector.stop().await
}

#[tokio::test]
async fn looping_replay_stops_at_frame_limit() -> Result<()> {
    let file = write_replay("loop", &[frame_with_markers(&[(160, 120)])])?;
    let mut collector = CollectorHarness::start(1)?;
    let mut config = pipeline_config(collector.addrs[0]);
    config.source = SourceConfig {
        loop_playback: true,
        frames: 4,
        ..replay_source(&file.0)
    };

    let provider = ConfiguredProvider::from_config(&config).await?;
    let mut pipeline = udp_pipeline(&config, provider)?;
    assert_eq!(run_to_end(&mut pipeline).await?, 4);

    let windows = collector.collect(4).await?;
    let mut sequences: Vec<u32> = windows.iter().map(|w| w.header.sequence()).collect();
    sequences.sort();
    assert_eq!(sequences, vec![0, 1, 2, 3]);

    let cam = *collector.stats.get(&0).context("camera 0 saw nothing")?;
    assert_eq!(cam.frames_seen, 4);
    assert_eq!(cam.sequence_gaps, 0);
    collector.stop().await
}
