use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::{LiveSettings, Resolution};
use image::{ImageBuffer, Rgb, RgbImage};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encode::{encode_jpeg, Rotation};
use crate::ProducerError;

/// Render one test-pattern frame: a colour gradient with a white bar that
/// moves a little on every tick.
pub fn render(resolution: Resolution, tick: u64) -> RgbImage {
    let Resolution { width, height } = resolution;
    let bar_width = (width / 16).max(1);
    let bar_x = ((tick * 8) % u64::from(width)) as u32;
    let blue = (tick % 256) as u8;

    ImageBuffer::from_fn(width, height, |x, y| {
        if x >= bar_x && x < bar_x.saturating_add(bar_width) {
            Rgb([255, 255, 255])
        } else {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, blue])
        }
    })
}

/// Publish a synthetic frame every `capture_interval` at the resolution
/// currently held in `settings`. Nothing is published while paused.
pub async fn run_pattern_source(
    capture_interval: Duration,
    rotation: Rotation,
    frames: &FrameBuffer,
    settings: &LiveSettings,
    cancel: &CancellationToken,
) -> Result<(), ProducerError> {
    let mut ticker = tokio::time::interval(capture_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    info!(
        interval_ms = capture_interval.as_millis() as u64,
        resolution = %settings.resolution(),
        "starting test-pattern source"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if settings.is_paused() {
            continue;
        }

        let resolution = settings.resolution();
        let encoded =
            tokio::task::spawn_blocking(move || encode_jpeg(render(resolution, tick), rotation))
                .await;
        match encoded {
            Ok(Ok(jpeg)) => {
                debug!(tick, bytes = jpeg.len(), %resolution, "test-pattern frame encoded");
                frames.publish(jpeg);
                tick = tick.wrapping_add(1);
            }
            // A bad frame is skipped, the last good one stays current.
            Ok(Err(e)) => warn!(error = %e, tick, "failed to encode test-pattern frame"),
            Err(e) => warn!(error = %e, tick, %resolution, "test-pattern encoder task failed"),
        }
    }
}
