//! Frame sources that feed a [`FrameBuffer`].
//!
//! Every source honours [`LiveSettings::is_paused`] by not publishing, and
//! returns promptly once its cancellation token fires.

pub mod encode;
pub mod mjpeg;
pub mod pattern;

use std::sync::Arc;
use std::time::Duration;

use frame_relay_common::config::SourceConfig;
use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::LiveSettings;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::encode::Rotation;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("JPEG encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("unknown source mode {0:?}, expected 'pattern', 'mjpeg', 'snapshot' or 'none'")]
    UnknownMode(String),
    #[error("source mode '{0}' requires source.url")]
    MissingUrl(&'static str),
    #[error("unsupported rotation {0}, expected 0, 90, 180 or 270")]
    BadRotation(u32),
}

/// A configured frame source, validated and ready to run.
#[derive(Debug, Clone)]
pub enum Source {
    Pattern {
        capture_interval: Duration,
        rotation: Rotation,
    },
    Mjpeg {
        url: String,
        boundary: String,
    },
    Snapshot {
        url: String,
        interval: Duration,
    },
    None,
}

impl Source {
    pub fn from_config(config: &SourceConfig) -> Result<Self, ProducerError> {
        let capture_interval = Duration::from_millis(config.capture_interval_ms.max(1));
        match config.mode.as_str() {
            "pattern" => Ok(Source::Pattern {
                capture_interval,
                rotation: Rotation::from_degrees(config.rotation)
                    .ok_or(ProducerError::BadRotation(config.rotation))?,
            }),
            "mjpeg" => Ok(Source::Mjpeg {
                url: required_url(config, "mjpeg")?,
                boundary: config.boundary.clone(),
            }),
            "snapshot" => Ok(Source::Snapshot {
                url: required_url(config, "snapshot")?,
                interval: capture_interval,
            }),
            "none" => Ok(Source::None),
            other => Err(ProducerError::UnknownMode(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::Pattern { .. } => "pattern",
            Source::Mjpeg { .. } => "mjpeg",
            Source::Snapshot { .. } => "snapshot",
            Source::None => "none",
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(
        self,
        frames: Arc<FrameBuffer>,
        settings: Arc<LiveSettings>,
        cancel: CancellationToken,
    ) -> Result<(), ProducerError> {
        info!(source = self.name(), "frame source starting");
        let result = match self {
            Source::Pattern {
                capture_interval,
                rotation,
            } => {
                pattern::run_pattern_source(capture_interval, rotation, &frames, &settings, &cancel)
                    .await
            }
            Source::Mjpeg { url, boundary } => {
                mjpeg::run_mjpeg_relay(&url, &boundary, &frames, &settings, &cancel).await
            }
            Source::Snapshot { url, interval } => {
                mjpeg::run_snapshot_poller(&url, interval, &frames, &settings, &cancel).await
            }
            Source::None => {
                cancel.cancelled().await;
                Ok(())
            }
        };
        info!("frame source stopped");
        result
    }
}

fn required_url(config: &SourceConfig, mode: &'static str) -> Result<String, ProducerError> {
    if config.url.trim().is_empty() {
        Err(ProducerError::MissingUrl(mode))
    } else {
        Ok(config.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_config(mode: &str, url: &str) -> SourceConfig {
        SourceConfig {
            mode: mode.into(),
            url: url.into(),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn pattern_is_default() {
        let source = Source::from_config(&SourceConfig::default()).unwrap();
        assert!(matches!(
            source,
            Source::Pattern {
                rotation: Rotation::None,
                ..
            }
        ));
    }

    #[test]
    fn upstream_modes_need_url() {
        assert!(matches!(
            Source::from_config(&source_config("mjpeg", "")),
            Err(ProducerError::MissingUrl("mjpeg"))
        ));
        assert!(matches!(
            Source::from_config(&source_config("snapshot", "  ")),
            Err(ProducerError::MissingUrl("snapshot"))
        ));
        let source = Source::from_config(&source_config("mjpeg", "http://cam/stream")).unwrap();
        assert_eq!(source.name(), "mjpeg");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = Source::from_config(&source_config("h264", "")).unwrap_err();
        assert!(matches!(err, ProducerError::UnknownMode(m) if m == "h264"));
    }

    #[test]
    fn zero_capture_interval_is_clamped() {
        let mut config = source_config("snapshot", "http://cam/frame");
        config.capture_interval_ms = 0;
        match Source::from_config(&config).unwrap() {
            Source::Snapshot { interval, .. } => assert_eq!(interval, Duration::from_millis(1)),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[tokio::test]
    async fn none_source_waits_for_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Source::None.run(
            Arc::new(FrameBuffer::new()),
            Arc::new(LiveSettings::default()),
            cancel.clone(),
        ));
        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
