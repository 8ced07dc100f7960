//! Line-oriented control console: the runtime knobs of the stream, driven
//! from stdin.
//!
//! ```text
//! pause | resume | interval <ms> | preset <name> | resolution <w>x<h> | status
//! ```

use std::str::FromStr;
use std::sync::Arc;

use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::{LiveSettings, Preset, Resolution, SettingsError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Interval(u64),
    Preset(Preset),
    Resolution(Resolution),
    Status,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("bad interval {0:?}, expected milliseconds")]
    BadInterval(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();
        let mut arg = |name| words.next().ok_or(CommandError::MissingArgument(name));

        match verb.as_str() {
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "status" => Ok(Command::Status),
            "interval" => {
                let raw = arg("interval")?;
                raw.parse()
                    .map(Command::Interval)
                    .map_err(|_| CommandError::BadInterval(raw.to_string()))
            }
            "preset" => Ok(Command::Preset(arg("preset")?.parse()?)),
            "resolution" => Ok(Command::Resolution(arg("resolution")?.parse()?)),
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }
}

/// Apply `command` to the live settings.
pub fn apply(command: Command, settings: &LiveSettings, frames: &FrameBuffer) {
    match command {
        Command::Pause => {
            settings.pause();
            info!("producer paused, streams keep the last frame");
        }
        Command::Resume => {
            settings.resume();
            info!("producer resumed");
        }
        Command::Interval(ms) => {
            settings.set_frame_interval_ms(ms);
            info!(frame_interval_ms = ms, "frame interval changed");
        }
        Command::Preset(preset) => {
            settings.apply_preset(preset);
            info!(
                preset = preset.name(),
                resolution = %preset.resolution(),
                frame_interval_ms = preset.frame_interval_ms(),
                "preset applied"
            );
        }
        Command::Resolution(resolution) => {
            settings.set_resolution(resolution);
            info!(%resolution, "capture resolution changed");
        }
        Command::Status => info!(
            frame_interval_ms = settings.frame_interval_ms(),
            paused = settings.is_paused(),
            resolution = %settings.resolution(),
            frames_published = frames.published(),
            "status"
        ),
    }
}

/// Forward stdin lines from a dedicated thread. A blocking stdin read inside
/// the runtime would keep it from shutting down.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Apply commands until the input closes or `cancel` fires.
pub async fn run_console(
    mut lines: mpsc::Receiver<String>,
    settings: Arc<LiveSettings>,
    frames: Arc<FrameBuffer>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    debug!("control input closed");
                    break;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => apply(command, &settings, &frames),
            Err(e) => warn!(error = %e, "ignoring control command"),
        }
    }
}
