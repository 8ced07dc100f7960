use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{SourceConfig, StreamConfig};

/// Capture resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Largest side a baseline JPEG can describe.
    pub const MAX_DIMENSION: u32 = 65535;

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both sides non-zero and encodable as JPEG.
    pub fn is_valid(self) -> bool {
        (1..=Self::MAX_DIMENSION).contains(&self.width)
            && (1..=Self::MAX_DIMENSION).contains(&self.height)
    }

    fn pack(self) -> u64 {
        (u64::from(self.width) << 32) | u64::from(self.height)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            width: (packed >> 32) as u32,
            height: packed as u32,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| SettingsError::BadResolution(s.to_string()))?;
        let width: u32 = w.trim().parse().map_err(|_| SettingsError::BadResolution(s.to_string()))?;
        let height: u32 = h.trim().parse().map_err(|_| SettingsError::BadResolution(s.to_string()))?;
        let resolution = Self { width, height };
        if !resolution.is_valid() {
            return Err(SettingsError::BadResolution(s.to_string()));
        }
        Ok(resolution)
    }
}

/// Resolution and pacing combinations offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Hd30,
    Hd60,
    FullHd30,
    FullHd60,
    Qhd30,
    Uhd30,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Hd30,
        Preset::Hd60,
        Preset::FullHd30,
        Preset::FullHd60,
        Preset::Qhd30,
        Preset::Uhd30,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Hd30 => "720p30",
            Preset::Hd60 => "720p60",
            Preset::FullHd30 => "1080p30",
            Preset::FullHd60 => "1080p60",
            Preset::Qhd30 => "2k30",
            Preset::Uhd30 => "4k30",
        }
    }

    pub fn resolution(self) -> Resolution {
        match self {
            Preset::Hd30 | Preset::Hd60 => Resolution::new(1280, 720),
            Preset::FullHd30 | Preset::FullHd60 => Resolution::new(1920, 1080),
            Preset::Qhd30 => Resolution::new(2560, 1440),
            Preset::Uhd30 => Resolution::new(3840, 2160),
        }
    }

    /// Delay between emitted frames. The "60" presets use 10ms, not 16ms,
    /// to leave headroom for encode and write time.
    pub fn frame_interval_ms(self) -> u64 {
        match self {
            Preset::Hd60 | Preset::FullHd60 => 10,
            _ => 33,
        }
    }
}

impl FromStr for Preset {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| SettingsError::UnknownPreset(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unknown preset {0:?}")]
    UnknownPreset(String),
    #[error("bad resolution {0:?}, expected <width>x<height> with sides 1..=65535")]
    BadResolution(String),
}

/// Stream settings shared between the control plane, the producer and every
/// streaming connection. Writable at any time from any thread; readers pick
/// up a change on their next cycle.
#[derive(Debug)]
pub struct LiveSettings {
    frame_interval_ms: AtomicU64,
    paused: AtomicBool,
    resolution: AtomicU64,
}

impl LiveSettings {
    pub fn new(frame_interval_ms: u64, paused: bool, resolution: Resolution) -> Self {
        Self {
            frame_interval_ms: AtomicU64::new(frame_interval_ms),
            paused: AtomicBool::new(paused),
            resolution: AtomicU64::new(resolution.pack()),
        }
    }

    pub fn from_config(stream: &StreamConfig, source: &SourceConfig) -> Self {
        Self::new(
            stream.frame_interval_ms,
            stream.paused,
            Resolution::new(source.width, source.height),
        )
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms())
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_frame_interval_ms(&self, ms: u64) {
        self.frame_interval_ms.store(ms, Ordering::Relaxed);
    }

    /// Pause is a producer-side concept: sources stop publishing, the server
    /// keeps re-emitting the last frame.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::unpack(self.resolution.load(Ordering::Relaxed))
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.resolution.store(resolution.pack(), Ordering::Relaxed);
    }

    pub fn apply_preset(&self, preset: Preset) {
        self.set_resolution(preset.resolution());
        self.set_frame_interval_ms(preset.frame_interval_ms());
    }
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default(), &SourceConfig::default())
    }
}
