use serde::Deserialize;
use std::path::Path;

use crate::settings::Resolution;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent `/stream` connections, 0 = unlimited.
    #[serde(default)]
    pub max_streams: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Initial values for the live stream settings. The control plane may
/// change both at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,
    #[serde(default)]
    pub rotation: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_streams: 0,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            paused: false,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            url: String::new(),
            boundary: default_boundary(),
            width: default_width(),
            height: default_height(),
            capture_interval_ms: default_capture_interval_ms(),
            rotation: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// `bind:port` as accepted by `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.source.rotation, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Invalid(format!(
                "source.rotation must be 0, 90, 180 or 270, got {}",
                self.source.rotation
            )));
        }
        let resolution = Resolution::new(self.source.width, self.source.height);
        if !resolution.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "source resolution sides must be 1..={}, got {}x{}",
                Resolution::MAX_DIMENSION,
                self.source.width, self.source.height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_shutdown_timeout_ms() -> u64 {
    3000
}
fn default_frame_interval_ms() -> u64 {
    33
}
fn default_mode() -> String {
    "pattern".into()
}
fn default_boundary() -> String {
    "myboundary".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_capture_interval_ms() -> u64 {
    33
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.max_streams, 0);
        assert_eq!(config.stream.frame_interval_ms, 33);
        assert!(!config.stream.paused);
        assert_eq!(config.source.mode, "pattern");
        assert_eq!((config.source.width, config.source.height), (1280, 720));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 9000

            [source]
            mode = "mjpeg"
            url = "http://camera.local:8080/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.source.mode, "mjpeg");
        assert_eq!(config.source.boundary, "myboundary");
        assert_eq!(config.source.capture_interval_ms, 33);
    }

    #[test]
    fn rejects_odd_rotation() {
        let err = Config::parse("[source]\nrotation = 45\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_resolution() {
        let err = Config::parse("[source]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_resolution_beyond_jpeg_limit() {
        let err = Config::parse("[source]\nwidth = 70000\nheight = 480\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = Config::parse("[source]\nheight = 4294967295\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(Config::parse("[source]\nwidth = 65535\nheight = 1\n").is_ok());
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Config::parse("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nframe_interval_ms = 100\npaused = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.stream.frame_interval_ms, 100);
        assert!(config.stream.paused);
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(..)));
    }
}
