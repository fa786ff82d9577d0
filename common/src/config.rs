use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a single uploaded frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// JPEG served whenever no live frame is available.
    #[serde(default)]
    pub fallback_image: Option<String>,
    /// Chunks queued per viewer before further frames are dropped for it.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

/// Inputs to the capture command line. Every field except `program`,
/// `input`, `format` and `log_level` is omitted from the invocation when unset.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_input_format")]
    pub input_format: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub pixel_format: Option<String>,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    /// Where the capture process delivers frames. Defaults to this
    /// server's own upload endpoint.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_capture_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_initial_secs")]
    pub initial_secs: u64,
    #[serde(default = "default_watchdog_increment_secs")]
    pub increment_secs: u64,
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
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ServerConfig {
    /// The upload URL a capture process running on this host should target.
    pub fn local_ingest_url(&self) -> String {
        format!("http://127.0.0.1:{}/mjpeg", self.port)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fallback_image: None,
            client_queue: default_client_queue(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            input: default_input(),
            input_format: default_input_format(),
            fps: None,
            resolution: None,
            filters: Vec::new(),
            pixel_format: None,
            bitrate: None,
            format: default_format(),
            output: None,
            restart_delay_ms: default_restart_delay_ms(),
            log_level: default_capture_log_level(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_watchdog_initial_secs(),
            increment_secs: default_watchdog_increment_secs(),
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

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.watchdog.validate()?;
        Ok(config)
    }
}

/// Upper bound for either watchdog interval, one day.
pub const MAX_WATCHDOG_SECS: u64 = 24 * 60 * 60;

impl WatchdogConfig {
    /// Both intervals must be at least a second and at most a day.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("initial_secs", self.initial_secs),
            ("increment_secs", self.increment_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "watchdog.{name} must be at least 1 second"
                )));
            }
            if secs > MAX_WATCHDOG_SECS {
                return Err(ConfigError::Invalid(format!(
                    "watchdog.{name} must not exceed {MAX_WATCHDOG_SECS} seconds, got {secs}"
                )));
            }
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
fn default_max_frame_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_client_queue() -> usize {
    2
}
fn default_program() -> String {
    "ffmpeg".into()
}
fn default_input() -> String {
    "/dev/video0".into()
}
fn default_input_format() -> Option<String> {
    Some("v4l2".into())
}
fn default_format() -> String {
    "image2".into()
}
fn default_restart_delay_ms() -> u64 {
    1000
}
fn default_capture_log_level() -> String {
    "error".into()
}
fn default_watchdog_initial_secs() -> u64 {
    10
}
fn default_watchdog_increment_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}
