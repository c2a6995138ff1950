pub mod capture;
pub mod command;
pub mod output;
pub mod stream;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use capture::frame::PixelFormat;

pub use capture::{Camera, Frame};

/// System configuration
///
/// Built-in defaults are compile-time constants. [`Config::load`] may overlay
/// them once at startup; nothing edits the tree afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub broker: BrokerConfig,
    pub camera: CameraConfig,
    pub outputs: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
}

/// Which imaging device backs the frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    TestPattern,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub sensor: SensorKind,
    pub device: String, // Empty means auto-detect (v4l2 only)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub white_pin: u8,
    pub yellow_pin: u8,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                address: "0.0.0.0".into(),
                port: 80,
            },
            broker: BrokerConfig {
                host: option_env!("BEDCAM_BROKER_HOST")
                    .unwrap_or("localhost")
                    .into(),
                port: 8883,
                username: option_env!("BEDCAM_BROKER_USERNAME")
                    .unwrap_or_default()
                    .into(),
                password: option_env!("BEDCAM_BROKER_PASSWORD")
                    .unwrap_or_default()
                    .into(),
                client_id: option_env!("BEDCAM_CLIENT_ID").unwrap_or("bedcam").into(),
                topic: "bedroom/rl".into(),
                keep_alive_secs: 15,
            },
            camera: CameraConfig {
                sensor: SensorKind::TestPattern,
                device: String::new(),
                // QVGA, the largest size worth converting in software
                width: 320,
                height: 240,
                fps: 25,
                format: PixelFormat::Rgb565,
                buffer_count: 1,
            },
            outputs: OutputConfig {
                white_pin: 1,
                yellow_pin: 3,
            },
        }
    }
}

impl Config {
    /// Load `bedcam.toml` (optional) and `BEDCAM__*` environment overrides
    /// on top of the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("bedcam")
    }

    pub fn load_from(basename: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(basename).required(false))
            .add_source(
                config::Environment::with_prefix("BEDCAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.buffer_count == 0 {
            return Err(ConfigError::Invalid("camera.buffer_count must be at least 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid("camera resolution must be non-zero"));
        }
        if self.broker.topic.is_empty() {
            return Err(ConfigError::Invalid("broker.topic must not be empty"));
        }
        Ok(())
    }
}
