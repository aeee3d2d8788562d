//! # Configuration Management
//!
//! Startup configuration, loaded once from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_DETECTOR__MAX_FREQ`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so that field names containing `_`
//! (`max_message_bytes`, `sample_rate`) survive the environment mapping.

use crate::pitch::{DetectorConfig, DetectorConfigError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub detector: DetectorSettings,
}

/// HTTP API server settings.
///
/// ## Fields:
/// - `host`: address both listeners bind to
/// - `port`: HTTP API port (catalogue, health, config)
/// - `allowed_origins`: CORS origins; an empty list allows any origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

/// Pitch stream listener settings.
///
/// The stream endpoint runs on its own port; only WebSocket upgrades on
/// `path` are accepted there.
///
/// ## Fields:
/// - `max_message_bytes`: optional cap on one message (and frame); unset
///   leaves tungstenite's own limits in place
/// - `shutdown_grace_ms`: how long open sessions get to finish after
///   shutdown before they are aborted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub port: u16,
    pub path: String,
    pub max_message_bytes: Option<usize>,
    pub shutdown_grace_ms: u64,
}

/// Raw detector settings as they appear in configuration sources.
///
/// Turned into a validated [`DetectorConfig`] by [`DetectorSettings::to_detector_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    pub sample_rate: u32,
    pub min_freq: f32,
    pub max_freq: f32,
}

impl DetectorSettings {
    pub fn to_detector_config(&self) -> Result<DetectorConfig, DetectorConfigError> {
        DetectorConfig::new(self.sample_rate, self.min_freq, self.max_freq)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                allowed_origins: vec!["http://localhost:5002".to_string()],
            },
            stream: StreamConfig {
                port: 8081,
                path: "/api/voicepitch/ws".to_string(),
                max_message_bytes: None,
                shutdown_grace_ms: 5000,
            },
            detector: DetectorSettings {
                sample_rate: 44100,
                min_freq: 80.0,
                max_freq: 400.0,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config file and environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_STREAM__PORT=9001`: Override stream listener port
    /// - `APP_SERVER__ALLOWED_ORIGINS=http://a.test,http://b.test`: CORS origins
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// An invalid detector triple is reported here, before anything binds,
    /// so a misconfigured process never starts serving.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.stream.port == 0 {
            return Err(anyhow::anyhow!("Stream port cannot be 0"));
        }

        if self.stream.port == self.server.port {
            return Err(anyhow::anyhow!(
                "Stream port must differ from server port ({})",
                self.server.port
            ));
        }

        if !self.stream.path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "Stream path must start with '/', got {:?}",
                self.stream.path
            ));
        }

        if let Some(limit) = self.stream.max_message_bytes {
            if limit < crate::pitch::frame::BYTES_PER_SAMPLE {
                return Err(anyhow::anyhow!(
                    "Stream max_message_bytes must hold at least one sample, got {}",
                    limit
                ));
            }
        }

        self.detector
            .to_detector_config()
            .map_err(|e| anyhow::anyhow!("Invalid detector configuration: {}", e))?;

        Ok(())
    }

    pub fn stream_bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.stream.port)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
