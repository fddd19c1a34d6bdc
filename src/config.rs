use std::path::{Path, PathBuf};

use mjpeg_bus::StreamConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "RTSP_MJPEG_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: String,
    pub stream: StreamConfig,
    pub ptz: PtzConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            stream: StreamConfig::default(),
            ptz: PtzConfig::default(),
        }
    }
}

/// Pan-tilt-zoom relay. `url` may contain `{direction}`, replaced per request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtzConfig {
    pub enabled: bool,
    pub url: String,
}

impl PtzConfig {
    pub fn url_for(&self, direction: &str) -> String {
        self.url.replace("{direction}", direction)
    }
}

impl AppConfig {
    /// Config file from the first CLI argument, else from `RTSP_MJPEG_CONFIG`,
    /// else built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match path {
            Some(path) => Self::from_file(&path),
            None => {
                log::info!("config: no config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {}", path.display(), e))?;
        config.stream.validate()?;
        log::info!("config: loaded {}", path.display());
        Ok(config)
    }
}
