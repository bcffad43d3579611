use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::listing::{Source, SourceQuery};
use crate::notify::telegram::DEFAULT_API_BASE;

pub const ENV_CONFIG_PATH: &str = "FLAT_WATCH_CONFIG";

const KUFAR_DEFAULT_URL: &str =
    "https://re.kufar.by/l/minsk/snyat/kvartiru?cur=USD&prc=r%3A0%2C350";
const DOMOVITA_DEFAULT_URL: &str = "https://domovita.by/minsk/flats/rent?rooms=1%2C2&price%5Bmin%5D=&price%5Bmax%5D=350&price_type=all_usd";
const REALT_DEFAULT_URL: &str = "https://realt.by/rent/flat-for-long/?addressV2=%5B%7B%22townUuid%22%3A%224cb07174-7b00-11eb-8943-0cc47adabd66%22%7D%5D&page=1&priceTo=350&priceType=840&rooms=1&rooms=2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Defaults to `state.json` in [`AppConfig::config_dir`].
    pub state_path: Option<PathBuf>,
    pub telegram_token: Option<String>,
    pub telegram_api_base: String,
    pub sources: Vec<SourceQuery>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            request_timeout_secs: 30,
            state_path: None,
            telegram_token: None,
            telegram_api_base: DEFAULT_API_BASE.to_string(),
            sources: vec![
                SourceQuery {
                    source: Source::Kufar,
                    url: KUFAR_DEFAULT_URL.to_string(),
                },
                SourceQuery {
                    source: Source::Domovita,
                    url: DOMOVITA_DEFAULT_URL.to_string(),
                },
                SourceQuery {
                    source: Source::Realt,
                    url: REALT_DEFAULT_URL.to_string(),
                },
            ],
        }
    }
}

impl AppConfig {
    /// `~/.config/flat-watch` on Linux, the working directory if there is no config dir.
    pub fn config_dir() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("flat-watch")
    }

    pub fn config_file_path() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.json"))
    }

    /// Reads the config file (writing one with defaults if missing), then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            info!(path = %path.display(), "no config file, writing defaults");
            let defaults = Self::default();
            if let Err(err) = defaults.save(&path) {
                warn!(error = %err, path = %path.display(), "failed to write default config");
            }
            defaults
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Blank values are treated as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram_token = Some(token);
        }
        if let Some(path) = get("STATE_PATH") {
            self.state_path = Some(PathBuf::from(path));
        }
        if let Some(value) = get("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "POLL_INTERVAL_SECS",
                    value,
                })?;
        }
        for (key, source) in [
            ("KUFAR_URL", Source::Kufar),
            ("DOMOVITA_URL", Source::Domovita),
            ("REALT_URL", Source::Realt),
        ] {
            if let Some(url) = get(key) {
                self.set_source_url(source, url);
            }
        }
        Ok(())
    }

    fn set_source_url(&mut self, source: Source, url: String) {
        match self.sources.iter_mut().find(|q| q.source == source) {
            Some(query) => query.url = url,
            None => self.sources.push(SourceQuery { source, url }),
        }
    }

    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.telegram_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("state.json"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
