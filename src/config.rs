use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const SETTINGS_FILE: &str = "enricher";
const ENV_PREFIX: &str = "ENRICHER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{0} is not set")]
    MissingVar(&'static str),

    #[error("seed file not found: {0}")]
    MissingSeedFile(PathBuf),
}

/// Runtime settings, layered as: defaults < `enricher.toml` < `ENRICHER_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub model: String,
    pub openai_base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    pub max_text_chars: usize,
    pub extraction_retries: u32,
    pub retry_base_delay_ms: u64,
    pub inter_record_delay_ms: u64,
    pub probe_concurrency: usize,
    pub probe_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/catalog.sqlite"),
            model: "gpt-4o-mini".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 25,
            extraction_timeout_secs: 120,
            max_text_chars: 48_000,
            extraction_retries: 2,
            retry_base_delay_ms: 1000,
            inter_record_delay_ms: 500,
            probe_concurrency: 20,
            probe_timeout_secs: 8,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(SETTINGS_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn inter_record_delay(&self) -> Duration {
        Duration::from_millis(self.inter_record_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// The extraction API key is only required by commands that call the model.
pub fn openai_api_key() -> Result<String, ConfigError> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(ConfigError::MissingVar("OPENAI_API_KEY"))
}
