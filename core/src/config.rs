/// Configuration for a review session
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_BASE_URL: &str = "SEGMENT_REVIEW_BASE_URL";
const ENV_POLL_MS: &str = "SEGMENT_REVIEW_POLL_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiOptions {
    pub base_url: String,
    pub api_prefix: String,
    pub timeout_secs: u64,
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_prefix: default_api_prefix(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiOptions {
    /// Base URL joined with the API prefix, without a trailing slash.
    pub fn endpoint_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PagingOptions {
    pub page_size: usize,
    pub load_all_batch_size: usize,
}

impl Default for PagingOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            load_all_batch_size: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingOptions {
    pub interval_ms: u64,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self { interval_ms: 3_000 }
    }
}

impl PollingOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
    pub quick: bool,
    pub sample_rate: f32,
    pub model: Option<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            quick: false,
            sample_rate: 1.0,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEditOptions {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    #[serde(default)]
    pub api: ApiOptions,
    #[serde(default)]
    pub paging: PagingOptions,
    #[serde(default)]
    pub polling: PollingOptions,
    #[serde(default)]
    pub validation: ValidationOptions,
    #[serde(default)]
    pub post_edit: PostEditOptions,
}

impl ReviewConfig {
    /// `<config dir>/segment-review/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("segment-review").join("config.yaml"))
    }

    /// Load configuration from a YAML or JSON file, picked by extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads the file at [`ReviewConfig::default_path`] when present, otherwise
    /// the defaults. Environment overrides apply either way.
    pub fn load_or_default() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(path)?,
            _ => Self::default(),
        };
        config.with_env_overrides()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid YAML config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid JSON config")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize config")
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            if !base_url.trim().is_empty() {
                self.api.base_url = base_url.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var(ENV_POLL_MS) {
            self.polling.interval_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_POLL_MS} must be an integer, got {raw:?}"))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.baseUrl must not be empty");
        }
        if self.paging.page_size == 0 {
            bail!("paging.pageSize must be greater than zero");
        }
        if self.paging.load_all_batch_size == 0 {
            bail!("paging.loadAllBatchSize must be greater than zero");
        }
        if self.polling.interval_ms == 0 {
            bail!("polling.intervalMs must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.validation.sample_rate) {
            bail!("validation.sampleRate must be within 0..=1");
        }
        Ok(())
    }
}
