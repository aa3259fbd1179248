//! Suite configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RunnerError, RunnerResult};

/// Encoding for parameters of methods that carry a body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// `application/json` object of the rendered parameters
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`
    Form,
}

/// Configuration for one test suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Suite name; prefixes the tests, baseline and last-run files
    pub name: String,

    /// Directory holding suite files and response side artifacts
    pub data_dir: PathBuf,

    /// Prefixed to test URLs that carry no scheme
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Headers sent with every request; per-test headers win
    pub common_headers: BTreeMap<String, String>,

    /// Response headers that may come and go between runs
    pub optional_headers: Vec<String>,

    /// Body encoding for non-query methods
    pub body_format: BodyFormat,

    /// Per-request timeout
    pub timeout_ms: u64,

    /// Retries honoured for responses carrying `Retry-After`
    pub max_retries: u32,

    /// Baseline entries calibrate is allowed to overwrite
    pub rebaseline: Vec<String>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            data_dir: PathBuf::from("."),
            base_url: None,
            common_headers: BTreeMap::new(),
            optional_headers: Vec::new(),
            body_format: BodyFormat::Json,
            timeout_ms: 30_000,
            max_retries: 5,
            rebaseline: Vec::new(),
        }
    }
}

impl SuiteConfig {
    /// Configuration for `name` stored under `data_dir`
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> RunnerResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings that cannot name suite files or build request URLs
    pub fn validate(&self) -> RunnerResult<()> {
        if self.name.trim().is_empty() {
            return Err(RunnerError::Config("suite name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(RunnerError::Config(format!(
                "suite name `{}` must not contain path separators",
                self.name
            )));
        }
        if let Some(base_url) = &self.base_url {
            reqwest::Url::parse(base_url).map_err(|e| {
                RunnerError::Config(format!("invalid base_url `{base_url}`: {e}"))
            })?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> RunnerResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_optional_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Optional headers as diff paths (`headers.<lowercase name>`)
    pub fn optional_paths(&self) -> Vec<String> {
        self.optional_headers
            .iter()
            .map(|h| format!("headers.{}", h.to_ascii_lowercase()))
            .collect()
    }
}
