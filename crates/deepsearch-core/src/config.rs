use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::security::{SecretValue, require_env};
use crate::ResearchError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "DEEPSEARCH_CONFIG";

/// Upper bound on search results requested per query.
pub const MAX_RESULT_COUNT: usize = 10;

/// Top-level configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.llm.api_key_env)
    }

    pub fn search_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(&self.search.api_key_env)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ResearchError> {
        toml::from_str(raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPSEARCH_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let candidate = resolve_path(path);
        let raw = fs::read_to_string(&candidate)
            .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
        let config = Config::from_toml_str(&raw)?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ResearchError> {
        if config.research.max_steps == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "research.max_steps must be at least 1".into(),
            ));
        }

        if !(1..=MAX_RESULT_COUNT).contains(&config.search.result_count) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "search.result_count must be between 1 and {MAX_RESULT_COUNT}"
            )));
        }

        for (field, name) in [
            ("llm.api_key_env", &config.llm.api_key_env),
            ("search.api_key_env", &config.search.api_key_env),
        ] {
            if name.trim().is_empty() {
                return Err(ResearchError::InvalidConfiguration(format!(
                    "{field} must reference an environment variable"
                )));
            }
        }

        // Secrets must live in the environment, never inline in the file.
        require_env(&config.llm.api_key_env)?;
        require_env(&config.search.api_key_env)?;
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return PathBuf::from(from_env);
        }
    }

    Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_base_url")]
    pub base_url: String,
    pub model: String,
    /// Cheaper model used for per-page summaries; falls back to `model`.
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default)]
    pub api_key_env: String,
}

impl LlmConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "SearchConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "SearchConfig::default_result_count")]
    pub result_count: usize,
}

impl SearchConfig {
    fn default_endpoint() -> String {
        "https://google.serper.dev/search".to_string()
    }

    pub const DEFAULT_RESULT_COUNT: usize = 3;

    const fn default_result_count() -> usize {
        Self::DEFAULT_RESULT_COUNT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "FetchConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "FetchConfig::default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "FetchConfig::default_user_agent")]
    pub user_agent: String,
}

impl FetchConfig {
    const fn default_timeout_ms() -> u64 {
        15_000
    }

    const fn default_max_chars() -> usize {
        40_000
    }

    fn default_user_agent() -> String {
        format!("deepsearch/{}", env!("CARGO_PKG_VERSION"))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            max_chars: Self::default_max_chars(),
            user_agent: Self::default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_max_steps")]
    pub max_steps: u32,
}

impl ResearchConfig {
    pub const DEFAULT_MAX_STEPS: u32 = 5;

    const fn default_max_steps() -> u32 {
        Self::DEFAULT_MAX_STEPS
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_steps: Self::DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Directory for session logs; falls back to `DEEPSEARCH_LOG_DIR`, then `data/logs`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            dir: None,
        }
    }
}
