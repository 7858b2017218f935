//! Configuration for the phoenix crew.
//!
//! Values come from the environment, with a `.env` file loaded first:
//! - `PHOENIX_PROVIDER` - Optional. `gemini` (default), `openai` or `anthropic`.
//! - `GOOGLE_API_KEY` / `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` - Credential for the selected provider.
//! - `PHOENIX_MODEL` - Optional. Model id. Defaults to the provider's default (`gemini-1.5-flash`).
//! - `PHOENIX_BASE_URL` - Optional. Override the provider endpoint.
//! - `PHOENIX_STAGE_TIMEOUT_SECS` - Optional. Per-stage time budget. Defaults to `300`.
//! - `PHOENIX_SANDBOX` - Optional. `docker` (default) or `local`.
//! - `PHOENIX_SANDBOX_IMAGE` - Optional. Docker image for code runs. Defaults to `python:3.12-slim`.
//! - `PHOENIX_PYTHON` - Optional. Interpreter for local runs. Defaults to `python3`.
//! - `PHOENIX_TOOL_TIMEOUT_SECS` - Optional. Per code run. Defaults to `30`.
//! - `PHOENIX_HOST` / `PHOENIX_PORT` - Optional. Dashboard bind address. Defaults to `127.0.0.1:8501`.
//! - `PHOENIX_DATA_DIR` - Optional. Where the CLI keeps run records. Defaults to `.phoenix`.
//!
//! A missing credential does not fail loading: the dashboard still starts and
//! reports it. It fails in [`PhoenixConfig::provider_config`], before any
//! provider or pipeline is built.

use crate::sandbox::{SandboxConfig, SandboxMode};
use phoenix_error::{Error, Result};
use phoenix_llm::{ProviderConfig, ProviderType};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;

/// Crew configuration.
#[derive(Debug, Clone)]
pub struct PhoenixConfig {
    /// Which hosted model API to call
    pub provider: ProviderType,

    /// Credential for `provider`, as found in the environment
    pub api_key: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Endpoint override
    pub base_url: Option<String>,

    /// Time budget for each pipeline stage
    pub stage_timeout: Duration,

    /// Code interpreter settings
    pub sandbox: SandboxConfig,

    /// Dashboard host
    pub host: String,

    /// Dashboard port
    pub port: u16,

    /// Directory for CLI run records
    pub data_dir: PathBuf,
}

impl Default for PhoenixConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Gemini,
            api_key: None,
            model: None,
            base_url: None,
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            sandbox: SandboxConfig::default(),
            host: "127.0.0.1".to_string(),
            port: 8501,
            data_dir: PathBuf::from(".phoenix"),
        }
    }
}

impl PhoenixConfig {
    /// Load `.env` (if present) and read configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get("PHOENIX_PROVIDER") {
            Some(raw) => ProviderType::from_str(&raw)
                .map_err(|e| Error::config_invalid("PHOENIX_PROVIDER", e))?,
            None => defaults.provider,
        };

        let stage_timeout = match get("PHOENIX_STAGE_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("PHOENIX_STAGE_TIMEOUT_SECS", &raw)?),
            None => defaults.stage_timeout,
        };

        let mut sandbox = defaults.sandbox;
        if let Some(raw) = get("PHOENIX_SANDBOX") {
            sandbox.mode = SandboxMode::from_str(&raw)
                .map_err(|e| Error::config_invalid("PHOENIX_SANDBOX", e))?;
        }
        if let Some(image) = get("PHOENIX_SANDBOX_IMAGE") {
            sandbox.image = image;
        }
        if let Some(python) = get("PHOENIX_PYTHON") {
            sandbox.python = python;
        }
        if let Some(raw) = get("PHOENIX_TOOL_TIMEOUT_SECS") {
            sandbox.timeout = Duration::from_secs(parse_number("PHOENIX_TOOL_TIMEOUT_SECS", &raw)?);
        }

        let port = match get("PHOENIX_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::config_invalid("PHOENIX_PORT", format!("invalid port '{}': {}", raw, e)))?,
            None => defaults.port,
        };

        Ok(Self {
            provider,
            api_key: get(provider.api_key_var()),
            model: get("PHOENIX_MODEL"),
            base_url: get("PHOENIX_BASE_URL"),
            stage_timeout,
            sandbox,
            host: get("PHOENIX_HOST").unwrap_or(defaults.host),
            port,
            data_dir: get("PHOENIX_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        })
    }

    /// Whether a real (non-placeholder) credential is present
    pub fn api_key_configured(&self) -> bool {
        self.usable_api_key().is_some()
    }

    fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty() && *key != self.provider.placeholder_key())
    }

    /// Provider settings for the selected backend.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when the credential is missing or still the
    /// `.env` template placeholder.
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let var = self.provider.api_key_var();
        let key = self.usable_api_key().ok_or_else(|| {
            Error::config_invalid(
                var,
                format!("Please set a valid {} environment variable in your .env file", var),
            )
            .with_operation("config::provider_config")
        })?;

        let mut config = ProviderConfig::for_type(self.provider, key);
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        Ok(config)
    }

    /// Model the agents will use, for display
    pub fn model_name(&self) -> String {
        match &self.model {
            Some(model) => model.clone(),
            None => ProviderConfig::for_type(self.provider, "")
                .default_model
                .unwrap_or_default(),
        }
    }

    /// Address the dashboard binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|e| Error::config_invalid(key.to_string(), format!("invalid value '{}': {}", raw, e)))
}
