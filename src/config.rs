//! Application configuration.
//!
//! Configuration is read from an optional YAML file (default `config.yaml`, overridable with `-f`
//! or `CAPTIONER_CONFIG`) and then from `CAPTIONER_`-prefixed environment variables. Nested
//! values use double underscores, e.g. `CAPTIONER_MODEL__BACKEND=gemini`.
//!
//! When no API key is configured, the model backend falls back to its conventional environment
//! variable: `HF_TOKEN` for Hugging Face and `GEMINI_API_KEY` for Gemini.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! max_upload_size: 20971520
//! model:
//!   backend: gemini
//!   timeout: 30s
//! ```

use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// CLI args - just the config file location
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CAPTIONER_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interface to bind to
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in bytes
    pub max_upload_size: usize,
    /// Attach a permissive CORS layer
    pub enable_cors: bool,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_size: 10 * 1024 * 1024,
            enable_cors: false,
            model: ModelConfig::default(),
        }
    }
}

/// Which hosted inference API produces captions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    HuggingFace,
    Gemini,
}

impl Backend {
    fn default_model(self) -> &'static str {
        match self {
            Backend::HuggingFace => "Salesforce/blip-image-captioning-large",
            Backend::Gemini => "gemini-2.5-flash",
        }
    }

    fn default_endpoint(self) -> &'static str {
        match self {
            Backend::HuggingFace => "https://router.huggingface.co/hf-inference",
            Backend::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    fn api_key_env(self) -> &'static str {
        match self {
            Backend::HuggingFace => "HF_TOKEN",
            Backend::Gemini => "GEMINI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub backend: Backend,
    /// Model identifier; defaults per backend
    pub name: Option<String>,
    /// Base URL of the inference API; defaults per backend
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Upper bound on a single caption request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Instruction sent alongside the image (gemini)
    pub prompt: String,
    /// Sampling temperature (gemini). Zero keeps captions stable across uploads.
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            name: None,
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(60),
            prompt: "Write a short, one-sentence caption describing this image.".to_string(),
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn model_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.backend.default_model())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(self.backend.default_endpoint())
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if config.model.api_key.is_none() {
            config.model.api_key = std::env::var(config.model.backend.api_key_env())
                .ok()
                .filter(|key| !key.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // CAPTIONER_CONFIG names the file itself and is consumed by clap
            .merge(Env::prefixed("CAPTIONER_").ignore(&["config"]).split("__"))
    }

    pub fn validate(&self) -> Result<(), figment::Error> {
        if self.port == 0 {
            return Err("Config validation: port must be non-zero".to_string().into());
        }
        if self.max_upload_size == 0 {
            return Err("Config validation: max_upload_size must be greater than zero".to_string().into());
        }
        if self.model.timeout.is_zero() {
            return Err("Config validation: model.timeout must be greater than zero".to_string().into());
        }
        if let Err(e) = Url::parse(self.model.endpoint()) {
            return Err(format!("Config validation: model.endpoint '{}' is not a valid URL: {e}", self.model.endpoint()).into());
        }
        if self.model.backend == Backend::Gemini && self.model.api_key.is_none() {
            return Err("Config validation: the gemini backend requires model.api_key or GEMINI_API_KEY"
                .to_string()
                .into());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
