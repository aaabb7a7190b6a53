use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::pipeline::PromptStage;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_OPENAI_MODEL: &str = "gpt-4";

/// Rate-limit policy values handed to an external limiter (reverse proxy or
/// gateway). Parsed and logged at startup so deployments can see the active
/// policy; not enforced in-process.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub storage_url: String,
    pub default_limit: String,
    pub strategy: String,
    pub generate_limit: String,
    pub improve_limit: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub replicate_api_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub host: String,
    pub port: u16,
    pub image_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub prompt_pipeline: Vec<PromptStage>,
    pub request_timeout: Duration,
    pub buffer_image_output: bool,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let replicate_api_token = required_env("REPLICATE_API_TOKEN")?;
        let openai_api_key = required_env("OPENAI_API_KEY")?;

        let port = match env_opt("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value: {value}"))?,
            None => DEFAULT_PORT,
        };

        let data_root = resolve_data_root();
        let image_dir = env_opt("IMAGE_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("images"));
        let metadata_dir = env_opt("METADATA_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("metadata"));

        // "none" disables every stage; unset falls back to the translate-only
        // flow the original deployment used
        let prompt_pipeline = match env_opt("PROMPT_PIPELINE") {
            Some(raw) if raw.eq_ignore_ascii_case("none") => Vec::new(),
            Some(raw) => match PromptStage::parse_list(&raw) {
                Ok(stages) => stages,
                Err(stage) => bail!("unknown PROMPT_PIPELINE stage: {stage}"),
            },
            None => vec![PromptStage::Translate],
        };

        let request_timeout = match env_opt("REQUEST_TIMEOUT_SECS") {
            Some(value) => {
                let secs = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid REQUEST_TIMEOUT_SECS value: {value}"))?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            replicate_api_token,
            openai_api_key,
            openai_model: env_opt("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            image_dir,
            metadata_dir,
            log_file: env_opt("LOG_FILE").map(PathBuf::from),
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            prompt_pipeline,
            request_timeout,
            buffer_image_output: env_opt("BUFFER_IMAGE_OUTPUT")
                .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            rate_limits: RateLimitConfig {
                storage_url: env_opt("RATELIMIT_STORAGE_URL")
                    .unwrap_or_else(|| "memory://".to_string()),
                default_limit: env_opt("RATELIMIT_DEFAULT")
                    .unwrap_or_else(|| "30/hour".to_string()),
                strategy: env_opt("RATELIMIT_STRATEGY")
                    .unwrap_or_else(|| "fixed-window".to_string()),
                generate_limit: env_opt("RATELIMIT_GENERATE")
                    .unwrap_or_else(|| "5/minute".to_string()),
                improve_limit: env_opt("RATELIMIT_IMPROVE")
                    .unwrap_or_else(|| "10/minute".to_string()),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required_env(name: &str) -> Result<String> {
    env_opt(name).with_context(|| format!("{name} environment variable is required"))
}

fn resolve_data_root() -> PathBuf {
    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("imageforge");
    base
}
