// src/config.rs
use crate::errors::PageGenError;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub image_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub image_model: String,
    pub image_size: String,
    pub run_timeout_secs: u64,
    pub run_ttl_secs: u64,
    pub max_upload_dimension: u32,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            image_provider: "openai".to_string(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            image_model: "gpt-image-1".to_string(),
            image_size: "1024x1024".to_string(),
            run_timeout_secs: 900,
            run_ttl_secs: 86400,
            max_upload_dimension: 2048,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, PageGenError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PageGenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            redis_url: get("REDIS_URL"),
            image_provider: get("IMAGE_PROVIDER")
                .map(|p| p.trim().to_lowercase())
                .unwrap_or(defaults.image_provider),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            image_model: get("IMAGE_MODEL").unwrap_or(defaults.image_model),
            image_size: get("IMAGE_SIZE").unwrap_or(defaults.image_size),
            run_timeout_secs: parse_or(get("RUN_TIMEOUT_SECS"), "RUN_TIMEOUT_SECS", defaults.run_timeout_secs)?,
            run_ttl_secs: parse_or(get("RUN_TTL_SECS"), "RUN_TTL_SECS", defaults.run_ttl_secs)?,
            max_upload_dimension: parse_or(
                get("MAX_UPLOAD_DIMENSION"),
                "MAX_UPLOAD_DIMENSION",
                defaults.max_upload_dimension,
            )?,
            max_body_bytes: parse_or(get("MAX_BODY_BYTES"), "MAX_BODY_BYTES", defaults.max_body_bytes)?,
        })
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, PageGenError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| PageGenError::Config(format!("{} must be a number, got {:?}", key, value))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.run_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6379"),
            ("IMAGE_PROVIDER", " OpenAI "),
            ("RUN_TIMEOUT_SECS", "60"),
            ("MAX_UPLOAD_DIMENSION", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.image_provider, "openai");
        assert_eq!(config.run_timeout_secs, 60);
        assert_eq!(config.max_upload_dimension, 1024);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = Config::from_lookup(lookup(&[("REDIS_URL", "  ")])).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("RUN_TTL_SECS", "a day")])).unwrap_err();
        assert!(matches!(err, PageGenError::Config(msg) if msg.contains("RUN_TTL_SECS")));
    }
}
