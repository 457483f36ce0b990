//! Worker configuration from environment variables.
//!
//! Loaded once at process start and passed by reference to every component
//! constructor. Missing required values fail fast, before the worker enters
//! its loop.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use processor_client::{ClientError, ProcessorClient, RetryPolicy, DEFAULT_API_TIMEOUT};
use thiserror::Error;

/// Configuration-loading errors. These are unrecoverable by design.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Shared configuration for pipeline workers and scrapers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Backend API base URL (`BACKEND_URL`), trailing slash trimmed.
    pub backend_url: String,
    /// Bearer token for the processor API (`PROCESSOR_TOKEN`, required).
    pub processor_token: String,
    /// Poll interval, also the SSE read timeout (`POLL_INTERVAL`, seconds).
    pub poll_interval: Duration,
    /// Total HTTP attempts before giving up (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Fixed delay before every outbound request (`REQUEST_DELAY`, seconds,
    /// fractional allowed). Zero disables it.
    pub request_delay: Option<Duration>,
    /// User agent for all requests (`USER_AGENT`).
    pub user_agent: String,
    /// Progress checkpoint file (`PROGRESS_PATH`). Unset disables
    /// checkpointing entirely.
    pub progress_path: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load from the process environment, reading a `.env` file first if one
    /// is present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend_url = normalize_base_url(
            &env_or("BACKEND_URL", "http://localhost:8080"),
        );
        let processor_token = std::env::var("PROCESSOR_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("PROCESSOR_TOKEN"))?;
        let poll_interval = Duration::from_secs(env_parsed("POLL_INTERVAL", 10u64)?);
        let max_retries = env_parsed("MAX_RETRIES", 4u32)?;
        let request_delay = delay_from_secs(env_parsed("REQUEST_DELAY", 0.0f64)?);
        let user_agent = env_or("USER_AGENT", "archiver-worker/0.1");
        let progress_path = std::env::var("PROGRESS_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            backend_url,
            processor_token,
            poll_interval,
            max_retries,
            request_delay,
            user_agent,
            progress_path,
        })
    }

    /// Build the processor client this configuration describes.
    pub fn client(&self) -> Result<ProcessorClient, ClientError> {
        ProcessorClient::with_options(
            &self.backend_url,
            &self.processor_token,
            &self.user_agent,
            DEFAULT_API_TIMEOUT,
            RetryPolicy::with_max_attempts(self.max_retries),
            self.request_delay,
        )
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: FromStr + Copy>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if !raw.is_empty() => parse_value(var, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn delay_from_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(
            normalize_base_url("http://localhost:8080/"),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_base_url("http://backend:8080"),
            "http://backend:8080"
        );
    }

    #[test]
    fn parse_value_accepts_valid_input() {
        assert_eq!(parse_value::<u64>("POLL_INTERVAL", "30").ok(), Some(30));
        assert_eq!(parse_value::<f64>("REQUEST_DELAY", "0.5").ok(), Some(0.5));
    }

    #[test]
    fn parse_value_rejects_garbage() {
        let err = parse_value::<u64>("POLL_INTERVAL", "soon");
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                var: "POLL_INTERVAL",
                ..
            })
        ));
    }

    #[test]
    fn zero_delay_means_disabled() {
        assert_eq!(delay_from_secs(0.0), None);
        assert_eq!(delay_from_secs(0.5), Some(Duration::from_millis(500)));
    }
}
