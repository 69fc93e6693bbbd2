/// Configuration management
use crate::error::{FeedError, Result};
use crate::feed::TopicKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "http://localhost:5454";
const DEFAULT_PAGE_SIZE: u32 = 10;
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Feed client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the notice REST API
    pub api_base: String,

    /// Base URL of the live event stream (defaults to `api_base`)
    pub stream_url: Option<String>,

    /// Batch part of the group topic, e.g. "22"
    pub batch: String,

    /// Department part of the group topic, e.g. "04"
    pub department: String,

    /// Bearer token passed through to the API
    pub auth_token: Option<String>,

    /// Items requested per page
    pub page_size: u32,

    /// Period of the fallback refresh while the stream is down
    pub poll_interval: Duration,

    /// Timeout for a single HTTP request
    pub request_timeout: Duration,

    /// How long the presenter keeps a live item highlighted
    pub highlight_duration: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            stream_url: None,
            batch: String::new(),
            department: String::new(),
            auth_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            highlight_duration: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            return Err(FeedError::Config(format!(
                "Usage: {} <batch> <department> [--api <url>] [--stream <url>] [--page-size <n>] [--poll-secs <n>] [--token <token>]",
                args.first().map(String::as_str).unwrap_or("noticefeed")
            )));
        }

        let batch = args[1].clone();
        let department = args[2].clone();

        let mut config = Self {
            batch,
            department,
            ..Default::default()
        };

        let mut i = 3;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = args
                .get(i + 1)
                .ok_or_else(|| FeedError::Config(format!("{} requires an argument", flag)))?;
            match flag {
                "--api" => config.api_base = value.clone(),
                "--stream" => config.stream_url = Some(value.clone()),
                "--token" => config.auth_token = Some(value.clone()),
                "--page-size" => config.page_size = parse_page_size(value)?,
                "--poll-secs" => {
                    let secs = value.parse::<u64>().map_err(|_| {
                        FeedError::Config("--poll-secs must be a whole number".to_string())
                    })?;
                    config.poll_interval = Duration::from_secs(secs);
                }
                other => {
                    return Err(FeedError::Config(format!("Unknown flag: {}", other)));
                }
            }
            i += 2;
        }

        // Env overrides (nice for scripts)
        if let Ok(api) = std::env::var("NOTICEFEED_API") {
            config.api_base = api;
        }
        if let Ok(token) = std::env::var("NOTICEFEED_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Ok(size) = std::env::var("NOTICEFEED_PAGE_SIZE") {
            config.page_size = parse_page_size(&size)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check field ranges and clamp the poll interval
    pub fn validate(&mut self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FeedError::Config("page size must be positive".to_string()));
        }
        if self.batch.is_empty() || self.department.is_empty() {
            return Err(FeedError::Config(
                "batch and department must not be empty".to_string(),
            ));
        }
        if !self.api_base.starts_with("http://") {
            return Err(FeedError::Config(format!(
                "api base must be an http:// URL, got {}",
                self.api_base
            )));
        }
        self.api_base = self.api_base.trim_end_matches('/').to_string();
        if self.poll_interval < MIN_POLL_INTERVAL {
            self.poll_interval = MIN_POLL_INTERVAL;
        }
        Ok(())
    }

    /// Topic of the group feed this config points at
    pub fn topic(&self) -> TopicKey {
        TopicKey::group(&self.batch, &self.department)
    }

    /// Base URL used by the live stream
    pub fn stream_base(&self) -> &str {
        self.stream_url
            .as_deref()
            .unwrap_or(&self.api_base)
            .trim_end_matches('/')
    }
}

fn parse_page_size(value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FeedError::Config(
            "page size must be a positive number".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args_minimal() {
        let config = Config::from_args(&args(&["noticefeed", "22", "04"])).unwrap();
        assert_eq!(config.batch, "22");
        assert_eq!(config.department, "04");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.topic().as_str(), "notices/22/04");
    }

    #[test]
    fn test_from_args_flags() {
        let config = Config::from_args(&args(&[
            "noticefeed",
            "22",
            "04",
            "--api",
            "http://127.0.0.1:9000/",
            "--page-size",
            "25",
            "--poll-secs",
            "0",
        ]))
        .unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:9000");
        assert_eq!(config.page_size, 25);
        // Clamped to the floor
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.stream_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_from_args_rejects_bad_input() {
        assert!(Config::from_args(&args(&["noticefeed", "22"])).is_err());
        assert!(Config::from_args(&args(&["noticefeed", "22", "04", "--page-size", "0"])).is_err());
        assert!(Config::from_args(&args(&["noticefeed", "22", "04", "--api"])).is_err());
        assert!(Config::from_args(&args(&["noticefeed", "22", "04", "--bogus", "x"])).is_err());
        assert!(Config::from_args(&args(&["noticefeed", "22", "04", "--api", "ftp://x"])).is_err());
    }
}
