use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::sources::Category;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    /// Per-feed network timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    /// How often expired cache entries are swept, in seconds
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub sources: Vec<SourceConfig>,
}

/// Upper bound for any configured duration: one year.
pub const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

fn default_cache_ttl() -> u64 {
    900
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_cache_sweep_interval() -> u64 {
    120
}

fn default_user_agent() -> String {
    "SecNews/1.0 (Feed Aggregator)".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_image: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.clamp_durations();
        Ok(config)
    }

    fn clamp_durations(&mut self) {
        for (name, value) in [
            ("cache_ttl", &mut self.cache_ttl),
            ("fetch_timeout", &mut self.fetch_timeout),
            ("cache_sweep_interval", &mut self.cache_sweep_interval),
        ] {
            if *value > MAX_SECONDS {
                warn!("{} of {}s is too large, capping at {}s", name, value, MAX_SECONDS);
                *value = MAX_SECONDS;
            }
        }
    }

    /// Apply `CACHE_TTL` and `FETCH_TIMEOUT` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("CACHE_TTL").ok().as_deref(),
            std::env::var("FETCH_TIMEOUT").ok().as_deref(),
        );
    }

    /// Override TTL and timeout from raw setting values. Zero, non-numeric
    /// and out-of-range values are ignored.
    pub fn apply_overrides(&mut self, cache_ttl: Option<&str>, fetch_timeout: Option<&str>) {
        if let Some(raw) = cache_ttl {
            match parse_seconds(raw) {
                Some(secs) => self.cache_ttl = secs,
                None => warn!("Ignoring invalid CACHE_TTL '{}', using {}s", raw, self.cache_ttl),
            }
        }
        if let Some(raw) = fetch_timeout {
            match parse_seconds(raw) {
                Some(secs) => self.fetch_timeout = secs,
                None => warn!(
                    "Ignoring invalid FETCH_TIMEOUT '{}', using {}s",
                    raw, self.fetch_timeout
                ),
            }
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// Sweep at least as often as the shortest TTL so nothing lingers past expiry.
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval.min(self.cache_ttl).max(1))
    }
}

fn parse_seconds(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| (1..=MAX_SECONDS).contains(secs))
}
