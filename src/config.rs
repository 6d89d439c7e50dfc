//! Engine configuration.
//!
//! Settings are layered, later layers winning:
//! defaults → `.draftgate/draftgate.toml` → environment (`.env` included) → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! safety_threshold = 80
//! quality_threshold = 70
//! max_iterations = 5
//! step_timeout_seconds = 60
//! auto_approve = false
//! max_step_retries = 2
//! retry_backoff_ms = 200
//! max_human_rejections = 0
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SAFETY_THRESHOLD: u8 = 80;
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 70;
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_MAX_STEP_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Recognized environment variables, in the order they are applied.
pub const ENV_KEYS: [&str; 8] = [
    "SAFETY_THRESHOLD",
    "QUALITY_THRESHOLD",
    "MAX_ITERATIONS",
    "STEP_TIMEOUT_SECONDS",
    "AUTO_APPROVE",
    "MAX_STEP_RETRIES",
    "RETRY_BACKOFF_MS",
    "MAX_HUMAN_REJECTIONS",
];

/// Effective engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub safety_threshold: u8,
    pub quality_threshold: u8,
    pub max_iterations: u32,
    pub step_timeout_seconds: u64,
    /// When true the human gate approves automatically instead of suspending.
    pub auto_approve: bool,
    /// Retries for transient step failures (malformed output is retried once).
    pub max_step_retries: u32,
    /// Base delay for exponential backoff between retries
    pub retry_backoff_ms: u64,
    /// Human rejections allowed before a reject ends the run (0 = unlimited)
    pub max_human_rejections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_threshold: DEFAULT_SAFETY_THRESHOLD,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            step_timeout_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            auto_approve: false,
            max_step_retries: DEFAULT_MAX_STEP_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_human_rejections: 0,
        }
    }
}

/// `[engine]` table of the TOML file; every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct EngineSection {
    safety_threshold: Option<u8>,
    quality_threshold: Option<u8>,
    max_iterations: Option<u32>,
    step_timeout_seconds: Option<u64>,
    auto_approve: Option<bool>,
    max_step_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_human_rejections: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineSection,
}

impl EngineConfig {
    /// Load defaults, the optional config file, then the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_file
            && path.exists()
        {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            config.merge_toml(&content)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge an `[engine]` table on top of the current values.
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse config file")?;
        let e = file.engine;
        if let Some(v) = e.safety_threshold {
            self.safety_threshold = v;
        }
        if let Some(v) = e.quality_threshold {
            self.quality_threshold = v;
        }
        if let Some(v) = e.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = e.step_timeout_seconds {
            self.step_timeout_seconds = v;
        }
        if let Some(v) = e.auto_approve {
            self.auto_approve = v;
        }
        if let Some(v) = e.max_step_retries {
            self.max_step_retries = v;
        }
        if let Some(v) = e.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = e.max_human_rejections {
            self.max_human_rejections = v;
        }
        Ok(())
    }

    /// Apply overrides from an environment-style lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ENV_KEYS {
            let Some(raw) = lookup(key) else { continue };
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "SAFETY_THRESHOLD" => self.safety_threshold = parse_num(key, value)?,
                "QUALITY_THRESHOLD" => self.quality_threshold = parse_num(key, value)?,
                "MAX_ITERATIONS" => self.max_iterations = parse_num(key, value)?,
                "STEP_TIMEOUT_SECONDS" => self.step_timeout_seconds = parse_num(key, value)?,
                "AUTO_APPROVE" => self.auto_approve = parse_bool(key, value)?,
                "MAX_STEP_RETRIES" => self.max_step_retries = parse_num(key, value)?,
                "RETRY_BACKOFF_MS" => self.retry_backoff_ms = parse_num(key, value)?,
                "MAX_HUMAN_REJECTIONS" => self.max_human_rejections = parse_num(key, value)?,
                _ => unreachable!("ENV_KEYS and the match arms are kept in sync"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.safety_threshold > 100 {
            bail!("SAFETY_THRESHOLD must be 0-100, got {}", self.safety_threshold);
        }
        if self.quality_threshold > 100 {
            bail!("QUALITY_THRESHOLD must be 0-100, got {}", self.quality_threshold);
        }
        if self.max_iterations == 0 {
            bail!("MAX_ITERATIONS must be at least 1");
        }
        if self.step_timeout_seconds == 0 {
            bail!("STEP_TIMEOUT_SECONDS must be at least 1");
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("Invalid value '{}' for {}", value, key))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("Invalid boolean '{}' for {}", value, key),
    }
}
