//! Configuration file for the `sipua` binary
//!
//! The file holds a [`UaConfig`] at the top level plus a `[run]` table with the
//! call target and timings. TOML is the default format; files ending in `.json`
//! are read as JSON.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sipua_core::UaConfig;

/// What the binary does once the account is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// URI to call; no outgoing call is placed without one
    pub target: Option<String>,
    /// How long the call is kept up before hanging up
    pub call_duration_secs: u64,
    /// Pause after hang-up so disconnects can be processed
    pub hangup_grace_secs: u64,
    pub registration_timeout_secs: u64,
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: None,
            call_duration_secs: 80,
            hangup_grace_secs: 4,
            registration_timeout_secs: 10,
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    pub fn call_duration(&self) -> Duration {
        Duration::from_secs(self.call_duration_secs)
    }

    pub fn hangup_grace(&self) -> Duration {
        Duration::from_secs(self.hangup_grace_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub ua: UaConfig,
    pub run: RunConfig,
}

impl FileConfig {
    /// Read a configuration file, choosing the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
        } else {
            Self::from_toml(&text).with_context(|| format!("Invalid TOML in {}", path.display()))
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check everything the user agent will be started with
    pub fn validate(&self) -> Result<()> {
        self.ua.validate()?;
        if let Some(target) = &self.run.target {
            sipua_core::config::parse_sip_uri(target).context("Invalid run.target")?;
        }
        Ok(())
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub target: Option<String>,
    pub call_duration_secs: Option<u64>,
    pub hangup_grace_secs: Option<u64>,
}

impl Overrides {
    pub fn apply(self, config: &mut FileConfig) {
        if let Some(port) = self.port {
            config.ua.transport.port = port;
        }
        if let Some(level) = self.log_level {
            config.run.log_level = level;
        }
        if let Some(target) = self.target {
            config.run.target = Some(target);
        }
        if let Some(secs) = self.call_duration_secs {
            config.run.call_duration_secs = secs;
        }
        if let Some(secs) = self.hangup_grace_secs {
            config.run.hangup_grace_secs = secs;
        }
    }
}
