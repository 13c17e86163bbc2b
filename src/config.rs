// src/config.rs

//! Manages monitor configuration: loading from TOML, resolving defaults,
//! and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    timeouts: RawTimeouts,
    #[serde(default = "default_enable_sync_xlog_threshold")]
    enable_sync_xlog_threshold: u64,
    #[serde(default = "default_promote_xlog_threshold")]
    promote_xlog_threshold: u64,
    #[serde(default = "default_number_sync_standbys")]
    default_number_sync_standbys: u32,
}

#[derive(Deserialize, Default)]
struct RawTimeouts {
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    drain_timeout: std::time::Duration,
    #[serde(default = "default_unhealthy_timeout", with = "humantime_serde")]
    unhealthy_timeout: std::time::Duration,
    #[serde(default = "default_startup_grace", with = "humantime_serde")]
    startup_grace: std::time::Duration,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8008
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_drain_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}
fn default_unhealthy_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(20)
}
fn default_startup_grace() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}
fn default_enable_sync_xlog_threshold() -> u64 {
    16 * 1024 * 1024
}
fn default_promote_xlog_threshold() -> u64 {
    16 * 1024 * 1024
}
fn default_number_sync_standbys() -> u32 {
    1
}

/// The resolved durations the FSM and health evaluator use, in
/// milliseconds — matching `crate::core::clock::Timeouts`'s shape so a
/// loaded `Config` converts to it directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutsMs {
    pub drain_timeout_ms: u64,
    pub unhealthy_timeout_ms: u64,
    pub startup_grace_ms: u64,
}

/// The final, validated monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub timeouts: TimeoutsMs,
    pub enable_sync_xlog_threshold: u64,
    pub promote_xlog_threshold: u64,
    pub default_number_sync_standbys: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            timeouts: TimeoutsMs {
                drain_timeout_ms: default_drain_timeout().as_millis() as u64,
                unhealthy_timeout_ms: default_unhealthy_timeout().as_millis() as u64,
                startup_grace_ms: default_startup_grace().as_millis() as u64,
            },
            enable_sync_xlog_threshold: default_enable_sync_xlog_threshold(),
            promote_xlog_threshold: default_promote_xlog_threshold(),
            default_number_sync_standbys: default_number_sync_standbys(),
        }
    }
}

impl From<TimeoutsMs> for crate::core::clock::Timeouts {
    fn from(t: TimeoutsMs) -> Self {
        crate::core::clock::Timeouts {
            drain_timeout_ms: t.drain_timeout_ms,
            unhealthy_timeout_ms: t.unhealthy_timeout_ms,
            startup_grace_ms: t.startup_grace_ms,
        }
    }
}

impl Config {
    /// Reads and parses a TOML file into a validated `Config`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            timeouts: TimeoutsMs {
                drain_timeout_ms: raw.timeouts.drain_timeout.as_millis() as u64,
                unhealthy_timeout_ms: raw.timeouts.unhealthy_timeout.as_millis() as u64,
                startup_grace_ms: raw.timeouts.startup_grace.as_millis() as u64,
            },
            enable_sync_xlog_threshold: raw.enable_sync_xlog_threshold,
            promote_xlog_threshold: raw.promote_xlog_threshold,
            default_number_sync_standbys: raw.default_number_sync_standbys,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.timeouts.drain_timeout_ms == 0 {
            return Err(anyhow!("timeouts.drain_timeout cannot be 0"));
        }
        if self.timeouts.unhealthy_timeout_ms == 0 {
            return Err(anyhow!("timeouts.unhealthy_timeout cannot be 0"));
        }
        if self.enable_sync_xlog_threshold == 0 {
            return Err(anyhow!("enable_sync_xlog_threshold cannot be 0"));
        }
        if self.promote_xlog_threshold == 0 {
            return Err(anyhow!("promote_xlog_threshold cannot be 0"));
        }
        if self.default_number_sync_standbys == 0 {
            return Err(anyhow!("default_number_sync_standbys cannot be 0"));
        }
        Ok(())
    }
}
