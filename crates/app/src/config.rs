//! Application configuration loaded from `REPORTDESK_*` environment variables.
//!
//! # Environment Variables
//!
//! - `REPORTDESK_ENGINE_NAME`: task engine name in logs (default `task-engine`)
//! - `REPORTDESK_BACKOFF_UNIT_MS`: retry backoff unit in milliseconds (default 1000)
//! - `REPORTDESK_SETTLE_TIMEOUT_SECS`: how long the demo waits for the queue (default 60)
//! - `REPORTDESK_FAIL_NOTIFY`, `REPORTDESK_FAIL_CACHE`, `REPORTDESK_FAIL_PREVIEW`:
//!   injected handler faults, either a failure count, `always`, or `panic`
//! - `REPORTDESK_LOG_LEVEL`: default filter when `RUST_LOG` is unset (default `info`)
//! - `REPORTDESK_LOG_FORMAT`: `json` (default) or `pretty`
//!
//! Missing variables use defaults; present but malformed ones are errors.

use std::env::VarError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use reportdesk_infra::tasks::{EngineConfig, FaultInjector, FaultMode, TaskKind};
use reportdesk_observability::{LogConfig, LogFormat, UnknownLogFormat};

const DEFAULT_BACKOFF_UNIT_MS: u64 = 1_000;
const DEFAULT_SETTLE_TIMEOUT_SECS: u64 = 60;

const FAULT_VARS: [(&str, TaskKind); 3] = [
    ("REPORTDESK_FAIL_NOTIFY", TaskKind::Notify),
    ("REPORTDESK_FAIL_CACHE", TaskKind::InvalidateCache),
    ("REPORTDESK_FAIL_PREVIEW", TaskKind::GeneratePreview),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message} (got '{value}')")]
    InvalidNumber {
        name: String,
        message: String,
        value: String,
    },

    #[error("{name} must be greater than zero")]
    Zero { name: String },

    #[error("invalid fault mode for {name}: expected a count, 'always' or 'panic' (got '{value}')")]
    InvalidFaultMode { name: String, value: String },

    #[error("{name} is not valid unicode")]
    NotUnicode { name: String },

    #[error("invalid REPORTDESK_LOG_FORMAT: {0}")]
    LogFormat(#[from] UnknownLogFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub engine_name: String,
    pub backoff_unit: Duration,
    pub settle_timeout: Duration,
    pub faults: Vec<(TaskKind, FaultMode)>,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            engine_name: engine.name,
            backoff_unit: engine.backoff_unit,
            settle_timeout: Duration::from_secs(DEFAULT_SETTLE_TIMEOUT_SECS),
            faults: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name))
    }

    /// Build from any variable source; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let defaults = Self::default();

        let engine_name = read(&lookup, "REPORTDESK_ENGINE_NAME")?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(defaults.engine_name);

        let backoff_ms = parse_u64(&lookup, "REPORTDESK_BACKOFF_UNIT_MS", DEFAULT_BACKOFF_UNIT_MS)?;
        let settle_secs = parse_u64(
            &lookup,
            "REPORTDESK_SETTLE_TIMEOUT_SECS",
            DEFAULT_SETTLE_TIMEOUT_SECS,
        )?;

        let mut faults = Vec::new();
        for (name, kind) in FAULT_VARS {
            if let Some(value) = read(&lookup, name)? {
                faults.push((kind, parse_fault_mode(name, &value)?));
            }
        }

        let mut log = defaults.log;
        if let Some(level) = read(&lookup, "REPORTDESK_LOG_LEVEL")? {
            log.default_filter = level;
        }
        if let Some(format) = read(&lookup, "REPORTDESK_LOG_FORMAT")? {
            log.format = format.parse::<LogFormat>()?;
        }

        Ok(Self {
            engine_name,
            backoff_unit: Duration::from_millis(backoff_ms),
            settle_timeout: Duration::from_secs(settle_secs),
            faults,
            log,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_name(self.engine_name.clone())
            .with_backoff_unit(self.backoff_unit)
    }

    /// Fault injector armed with the configured faults.
    pub fn fault_injector(&self) -> Arc<FaultInjector> {
        let faults = FaultInjector::arc();
        for (kind, mode) in &self.faults {
            faults.set(*kind, *mode);
        }
        faults
    }
}

fn read<F>(lookup: &F, name: &str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            name: name.to_string(),
        }),
    }
}

/// Parse a positive integer; zero is rejected.
fn parse_u64<F>(lookup: &F, name: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let Some(value) = read(lookup, name)? else {
        return Ok(default);
    };
    let parsed: u64 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::InvalidNumber {
            name: name.to_string(),
            message: e.to_string(),
            value: value.clone(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::Zero {
            name: name.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_fault_mode(name: &str, value: &str) -> Result<FaultMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "always" => Ok(FaultMode::Always),
        "panic" => Ok(FaultMode::Panic),
        other => other
            .parse::<u32>()
            .map(FaultMode::FailNext)
            .map_err(|_| ConfigError::InvalidFaultMode {
                name: name.to_string(),
                value: value.to_string(),
            }),
    }
}
