//! Service configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `ESCROWD_*` environment variables. Command-line flags are applied last by
//! the binary.

use crate::error::{EscrowError, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Upper bound on the sweep interval; a deadline may be late by at most this.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Upper bound on the hold period and the voting window: five years.
pub const MAX_PERIOD_HOURS: u64 = 5 * 365 * 24;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub escrow: EscrowConfig,
    pub voting: VotingConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// RocksDB directory. In-memory storage when unset.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscrowConfig {
    pub hold_period_hours: u64,
    pub tie_policy: TiePolicy,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_period_hours: 14 * 24,
            tie_policy: TiePolicy::ResumeHold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VotingConfig {
    pub window_hours: u64,
    /// Minimum number of votes for a tally to count. Unset means no quorum.
    pub quorum: Option<u32>,
    /// Minimum reputation score a community voter needs.
    pub min_reputation: i64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            window_hours: 7 * 24,
            quorum: None,
            min_reputation: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(EscrowError::ConfigError(format!(
                "unknown log format {other:?}"
            ))),
        }
    }
}

/// What happens to the escrow entry when a dispute ends in a tie.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Back to `HELD` with a fresh hold period; no funds move.
    #[default]
    ResumeHold,
    Release,
    Refund,
}

impl FromStr for TiePolicy {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "resume_hold" => Ok(Self::ResumeHold),
            "release" => Ok(Self::Release),
            "refund" => Ok(Self::Refund),
            other => Err(EscrowError::ConfigError(format!(
                "unknown tie policy {other:?}"
            ))),
        }
    }
}

/// Timing and tie-break rules shared by the ledger and the dispute engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowPolicy {
    pub hold_period: chrono::Duration,
    pub voting_window: chrono::Duration,
    pub quorum: Option<u32>,
    pub tie_policy: TiePolicy,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Config::default().policy()
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            EscrowError::ConfigError(format!("{}: {e}", path.display()))
        })
    }

    /// Defaults, then the file if given, then the environment. Validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = env::var("ESCROWD_BIND") {
            self.server.bind = bind;
        }
        if let Ok(db_path) = env::var("ESCROWD_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(hours) = parse_env("ESCROWD_HOLD_PERIOD_HOURS")? {
            self.escrow.hold_period_hours = hours;
        }
        if let Some(policy) = parse_env("ESCROWD_TIE_POLICY")? {
            self.escrow.tie_policy = policy;
        }
        if let Some(hours) = parse_env("ESCROWD_VOTING_WINDOW_HOURS")? {
            self.voting.window_hours = hours;
        }
        if let Some(quorum) = parse_env("ESCROWD_QUORUM")? {
            self.voting.quorum = Some(quorum);
        }
        if let Some(min) = parse_env("ESCROWD_MIN_REPUTATION")? {
            self.voting.min_reputation = min;
        }
        if let Some(secs) = parse_env("ESCROWD_SWEEP_INTERVAL_SECS")? {
            self.scheduler.sweep_interval_secs = secs;
        }
        if let Ok(level) = env::var("ESCROWD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = parse_env("ESCROWD_LOG_FORMAT")? {
            self.logging.format = format;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_period("escrow.hold_period_hours", self.escrow.hold_period_hours)?;
        check_period("voting.window_hours", self.voting.window_hours)?;
        let interval = self.scheduler.sweep_interval_secs;
        if interval == 0 || interval > MAX_SWEEP_INTERVAL_SECS {
            return Err(EscrowError::ConfigError(format!(
                "scheduler.sweep_interval_secs must be between 1 and \
                 {MAX_SWEEP_INTERVAL_SECS}, got {interval}"
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> EscrowPolicy {
        EscrowPolicy {
            hold_period: hours(self.escrow.hold_period_hours),
            voting_window: hours(self.voting.window_hours),
            quorum: self.voting.quorum,
            tie_policy: self.escrow.tie_policy,
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler.sweep_interval_secs)
    }
}

fn check_period(key: &str, hours: u64) -> Result<()> {
    if hours == 0 || hours > MAX_PERIOD_HOURS {
        return Err(EscrowError::ConfigError(format!(
            "{key} must be between 1 and {MAX_PERIOD_HOURS}, got {hours}"
        )));
    }
    Ok(())
}

/// Hours as a duration, clamped to [`MAX_PERIOD_HOURS`] so an unvalidated
/// config still yields a positive period.
fn hours(hours: u64) -> TimeDelta {
    let clamped = hours.clamp(1, MAX_PERIOD_HOURS);
    i64::try_from(clamped)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::days(5 * 365))
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EscrowError::ConfigError(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
