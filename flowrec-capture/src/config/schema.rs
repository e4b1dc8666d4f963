//! Configuration schema types

use crate::error::ValidationError;
use flowrec_core::{FlushPolicy, RecorderConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Complete capture configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    pub recorder: Option<RecorderSection>,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Config {
    /// Recorder settings, falling back to defaults when the section is absent
    pub fn recorder_section(&self) -> RecorderSection {
        self.recorder.clone().unwrap_or_default()
    }
}

/// Settings shared by all subcommands
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_config_version() -> String {
    "1.0".to_string()
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            verbose: false,
        }
    }
}

/// Where and how flows are recorded
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecorderSection {
    #[serde(default = "default_dest")]
    pub dest: PathBuf,
    /// "close", "record" or "every:<n>"
    #[serde(default = "default_flush")]
    pub flush: String,
    #[serde(default = "default_true")]
    pub repair_torn_tail: bool,
}

fn default_dest() -> PathBuf {
    PathBuf::from("flows.rec")
}

fn default_flush() -> String {
    FlushMode::Close.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            dest: default_dest(),
            flush: default_flush(),
            repair_torn_tail: true,
        }
    }
}

impl RecorderSection {
    pub fn flush_mode(&self) -> Result<FlushMode, ValidationError> {
        self.flush.parse()
    }

    /// Resolve into the recorder's own configuration
    pub fn to_recorder_config(&self) -> Result<RecorderConfig, ValidationError> {
        if self.dest.as_os_str().is_empty() {
            return Err(ValidationError::EmptyDestination);
        }
        Ok(RecorderConfig::new(&self.dest)
            .with_flush_policy(self.flush_mode()?.into())
            .with_repair_torn_tail(self.repair_torn_tail))
    }
}

/// Textual flush policy as written in config files and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush only when recording finishes
    Close,
    /// Flush after every record
    Record,
    /// Flush after every n records
    Every(u32),
}

impl FromStr for FlushMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFlushMode {
            mode: s.to_string(),
        };
        match s {
            "close" => Ok(FlushMode::Close),
            "record" => Ok(FlushMode::Record),
            s if s.starts_with("every:") => {
                let n: u32 = s["every:".len()..].parse().map_err(|_| invalid())?;
                if n == 0 {
                    Err(invalid())
                } else {
                    Ok(FlushMode::Every(n))
                }
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::Close => write!(f, "close"),
            FlushMode::Record => write!(f, "record"),
            FlushMode::Every(n) => write!(f, "every:{}", n),
        }
    }
}

impl From<FlushMode> for FlushPolicy {
    fn from(mode: FlushMode) -> Self {
        match mode {
            FlushMode::Close => FlushPolicy::OnClose,
            FlushMode::Record => FlushPolicy::EveryRecord,
            FlushMode::Every(n) => FlushPolicy::EveryN(n),
        }
    }
}

/// Which flows are kept out of the record file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Host patterns whose flows are not recorded
    #[serde(default)]
    pub ignore_hosts: Vec<String>,
    /// Host patterns recorded even when a less specific ignore pattern
    /// also matches
    #[serde(default)]
    pub include_hosts: Vec<String>,
    /// Server address ranges whose flows are not recorded
    #[serde(default)]
    pub ignore_ipv4_ranges: Vec<String>,
    #[serde(default)]
    pub ignore_ipv6_ranges: Vec<String>,
    /// Drop the built-in ignore list instead of extending it
    #[serde(default)]
    pub replace_builtin: bool,
}
