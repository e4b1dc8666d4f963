//! Configuration file loading and merging

use super::schema::Config;
use crate::error::{CaptureError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Where the user config is looked up when no `--config` is given
    ///
    /// `$FLOWREC_CONFIG` first, then `$XDG_CONFIG_HOME/flowrec/config.toml`,
    /// then `~/.config/flowrec/config.toml`.
    pub fn default_config_path() -> PathBuf {
        env::var_os("FLOWREC_CONFIG")
            .map(PathBuf::from)
            .or_else(|| {
                env::var_os("XDG_CONFIG_HOME")
                    .map(|xdg| PathBuf::from(xdg).join("flowrec/config.toml"))
            })
            .or_else(|| {
                env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/flowrec/config.toml"))
            })
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CaptureError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Defaults compiled into the binary
    pub fn load_builtin() -> Result<Config> {
        const BUILTIN_TOML: &str = include_str!("../builtin-config.toml");
        Ok(toml::from_str(BUILTIN_TOML)?)
    }

    /// Merge user config on top of built-in config
    /// Filter lists are extended unless the user asks to replace them;
    /// the recorder section is overridden when the user specifies one
    pub fn merge_configs(builtin: Config, user: Config) -> Config {
        let mut merged = builtin;

        merged.common = user.common;

        if user.recorder.is_some() {
            merged.recorder = user.recorder;
        }

        let filter = &mut merged.filter;
        if user.filter.replace_builtin {
            filter.ignore_hosts.clear();
            filter.include_hosts.clear();
            filter.ignore_ipv4_ranges.clear();
            filter.ignore_ipv6_ranges.clear();
        }
        extend_unique(&mut filter.ignore_hosts, user.filter.ignore_hosts);
        extend_unique(&mut filter.include_hosts, user.filter.include_hosts);
        extend_unique(&mut filter.ignore_ipv4_ranges, user.filter.ignore_ipv4_ranges);
        extend_unique(&mut filter.ignore_ipv6_ranges, user.filter.ignore_ipv6_ranges);

        merged
    }

    /// Load config with built-in as lowest-priority fallback
    /// Priority: User config > Built-in config
    pub fn load_with_builtins() -> Result<Config> {
        let builtin = Self::load_builtin()?;
        let path = Self::default_config_path();

        if path.exists() {
            let user = Self::load_from_file(&path)?;
            Ok(Self::merge_configs(builtin, user))
        } else {
            tracing::debug!("User config not found at {:?}, using built-in defaults", path);
            Ok(builtin)
        }
    }

    /// Explicit path if given, otherwise the default lookup; both merged over the built-in
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        match path {
            Some(p) => Ok(Self::merge_configs(Self::load_builtin()?, Self::load_from_file(&p)?)),
            None => Self::load_with_builtins(),
        }
    }
}

fn extend_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}
