// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of the upgrade tool itself.
//!
//! Everything here has a default, so running without a config file is the
//! same as running with an empty one.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_log")]
    pub log: ConfigLogging,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
}

fn default_log() -> ConfigLogging {
    ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: default_log(),
            ssh: SshConfig::default(),
            timeouts: TimeoutConfig::default(),
            windows: WindowsConfig::default(),
        }
    }
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            ConfigError::Io { error, path: path.to_owned() }
        })?;
        toml::from_str(&data).map_err(|error| ConfigError::Parse {
            error,
            path: path.to_owned(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Failed to parse config file: {path}")]
    Parse {
        #[source]
        error: toml::de::Error,
        path: Utf8PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    /// Login user on every node.
    pub user: String,
    /// SSH port of master 0; master `i` listens on `master_base_port + i`.
    pub master_base_port: u16,
    /// Where the cluster key is installed on master 0.
    pub cluster_key_path: String,
    /// `ConnectTimeout` for hops from master 0 to other nodes.
    pub hop_connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "azureuser".to_owned(),
            master_base_port: 2200,
            cluster_key_path: ".ssh/id_rsa_cluster".to_owned(),
            hop_connect_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Limit for version checks, file copies and other short commands.
    pub check_secs: u64,
    /// Limit for running bootstrap and node upgrade scripts.
    pub install_secs: u64,
}

impl TimeoutConfig {
    pub fn check(&self) -> Duration {
        Duration::from_secs(self.check_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { check_secs: 30, install_secs: 30 * 60 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowsConfig {
    pub agent_mode: WindowsAgentMode,
}

/// What to do with Windows agents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowsAgentMode {
    /// Set up the Windows bootstrap node and upgrade Windows agents.
    #[default]
    Upgrade,
    /// Leave Windows agents alone, logging each one as skipped.
    Skip,
}
