// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading the cluster specification from a deployment directory.
//!
//! A deployment directory is the output of the `generate` step: it holds the
//! cluster's `apimodel.json` and, usually, the `id_rsa` key used to reach
//! master 0. Only the handful of fields the upgrade needs are read; the rest
//! of the API model is ignored.

use crate::scripts::generate_ip_list;
use crate::scripts::BootstrapConfigParams;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const API_MODEL_FILE_NAME: &str = "apimodel.json";

const ORCHESTRATOR_VERSION_POINTER: &str =
    "/properties/orchestratorProfile/orchestratorVersion";

#[derive(Debug, Error)]
pub enum ClusterSpecError {
    #[error("failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("invalid API model {path}")]
    Load {
        path: Utf8PathBuf,
        #[source]
        error: ApiModelError,
    },
}

#[derive(Debug, Error)]
pub enum ApiModelError {
    #[error("failed to parse API model JSON")]
    Parse(#[source] serde_json::Error),

    #[error("field {field} is missing or empty")]
    MissingField { field: &'static str },

    #[error("master count must be at least 1")]
    NoMasters,

    #[error("{field} {ip:?} is not an IPv4 address")]
    InvalidIp { field: &'static str, ip: String },

    #[error(
        "{count} consecutive master addresses starting at {first} overflow"
    )]
    MasterRangeOverflow { first: Ipv4Addr, count: usize },

    #[error("failed to serialize API model JSON")]
    Serialize(#[source] serde_json::Error),
}

// The subset of the vlabs API model read by the upgrade.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiModel {
    #[serde(default)]
    location: String,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    orchestrator_profile: OrchestratorProfile,
    master_profile: MasterProfile,
    #[serde(default)]
    agent_pool_profiles: Vec<AgentPoolProfile>,
    windows_profile: Option<WindowsProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrchestratorProfile {
    #[serde(default)]
    orchestrator_version: String,
    #[serde(default)]
    oauth_enabled: bool,
    linux_bootstrap_profile: Option<BootstrapProfile>,
    windows_bootstrap_profile: Option<BootstrapProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapProfile {
    #[serde(default, rename = "staticIP")]
    static_ip: String,
    #[serde(default, rename = "enableIPv6")]
    enable_ipv6: bool,
    #[serde(default)]
    extra_configs: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterProfile {
    count: usize,
    #[serde(default)]
    dns_prefix: String,
    #[serde(default, rename = "firstConsecutiveStaticIP")]
    first_consecutive_static_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentPoolProfile {
    name: String,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    os_type: PoolOs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowsProfile {
    #[serde(default)]
    admin_username: String,
    #[serde(default)]
    admin_password: String,
}

/// Operating system of an agent pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum PoolOs {
    #[default]
    Linux,
    Windows,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentPool {
    pub name: String,
    pub count: usize,
    pub os: PoolOs,
}

/// Settings of the Windows bootstrap node, if the model has one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowsBootstrap {
    pub static_ip: Option<Ipv4Addr>,
    pub enable_ipv6: bool,
    pub extra_configs: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct WindowsAdmin {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for WindowsAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsAdmin")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// The validated parts of a cluster's API model that drive an upgrade.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpec {
    pub location: String,
    pub orchestrator_version: String,
    pub oauth_enabled: bool,
    pub dns_prefix: String,
    pub master_count: usize,
    pub first_master_ip: Ipv4Addr,
    pub linux_bootstrap_ip: Ipv4Addr,
    pub windows_bootstrap: WindowsBootstrap,
    pub agent_pools: Vec<AgentPool>,
    pub windows_admin: Option<WindowsAdmin>,
}

impl ClusterSpec {
    /// Load `apimodel.json` from a deployment directory.
    pub fn from_deployment_dir(
        dir: &Utf8Path,
    ) -> Result<Self, ClusterSpecError> {
        let path = dir.join(API_MODEL_FILE_NAME);
        let json = std::fs::read_to_string(&path).map_err(|error| {
            ClusterSpecError::Io { path: path.clone(), error }
        })?;
        Self::from_api_model_json(&json)
            .map_err(|error| ClusterSpecError::Load { path, error })
    }

    pub fn from_api_model_json(json: &str) -> Result<Self, ApiModelError> {
        let model: ApiModel =
            serde_json::from_str(json).map_err(ApiModelError::Parse)?;
        let Properties {
            orchestrator_profile,
            master_profile,
            agent_pool_profiles,
            windows_profile,
        } = model.properties;

        if model.location.is_empty() {
            return Err(ApiModelError::MissingField { field: "location" });
        }
        if orchestrator_profile.orchestrator_version.is_empty() {
            return Err(ApiModelError::MissingField {
                field: "orchestratorProfile.orchestratorVersion",
            });
        }
        if master_profile.dns_prefix.is_empty() {
            return Err(ApiModelError::MissingField {
                field: "masterProfile.dnsPrefix",
            });
        }
        if master_profile.count == 0 {
            return Err(ApiModelError::NoMasters);
        }
        let first_master_ip = parse_ipv4(
            "masterProfile.firstConsecutiveStaticIP",
            &master_profile.first_consecutive_static_ip,
        )?;
        let last_octet = usize::from(first_master_ip.octets()[3]);
        let last_master_octet = last_octet
            .checked_add(master_profile.count - 1)
            .filter(|octet| *octet <= usize::from(u8::MAX));
        if last_master_octet.is_none() {
            return Err(ApiModelError::MasterRangeOverflow {
                first: first_master_ip,
                count: master_profile.count,
            });
        }

        let linux_bootstrap = orchestrator_profile
            .linux_bootstrap_profile
            .ok_or(ApiModelError::MissingField {
                field: "orchestratorProfile.linuxBootstrapProfile",
            })?;
        let linux_bootstrap_ip = parse_ipv4(
            "linuxBootstrapProfile.staticIP",
            &linux_bootstrap.static_ip,
        )?;

        let windows_bootstrap =
            orchestrator_profile.windows_bootstrap_profile.unwrap_or_default();
        let windows_bootstrap = WindowsBootstrap {
            static_ip: if windows_bootstrap.static_ip.is_empty() {
                None
            } else {
                Some(parse_ipv4(
                    "windowsBootstrapProfile.staticIP",
                    &windows_bootstrap.static_ip,
                )?)
            },
            enable_ipv6: windows_bootstrap.enable_ipv6,
            extra_configs: windows_bootstrap.extra_configs,
        };

        let agent_pools = agent_pool_profiles
            .into_iter()
            .map(|pool| AgentPool {
                name: pool.name,
                count: pool.count,
                os: pool.os_type,
            })
            .collect();

        let windows_admin = windows_profile.and_then(|profile| {
            (!profile.admin_username.is_empty()).then(|| WindowsAdmin {
                user: profile.admin_username,
                password: profile.admin_password,
            })
        });

        Ok(Self {
            location: model.location,
            orchestrator_version: orchestrator_profile.orchestrator_version,
            oauth_enabled: orchestrator_profile.oauth_enabled,
            dns_prefix: master_profile.dns_prefix,
            master_count: master_profile.count,
            first_master_ip,
            linux_bootstrap_ip,
            windows_bootstrap,
            agent_pools,
            windows_admin,
        })
    }

    /// The public DNS name shared by all masters.
    pub fn master_fqdn(&self) -> String {
        format!("{}.{}.cloudapp.azure.com", self.dns_prefix, self.location)
    }

    /// Private addresses of the masters, in index order.
    pub fn master_ips(&self) -> Vec<String> {
        generate_ip_list(self.master_count, &self.first_master_ip.to_string())
    }

    /// The Windows bootstrap node's address: the configured one, or the
    /// address following the Linux bootstrap node's.
    ///
    /// Returns `None` if no address is configured and the Linux bootstrap
    /// address is the last in its octet.
    pub fn windows_bootstrap_ip(&self) -> Option<Ipv4Addr> {
        if let Some(ip) = self.windows_bootstrap.static_ip {
            return Some(ip);
        }
        let [a, b, c, d] = self.linux_bootstrap_ip.octets();
        d.checked_add(1).map(|d| Ipv4Addr::new(a, b, c, d))
    }

    pub fn has_windows_pools(&self) -> bool {
        self.agent_pools
            .iter()
            .any(|pool| pool.os == PoolOs::Windows && pool.count > 0)
    }

    /// Parameters for the Windows bootstrap configuration of a bootstrap
    /// node at `bootstrap_ip`.
    pub fn windows_bootstrap_config_params(
        &self,
        bootstrap_ip: Ipv4Addr,
    ) -> BootstrapConfigParams {
        BootstrapConfigParams {
            master_ips: self.master_ips(),
            bootstrap_ip: bootstrap_ip.to_string(),
            oauth_enabled: self.oauth_enabled,
            enable_ipv6: self.windows_bootstrap.enable_ipv6,
        }
    }
}

/// Rewrite the orchestrator version recorded in a deployment directory's
/// API model, leaving every other field as it was.
pub fn record_orchestrator_version(
    dir: &Utf8Path,
    version: &str,
) -> Result<(), ClusterSpecError> {
    let path = dir.join(API_MODEL_FILE_NAME);
    let json = std::fs::read_to_string(&path)
        .map_err(|error| ClusterSpecError::Io { path: path.clone(), error })?;
    let updated = set_orchestrator_version(&json, version)
        .map_err(|error| ClusterSpecError::Load { path: path.clone(), error })?;

    let tmp = dir.join(format!("{API_MODEL_FILE_NAME}.tmp"));
    std::fs::write(&tmp, updated)
        .map_err(|error| ClusterSpecError::Io { path: tmp.clone(), error })?;
    std::fs::rename(&tmp, &path)
        .map_err(|error| ClusterSpecError::Io { path, error })
}

fn set_orchestrator_version(
    json: &str,
    version: &str,
) -> Result<String, ApiModelError> {
    let mut model: serde_json::Value =
        serde_json::from_str(json).map_err(ApiModelError::Parse)?;
    let slot = model.pointer_mut(ORCHESTRATOR_VERSION_POINTER).ok_or(
        ApiModelError::MissingField {
            field: "orchestratorProfile.orchestratorVersion",
        },
    )?;
    *slot = serde_json::Value::String(version.to_owned());
    let mut updated = serde_json::to_string_pretty(&model)
        .map_err(ApiModelError::Serialize)?;
    updated.push('\n');
    Ok(updated)
}

fn parse_ipv4(
    field: &'static str,
    ip: &str,
) -> Result<Ipv4Addr, ApiModelError> {
    ip.parse()
        .map_err(|_| ApiModelError::InvalidIp { field, ip: ip.to_owned() })
}
