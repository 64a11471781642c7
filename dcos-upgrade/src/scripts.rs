// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering of upgrade scripts and bootstrap configuration.
//!
//! Scripts are versioned template resources compiled into the binary. Each
//! template declares the set of `{{NAME}}` placeholders it expects, and each
//! kind of script has a typed parameter struct that supplies exactly that
//! set. A mismatch between the two is a programming error and panics the
//! first time the template is rendered; the unit tests below render every
//! template, so such a mismatch cannot survive `cargo test`.
//!
//! Composition is pure: nothing here touches the network or the filesystem.

use serde_yaml::Mapping;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use thiserror::Error;

/// The literal line prefix a bootstrap script prints once the per-node
/// upgrade script is being served. Existing bootstrap assets print exactly
/// this text, so it must not change.
pub const BOOTSTRAP_COMPLETED_PREFIX: &str =
    "Setting up bootstrap node completed. Node upgrade script URL";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(
        "extra bootstrap configuration key {key:?} is reserved \
         (the base configuration sets it to {existing})"
    )]
    ReservedKeyConflict { key: String, existing: String },

    #[error("Windows bootstrap configuration is not a YAML mapping")]
    BootstrapConfigMalformed(#[source] serde_yaml::Error),
}

/// A family of script and configuration templates shared by one or more
/// DC/OS releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetFamily {
    Dcos1_11,
}

impl AssetFamily {
    pub fn assets(self) -> &'static AssetSet {
        match self {
            AssetFamily::Dcos1_11 => &DCOS_1_11,
        }
    }
}

/// A template with a fixed set of placeholders.
#[derive(Debug)]
pub struct Template {
    name: &'static str,
    text: &'static str,
    placeholders: &'static [&'static str],
}

impl Template {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Substitute `values` into the template.
    ///
    /// Only `{{NAME}}` tokens in the template text are replaced, in a single
    /// pass; substituted values are copied verbatim even if they contain
    /// braces.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not name exactly the template's placeholders,
    /// if the template text has a token that is not declared, or if a
    /// declared placeholder is missing from the template text.
    fn render(&self, values: &[(&'static str, String)]) -> String {
        let mut supplied: Vec<&str> =
            values.iter().map(|(name, _)| *name).collect();
        let mut declared = self.placeholders.to_vec();
        supplied.sort_unstable();
        declared.sort_unstable();
        assert_eq!(
            supplied, declared,
            "BUG: parameters for template {} do not match its placeholders",
            self.name,
        );

        let mut rendered = String::with_capacity(self.text.len());
        let mut used = BTreeSet::new();
        let mut rest = self.text;
        while let Some(open) = rest.find("{{") {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find("}}").unwrap_or_else(|| {
                panic!("BUG: template {} has an unclosed placeholder", self.name)
            });
            let name = &after[..close];
            let value = values
                .iter()
                .find(|(placeholder, _)| *placeholder == name)
                .map(|(_, value)| value)
                .unwrap_or_else(|| {
                    panic!(
                        "BUG: template {} has an undeclared placeholder \
                         {{{{{name}}}}}",
                        self.name,
                    )
                });
            rendered.push_str(value);
            used.insert(name);
            rest = &after[close + 2..];
        }
        rendered.push_str(rest);

        for name in self.placeholders {
            assert!(
                used.contains(name),
                "BUG: template {} does not contain placeholder {{{{{name}}}}}",
                self.name,
            );
        }
        rendered
    }
}

/// Every template needed to upgrade one release family.
#[derive(Debug)]
pub struct AssetSet {
    pub bootstrap: Template,
    pub node: Template,
    pub windows_bootstrap: Template,
    pub windows_node: Template,
    pub windows_bootstrap_config: Template,
}

static DCOS_1_11: AssetSet = AssetSet {
    bootstrap: Template {
        name: "dcos1.11/bootstrap_upgrade.sh",
        text: include_str!("../assets/dcos1.11/bootstrap_upgrade.sh"),
        placeholders: BootstrapScriptParams::PLACEHOLDERS,
    },
    node: Template {
        name: "dcos1.11/node_upgrade.sh",
        text: include_str!("../assets/dcos1.11/node_upgrade.sh"),
        placeholders: NodeScriptParams::PLACEHOLDERS,
    },
    windows_bootstrap: Template {
        name: "dcos1.11/win_bootstrap_upgrade.ps1",
        text: include_str!("../assets/dcos1.11/win_bootstrap_upgrade.ps1"),
        placeholders: BootstrapScriptParams::PLACEHOLDERS,
    },
    windows_node: Template {
        name: "dcos1.11/win_node_upgrade.ps1",
        text: include_str!("../assets/dcos1.11/win_node_upgrade.ps1"),
        placeholders: WindowsNodeScriptParams::PLACEHOLDERS,
    },
    windows_bootstrap_config: Template {
        name: "dcos1.11/bootstrapwin-config.yaml",
        text: include_str!("../assets/dcos1.11/bootstrapwin-config.yaml"),
        placeholders: BootstrapConfigParams::PLACEHOLDERS,
    },
};

/// Parameters of the Linux and Windows bootstrap scripts.
#[derive(Clone, Debug)]
pub struct BootstrapScriptParams {
    pub current_version: String,
    pub target_version: String,
    /// Where the bootstrap node downloads the target installer from.
    pub installer_url: String,
}

impl BootstrapScriptParams {
    const PLACEHOLDERS: &'static [&'static str] =
        &["CURRENT_VERSION", "TARGET_VERSION", "INSTALLER_URL"];

    fn values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("CURRENT_VERSION", self.current_version.clone()),
            ("TARGET_VERSION", self.target_version.clone()),
            ("INSTALLER_URL", self.installer_url.clone()),
        ]
    }
}

/// Parameters of the Linux per-node upgrade script.
#[derive(Clone, Debug)]
pub struct NodeScriptParams {
    pub target_version: String,
    pub upgrade_script_url: String,
}

impl NodeScriptParams {
    const PLACEHOLDERS: &'static [&'static str] =
        &["TARGET_VERSION", "UPGRADE_SCRIPT_URL"];

    fn values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("TARGET_VERSION", self.target_version.clone()),
            ("UPGRADE_SCRIPT_URL", self.upgrade_script_url.clone()),
        ]
    }
}

/// Parameters of the Windows per-node upgrade script.
#[derive(Clone)]
pub struct WindowsNodeScriptParams {
    pub target_version: String,
    pub upgrade_script_url: String,
    pub admin_user: String,
    pub admin_password: String,
}

impl std::fmt::Debug for WindowsNodeScriptParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsNodeScriptParams")
            .field("target_version", &self.target_version)
            .field("upgrade_script_url", &self.upgrade_script_url)
            .field("admin_user", &self.admin_user)
            .finish_non_exhaustive()
    }
}

impl WindowsNodeScriptParams {
    const PLACEHOLDERS: &'static [&'static str] = &[
        "TARGET_VERSION",
        "UPGRADE_SCRIPT_URL",
        "ADMIN_USER",
        "ADMIN_PASSWORD",
    ];

    fn values(&self) -> Vec<(&'static str, String)> {
        // The credentials land inside single-quoted PowerShell strings.
        vec![
            ("TARGET_VERSION", self.target_version.clone()),
            ("UPGRADE_SCRIPT_URL", self.upgrade_script_url.clone()),
            ("ADMIN_USER", self.admin_user.replace('\'', "''")),
            ("ADMIN_PASSWORD", self.admin_password.replace('\'', "''")),
        ]
    }
}

/// Parameters of the Windows bootstrap node's `config.yaml`.
#[derive(Clone, Debug)]
pub struct BootstrapConfigParams {
    pub master_ips: Vec<String>,
    pub bootstrap_ip: String,
    pub oauth_enabled: bool,
    pub enable_ipv6: bool,
}

impl BootstrapConfigParams {
    const PLACEHOLDERS: &'static [&'static str] =
        &["MASTER_IP_LIST", "BOOTSTRAP_IP", "OAUTH_ENABLED", "ENABLE_IPV6"];

    fn values(&self) -> Vec<(&'static str, String)> {
        let master_list = self
            .master_ips
            .iter()
            .map(|ip| format!("- {ip}"))
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            ("MASTER_IP_LIST", master_list),
            ("BOOTSTRAP_IP", self.bootstrap_ip.clone()),
            ("OAUTH_ENABLED", self.oauth_enabled.to_string()),
            ("ENABLE_IPV6", self.enable_ipv6.to_string()),
        ]
    }
}

pub fn compose_bootstrap_script(
    assets: &AssetSet,
    params: &BootstrapScriptParams,
) -> String {
    assets.bootstrap.render(&params.values())
}

pub fn compose_windows_bootstrap_script(
    assets: &AssetSet,
    params: &BootstrapScriptParams,
) -> String {
    assets.windows_bootstrap.render(&params.values())
}

pub fn compose_node_upgrade_script(
    assets: &AssetSet,
    params: &NodeScriptParams,
) -> String {
    assets.node.render(&params.values())
}

pub fn compose_windows_node_upgrade_script(
    assets: &AssetSet,
    params: &WindowsNodeScriptParams,
) -> String {
    assets.windows_node.render(&params.values())
}

/// Render the Windows bootstrap configuration and merge `extra` into it.
///
/// Keys in `extra` may only add settings: a key the base configuration
/// already sets fails with [`ComposeError::ReservedKeyConflict`].
pub fn compose_windows_bootstrap_config(
    assets: &AssetSet,
    params: &BootstrapConfigParams,
    extra: &BTreeMap<String, Value>,
) -> Result<String, ComposeError> {
    let rendered = assets.windows_bootstrap_config.render(&params.values());
    if extra.is_empty() {
        return Ok(rendered);
    }

    let mut config: Mapping = serde_yaml::from_str(&rendered)
        .map_err(ComposeError::BootstrapConfigMalformed)?;
    for (key, value) in extra {
        let yaml_key = Value::String(key.clone());
        if let Some(existing) = config.get(&yaml_key) {
            let existing = serde_yaml::to_string(existing)
                .map_err(ComposeError::BootstrapConfigMalformed)?;
            return Err(ComposeError::ReservedKeyConflict {
                key: key.clone(),
                existing: existing.trim_end().to_owned(),
            });
        }
        config.insert(yaml_key, value.clone());
    }
    serde_yaml::to_string(&config)
        .map_err(ComposeError::BootstrapConfigMalformed)
}

/// Produce `count` consecutive IPv4 addresses starting at `first` by
/// incrementing the last octet.
///
/// # Panics
///
/// Panics if `first` is not an IPv4 literal or if the range would run past
/// the end of the last octet. Cluster specifications are validated for both
/// when they are loaded.
pub fn generate_ip_list(count: usize, first: &str) -> Vec<String> {
    let seed: Ipv4Addr = first.parse().unwrap_or_else(|_| {
        panic!("BUG: {first:?} is not a valid IPv4 address")
    });
    let [a, b, c, d] = seed.octets();
    (0..count)
        .map(|i| {
            let last = u8::try_from(i)
                .ok()
                .and_then(|i| d.checked_add(i))
                .unwrap_or_else(|| {
                    panic!("BUG: {count} addresses from {seed} overflow")
                });
            Ipv4Addr::new(a, b, c, last).to_string()
        })
        .collect()
}

/// Find the per-node upgrade script URL in bootstrap script output.
///
/// Only the first line carrying [`BOOTSTRAP_COMPLETED_PREFIX`] counts.
/// Returns `None` if there is no such line or its URL is empty.
pub fn extract_upgrade_url(stdout: &str) -> Option<String> {
    let url = stdout
        .lines()
        .find_map(|line| line.strip_prefix(BOOTSTRAP_COMPLETED_PREFIX))?
        .trim();
    (!url.is_empty()).then(|| url.to_owned())
}
