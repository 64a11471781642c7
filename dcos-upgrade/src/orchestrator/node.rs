// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Steps shared by master and agent upgrades.

use crate::discovery::AgentOs;
use crate::errors::UpgradeError;
use crate::remote::ClusterShell;
use crate::remote::CommandClass;
use crate::remote::NodeId;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;

const LINUX_VERSION_MARKER: &str =
    "cat /opt/mesosphere/etc/dcos-version.json";
// Runs through bash on master 0, which eats one level of backslashes.
const WINDOWS_VERSION_MARKER: &str =
    r"type C:\\opt\\mesosphere\\etc\\dcos-version.json";

/// What happened to one node during a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The node was upgraded and now reports the target version.
    Upgraded,
    /// The node already reported the target version; nothing was done.
    AlreadyCurrent,
    /// The node was deliberately left alone.
    Skipped,
}

/// Everything a per-node upgrade needs from the run.
pub(crate) struct NodeContext<'a> {
    pub log: &'a Logger,
    pub shell: &'a ClusterShell,
    pub target_version: &'a str,
}

#[derive(Deserialize)]
struct VersionMarker {
    version: String,
}

/// Parse the contents of `dcos-version.json`.
pub(crate) fn parse_version_marker(
    contents: &str,
) -> Result<String, serde_json::Error> {
    // `type` on Windows passes through a byte order mark if the file has one.
    let contents = contents.trim().trim_start_matches('\u{feff}');
    serde_json::from_str::<VersionMarker>(contents).map(|marker| marker.version)
}

/// Read the DC/OS version installed on `node`.
pub(crate) async fn installed_version(
    cx: &NodeContext<'_>,
    node: &NodeId,
    os: AgentOs,
    step: &'static str,
) -> Result<String, UpgradeError> {
    let command = match os {
        AgentOs::Linux => LINUX_VERSION_MARKER,
        AgentOs::Windows => WINDOWS_VERSION_MARKER,
    };
    let output =
        cx.shell.run(node, step, CommandClass::Check, command).await?;
    parse_version_marker(&output.stdout).map_err(|error| {
        UpgradeError::VersionMarkerMalformed {
            node: node.clone(),
            contents: output.stdout.clone(),
            error,
        }
    })
}

/// Re-read the installed version after running an upgrade script and check
/// that it is the target.
pub(crate) async fn confirm_version(
    cx: &NodeContext<'_>,
    node: &NodeId,
    os: AgentOs,
) -> Result<(), UpgradeError> {
    let found = installed_version(cx, node, os, "confirm version").await?;
    if found != cx.target_version {
        return Err(UpgradeError::UpgradeNotConfirmed {
            node: node.clone(),
            expected: cx.target_version.to_owned(),
            found,
        });
    }
    Ok(())
}
