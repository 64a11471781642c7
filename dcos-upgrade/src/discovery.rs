// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovering the live agent roster from the Mesos master.

use crate::remote::ClusterShell;
use crate::remote::CommandClass;
use crate::remote::NodeId;
use crate::remote::RemoteError;
use serde::Deserialize;
use slog::info;
use slog::Logger;
use thiserror::Error;

/// Mesos-DNS name of the leading master.
const MESOS_LEADER: &str = "leader.mesos";
/// Port of the Mesos master HTTP API.
const MESOS_MASTER_PORT: u16 = 5050;

fn roster_query() -> String {
    format!("curl -s http://{MESOS_LEADER}:{MESOS_MASTER_PORT}/slaves")
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to query the agent roster")]
    RosterUnavailable(#[source] RemoteError),

    #[error("agent roster is malformed")]
    RosterMalformed(#[source] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentOs {
    Linux,
    Windows,
}

/// One agent as reported by the cluster itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    pub hostname: String,
    pub os: AgentOs,
    pub has_public_ip: bool,
}

#[derive(Debug, Deserialize)]
struct Roster {
    #[serde(rename = "slaves")]
    agents: Vec<RosterAgent>,
}

#[derive(Debug, Deserialize)]
struct RosterAgent {
    id: String,
    hostname: String,
    #[serde(default)]
    attributes: RosterAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct RosterAttributes {
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    public_ip: Option<serde_json::Value>,
}

/// Parse the body of the Mesos master's `/slaves` endpoint.
///
/// Agents without an `os` attribute are Linux. `public_ip` is set by the
/// provisioning scripts as either a boolean or the string `"true"`.
pub fn parse_roster(body: &str) -> Result<Vec<AgentRecord>, DiscoveryError> {
    let roster: Roster =
        serde_json::from_str(body).map_err(DiscoveryError::RosterMalformed)?;
    Ok(roster
        .agents
        .into_iter()
        .map(|agent| {
            let os = match agent.attributes.os.as_deref() {
                Some(os) if os.eq_ignore_ascii_case("windows") => {
                    AgentOs::Windows
                }
                _ => AgentOs::Linux,
            };
            let has_public_ip = match agent.attributes.public_ip {
                Some(serde_json::Value::Bool(b)) => b,
                Some(serde_json::Value::String(s)) => {
                    !s.is_empty() && !s.eq_ignore_ascii_case("false")
                }
                _ => false,
            };
            AgentRecord {
                id: agent.id,
                hostname: agent.hostname,
                os,
                has_public_ip,
            }
        })
        .collect())
}

/// Fetch the agent roster by running `curl` on the master `via`.
///
/// The query goes to `leader.mesos`, which Mesos-DNS resolves to the current
/// leader. The result is in the order the master reports it. There is no
/// retry.
pub async fn discover_agents(
    log: &Logger,
    shell: &ClusterShell,
    via: &NodeId,
) -> Result<Vec<AgentRecord>, DiscoveryError> {
    let command = roster_query();
    let output = shell
        .run(
            via,
            "query agent roster",
            CommandClass::Check,
            &command,
        )
        .await
        .map_err(DiscoveryError::RosterUnavailable)?;
    let agents = parse_roster(&output.stdout)?;
    let windows =
        agents.iter().filter(|agent| agent.os == AgentOs::Windows).count();
    info!(
        log, "discovered agents";
        "total" => agents.len(),
        "windows" => windows,
    );
    Ok(agents)
}
