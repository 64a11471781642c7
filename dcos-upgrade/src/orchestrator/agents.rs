// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-OS agent upgrades.
//!
//! Each discovered agent gets one [`AgentUpgrader`], chosen once from its
//! OS and from whether the Windows bootstrap phase ran.

use super::node::confirm_version;
use super::node::installed_version;
use super::node::NodeContext;
use super::node::NodeOutcome;
use crate::discovery::AgentOs;
use crate::discovery::AgentRecord;
use crate::errors::UpgradeError;
use crate::remote::CommandClass;
use crate::remote::NodeId;
use async_trait::async_trait;
use slog::info;
use slog::warn;

/// Name of the Linux node upgrade script staged on master 0.
pub(crate) const NODE_UPGRADE_SCRIPT: &str = "node_upgrade.sh";

/// Name of the Windows node upgrade script staged on master 0.
pub(crate) fn windows_node_upgrade_script(target_version: &str) -> String {
    format!("node_upgrade.{target_version}.ps1")
}

#[async_trait]
pub(crate) trait AgentUpgrader: Send + Sync {
    async fn upgrade(
        &self,
        cx: &NodeContext<'_>,
        agent: &AgentRecord,
    ) -> Result<NodeOutcome, UpgradeError>;
}

/// Pick the upgrader for `agent`.
///
/// `windows_script` is the staged Windows node script, present only if the
/// Windows bootstrap phase ran.
pub(crate) fn upgrader_for(
    agent: &AgentRecord,
    windows_script: Option<&str>,
) -> Box<dyn AgentUpgrader> {
    match (agent.os, windows_script) {
        (AgentOs::Linux, _) => Box::new(LinuxAgentUpgrader),
        (AgentOs::Windows, Some(script)) => {
            Box::new(WindowsAgentUpgrader { script: script.to_owned() })
        }
        (AgentOs::Windows, None) => Box::new(NoopUpgrader),
    }
}

pub(crate) struct LinuxAgentUpgrader;

#[async_trait]
impl AgentUpgrader for LinuxAgentUpgrader {
    async fn upgrade(
        &self,
        cx: &NodeContext<'_>,
        agent: &AgentRecord,
    ) -> Result<NodeOutcome, UpgradeError> {
        let node = NodeId::Agent(agent.hostname.clone());
        let installed =
            installed_version(cx, &node, AgentOs::Linux, "check version")
                .await?;
        if installed == cx.target_version {
            info!(
                cx.log, "agent is up to date; skipping";
                "version" => installed,
            );
            return Ok(NodeOutcome::AlreadyCurrent);
        }

        info!(cx.log, "upgrading agent"; "from" => &installed);
        cx.shell
            .copy_from_master(
                &node,
                "copy node upgrade script",
                NODE_UPGRADE_SCRIPT,
                "",
            )
            .await?;
        let output = cx
            .shell
            .run(
                &node,
                "run node upgrade script",
                CommandClass::Install,
                &format!("sudo bash ./{NODE_UPGRADE_SCRIPT}"),
            )
            .await?;
        info!(
            cx.log, "node upgrade script finished";
            "stdout" => output.stdout,
        );
        confirm_version(cx, &node, AgentOs::Linux).await?;
        Ok(NodeOutcome::Upgraded)
    }
}

pub(crate) struct WindowsAgentUpgrader {
    script: String,
}

#[async_trait]
impl AgentUpgrader for WindowsAgentUpgrader {
    async fn upgrade(
        &self,
        cx: &NodeContext<'_>,
        agent: &AgentRecord,
    ) -> Result<NodeOutcome, UpgradeError> {
        let node = NodeId::Agent(agent.hostname.clone());
        let installed =
            installed_version(cx, &node, AgentOs::Windows, "check version")
                .await?;
        if installed == cx.target_version {
            info!(
                cx.log, "agent is up to date; skipping";
                "version" => installed,
            );
            return Ok(NodeOutcome::AlreadyCurrent);
        }

        info!(cx.log, "upgrading Windows agent"; "from" => &installed);
        let script = &self.script;
        cx.shell
            .copy_from_master(
                &node,
                "copy node upgrade script",
                script,
                &format!(r"C:\\AzureData\\{script}"),
            )
            .await?;
        let output = cx
            .shell
            .run(
                &node,
                "run node upgrade script",
                CommandClass::Install,
                &format!(
                    r#"powershell.exe -ExecutionPolicy Unrestricted -Command "C:\\AzureData\\{script}""#
                ),
            )
            .await?;
        info!(
            cx.log, "node upgrade script finished";
            "stdout" => output.stdout,
        );
        confirm_version(cx, &node, AgentOs::Windows).await?;
        Ok(NodeOutcome::Upgraded)
    }
}

/// Leaves the agent alone.
pub(crate) struct NoopUpgrader;

#[async_trait]
impl AgentUpgrader for NoopUpgrader {
    async fn upgrade(
        &self,
        cx: &NodeContext<'_>,
        agent: &AgentRecord,
    ) -> Result<NodeOutcome, UpgradeError> {
        warn!(
            cx.log,
            "Windows agent upgrade is disabled; agent left at its current \
             version";
            "agent_id" => &agent.id,
        );
        Ok(NodeOutcome::Skipped)
    }
}
