// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving a rolling upgrade across a cluster.
//!
//! A run walks the phases of [`UpgradePhase`] in order: set up the Linux
//! bootstrap node (and the Windows one when Windows agents will be
//! upgraded), then upgrade masters one at a time in index order, then agents
//! one at a time in the order the cluster reports them. The first error ends
//! the run.
//!
//! Nothing about a run is persisted locally. Re-running after a failure is
//! safe because every step that changes a node is guarded by state on that
//! node: bootstrap scripts reuse an existing `upgrade_url` marker, and each
//! master and agent is skipped if its installed version already matches the
//! target.

mod agents;
mod node;
mod phase;

pub use node::NodeOutcome;
pub use phase::PhaseOutcome;
pub use phase::UpgradePhase;

use crate::cluster::ClusterSpec;
use crate::config::WindowsAgentMode;
use crate::discovery::discover_agents;
use crate::discovery::AgentOs;
use crate::discovery::AgentRecord;
use crate::errors::UpgradeError;
use crate::remote::ClusterShell;
use crate::remote::CommandClass;
use crate::remote::NodeId;
use crate::resolver::VersionError;
use crate::resolver::VersionResolver;
use crate::scripts;
use crate::scripts::AssetSet;
use crate::scripts::BootstrapScriptParams;
use crate::scripts::NodeScriptParams;
use crate::scripts::WindowsNodeScriptParams;
use agents::upgrader_for;
use agents::windows_node_upgrade_script;
use agents::NODE_UPGRADE_SCRIPT;
use display_error_chain::DisplayErrorChain;
use node::confirm_version;
use node::installed_version;
use node::NodeContext;
use serde::Serialize;
use slog::error;
use slog::info;
use slog::o;
use slog::Logger;
use std::net::Ipv4Addr;

const BOOTSTRAP_SCRIPT: &str = "bootstrap_upgrade.sh";
const WINDOWS_BOOTSTRAP_SCRIPT: &str = "winBootstrapUpgrade.ps1";

/// The versions and installers of one upgrade.
#[derive(Clone, Debug)]
pub struct UpgradePlan {
    pub current_version: String,
    pub target_version: String,
    pub linux_installer_url: String,
    pub windows_installer_url: String,
    pub assets: &'static AssetSet,
}

impl UpgradePlan {
    /// Plan an upgrade of a cluster at `current_version` to `target_version`.
    ///
    /// The request is validated against `resolver`; installer URLs default
    /// to the catalog's. Equal versions are rejected, so callers must handle
    /// "already at target" before planning.
    pub fn new(
        resolver: &VersionResolver,
        current_version: &str,
        target_version: &str,
        linux_installer_url: Option<String>,
        windows_installer_url: Option<String>,
    ) -> Result<Self, VersionError> {
        resolver.validate_upgrade_request(current_version, target_version)?;
        let entry = resolver.catalog().entry(target_version).ok_or_else(|| {
            VersionError::UnsupportedVersion {
                requested: target_version.to_owned(),
                current: Some(current_version.to_owned()),
            }
        })?;
        Ok(Self {
            current_version: current_version.to_owned(),
            target_version: target_version.to_owned(),
            linux_installer_url: linux_installer_url
                .unwrap_or_else(|| entry.linux_installer_url.to_owned()),
            windows_installer_url: windows_installer_url
                .unwrap_or_else(|| entry.windows_installer_url.to_owned()),
            assets: entry.assets.assets(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    #[serde(serialize_with = "serialize_display")]
    pub node: NodeId,
    pub outcome: NodeOutcome,
}

fn serialize_display<S: serde::Serializer>(
    node: &NodeId,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(node)
}

/// Summary of a completed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub from_version: String,
    pub to_version: String,
    pub final_phase: UpgradePhase,
    /// Masters and agents in the order they were visited.
    pub nodes: Vec<NodeReport>,
}

impl UpgradeReport {
    pub fn count(&self, outcome: NodeOutcome) -> usize {
        self.nodes.iter().filter(|node| node.outcome == outcome).count()
    }
}

/// Working state of one run. Dropped when the run ends.
struct UpgradeSession {
    agents: Vec<AgentRecord>,
    windows_bootstrap: Option<WindowsBootstrapPlan>,
    node_script: Option<String>,
    windows_node_script: Option<String>,
    nodes: Vec<NodeReport>,
    last_error: Option<UpgradeError>,
}

/// What the Windows bootstrap phase needs, worked out before any node is
/// changed.
struct WindowsBootstrapPlan {
    ip: Ipv4Addr,
    config: String,
    admin_user: String,
    admin_password: String,
}

pub struct UpgradeOrchestrator {
    log: Logger,
    spec: ClusterSpec,
    plan: UpgradePlan,
    shell: ClusterShell,
    windows_mode: WindowsAgentMode,
}

impl UpgradeOrchestrator {
    pub fn new(
        log: &Logger,
        spec: ClusterSpec,
        plan: UpgradePlan,
        shell: ClusterShell,
        windows_mode: WindowsAgentMode,
    ) -> Self {
        let log = log.new(o!(
            "component" => "UpgradeOrchestrator",
            "from_version" => plan.current_version.clone(),
            "to_version" => plan.target_version.clone(),
        ));
        Self { log, spec, plan, shell, windows_mode }
    }

    /// Run every phase, stopping at the first error.
    pub async fn run(&self) -> Result<UpgradeReport, UpgradeError> {
        let mut session = UpgradeSession {
            agents: Vec::new(),
            windows_bootstrap: None,
            node_script: None,
            windows_node_script: None,
            nodes: Vec::new(),
            last_error: None,
        };

        let mut phase = UpgradePhase::Start;
        while !phase.is_terminal() {
            info!(self.log, "entering phase"; "phase" => %phase);
            let outcome = match self.run_phase(phase, &mut session).await {
                Ok(()) => PhaseOutcome::Completed,
                Err(err) => {
                    error!(
                        self.log, "upgrade failed";
                        "phase" => %phase,
                        "error" => %DisplayErrorChain::new(&err),
                    );
                    session.last_error = Some(err);
                    PhaseOutcome::Failed
                }
            };
            phase = phase.next(outcome, session.windows_bootstrap.is_some());
        }

        if let Some(err) = session.last_error {
            return Err(err);
        }
        info!(
            self.log, "upgrade complete";
            "nodes" => session.nodes.len(),
        );
        Ok(UpgradeReport {
            from_version: self.plan.current_version.clone(),
            to_version: self.plan.target_version.clone(),
            final_phase: phase,
            nodes: session.nodes,
        })
    }

    async fn run_phase(
        &self,
        phase: UpgradePhase,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        match phase {
            UpgradePhase::Start => self.start(session).await,
            UpgradePhase::BootstrapLinux => self.bootstrap_linux(session).await,
            UpgradePhase::BootstrapWindows => {
                self.bootstrap_windows(session).await
            }
            UpgradePhase::MastersRollingUpgrade => {
                self.upgrade_masters(session).await
            }
            UpgradePhase::AgentsRollingUpgrade => {
                self.upgrade_agents(session).await
            }
            UpgradePhase::Done | UpgradePhase::Failed => Ok(()),
        }
    }

    /// Discover agents and work out everything later phases need that can
    /// fail without touching a node.
    async fn start(
        &self,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        session.agents =
            discover_agents(&self.log, &self.shell, &NodeId::Master(0))
                .await?;

        let windows_agents =
            session.agents.iter().any(|agent| agent.os == AgentOs::Windows);
        let windows_needed = match self.windows_mode {
            WindowsAgentMode::Upgrade => {
                windows_agents || self.spec.has_windows_pools()
            }
            WindowsAgentMode::Skip => false,
        };
        if !windows_needed {
            return Ok(());
        }

        let ip = self.spec.windows_bootstrap_ip().ok_or(
            UpgradeError::InvalidBootstrapIp {
                linux_bootstrap_ip: self.spec.linux_bootstrap_ip,
            },
        )?;
        let config = scripts::compose_windows_bootstrap_config(
            self.plan.assets,
            &self.spec.windows_bootstrap_config_params(ip),
            &self.spec.windows_bootstrap.extra_configs,
        )?;
        let admin = self
            .spec
            .windows_admin
            .as_ref()
            .ok_or(UpgradeError::WindowsProfileMissing)?;
        session.windows_bootstrap = Some(WindowsBootstrapPlan {
            ip,
            config,
            admin_user: admin.user.clone(),
            admin_password: admin.password.clone(),
        });
        Ok(())
    }

    fn bootstrap_params(&self, installer_url: &str) -> BootstrapScriptParams {
        BootstrapScriptParams {
            current_version: self.plan.current_version.clone(),
            target_version: self.plan.target_version.clone(),
            installer_url: installer_url.to_owned(),
        }
    }

    async fn bootstrap_linux(
        &self,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        let node = NodeId::LinuxBootstrap(self.spec.linux_bootstrap_ip);
        let log = self.log.new(o!("node" => node.to_string()));
        let shell = &self.shell;
        let script = scripts::compose_bootstrap_script(
            self.plan.assets,
            &self.bootstrap_params(&self.plan.linux_installer_url),
        );

        info!(log, "installing cluster key on master 0");
        shell.install_cluster_key().await?;

        info!(log, "copying bootstrap script");
        shell
            .push_file(0, "push bootstrap script", BOOTSTRAP_SCRIPT, &script)
            .await?;
        shell
            .run(
                &NodeId::Master(0),
                "push bootstrap script",
                CommandClass::Check,
                &format!("chmod 755 ./{BOOTSTRAP_SCRIPT}"),
            )
            .await?;
        shell
            .copy_from_master(
                &node,
                "copy bootstrap script",
                BOOTSTRAP_SCRIPT,
                "",
            )
            .await?;

        info!(log, "running bootstrap script");
        let output = shell
            .run(
                &node,
                "run bootstrap script",
                CommandClass::Install,
                &format!("sudo ./{BOOTSTRAP_SCRIPT}"),
            )
            .await?;
        info!(log, "bootstrap script finished"; "stdout" => &output.stdout);
        let url = scripts::extract_upgrade_url(&output.stdout)
            .ok_or(UpgradeError::UpgradeURLNotFound { node })?;
        info!(log, "found node upgrade script"; "url" => &url);

        let node_script = scripts::compose_node_upgrade_script(
            self.plan.assets,
            &NodeScriptParams {
                target_version: self.plan.target_version.clone(),
                upgrade_script_url: url,
            },
        );
        // Agents copy the script from master 0.
        shell
            .push_file(
                0,
                "stage node upgrade script",
                NODE_UPGRADE_SCRIPT,
                &node_script,
            )
            .await?;
        shell
            .run(
                &NodeId::Master(0),
                "stage node upgrade script",
                CommandClass::Check,
                &format!("chmod 755 ./{NODE_UPGRADE_SCRIPT}"),
            )
            .await?;
        session.node_script = Some(node_script);
        Ok(())
    }

    async fn bootstrap_windows(
        &self,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        let Some(windows) = &session.windows_bootstrap else {
            return Ok(());
        };
        let node = NodeId::WindowsBootstrap(windows.ip);
        let log = self.log.new(o!("node" => node.to_string()));
        let shell = &self.shell;
        let target = &self.plan.target_version;
        let script = scripts::compose_windows_bootstrap_script(
            self.plan.assets,
            &self.bootstrap_params(&self.plan.windows_installer_url),
        );
        let config_file = format!("config-win.{target}.yaml");

        info!(log, "copying Windows bootstrap script and configuration");
        shell
            .push_file(
                0,
                "push Windows bootstrap script",
                WINDOWS_BOOTSTRAP_SCRIPT,
                &script,
            )
            .await?;
        shell
            .push_file(
                0,
                "push Windows bootstrap config",
                &config_file,
                &windows.config,
            )
            .await?;
        for (step, file) in [
            ("copy Windows bootstrap script", WINDOWS_BOOTSTRAP_SCRIPT),
            ("copy Windows bootstrap config", config_file.as_str()),
        ] {
            shell
                .copy_from_master(
                    &node,
                    step,
                    file,
                    &format!(r"C:\\AzureData\\{file}"),
                )
                .await?;
        }

        info!(log, "running Windows bootstrap script");
        let output = shell
            .run(
                &node,
                "run Windows bootstrap script",
                CommandClass::Install,
                &format!(
                    r#"powershell.exe -ExecutionPolicy Unrestricted -command "C:\\AzureData\\{WINDOWS_BOOTSTRAP_SCRIPT}""#
                ),
            )
            .await?;
        info!(
            log, "Windows bootstrap script finished";
            "stdout" => &output.stdout,
        );
        let url = scripts::extract_upgrade_url(&output.stdout)
            .ok_or(UpgradeError::UpgradeURLNotFound { node })?;
        info!(log, "found Windows node upgrade script"; "url" => &url);

        let node_script = scripts::compose_windows_node_upgrade_script(
            self.plan.assets,
            &WindowsNodeScriptParams {
                target_version: target.clone(),
                upgrade_script_url: url,
                admin_user: windows.admin_user.clone(),
                admin_password: windows.admin_password.clone(),
            },
        );
        let script_name = windows_node_upgrade_script(target);
        shell
            .push_file(
                0,
                "stage Windows node upgrade script",
                &script_name,
                &node_script,
            )
            .await?;
        session.windows_node_script = Some(script_name);
        Ok(())
    }

    async fn upgrade_masters(
        &self,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        let Some(node_script) = session.node_script.as_deref() else {
            panic!("BUG: master upgrade started before the bootstrap phase");
        };
        for index in 0..self.spec.master_count {
            let log = self.log.new(o!("master" => index));
            let cx = NodeContext {
                log: &log,
                shell: &self.shell,
                target_version: &self.plan.target_version,
            };
            let outcome = upgrade_master(&cx, index, node_script).await?;
            session
                .nodes
                .push(NodeReport { node: NodeId::Master(index), outcome });
        }
        Ok(())
    }

    async fn upgrade_agents(
        &self,
        session: &mut UpgradeSession,
    ) -> Result<(), UpgradeError> {
        for agent in &session.agents {
            let log = self.log.new(o!(
                "agent" => agent.hostname.clone(),
                "os" => format!("{:?}", agent.os),
            ));
            let cx = NodeContext {
                log: &log,
                shell: &self.shell,
                target_version: &self.plan.target_version,
            };
            let upgrader =
                upgrader_for(agent, session.windows_node_script.as_deref());
            let outcome = upgrader.upgrade(&cx, agent).await?;
            session.nodes.push(NodeReport {
                node: NodeId::Agent(agent.hostname.clone()),
                outcome,
            });
        }
        Ok(())
    }
}

async fn upgrade_master(
    cx: &NodeContext<'_>,
    index: usize,
    node_script: &str,
) -> Result<NodeOutcome, UpgradeError> {
    let node = NodeId::Master(index);
    let installed =
        installed_version(cx, &node, AgentOs::Linux, "check version").await?;
    if installed == cx.target_version {
        info!(
            cx.log, "master is up to date; skipping";
            "version" => installed,
        );
        return Ok(NodeOutcome::AlreadyCurrent);
    }

    info!(cx.log, "upgrading master"; "from" => &installed);
    cx.shell
        .push_file(
            index,
            "push node upgrade script",
            NODE_UPGRADE_SCRIPT,
            node_script,
        )
        .await?;
    cx.shell
        .run(
            &node,
            "push node upgrade script",
            CommandClass::Check,
            &format!("chmod 755 ./{NODE_UPGRADE_SCRIPT}"),
        )
        .await?;
    let output = cx
        .shell
        .run(
            &node,
            "run node upgrade script",
            CommandClass::Install,
            &format!("sudo ./{NODE_UPGRADE_SCRIPT}"),
        )
        .await?;
    info!(
        cx.log, "node upgrade script finished";
        "stdout" => output.stdout,
    );
    confirm_version(cx, &node, AgentOs::Linux).await?;
    Ok(NodeOutcome::Upgraded)
}
