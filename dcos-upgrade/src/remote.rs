// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Addressing cluster nodes through the master's public SSH endpoint.
//!
//! Only the masters are reachable from outside the cluster: master `i`
//! listens on the shared master DNS name at `master_base_port + i`. Every
//! other node (bootstrap nodes and agents) is reached by running `ssh` or
//! `scp` on master 0 with the cluster key that the bootstrap phase installs
//! there.

use dcos_remote_exec::CommandOutput;
use dcos_remote_exec::Endpoint;
use dcos_remote_exec::ExecError;
use dcos_remote_exec::PrivateKey;
use dcos_remote_exec::RemoteExecutor;
use slog::debug;
use slog::o;
use slog::Logger;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Heredoc delimiter used when writing files on master 0.
const HEREDOC_DELIMITER: &str = "DCOS_UPGRADE_EOF";

/// A node of the cluster, as named in logs and errors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeId {
    Master(usize),
    LinuxBootstrap(Ipv4Addr),
    WindowsBootstrap(Ipv4Addr),
    Agent(String),
}

enum Route {
    Direct(usize),
    /// Through master 0 to the given address.
    Hop(String),
}

impl NodeId {
    fn route(&self) -> Route {
        match self {
            NodeId::Master(i) => Route::Direct(*i),
            NodeId::LinuxBootstrap(ip) | NodeId::WindowsBootstrap(ip) => {
                Route::Hop(ip.to_string())
            }
            NodeId::Agent(hostname) => Route::Hop(hostname.clone()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Master(i) => write!(f, "master {i}"),
            NodeId::LinuxBootstrap(ip) => write!(f, "bootstrap node {ip}"),
            NodeId::WindowsBootstrap(ip) => {
                write!(f, "Windows bootstrap node {ip}")
            }
            NodeId::Agent(hostname) => write!(f, "agent {hostname}"),
        }
    }
}

/// Distinguishes quick checks from long-running installation steps; each
/// class has its own time limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandClass {
    Check,
    Install,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandTimeouts {
    pub check: Duration,
    pub install: Duration,
}

impl CommandTimeouts {
    fn get(&self, class: CommandClass) -> Duration {
        match class {
            CommandClass::Check => self.check,
            CommandClass::Install => self.install,
        }
    }
}

/// SSH settings shared by every remote call of one run.
#[derive(Clone, Debug)]
pub struct ShellSettings {
    pub user: String,
    pub master_host: String,
    pub master_base_port: u16,
    /// Location of the cluster key on master 0, relative to the user's home.
    pub cluster_key_path: String,
    pub hop_connect_timeout: Duration,
    pub timeouts: CommandTimeouts,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{step} failed on {node}")]
    Exec {
        node: NodeId,
        step: &'static str,
        #[source]
        error: ExecError,
    },

    #[error("{step} on {node} did not complete within {timeout:?}")]
    Timeout { node: NodeId, step: &'static str, timeout: Duration },

    #[error("cancelled before {step} on {node}")]
    Cancelled { node: NodeId, step: &'static str },

    #[error("master {index} is out of range for SSH port numbering")]
    MasterPortOutOfRange { index: usize },
}

impl RemoteError {
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            RemoteError::Exec { node, .. }
            | RemoteError::Timeout { node, .. }
            | RemoteError::Cancelled { node, .. } => Some(node),
            RemoteError::MasterPortOutOfRange { .. } => None,
        }
    }
}

/// Runs commands on cluster nodes, routing through master 0 as needed.
///
/// Every call checks the cancellation token first and is bounded by the
/// timeout of its [`CommandClass`]. A command that is already running is
/// never interrupted by cancellation.
#[derive(Clone, Debug)]
pub struct ClusterShell {
    log: Logger,
    executor: Arc<dyn RemoteExecutor>,
    key: PrivateKey,
    settings: ShellSettings,
    cancel: CancellationToken,
}

impl ClusterShell {
    pub fn new(
        log: &Logger,
        executor: Arc<dyn RemoteExecutor>,
        key: PrivateKey,
        settings: ShellSettings,
        cancel: CancellationToken,
    ) -> Self {
        let log = log.new(o!(
            "component" => "ClusterShell",
            "master_host" => settings.master_host.clone(),
        ));
        Self { log, executor, key, settings, cancel }
    }

    pub fn settings(&self) -> &ShellSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn master_endpoint(&self, index: usize) -> Result<Endpoint, RemoteError> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|i| self.settings.master_base_port.checked_add(i))
            .ok_or(RemoteError::MasterPortOutOfRange { index })?;
        Ok(Endpoint::new(self.settings.master_host.clone(), port))
    }

    fn hop_options(&self) -> String {
        format!(
            "-i {} -o ConnectTimeout={} -o StrictHostKeyChecking=no",
            self.settings.cluster_key_path,
            self.settings.hop_connect_timeout.as_secs(),
        )
    }

    /// Run `command` on `node`.
    pub async fn run(
        &self,
        node: &NodeId,
        step: &'static str,
        class: CommandClass,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        let (master, command) = match node.route() {
            Route::Direct(i) => (i, command.to_owned()),
            Route::Hop(target) => (
                0,
                format!("ssh {} {target} {command}", self.hop_options()),
            ),
        };
        self.run_on_master(node, master, step, class, &command).await
    }

    /// Write `contents` to `file_name` in the home directory of `master`.
    pub async fn push_file(
        &self,
        master: usize,
        step: &'static str,
        file_name: &str,
        contents: &str,
    ) -> Result<(), RemoteError> {
        let command = format!(
            "cat << '{HEREDOC_DELIMITER}' > {file_name}\n\
             {contents}\n\
             {HEREDOC_DELIMITER}\n"
        );
        let node = NodeId::Master(master);
        self.run_on_master(&node, master, step, CommandClass::Check, &command)
            .await
            .map(|_| ())
    }

    /// Install the key this shell authenticates with on master 0, so that
    /// master 0 can reach the rest of the cluster.
    pub async fn install_cluster_key(&self) -> Result<(), RemoteError> {
        let step = "install cluster key";
        let path = &self.settings.cluster_key_path;
        self.push_file(0, step, path, self.key.expose_pem().trim_end())
            .await?;
        self.run(
            &NodeId::Master(0),
            step,
            CommandClass::Check,
            &format!("chmod 600 {path}"),
        )
        .await
        .map(|_| ())
    }

    /// Copy `source` from master 0's home directory to `dest` on `node`.
    ///
    /// `dest` is a path on the target in the form `scp` expects after the
    /// `host:` separator.
    pub async fn copy_from_master(
        &self,
        node: &NodeId,
        step: &'static str,
        source: &str,
        dest: &str,
    ) -> Result<(), RemoteError> {
        let Route::Hop(target) = node.route() else {
            // Masters receive files directly through `push_file`.
            return Ok(());
        };
        let command =
            format!("scp {} {source} {target}:{dest}", self.hop_options());
        self.run_on_master(node, 0, step, CommandClass::Check, &command)
            .await
            .map(|_| ())
    }

    async fn run_on_master(
        &self,
        node: &NodeId,
        master: usize,
        step: &'static str,
        class: CommandClass,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled { node: node.clone(), step });
        }
        let endpoint = self.master_endpoint(master)?;
        let timeout = self.settings.timeouts.get(class);
        debug!(
            self.log, "running remote command";
            "node" => %node,
            "step" => step,
            "endpoint" => %endpoint,
        );

        let run = self.executor.run(
            &self.settings.user,
            &endpoint,
            &self.key,
            command,
        );
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => {
                Err(RemoteError::Exec { node: node.clone(), step, error })
            }
            Err(_) => {
                Err(RemoteError::Timeout { node: node.clone(), step, timeout })
            }
        }
    }
}
