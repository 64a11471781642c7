// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::catalog::VersionCatalog;
use crate::cluster::record_orchestrator_version;
use crate::cluster::ClusterSpec;
use crate::config::Config;
use crate::orchestrator::UpgradeOrchestrator;
use crate::orchestrator::UpgradePlan;
use crate::remote::ClusterShell;
use crate::remote::CommandTimeouts;
use crate::remote::ShellSettings;
use crate::resolver::VersionProfile;
use crate::resolver::VersionResolver;
use anyhow::ensure;
use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use dcos_remote_exec::PrivateKey;
use dcos_remote_exec::SshExecutor;
use serde::Serialize;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upgrade DC/OS clusters deployed on Azure.
#[derive(Debug, Parser)]
#[command(version)]
pub struct DcosUpgradeApp {
    /// Path to the tool configuration file (TOML)
    #[clap(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    subcommand: DcosUpgradeCommand,
}

impl DcosUpgradeApp {
    /// Read the tool configuration named by `--config`, or the defaults.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Ok(Config::from_file(path)?),
            None => Ok(Config::default()),
        }
    }

    pub fn setup_log(config: &Config) -> Result<Logger> {
        config
            .log
            .to_logger("dcos-upgrade")
            .context("failed to initialize logging")
    }

    /// Executes the app.
    pub async fn exec(self, config: &Config, log: &Logger) -> Result<()> {
        match self.subcommand {
            DcosUpgradeCommand::Upgrade(opts) => opts.exec(config, log).await,
            DcosUpgradeCommand::Orchestrators(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum DcosUpgradeCommand {
    /// Upgrade a deployed cluster to a newer DC/OS release.
    Upgrade(UpgradeOpts),
    /// List supported DC/OS versions and their upgrade paths.
    Orchestrators(OrchestratorsOpts),
}

#[derive(Debug, Args)]
struct UpgradeOpts {
    /// Directory holding the cluster's apimodel.json
    #[clap(long)]
    deployment_dir: Utf8PathBuf,

    /// DC/OS version to upgrade to
    #[clap(long)]
    upgrade_version: String,

    /// Azure location of the cluster
    #[clap(long)]
    location: String,

    /// Azure resource group of the cluster
    #[clap(long)]
    resource_group: String,

    /// Key used to reach master 0 [default: <deployment-dir>/id_rsa]
    #[clap(long)]
    ssh_private_key_path: Option<Utf8PathBuf>,

    /// Override for the Linux installer URL
    #[clap(long)]
    linux_bootstrap_url: Option<String>,

    /// Override for the Windows installer URL
    #[clap(long)]
    windows_bootstrap_url: Option<String>,
}

impl UpgradeOpts {
    async fn exec(self, config: &Config, log: &Logger) -> Result<()> {
        let spec = ClusterSpec::from_deployment_dir(&self.deployment_dir)?;
        let location = normalize_location(&self.location);
        ensure!(
            location == normalize_location(&spec.location),
            "--location {location} does not match the API model location {}",
            spec.location,
        );

        let current = spec.orchestrator_version.clone();
        if current == self.upgrade_version {
            println!("cluster is already at DC/OS {current}; nothing to do");
            return Ok(());
        }
        let resolver = VersionResolver::new(VersionCatalog::builtin());
        let plan = UpgradePlan::new(
            &resolver,
            &current,
            &self.upgrade_version,
            self.linux_bootstrap_url,
            self.windows_bootstrap_url,
        )?;

        let key_path = self
            .ssh_private_key_path
            .unwrap_or_else(|| self.deployment_dir.join("id_rsa"));
        let key = PrivateKey::from_file(&key_path)?;

        let log = log.new(o!(
            "resource_group" => self.resource_group,
            "location" => location,
        ));
        let settings = ShellSettings {
            user: config.ssh.user.clone(),
            master_host: spec.master_fqdn(),
            master_base_port: config.ssh.master_base_port,
            cluster_key_path: config.ssh.cluster_key_path.clone(),
            hop_connect_timeout: Duration::from_secs(
                config.ssh.hop_connect_timeout_secs,
            ),
            timeouts: CommandTimeouts {
                check: config.timeouts.check(),
                install: config.timeouts.install(),
            },
        };
        let cancel = CancellationToken::new();
        let shell = ClusterShell::new(
            &log,
            Arc::new(SshExecutor::new(&log)),
            key,
            settings,
            cancel.clone(),
        );
        let ctrl_c = tokio::spawn(cancel_on_ctrl_c(log.clone(), cancel));

        info!(
            log, "starting upgrade";
            "from" => &plan.current_version,
            "to" => &plan.target_version,
            "master_host" => spec.master_fqdn(),
        );
        let orchestrator = UpgradeOrchestrator::new(
            &log,
            spec,
            plan,
            shell,
            config.windows.agent_mode,
        );
        let result = orchestrator.run().await;
        ctrl_c.abort();
        let report = result.context("upgrade failed")?;

        record_orchestrator_version(&self.deployment_dir, &report.to_version)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

async fn cancel_on_ctrl_c(log: Logger, cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!(log, "interrupted; stopping after the running command");
        cancel.cancel();
    }
}

/// Azure accepts locations with any casing and spacing ("West US 2").
fn normalize_location(location: &str) -> String {
    location
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Args)]
struct OrchestratorsOpts {
    /// Only show this version
    #[clap(long)]
    version: Option<String>,
}

#[derive(Serialize)]
struct OrchestratorsResponse {
    orchestrators: Vec<VersionProfile>,
}

impl OrchestratorsOpts {
    fn exec(self) -> Result<()> {
        let resolver = VersionResolver::new(VersionCatalog::builtin());
        let response = OrchestratorsResponse {
            orchestrators: resolver.version_profiles(self.version.as_deref())?,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}
