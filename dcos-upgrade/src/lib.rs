// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rolling upgrades of DC/OS clusters deployed on Azure.
//!
//! The library computes which DC/OS versions a cluster may move to
//! ([`VersionResolver`]) and drives the upgrade itself
//! ([`UpgradeOrchestrator`]): bootstrap node setup, then masters, then
//! agents, all over SSH through the cluster's first master.

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod discovery;
mod dispatch;
pub mod errors;
pub mod orchestrator;
pub mod remote;
pub mod resolver;
pub mod scripts;

#[cfg(test)]
mod fake_cluster;
#[cfg(test)]
mod test_helpers;

pub use catalog::VersionCatalog;
pub use cluster::ClusterSpec;
pub use config::Config;
pub use config::WindowsAgentMode;
pub use dispatch::DcosUpgradeApp;
pub use errors::UpgradeError;
pub use orchestrator::UpgradeOrchestrator;
pub use orchestrator::UpgradePlan;
pub use orchestrator::UpgradeReport;
pub use resolver::VersionResolver;
