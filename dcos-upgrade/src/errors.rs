// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::discovery::DiscoveryError;
use crate::remote::NodeId;
use crate::remote::RemoteError;
use crate::resolver::VersionError;
use crate::scripts::ComposeError;
use dcos_remote_exec::ExecError;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Errors that end an upgrade run.
///
/// None of these are retried. Nodes upgraded before the error stay upgraded,
/// and a later run skips them.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("{step} failed on {node}")]
    RemoteExecutionFailed {
        node: NodeId,
        step: &'static str,
        #[source]
        source: ExecError,
    },

    #[error("{step} on {node} did not complete within {timeout:?}")]
    Timeout { node: NodeId, step: &'static str, timeout: Duration },

    #[error("upgrade cancelled before {step} on {node}")]
    Cancelled { node: NodeId, step: &'static str },

    #[error("master {index} is out of range for SSH port numbering")]
    MasterPortOutOfRange { index: usize },

    #[error("agent discovery failed")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to compose Windows bootstrap configuration")]
    Compose(#[from] ComposeError),

    #[error("{node} did not report a node upgrade script URL")]
    UpgradeURLNotFound { node: NodeId },

    #[error("version marker on {node} is malformed: {contents:?}")]
    VersionMarkerMalformed {
        node: NodeId,
        contents: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("{node} reports version {found} after upgrading to {expected}")]
    UpgradeNotConfirmed { node: NodeId, expected: String, found: String },

    #[error(
        "no Windows bootstrap address is configured and none follows \
         {linux_bootstrap_ip}"
    )]
    InvalidBootstrapIp { linux_bootstrap_ip: Ipv4Addr },

    #[error("upgrading Windows agents requires Windows admin credentials")]
    WindowsProfileMissing,
}

impl From<RemoteError> for UpgradeError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Exec { node, step, error } => {
                UpgradeError::RemoteExecutionFailed {
                    node,
                    step,
                    source: error,
                }
            }
            RemoteError::Timeout { node, step, timeout } => {
                UpgradeError::Timeout { node, step, timeout }
            }
            RemoteError::Cancelled { node, step } => {
                UpgradeError::Cancelled { node, step }
            }
            RemoteError::MasterPortOutOfRange { index } => {
                UpgradeError::MasterPortOutOfRange { index }
            }
        }
    }
}

impl UpgradeError {
    /// The node the run stopped at, if the error is tied to one.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            UpgradeError::RemoteExecutionFailed { node, .. }
            | UpgradeError::Timeout { node, .. }
            | UpgradeError::Cancelled { node, .. }
            | UpgradeError::UpgradeURLNotFound { node }
            | UpgradeError::VersionMarkerMalformed { node, .. }
            | UpgradeError::UpgradeNotConfirmed { node, .. } => Some(node),
            UpgradeError::Discovery(DiscoveryError::RosterUnavailable(
                error,
            )) => error.node(),
            UpgradeError::Version(_)
            | UpgradeError::MasterPortOutOfRange { .. }
            | UpgradeError::Discovery(_)
            | UpgradeError::Compose(_)
            | UpgradeError::InvalidBootstrapIp { .. }
            | UpgradeError::WindowsProfileMissing => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            UpgradeError::Cancelled { .. }
                | UpgradeError::Discovery(DiscoveryError::RosterUnavailable(
                    RemoteError::Cancelled { .. }
                ))
        )
    }
}
