// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution of shell commands on remote cluster nodes.
//!
//! The [`RemoteExecutor`] trait is the seam between the upgrade engine and
//! the transport. Each call to [`RemoteExecutor::run`] is a single blocking
//! round trip: one authenticated session, one command, captured output. There
//! is no connection reuse and no retry at this layer; callers that want either
//! must build it above this trait.

mod ssh;

pub use ssh::SshExecutor;

use async_trait::async_trait;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// A host and port that accepts SSH connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An OpenSSH-format private key, held in memory that is wiped on drop.
#[derive(Clone)]
pub struct PrivateKey(Zeroizing<String>);

impl PrivateKey {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(Zeroizing::new(pem.into()))
    }

    /// Read a private key from `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, KeyFileError> {
        let pem = std::fs::read_to_string(path).map_err(|error| {
            KeyFileError { path: path.to_owned(), error }
        })?;
        Ok(Self::new(pem))
    }

    /// The PEM text of the key.
    ///
    /// The upgrade engine needs this to install the key on the first master
    /// so that it can hop to nodes that are not directly reachable.
    pub fn expose_pem(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

#[derive(Debug, Error)]
#[error("failed to read private key from {path}")]
pub struct KeyFileError {
    pub path: Utf8PathBuf,
    #[source]
    pub error: std::io::Error,
}

/// Output captured from a command that exited successfully.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to decode private key")]
    InvalidKey(#[source] russh_keys::Error),

    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        error: russh::Error,
    },

    #[error("authentication as {user} to {endpoint} failed")]
    Auth {
        user: String,
        endpoint: Endpoint,
        #[source]
        error: russh::Error,
    },

    #[error("{endpoint} rejected public key for {user}")]
    AuthRejected { user: String, endpoint: Endpoint },

    #[error("session channel to {endpoint} failed")]
    Channel {
        endpoint: Endpoint,
        #[source]
        error: russh::Error,
    },

    #[error("command exited with status {status}: {}", .stderr.trim())]
    NonZeroExit { status: u32, stdout: String, stderr: String },

    #[error("channel to {endpoint} closed without an exit status")]
    NoExitStatus { endpoint: Endpoint },
}

impl ExecError {
    /// Standard error captured from the remote command, if it ran at all.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecError::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Runs a command on a remote host.
///
/// Host keys are not verified: target hosts are freshly provisioned and not
/// known to any trust store. Verification, where wanted, belongs in a wrapper
/// implementation of this trait.
#[async_trait]
pub trait RemoteExecutor: fmt::Debug + Send + Sync {
    /// Run `command` as `user` on `endpoint`, authenticating with `key`.
    ///
    /// Returns an error for transport failures and for any non-zero exit.
    async fn run(
        &self,
        user: &str,
        endpoint: &Endpoint,
        key: &PrivateKey,
        command: &str,
    ) -> Result<CommandOutput, ExecError>;
}
