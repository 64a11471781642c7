// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`RemoteExecutor`] implementation backed by `russh`.

use crate::CommandOutput;
use crate::Endpoint;
use crate::ExecError;
use crate::PrivateKey;
use crate::RemoteExecutor;
use async_trait::async_trait;
use russh::client;
use russh::ChannelMsg;
use russh::Disconnect;
use russh_keys::key;
use slog::debug;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;

/// SSH extended data stream number for stderr (RFC 4254 section 5.2).
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Opens one SSH session per command.
#[derive(Debug)]
pub struct SshExecutor {
    log: Logger,
    config: Arc<client::Config>,
}

impl SshExecutor {
    pub fn new(log: &Logger) -> Self {
        let log = log.new(o!("component" => "SshExecutor"));
        let config = client::Config {
            // The session is torn down as soon as the command completes; this
            // only matters for a peer that stops talking mid-command.
            inactivity_timeout: Some(Duration::from_secs(60 * 60)),
            ..Default::default()
        };
        Self { log, config: Arc::new(config) }
    }
}

/// Client handler that accepts whatever host key the server presents.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        user: &str,
        endpoint: &Endpoint,
        key: &PrivateKey,
        command: &str,
    ) -> Result<CommandOutput, ExecError> {
        let key_pair = russh_keys::decode_secret_key(key.expose_pem(), None)
            .map_err(ExecError::InvalidKey)?;

        let log = self.log.new(o!("endpoint" => endpoint.to_string()));
        debug!(log, "connecting");

        let mut session = client::connect(
            Arc::clone(&self.config),
            (endpoint.host.as_str(), endpoint.port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(|error| ExecError::Connect {
            endpoint: endpoint.clone(),
            error,
        })?;

        let accepted = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|error| ExecError::Auth {
                user: user.to_string(),
                endpoint: endpoint.clone(),
                error,
            })?;
        if !accepted {
            return Err(ExecError::AuthRejected {
                user: user.to_string(),
                endpoint: endpoint.clone(),
            });
        }

        let channel_err = |error| ExecError::Channel {
            endpoint: endpoint.clone(),
            error,
        };
        let mut channel =
            session.channel_open_session().await.map_err(channel_err)?;
        channel.exec(true, command).await.map_err(channel_err)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data);
                }
                ChannelMsg::ExtendedData { ref data, ext }
                    if ext == SSH_EXTENDED_DATA_STDERR =>
                {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status: status } => {
                    exit_status = Some(status);
                }
                _ => {}
            }
        }

        if let Err(error) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            // The command has already completed.
            warn!(log, "failed to disconnect cleanly"; "err" => %error);
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        match exit_status {
            Some(0) => {
                debug!(log, "command completed");
                Ok(CommandOutput { stdout, stderr })
            }
            Some(status) => {
                Err(ExecError::NonZeroExit { status, stdout, stderr })
            }
            None => {
                Err(ExecError::NoExitStatus { endpoint: endpoint.clone() })
            }
        }
    }
}
