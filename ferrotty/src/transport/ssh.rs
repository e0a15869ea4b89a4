//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use nix::sys::signal::Signal;
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg, Sig};
use secrecy::ExposeSecret;

use super::Transport;
use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use crate::error::{ChannelError, Result, TransportError};
use crate::session::{TargetStatus, Termination};

/// How long to wait for exit-status / exit-signal after the remote EOF.
const EXIT_REPORT_GRACE: Duration = Duration::from_secs(1);

/// SSH transport: one session channel with a PTY on a russh client.
///
/// The server reports how the remote command ended, so status inspection
/// applies even though there is no local process.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// The session channel carrying the conversation.
    channel: Channel<Msg>,

    /// Configuration used for this connection.
    config: SshConfig,

    /// Last reported state of the remote command.
    status: TargetStatus,

    /// Whether the remote side sent EOF or closed the channel.
    eof: bool,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.config.socket_addr())
            .field("status", &self.status)
            .field("eof", &self.eof)
            .finish()
    }
}

impl SshTransport {
    /// Connect, authenticate and open the session channel.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // check_server_key may have stored a more precise reason
            let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            stored.unwrap_or(TransportError::Ssh(e))
        })?;

        Self::authenticate(&mut session, &config).await?;
        let channel = Self::open_channel(&session, &config).await?;
        debug!("ssh channel open on {}", config.socket_addr());

        Ok(Self {
            session,
            channel,
            config,
            status: TargetStatus::Running,
            eof: false,
        })
    }

    /// Open the session channel with a PTY, then a shell or the command.
    async fn open_channel(session: &Handle<SshHandler>, config: &SshConfig) -> Result<Channel<Msg>> {
        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                config.terminal_width,
                config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        match &config.command {
            Some(command) => channel
                .exec(true, command.as_str())
                .await
                .map_err(TransportError::Ssh)?,
            None => channel
                .request_shell(true)
                .await
                .map_err(TransportError::Ssh)?,
        }

        Ok(channel)
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Record an exit report from the server.
    fn record(&mut self, msg: &ChannelMsg) {
        match msg {
            ChannelMsg::ExitStatus { exit_status } => {
                let code = i32::try_from(*exit_status).unwrap_or(i32::MAX);
                self.status = TargetStatus::Terminated(Termination::Exited(code));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => match signal_number(signal_name) {
                Some(signal) => {
                    self.status = TargetStatus::Terminated(Termination::Signaled(signal));
                }
                None => {
                    warn!("remote reported unknown signal {:?}", signal_name);
                    self.status = TargetStatus::Unknown;
                }
            },
            _ => {}
        }
    }

    /// After EOF, wait briefly for the exit report and the channel close.
    async fn drain_exit_report(&mut self) {
        let drained = tokio::time::timeout(EXIT_REPORT_GRACE, async {
            while let Some(msg) = self.channel.wait().await {
                self.record(&msg);
                if matches!(msg, ChannelMsg::Close) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("no channel close within {:?} of EOF", EXIT_REPORT_GRACE);
        }
    }
}

/// Map an SSH signal name (`SEGV`, `KILL`, ...) to the local signal number.
fn signal_number(sig: &Sig) -> Option<i32> {
    let name = format!("{sig:?}");
    let name = name
        .strip_prefix("Custom(")
        .map(|inner| inner.trim_end_matches(')').trim_matches('"'))
        .unwrap_or(&name);
    Signal::from_str(&format!("SIG{name}")).ok().map(|s| s as i32)
}

impl Transport for SshTransport {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }

        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { ref data })
                | Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    return Ok(Some(Bytes::copy_from_slice(&data[..])));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.eof = true;
                    self.drain_exit_report().await;
                    return Ok(None);
                }
                Some(msg) => self.record(&msg),
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.eof {
            return Err(ChannelError::Closed.into());
        }
        self.channel
            .data(data)
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }

    fn status(&mut self) -> Result<TargetStatus> {
        Ok(self.status)
    }

    fn inspects_status(&self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<()> {
        if !self.eof {
            if let Err(e) = self.channel.eof().await {
                debug!("eof on close: {}", e);
            }
        }
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// Host key policy for one connection attempt.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Why the key was refused, for `connect` to report instead of russh's
    /// generic `UnknownKey`.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    fn verify(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        let (host, port) = (self.host.as_str(), self.port);
        let known = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
            None => russh::keys::check_known_hosts(host, port, key),
        };

        match known {
            Ok(true) => Ok(()),
            Ok(false) => match self.host_key_verification {
                HostKeyVerification::Strict => Err(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port,
                }),
                _ => {
                    let learned = match &self.known_hosts_path {
                        Some(path) => russh::keys::known_hosts::learn_known_hosts_path(
                            host, port, key, path,
                        ),
                        None => russh::keys::known_hosts::learn_known_hosts(host, port, key),
                    };
                    if let Err(e) = learned {
                        warn!("could not record host key for {}:{}: {}", host, port, e);
                    }
                    Ok(())
                }
            },
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if let HostKeyVerification::Disabled = self.host_key_verification {
            return Ok(true);
        }
        match self.verify(server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("refusing host key: {}", e);
                if let Ok(mut slot) = self.host_key_error.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}
