//! SSH transport
//!
//! Connects to the remote host, uploads this binary as the agent over a
//! throwaway exec channel, then runs the agent on a second channel whose
//! stdio carries the frames. The channel is bridged to an in-memory pipe by
//! a pump task, which keeps the [`Channel`] around for `signal` and `close`.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_keys::key::PublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};

use sm_core::{TransportError, TunnelConfig};

use super::{Transport, TransportControl};
use crate::error::TunnelError;

/// In-memory pipe capacity between the channel pump and the forwarder
const PIPE_CAPACITY: usize = 256 * 1024;

/// Bytes moved per pump read
const PUMP_BUFFER_SIZE: usize = 32 * 1024;

/// Connect, authenticate, upload the agent and start it
pub async fn connect_ssh(config: &TunnelConfig, verbosity: u8) -> Result<Transport, TunnelError> {
    config.validate()?;
    let address = config.remote_address();

    let ssh_config = Arc::new(Config {
        inactivity_timeout: None,
        ..Default::default()
    });

    tracing::debug!("Connecting to {}", address);
    let mut session = tokio::time::timeout(
        config.connect_timeout,
        client::connect(ssh_config, address.as_str(), SshHandler),
    )
    .await
    .map_err(|_| TransportError::Timeout(address.clone()))?
    .map_err(|e| TransportError::Dial(format!("{}: {}", address, e)))?;

    authenticate(&mut session, config).await?;
    tracing::info!("Connected to {} as {}", address, config.username());

    upload_agent(&session, config).await?;

    let channel = session
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Session(format!("Failed to open channel: {}", e)))?;
    let command = config.agent_command(verbosity);
    tracing::debug!("Starting remote agent: {}", command);
    channel
        .exec(true, command)
        .await
        .map_err(|e| TransportError::Session(format!("Failed to start agent: {}", e)))?;

    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(4);
    tokio::spawn(pump(channel, remote, commands_rx));

    let (reader, writer) = tokio::io::split(local);
    Ok(Transport {
        reader: Box::new(reader),
        writer: Box::new(writer),
        control: Box::new(SshControl {
            commands: commands_tx,
            session: Mutex::new(session),
        }),
    })
}

/// Public key first when one is configured, then password
async fn authenticate(
    session: &mut Handle<SshHandler>,
    config: &TunnelConfig,
) -> Result<(), TransportError> {
    let user = config.username();

    if let Some(path) = &config.private_key {
        let key = russh_keys::load_secret_key(path, None).map_err(|e| {
            TransportError::PrivateKey {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;

        tracing::debug!("Trying public key authentication as '{}'", user);
        let accepted = session
            .authenticate_publickey(&user, Arc::new(key))
            .await
            .map_err(|e| TransportError::Session(format!("Authentication error: {}", e)))?;
        if accepted {
            return Ok(());
        }
        tracing::debug!("Public key rejected, falling back to password");
    }

    let password = match &config.password {
        Some(password) => password.clone(),
        None => prompt_password(&user, &config.remote_host).await?,
    };

    tracing::debug!("Trying password authentication as '{}'", user);
    let accepted = session
        .authenticate_password(&user, password)
        .await
        .map_err(|e| TransportError::Session(format!("Authentication error: {}", e)))?;

    if accepted {
        Ok(())
    } else {
        Err(TransportError::AuthenticationFailed(user))
    }
}

async fn prompt_password(user: &str, host: &str) -> Result<String, TransportError> {
    let prompt = format!("{}@{}'s password: ", user, host);
    tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
        .await
        .map_err(|e| TransportError::Session(e.to_string()))?
        .map_err(|e| TransportError::Session(format!("Failed to read password: {}", e)))
}

/// Copy the agent binary to the remote install directory
async fn upload_agent(
    session: &Handle<SshHandler>,
    config: &TunnelConfig,
) -> Result<(), TransportError> {
    let path = config
        .remote_executable()
        .map_err(|e| TransportError::Upload(e.to_string()))?;
    let binary = tokio::fs::read(&path)
        .await
        .map_err(|e| TransportError::Upload(format!("Cannot read {}: {}", path.display(), e)))?;

    tracing::info!(
        "Uploading agent ({} bytes) to {}",
        binary.len(),
        config.remote_agent_path
    );

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| TransportError::Upload(format!("Failed to open channel: {}", e)))?;
    channel
        .exec(true, config.upload_command())
        .await
        .map_err(|e| TransportError::Upload(e.to_string()))?;
    channel
        .data(&binary[..])
        .await
        .map_err(|e| TransportError::Upload(e.to_string()))?;
    channel
        .eof()
        .await
        .map_err(|e| TransportError::Upload(e.to_string()))?;

    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::ExtendedData { data, .. } => {
                tracing::warn!("Upload: {}", String::from_utf8_lossy(&data).trim_end());
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    match exit_status {
        Some(0) => {
            tracing::debug!("Agent uploaded");
            Ok(())
        }
        Some(status) => Err(TransportError::Upload(format!(
            "Upload command exited with status {}",
            status
        ))),
        None => Err(TransportError::Upload(
            "Upload channel closed without an exit status".to_string(),
        )),
    }
}

/// Requests for the pump task
#[derive(Debug)]
enum ChannelCommand {
    Signal(Sig),
    Close,
}

/// Move bytes between the agent channel and the in-memory pipe
async fn pump(
    mut channel: Channel<Msg>,
    pipe: DuplexStream,
    mut commands: mpsc::Receiver<ChannelCommand>,
) {
    let (mut pipe_reader, mut pipe_writer) = tokio::io::split(pipe);
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut sending = true;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if pipe_writer.write_all(&data).await.is_err() {
                        tracing::debug!("Forwarder side of the pipe is gone");
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    // Remote agent logs
                    let mut stderr = tokio::io::stderr();
                    let _ = stderr.write_all(&data).await;
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::info!("Remote agent exited with status {}", exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    tracing::info!("Remote agent killed by signal {:?}", signal_name);
                }
                Some(ChannelMsg::Eof) => {
                    tracing::debug!("Remote agent closed its output");
                    let _ = pipe_writer.shutdown().await;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },

            read = pipe_reader.read(&mut buf), if sending => match read {
                Ok(0) | Err(_) => {
                    sending = false;
                    if let Err(e) = channel.eof().await {
                        tracing::debug!("Failed to send EOF to agent: {}", e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        tracing::warn!("Failed to write to SSH channel: {}", e);
                        break;
                    }
                }
            },

            command = commands.recv() => match command {
                Some(ChannelCommand::Signal(signal)) => {
                    if let Err(e) = channel.signal(signal).await {
                        tracing::warn!("Failed to signal remote agent: {}", e);
                    }
                }
                Some(ChannelCommand::Close) | None => {
                    let _ = channel.close().await;
                    break;
                }
            },
        }
    }

    let _ = pipe_writer.shutdown().await;
    tracing::debug!("SSH channel pump stopped");
}

struct SshControl {
    commands: mpsc::Sender<ChannelCommand>,
    session: Mutex<Handle<SshHandler>>,
}

#[async_trait]
impl TransportControl for SshControl {
    async fn signal_terminate(&self) -> Result<(), TransportError> {
        self.commands
            .send(ChannelCommand::Signal(Sig::TERM))
            .await
            .map_err(|_| TransportError::RemoteDead)
    }

    async fn force_close(&self) -> Result<(), TransportError> {
        let _ = self.commands.send(ChannelCommand::Close).await;
        self.session
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| TransportError::Session(e.to_string()))
    }
}

/// SSH client handler
struct SshHandler;

#[async_trait]
impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Host keys are not verified; the fingerprint is logged for the user
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::warn!(
            "Accepting server host key {} without verification",
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}
