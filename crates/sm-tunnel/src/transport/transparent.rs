//! Subprocess transport
//!
//! Runs a local command and uses its stdin/stdout as the transport, with
//! stderr inherited. Typically the command is something like
//! `ssh host ./sshmux agent`, which leaves SSH itself to the system client.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use sm_core::TransportError;

use super::{Transport, TransportControl};
use crate::error::TunnelError;

/// Spawn `command[0]` with the remaining elements as arguments
pub fn spawn_transparent(command: &[String]) -> Result<Transport, TunnelError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| TransportError::Spawn("No command given".to_string()))?;

    tracing::debug!("Spawning transport process: {:?}", command);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TransportError::Spawn(format!("{}: {}", program, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::Spawn("stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Spawn("stdout not captured".to_string()))?;

    let pid = child.id();
    tracing::info!("Transport process {} started (pid {:?})", program, pid);

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(supervise(child, kill_rx));

    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        control: Box::new(ProcessControl {
            pid,
            kill: Mutex::new(Some(kill_tx)),
        }),
    })
}

/// Reap the child, killing it on request
async fn supervise(mut child: Child, kill: oneshot::Receiver<()>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Kill failed: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => tracing::info!("Transport process exited: {}", status),
        Err(e) => tracing::warn!("Failed to wait for transport process: {}", e),
    }
}

struct ProcessControl {
    pid: Option<u32>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessControl {
    async fn kill(&self) -> Result<(), TransportError> {
        match self.kill.lock().await.take() {
            Some(kill) => kill.send(()).map_err(|_| TransportError::RemoteDead),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransportControl for ProcessControl {
    #[cfg(unix)]
    async fn signal_terminate(&self) -> Result<(), TransportError> {
        let pid = self.pid.ok_or(TransportError::RemoteDead)?;
        // SAFETY: kill(2) has no memory-safety preconditions
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result == 0 {
            Ok(())
        } else {
            Err(TransportError::RemoteDead)
        }
    }

    #[cfg(not(unix))]
    async fn signal_terminate(&self) -> Result<(), TransportError> {
        self.kill().await
    }

    async fn force_close(&self) -> Result<(), TransportError> {
        self.kill().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn command(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cat_echoes_bytes() {
        let mut transport = spawn_transparent(&command(&["cat"])).unwrap();

        transport.writer.write_all(b"PING").await.unwrap();
        transport.writer.flush().await.unwrap();

        let mut buf = [0u8; 4];
        transport.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");
    }

    #[tokio::test]
    async fn test_closing_stdin_ends_stdout() {
        let mut transport = spawn_transparent(&command(&["cat"])).unwrap();

        drop(transport.writer);
        let mut rest = Vec::new();
        transport.reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_signal_terminate_stops_process() {
        let mut transport = spawn_transparent(&command(&["sleep", "30"])).unwrap();

        transport.control.signal_terminate().await.unwrap();
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), transport.reader.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_force_close_kills_process() {
        let mut transport = spawn_transparent(&command(&["sleep", "30"])).unwrap();

        transport.control.force_close().await.unwrap();
        transport.control.force_close().await.unwrap();
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), transport.reader.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        assert!(matches!(
            spawn_transparent(&[]),
            Err(TunnelError::Transport(TransportError::Spawn(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_rejected() {
        let result = spawn_transparent(&command(&["/nonexistent/sshmux-test-binary"]));
        assert!(matches!(
            result,
            Err(TunnelError::Transport(TransportError::Spawn(_)))
        ));
    }
}
