//! Logical connection
//!
//! A [`Client`] wraps one real socket carried over the tunnel. Its read
//! loop turns socket reads into `Data` frames and finishes the local half of
//! the close handshake; the dispatcher writes peer data into it and drives
//! the remote half.
//!
//! # States
//!
//! - `Active`: both directions flowing
//! - `HalfClosedLocal`: our socket hit EOF, `CloseRequest` sent, waiting for `CloseAck`
//! - `Terminated`: socket closed, nothing more will be read or written

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sm_protocol::{ConnectionId, Frame};

use crate::error::ClientError;

/// Read half of a logical connection's socket
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a logical connection's socket
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bytes read from a socket per `Data` frame, at most
pub const DEFAULT_READ_BUFFER_SIZE: usize = 32 * 1024;

/// Lifecycle state of a logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Data flowing in both directions
    Active,
    /// Local socket finished, waiting for the peer's acknowledgment
    HalfClosedLocal,
    /// Socket closed
    Terminated,
}

/// Why the read loop was woken from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wakeup {
    /// Peer sent `CloseRequest`; the loop answers with `CloseAck`
    PeerClosed,
    /// Connection released; `error` marks a local write failure
    Eof { error: bool },
}

struct Inner {
    state: ClientState,
    wakeup: Option<Wakeup>,
    reading: bool,
}

/// One logical connection carried over the tunnel
pub struct Client {
    id: ConnectionId,
    inner: Mutex<Inner>,
    reader: Mutex<Option<BoxedReader>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Wakes a read loop blocked on the socket or on a full queue
    eof: CancellationToken,
    outbound: mpsc::Sender<Frame>,
}

impl Client {
    /// Wrap a socket split into its two halves
    pub fn new(
        id: ConnectionId,
        reader: BoxedReader,
        writer: BoxedWriter,
        outbound: mpsc::Sender<Frame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                state: ClientState::Active,
                wakeup: None,
                reading: false,
            }),
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            eof: CancellationToken::new(),
            outbound,
        })
    }

    /// Connection identifier
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        self.inner().state
    }

    /// True once the connection is half-closed or terminated
    pub fn is_dead(&self) -> bool {
        self.state() != ClientState::Active
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the read loop on its own task.
    ///
    /// Returns `None` if the loop was already started.
    pub fn spawn_read_loop(self: &Arc<Self>, buffer_size: usize) -> Option<JoinHandle<()>> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.inner().reading = true;

        let client = Arc::clone(self);
        Some(tokio::spawn(async move {
            client.read_loop(reader, buffer_size.max(1)).await;
        }))
    }

    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader, buffer_size: usize) {
        let mut buf = vec![0u8; buffer_size];

        let hit_eof = loop {
            let read = tokio::select! {
                biased;
                _ = self.eof.cancelled() => break false,
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    tracing::debug!("Connection {} reached EOF", self.id);
                    break true;
                }
                Ok(n) => {
                    let frame = Frame::data(self.id.clone(), Bytes::copy_from_slice(&buf[..n]));
                    tracing::trace!("Read {} bytes from connection {}", n, self.id);

                    // Blocks while the outbound queue is full
                    tokio::select! {
                        biased;
                        _ = self.eof.cancelled() => break false,
                        sent = self.outbound.send(frame) => {
                            if sent.is_err() {
                                tracing::debug!("Outbound queue closed, stopping reader for {}", self.id);
                                break false;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!("Read error on connection {}: {}", self.id, e);
                    break true;
                }
            }
        };
        drop(reader);

        let frame = {
            let mut inner = self.inner();
            inner.reading = false;
            match inner.wakeup {
                Some(Wakeup::PeerClosed) => Some(Frame::close_ack(self.id.clone())),
                Some(Wakeup::Eof { .. }) => None,
                None if hit_eof => {
                    if inner.state == ClientState::Active {
                        inner.state = ClientState::HalfClosedLocal;
                    }
                    Some(Frame::close_request(self.id.clone()))
                }
                None => None,
            }
        };

        if let Some(frame) = frame {
            tracing::debug!("Connection {} read loop done, sending {:?}", self.id, frame.message);
            if self.outbound.send(frame).await.is_err() {
                tracing::debug!("Outbound queue closed before {} finished closing", self.id);
            }
        }
    }

    /// Write peer data to the socket
    pub async fn write(&self, payload: &[u8]) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| ClientError::Closed(self.id.clone()))?;

        let result = tokio::select! {
            biased;
            _ = self.eof.cancelled() => return Err(ClientError::Closed(self.id.clone())),
            result = write_and_flush(writer, payload) => result,
        };

        result.map_err(|source| ClientError::Write {
            id: self.id.clone(),
            source,
        })
    }

    /// Close the socket in response to the peer's `CloseRequest`.
    ///
    /// Returns true when the read loop is still running and will send the
    /// `CloseAck` itself; false means the caller must acknowledge.
    pub async fn close(&self) -> bool {
        let loop_acks = {
            let mut inner = self.inner();
            if inner.wakeup.is_none() {
                inner.wakeup = Some(Wakeup::PeerClosed);
            }
            inner.state = ClientState::Terminated;
            inner.reading && inner.wakeup == Some(Wakeup::PeerClosed)
        };

        self.eof.cancel();
        self.shutdown_writer().await;
        tracing::debug!("Connection {} closed by peer", self.id);
        loop_acks
    }

    /// Forcibly close the socket and stop the read loop. Idempotent.
    pub async fn terminate(&self) {
        let was = {
            let mut inner = self.inner();
            if inner.wakeup.is_none() {
                inner.wakeup = Some(Wakeup::Eof { error: false });
            }
            std::mem::replace(&mut inner.state, ClientState::Terminated)
        };

        self.eof.cancel();
        self.shutdown_writer().await;
        if was != ClientState::Terminated {
            tracing::debug!("Connection {} terminated", self.id);
        }
    }

    /// Wake the read loop: the connection is gone.
    ///
    /// `is_error` separates a local write failure from a graceful release;
    /// both end the same way.
    pub fn notify_eof(&self, is_error: bool) {
        {
            let mut inner = self.inner();
            if inner.wakeup.is_none() {
                inner.wakeup = Some(Wakeup::Eof { error: is_error });
            }
        }

        if is_error {
            tracing::warn!("Connection {} dropped after a local write failure", self.id);
        } else {
            tracing::debug!("Connection {} released", self.id);
        }
        self.eof.cancel();
    }

    async fn shutdown_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!("Shutdown of {} failed: {}", self.id, e);
            }
        }
    }
}

async fn write_and_flush(writer: &mut BoxedWriter, payload: &[u8]) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.flush().await
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
