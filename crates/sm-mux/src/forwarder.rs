//! The forwarder: frame queues, transport reader/writer and dispatcher
//!
//! ```text
//! socket ─▶ Client read loop ─▶ outbound queue ─▶ writer task ─▶ transport
//! transport ─▶ reader task ─▶ inbound queue ─▶ dispatcher ─▶ Registry ─▶ Client
//! ```
//!
//! The writer task is the only writer of the transport and the reader task
//! its only reader, so frames never interleave on the wire. Both queues are
//! bounded: a slow transport blocks every read loop, a slow socket blocks
//! the transport reader. That is the only flow control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use sm_core::TunnelConfig;
use sm_protocol::{ConnectionId, Frame, FrameCodec, Message};

use crate::client::{BoxedReader, BoxedWriter, Client, ClientState, DEFAULT_READ_BUFFER_SIZE};
use crate::dialer::{Dialer, Role};
use crate::error::{ClientError, RegistryError};
use crate::keepalive::run_keepalive;
use crate::registry::Registry;

/// Tunables for one forwarder
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    /// Capacity of the inbound and outbound queues
    pub queue_capacity: usize,
    /// Interval between keepalive frames
    pub keepalive_interval: Duration,
    /// Socket read size per `Data` frame
    pub read_buffer_size: usize,
    /// Ceiling on concurrent logical connections
    pub max_connections: Option<usize>,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            keepalive_interval: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_connections: None,
        }
    }
}

impl From<&TunnelConfig> for ForwarderSettings {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            keepalive_interval: config.keepalive_interval,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_connections: config.max_connections,
        }
    }
}

/// State shared by every task of one forwarder
#[derive(Clone)]
pub struct ForwarderContext {
    outbound: mpsc::Sender<Frame>,
    registry: Arc<Registry>,
    open: Arc<AtomicBool>,
    /// Fired once the transport reader or writer has stopped
    closed: CancellationToken,
    /// Asks the writer to flush and close the transport
    shutdown: CancellationToken,
    /// Fired when the writer task has exited
    writer_done: CancellationToken,
    read_buffer_size: usize,
}

impl ForwarderContext {
    pub(crate) fn new(settings: &ForwarderSettings) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let ctx = Self {
            outbound,
            registry: Arc::new(Registry::with_limit(settings.max_connections)),
            open: Arc::new(AtomicBool::new(true)),
            closed: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            writer_done: CancellationToken::new(),
            read_buffer_size: settings.read_buffer_size,
        };
        (ctx, outbound_rx)
    }

    /// Live logical connections
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether the tunnel is still carrying traffic
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until the transport loop has stopped
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Enqueue a frame for the transport, waiting while the queue is full
    pub async fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::QueueClosed)
    }

    pub(crate) fn try_send(&self, frame: Frame) -> Result<(), mpsc::error::TrySendError<Frame>> {
        self.outbound.try_send(frame)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) async fn shutting_down(&self) {
        self.shutdown.cancelled().await
    }

    fn mark_transport_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed.is_cancelled() {
            tracing::info!("Transport loop finished");
            self.closed.cancel();
        }
    }

    /// Register a locally accepted socket and start carrying it.
    ///
    /// An empty `Data` frame announces the id so the peer opens its side
    /// before the client has sent anything.
    pub async fn accept(
        &self,
        id: ConnectionId,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Result<Arc<Client>, RegistryError> {
        let client = Client::new(id.clone(), reader, writer, self.outbound.clone());
        self.registry.insert(Arc::clone(&client))?;

        if self.send(Frame::data(id, Bytes::new())).await.is_err() {
            tracing::debug!("Outbound queue closed while announcing {}", client.id());
        }
        client.spawn_read_loop(self.read_buffer_size);
        Ok(client)
    }
}

/// A running forwarder bound to one transport
pub struct Forwarder {
    ctx: ForwarderContext,
    tasks: Vec<JoinHandle<()>>,
}

impl Forwarder {
    /// Start the reader, writer, dispatcher and keepalive tasks over a transport
    pub fn spawn<R, W>(reader: R, writer: W, role: Role, settings: ForwarderSettings) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (ctx, outbound_rx) = ForwarderContext::new(&settings);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.queue_capacity.max(1));

        tracing::debug!(
            "Starting {:?} forwarder (queue capacity {}, keepalive every {:?})",
            role,
            settings.queue_capacity,
            settings.keepalive_interval
        );

        let dispatcher = Dispatcher::new(ctx.clone(), role);
        let tasks = vec![
            tokio::spawn(read_transport(reader, inbound_tx, ctx.clone())),
            tokio::spawn(write_transport(writer, outbound_rx, ctx.clone())),
            tokio::spawn(dispatcher.run(inbound_rx)),
            tokio::spawn(run_keepalive(ctx.clone(), settings.keepalive_interval)),
        ];

        Self { ctx, tasks }
    }

    /// Shared context, for the accept loop
    pub fn context(&self) -> &ForwarderContext {
        &self.ctx
    }

    /// Live logical connections
    pub fn registry(&self) -> &Arc<Registry> {
        self.ctx.registry()
    }

    /// Whether the tunnel is still carrying traffic
    pub fn is_open(&self) -> bool {
        self.ctx.is_open()
    }

    /// Wait for the teardown notification
    pub async fn closed(&self) {
        self.ctx.closed().await
    }

    /// Terminate every logical connection and close our side of the transport.
    ///
    /// The peer sees EOF and winds down; its exit is what fires [`closed`](Self::closed).
    pub async fn terminate_all(&self) {
        self.ctx.open.store(false, Ordering::SeqCst);

        let clients = self.ctx.registry.drain();
        tracing::info!("Terminating {} logical connections", clients.len());
        for client in clients {
            client.notify_eof(false);
            client.terminate().await;
        }

        self.ctx.shutdown.cancel();
    }

    /// Wait until the transport writer has flushed and exited
    pub async fn flushed(&self) {
        self.ctx.writer_done.cancelled().await
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Sole reader and decoder of the transport
async fn read_transport<R>(reader: R, inbound: mpsc::Sender<Frame>, ctx: ForwarderContext)
where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new());

    loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                tracing::trace!("Received {:?} for {}", frame.message.message_type(), frame.connection_id);
                if inbound.send(frame).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::error!("Protocol error on transport: {}", e);
                break;
            }
            None => {
                tracing::info!("Transport closed by peer");
                break;
            }
        }
    }

    ctx.mark_transport_closed();
}

/// Sole writer of the transport
async fn write_transport<W>(writer: W, outbound: mpsc::Receiver<Frame>, ctx: ForwarderContext)
where
    W: AsyncWrite + Send + Unpin,
{
    drive_writer(writer, outbound, &ctx).await;
    ctx.writer_done.cancel();
}

async fn drive_writer<W>(writer: W, mut outbound: mpsc::Receiver<Frame>, ctx: &ForwarderContext)
where
    W: AsyncWrite + Send + Unpin,
{
    let mut sink = FramedWrite::new(writer, FrameCodec::new());

    loop {
        let frame = tokio::select! {
            biased;
            _ = ctx.shutting_down() => None,
            frame = outbound.recv() => frame,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = sink.send(frame).await {
            tracing::error!("Failed to write to transport: {}", e);
            ctx.mark_transport_closed();
            return;
        }
    }

    // Flush whatever was queued before shutdown, then signal EOF to the peer
    while let Ok(frame) = outbound.try_recv() {
        if sink.feed(frame).await.is_err() {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!("Closing transport writer failed: {}", e);
    }
    tracing::debug!("Transport writer stopped");
}

/// Bytes buffered for one connection while its dial is in flight
const MAX_PENDING_BYTES: usize = 1024 * 1024;

type DialOutcome = (ConnectionId, std::io::Result<(BoxedReader, BoxedWriter)>);

/// Frames received for a connection whose dial has not finished
#[derive(Default)]
struct PendingOpen {
    payloads: Vec<Bytes>,
    buffered: usize,
    close_requested: bool,
}

/// Applies inbound frames to the registry
pub(crate) struct Dispatcher {
    ctx: ForwarderContext,
    role: Role,
    pending: HashMap<ConnectionId, PendingOpen>,
    dialed_tx: mpsc::UnboundedSender<DialOutcome>,
    dialed_rx: mpsc::UnboundedReceiver<DialOutcome>,
}

impl Dispatcher {
    pub(crate) fn new(ctx: ForwarderContext, role: Role) -> Self {
        let (dialed_tx, dialed_rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            role,
            pending: HashMap::new(),
            dialed_tx,
            dialed_rx,
        }
    }

    async fn run(mut self, mut inbound: mpsc::Receiver<Frame>) {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.dispatch(frame).await,
                    None => break,
                },
                Some((id, result)) = self.dialed_rx.recv() => self.finish_open(id, result).await,
            }
        }
        tracing::debug!("Dispatcher stopped");
    }

    pub(crate) async fn dispatch(&mut self, frame: Frame) {
        if frame.message == Message::KeepAlive {
            tracing::trace!("Keepalive received");
            return;
        }

        let id = frame.connection_id;
        if let Some(client) = self.ctx.registry.get(&id) {
            self.dispatch_registered(client, id, frame.message).await;
        } else if self.pending.contains_key(&id) {
            self.dispatch_pending(id, frame.message).await;
        } else {
            let dialer = match &self.role {
                Role::Agent(dialer) => Some(Arc::clone(dialer)),
                Role::Listener => None,
            };
            match (dialer, frame.message) {
                // Only the announce frame opens a connection; anything else
                // refers to one this side already released
                (Some(dialer), Message::Data(payload)) if payload.is_empty() => {
                    self.start_open(dialer, id).await;
                }
                (_, message) => {
                    tracing::warn!(
                        "Received {:?} for unknown connection {}, dropping",
                        message.message_type(),
                        id
                    );
                }
            }
        }
    }

    async fn dispatch_registered(&self, client: Arc<Client>, id: ConnectionId, message: Message) {
        match message {
            Message::CloseAck => {
                if let Some(client) = self.ctx.registry.remove(&id) {
                    client.notify_eof(false);
                    client.terminate().await;
                    tracing::debug!("Connection {} closed on both sides", id);
                }
            }
            Message::CloseRequest => self.close_remote(id).await,
            Message::Data(payload) => {
                // A half-closed connection still takes the peer's data
                if client.state() == ClientState::Terminated {
                    tracing::trace!("Dropping {} bytes for closed connection {}", payload.len(), id);
                    return;
                }
                self.write_or_terminate(&client, &payload).await;
            }
            Message::KeepAlive => {}
        }
    }

    async fn dispatch_pending(&mut self, id: ConnectionId, message: Message) {
        match message {
            Message::Data(payload) => {
                let Some(pending) = self.pending.get_mut(&id) else { return };
                pending.buffered += payload.len();
                if pending.buffered > MAX_PENDING_BYTES {
                    tracing::warn!("Connection {} sent too much before its dial finished, refusing", id);
                    self.pending.remove(&id);
                    self.refuse(id).await;
                    return;
                }
                if !payload.is_empty() {
                    pending.payloads.push(payload);
                }
            }
            Message::CloseRequest => {
                if let Some(pending) = self.pending.get_mut(&id) {
                    pending.close_requested = true;
                }
            }
            Message::CloseAck => {
                tracing::debug!("Connection {} released while dialing", id);
                self.pending.remove(&id);
            }
            Message::KeepAlive => {}
        }
    }

    async fn close_remote(&self, id: ConnectionId) {
        if let Some(client) = self.ctx.registry.remove(&id) {
            let loop_acks = client.close().await;
            if !loop_acks && self.ctx.send(Frame::close_ack(id)).await.is_err() {
                tracing::debug!("Outbound queue closed before acknowledging {}", client.id());
            }
        }
    }

    async fn write_or_terminate(&self, client: &Arc<Client>, payload: &[u8]) -> bool {
        match client.write(payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error writing: {}", e);
                if self.ctx.registry.remove(client.id()).is_some() {
                    client.notify_eof(true);
                    client.terminate().await;
                }
                false
            }
        }
    }

    /// Agent side: the peer announced a connection; dial it off the dispatch path
    async fn start_open(&mut self, dialer: Arc<dyn Dialer>, id: ConnectionId) {
        if let Some(max) = self.ctx.registry.limit() {
            if self.ctx.registry.len() + self.pending.len() >= max {
                tracing::warn!("Refusing connection {}: at most {} connections", id, max);
                self.refuse(id).await;
                return;
            }
        }

        self.pending.insert(id.clone(), PendingOpen::default());
        let dialed = self.dialed_tx.clone();
        tokio::spawn(async move {
            let result = dialer.dial(&id).await;
            let _ = dialed.send((id, result));
        });
    }

    async fn finish_open(&mut self, id: ConnectionId, result: std::io::Result<(BoxedReader, BoxedWriter)>) {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!("Discarding dial for released connection {}", id);
            return;
        };

        let (reader, writer) = match result {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!("Failed to open connection {}: {}", id, e);
                self.refuse(id).await;
                return;
            }
        };
        if !self.ctx.is_open() {
            tracing::debug!("Tunnel closing, dropping connection {}", id);
            return;
        }

        let client = Client::new(id.clone(), reader, writer, self.ctx.outbound.clone());
        if let Err(e) = self.ctx.registry.insert(Arc::clone(&client)) {
            tracing::warn!("Refusing connection {}: {}", id, e);
            self.refuse(id).await;
            return;
        }

        tracing::debug!("Opened connection {}", id);
        client.spawn_read_loop(self.ctx.read_buffer_size);
        for payload in &pending.payloads {
            if !self.write_or_terminate(&client, payload).await {
                return;
            }
        }
        if pending.close_requested {
            self.close_remote(id).await;
        }
    }

    /// Tell the originating side to release a connection we cannot carry
    async fn refuse(&self, id: ConnectionId) {
        if self.ctx.send(Frame::close_ack(id)).await.is_err() {
            tracing::debug!("Outbound queue closed while refusing connection");
        }
    }
}
