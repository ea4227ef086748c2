//! TCP transport
//!
//! Frames travel as `[u32 BE length][frame bytes]` over a single TCP stream,
//! which gives the reliable ordered delivery the client expects.
//!
//! The transport owns a small tokio runtime. Each connection gets a reader
//! task that queues [`TransportEvent`]s and a writer task fed by a channel
//! bounded by `window_size`. `schedule_update` hands committed frames to that
//! channel without waiting, so no call on the synchronous [`Transport`]
//! interface ever waits on the socket. A peer that stops reading fills the
//! channel and `begin_send` starts reporting
//! [`TransportError::BufferExhausted`].
//!
//! The transport must be driven from a plain thread, never from inside
//! another tokio runtime.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use tidewire_protocol::{
    ConnectionId, Pipeline, SendBuffer, TaskHandle, Transport, TransportConfig, TransportError,
    TransportEvent, TransportFactory,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct LinkState {
    established: bool,
    closed: bool,
    events: VecDeque<TransportEvent>,
}

type SharedLink = Arc<Mutex<LinkState>>;

fn lock(link: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    link.lock().unwrap_or_else(|e| e.into_inner())
}

struct Link {
    state: SharedLink,
    outbound: mpsc::Sender<Bytes>,
    committed: Vec<Bytes>,
    reader: JoinHandle<()>,
}

impl Link {
    /// Frames committed or queued for the writer but not yet on the socket
    fn in_flight(&self) -> usize {
        let queued = self.outbound.max_capacity() - self.outbound.capacity();
        self.committed.len() + queued
    }

    fn hand_off(&mut self, connection: ConnectionId) {
        for frame in self.committed.drain(..) {
            if let Err(e) = self.outbound.try_send(frame) {
                tracing::warn!(connection = %connection, error = %e, "Dropping frame, TCP writer unavailable");
            }
        }
    }
}

/// Creates [`TcpTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(&mut self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TcpTransport::new(config.clone())?))
    }
}

pub struct TcpTransport {
    runtime: Option<Runtime>,
    config: TransportConfig,
    links: HashMap<ConnectionId, Link>,
    next_connection: u64,
    next_task: u64,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tidewire-tcp")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Some(runtime),
            config,
            links: HashMap::new(),
            next_connection: 1,
            next_task: 1,
        })
    }

    fn runtime(&self) -> Result<&Runtime, TransportError> {
        self.runtime.as_ref().ok_or(TransportError::Disposed)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: SocketAddr) -> Result<ConnectionId, TransportError> {
        let runtime = self.runtime()?;
        let id = ConnectionId(self.next_connection);

        let state = SharedLink::default();
        let (outbound, pending) = mpsc::channel(self.config.window_size.max(1));
        let reader = runtime.spawn(run_connection(
            id,
            endpoint,
            self.config.max_message_size,
            Arc::clone(&state),
            pending,
        ));

        self.next_connection += 1;
        self.links.insert(
            id,
            Link {
                state,
                outbound,
                committed: Vec::new(),
                reader,
            },
        );

        tracing::info!(connection = %id, endpoint = %endpoint, "TCP connect requested");
        Ok(id)
    }

    fn poll_event(&mut self, connection: ConnectionId) -> TransportEvent {
        let Some(link) = self.links.get(&connection) else {
            return TransportEvent::Empty;
        };
        let event = lock(&link.state).events.pop_front();
        match event {
            Some(TransportEvent::Disconnect) => {
                self.links.remove(&connection);
                TransportEvent::Disconnect
            }
            Some(event) => event,
            None => TransportEvent::Empty,
        }
    }

    fn begin_send(
        &mut self,
        pipeline: Pipeline,
        connection: ConnectionId,
    ) -> Result<SendBuffer, TransportError> {
        self.runtime()?;
        let window = self.config.window_size;
        let link = self
            .links
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        {
            let state = lock(&link.state);
            if state.closed {
                return Err(TransportError::UnknownConnection(connection));
            }
            if !state.established {
                return Err(TransportError::NotEstablished(connection));
            }
        }
        if link.in_flight() >= window {
            return Err(TransportError::BufferExhausted { window });
        }
        Ok(SendBuffer::new(connection, pipeline))
    }

    fn end_send(&mut self, buffer: SendBuffer) -> Result<(), TransportError> {
        self.runtime()?;
        let max = self.config.max_message_size;
        if buffer.len() > max {
            return Err(TransportError::MessageTooLarge {
                size: buffer.len(),
                max,
            });
        }
        let (connection, _, bytes) = buffer.into_parts();
        let link = self
            .links
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        link.committed.push(bytes);
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        let Some(mut link) = self.links.remove(&connection) else {
            return;
        };
        link.reader.abort();
        // The writer drains what it was handed, then drops the write half,
        // which sends FIN.
        link.hand_off(connection);
        tracing::info!(connection = %connection, "TCP connection closed by client");
    }

    fn schedule_update(&mut self) -> TaskHandle {
        let task = TaskHandle(self.next_task);
        self.next_task += 1;

        if self.runtime.is_none() {
            return task;
        }
        for (id, link) in self.links.iter_mut() {
            link.hand_off(*id);
        }
        task
    }

    fn complete(&mut self, task: TaskHandle) {
        // The hand-off already happened in `schedule_update`; socket writes
        // belong to the writer tasks and are never waited on.
        if task.0 >= self.next_task {
            tracing::warn!(task = task.0, "Completing a task that was never scheduled");
        }
    }

    fn dispose(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        for (_, link) in self.links.drain() {
            link.reader.abort();
        }
        runtime.shutdown_background();
        tracing::info!("TCP transport disposed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn write_frame(stream: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(frame.len()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame of {} bytes does not fit a u32 length prefix", frame.len()),
        )
    })?;
    stream.write_u32(len).await?;
    stream.write_all(frame).await
}

/// Writes queued frames until the link is dropped or the socket fails
async fn run_writer(
    id: ConnectionId,
    mut stream: OwnedWriteHalf,
    mut pending: mpsc::Receiver<Bytes>,
) {
    while let Some(frame) = pending.recv().await {
        if let Err(e) = write_frame(&mut stream, &frame).await {
            tracing::warn!(connection = %id, error = %e, "TCP write failed");
            return;
        }
    }
    tracing::debug!(connection = %id, "TCP writer finished");
}

async fn read_frame(reader: &mut OwnedReadHalf, max: usize) -> std::io::Result<Bytes> {
    let len = reader.read_u32().await? as usize;
    if len > max {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, max),
        ));
    }
    let mut frame = BytesMut::zeroed(len);
    reader.read_exact(&mut frame).await?;
    Ok(frame.freeze())
}

/// Connects, starts the writer, then reads frames until the stream ends
async fn run_connection(
    id: ConnectionId,
    endpoint: SocketAddr,
    max_message_size: usize,
    state: SharedLink,
    pending: mpsc::Receiver<Bytes>,
) {
    let stream = match TcpStream::connect(endpoint).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(connection = %id, endpoint = %endpoint, error = %e, "TCP connect failed");
            let mut state = lock(&state);
            state.closed = true;
            state.events.push_back(TransportEvent::Disconnect);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(connection = %id, error = %e, "Failed to set TCP_NODELAY");
    }

    let (mut read_half, write_half) = stream.into_split();
    tokio::spawn(run_writer(id, write_half, pending));
    {
        let mut state = lock(&state);
        state.established = true;
        state.events.push_back(TransportEvent::Connect);
    }
    tracing::debug!(connection = %id, endpoint = %endpoint, "TCP connection established");

    loop {
        match read_frame(&mut read_half, max_message_size).await {
            Ok(frame) => lock(&state).events.push_back(TransportEvent::Data(frame)),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    tracing::debug!(connection = %id, "TCP stream closed by peer");
                } else {
                    tracing::warn!(connection = %id, error = %e, "TCP read failed");
                }
                break;
            }
        }
    }

    let mut state = lock(&state);
    state.established = false;
    state.closed = true;
    state.events.push_back(TransportEvent::Disconnect);
}
