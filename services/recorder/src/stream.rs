//! Tick stream transport
//!
//! Batches travel over TCP as length-delimited frames (4-byte big-endian
//! length prefix), one `encode_batch` buffer per frame.
//!
//! - `StreamPublisher` accepts any number of subscribers and sends every
//!   published batch to all of them, encoding it once.
//! - `StreamSubscriber` dials a publisher, decodes frames on a reader task,
//!   and republishes them on a local `Hub<TickTopic>`. When the connection
//!   drops, the next `subscribe` dials again.

use crate::fanout::{Hub, TickTopic, Topic};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tick_types::{decode_batch, encode_batch, Batch, CodecError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Largest accepted frame.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Receiving end of a tick subscription. Ends when the source closes.
pub type Subscription = mpsc::Receiver<Arc<Batch>>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream closed")]
    Closed,
}

/// Something a recorder can subscribe to for tick batches.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn subscribe(&self) -> Result<Subscription, StreamError>;
}

#[async_trait]
impl<S: TickSource + ?Sized> TickSource for Arc<S> {
    async fn subscribe(&self) -> Result<Subscription, StreamError> {
        (**self).subscribe().await
    }
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

// ── Publisher ───────────────────────────────────────────────

/// Encoded frames queued for connected peers.
struct FrameTopic;

impl Topic for FrameTopic {
    type Message = Bytes;

    const NAME: &'static str = "frames";
}

pub struct StreamPublisher {
    local: Arc<Hub<TickTopic>>,
    peers: Arc<Hub<FrameTopic>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl StreamPublisher {
    /// Listen on `addr` and start accepting subscribers.
    pub async fn bind(addr: &str) -> Result<Self, StreamError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| StreamError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        let peers: Arc<Hub<FrameTopic>> = Arc::new(Hub::new());
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&peers)));

        info!(addr = %local_addr, "Stream publisher listening");
        Ok(Self {
            local: Arc::new(Hub::new()),
            peers,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// In-process view of everything this publisher sends.
    pub fn local(&self) -> Arc<Hub<TickTopic>> {
        Arc::clone(&self.local)
    }

    /// Connected subscribers.
    pub fn peer_count(&self) -> usize {
        self.peers.subscriber_count()
    }

    /// Publish one batch locally and to every connected subscriber.
    /// Returns the number of remote subscribers it was queued for.
    pub async fn publish(&self, batch: Batch) -> Result<usize, StreamError> {
        let frame = Bytes::from(encode_batch(&batch)?);
        self.local.publish(Arc::new(batch)).await;
        Ok(self.peers.publish(frame).await)
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.peers.close();
        self.local.close();
    }
}

async fn accept_loop(listener: TcpListener, peers: Arc<Hub<FrameTopic>>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let frames = peers.subscribe();
                tokio::spawn(write_frames(socket, peer, frames));
                info!(%peer, "Subscriber connected");
            }
            Err(error) => {
                warn!(%error, "Accept failed");
            }
        }
    }
}

async fn write_frames(socket: TcpStream, peer: SocketAddr, mut frames: mpsc::Receiver<Bytes>) {
    let mut writer = FramedWrite::new(socket, codec());
    while let Some(frame) = frames.recv().await {
        if let Err(error) = writer.send(frame).await {
            warn!(%peer, %error, "Subscriber lost");
            return;
        }
    }
    debug!(%peer, "Publisher closed; ending subscriber connection");
}

// ── Subscriber ──────────────────────────────────────────────

struct Connection {
    hub: Arc<Hub<TickTopic>>,
    reader: JoinHandle<()>,
}

pub struct StreamSubscriber {
    addr: String,
    connection: Mutex<Connection>,
    shutdown: AtomicBool,
}

impl StreamSubscriber {
    /// Dial `addr` and start reading frames.
    pub async fn connect(addr: &str) -> Result<Self, StreamError> {
        let connection = dial(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            connection: Mutex::new(connection),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Local subscriptions on the current connection.
    pub async fn local_subscribers(&self) -> usize {
        self.connection.lock().await.hub.subscriber_count()
    }

    /// Stop reading and end current subscriptions. Later subscribes fail
    /// with `StreamError::Closed`.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let connection = self.connection.lock().await;
        connection.reader.abort();
        connection.hub.close();
        info!(addr = %self.addr, "Stream subscriber shut down");
    }
}

#[async_trait]
impl TickSource for StreamSubscriber {
    async fn subscribe(&self) -> Result<Subscription, StreamError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        let mut connection = self.connection.lock().await;
        if connection.hub.is_closed() {
            *connection = dial(&self.addr).await?;
        }
        Ok(Hub::subscribe(&connection.hub))
    }
}

async fn dial(addr: &str) -> Result<Connection, StreamError> {
    let socket = TcpStream::connect(addr)
        .await
        .map_err(|source| StreamError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    let hub: Arc<Hub<TickTopic>> = Arc::new(Hub::new());
    let reader = tokio::spawn(read_frames(socket, addr.to_string(), Arc::clone(&hub)));
    info!(addr, "Connected to stream");
    Ok(Connection { hub, reader })
}

async fn read_frames(socket: TcpStream, addr: String, hub: Arc<Hub<TickTopic>>) {
    let mut frames = FramedRead::new(socket, codec());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => match decode_batch(&bytes) {
                Ok(batch) => {
                    hub.publish(Arc::new(batch)).await;
                }
                Err(error) => {
                    warn!(%addr, %error, len = bytes.len(), "Skipping undecodable frame");
                }
            },
            Err(error) => {
                warn!(%addr, %error, "Stream read failed");
                break;
            }
        }
    }
    info!(%addr, "Stream disconnected");
    hub.close();
}
