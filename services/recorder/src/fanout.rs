//! In-process typed fan-out
//!
//! A `Hub<T>` delivers every published message to every live subscriber.
//! The topic is a type, so the message type is fixed at compile time and
//! subscribers never inspect or cast payloads.
//!
//! Each subscriber owns a bounded channel. `publish` waits for room in a
//! full channel instead of dropping, so a slow subscriber slows the
//! publisher down. Subscribers that went away are pruned on the next
//! publish.

use crate::stream::{StreamError, Subscription, TickSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tick_types::Batch;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber channel depth.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// A named message stream.
pub trait Topic: Send + Sync + 'static {
    type Message: Clone + Send + Sync + 'static;

    const NAME: &'static str;
}

/// Decoded tick batches.
#[derive(Debug)]
pub struct TickTopic;

impl Topic for TickTopic {
    type Message = Arc<Batch>;

    const NAME: &'static str = "ticks";
}

pub struct Hub<T: Topic> {
    subscribers: Mutex<Vec<mpsc::Sender<T::Message>>>,
    closed: AtomicBool,
}

impl<T: Topic> Hub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscriber. On a closed hub the receiver ends immediately.
    pub fn subscribe(&self) -> mpsc::Receiver<T::Message> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subscribers = self.subscribers.lock();
        // Checked under the lock so a concurrent close cannot miss this sender.
        if !self.closed.load(Ordering::Acquire) {
            subscribers.push(tx);
        }
        rx
    }

    /// Send `message` to every subscriber, waiting on full buffers.
    /// Returns the number of subscribers that received it.
    pub async fn publish(&self, message: T::Message) -> usize {
        let targets: Vec<mpsc::Sender<T::Message>> = self.subscribers.lock().clone();

        let mut delivered = 0;
        let mut lost = 0;
        for target in &targets {
            match target.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => lost += 1,
            }
        }

        if lost > 0 {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
            debug!(topic = T::NAME, lost, "Pruned closed subscribers");
        }
        delivered
    }

    /// Drop every sender; subscribers see end-of-stream once drained.
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock();
        self.closed.store(true, Ordering::Release);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live subscriber count, counting ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Topic> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TickSource for Hub<TickTopic> {
    async fn subscribe(&self) -> Result<Subscription, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        Ok(Hub::subscribe(self))
    }
}
