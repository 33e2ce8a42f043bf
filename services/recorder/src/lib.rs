//! Tick Recorder Service
//!
//! Bridges a live tick stream into the partitioned store: records arrive
//! as batches over TCP (or from an in-process hub), are buffered in a
//! bounded queue, and are written as one file per flush.
//!
//! # Modules
//! - `queue`: fixed-capacity record buffer
//! - `fanout`: typed in-process publish/subscribe with back-pressure
//! - `stream`: length-delimited TCP publisher and subscriber
//! - `recorder`: size/interval flush loop with reconnect

pub mod fanout;
pub mod queue;
pub mod recorder;
pub mod stream;

pub use fanout::{Hub, TickTopic, Topic, SUBSCRIBER_BUFFER};
pub use queue::BatchingQueue;
pub use recorder::{Recorder, RecorderConfig, RecorderStats};
pub use stream::{StreamError, StreamPublisher, StreamSubscriber, Subscription, TickSource};
