//! Local publication sinks
//!
//! The scheduler only needs to create one publisher per topic and hand it
//! messages. Publishing must never block a tick for long, so the in-process
//! channel rejects messages when its queue is full instead of waiting.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{NodeError, Result};
use crate::messages::Message;

/// Queue depth used for every topic the node creates
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Creates publishers for topics
pub trait Transport {
    fn create_publisher(&self, topic: &str, depth: usize) -> Result<Box<dyn Publisher>>;
}

/// Sends messages to one topic
pub trait Publisher: Send {
    fn topic(&self) -> &str;

    fn publish(&mut self, message: Message) -> Result<()>;
}

/// A message together with the topic it went out on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Published {
    pub topic: String,
    pub message: Message,
}

/// Writes every message as one JSON object per line
pub struct JsonLinesTransport<W> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl JsonLinesTransport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> Transport for JsonLinesTransport<W> {
    fn create_publisher(&self, topic: &str, _depth: usize) -> Result<Box<dyn Publisher>> {
        Ok(Box::new(JsonLinesPublisher {
            topic: topic.to_string(),
            writer: Arc::clone(&self.writer),
        }))
    }
}

struct JsonLinesPublisher<W> {
    topic: String,
    writer: Arc<Mutex<W>>,
}

#[derive(Serialize)]
struct Line<'a> {
    topic: &'a str,
    message: &'a Message,
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&mut self, message: Message) -> Result<()> {
        let line = Line {
            topic: &self.topic,
            message: &message,
        };
        let mut text = serde_json::to_string(&line).map_err(|e| NodeError::Publish(e.to_string()))?;
        text.push('\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| NodeError::Publish("writer lock poisoned".into()))?;
        writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| NodeError::Publish(format!("{}: {}", self.topic, e)))
    }
}

/// In-process bounded queue shared by all topics
pub struct ChannelTransport {
    sender: SyncSender<Published>,
    topics: Mutex<Vec<String>>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end of its queue
    pub fn bounded(capacity: usize) -> (Self, Receiver<Published>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let transport = Self {
            sender,
            topics: Mutex::new(Vec::new()),
        };
        (transport, receiver)
    }

    /// Topics a publisher has been created for, in creation order
    pub fn topics(&self) -> Vec<String> {
        match self.topics.lock() {
            Ok(topics) => topics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transport for ChannelTransport {
    fn create_publisher(&self, topic: &str, _depth: usize) -> Result<Box<dyn Publisher>> {
        self.topics
            .lock()
            .map_err(|_| NodeError::Publish("topic registry poisoned".into()))?
            .push(topic.to_string());
        Ok(Box::new(ChannelPublisher {
            topic: topic.to_string(),
            sender: self.sender.clone(),
        }))
    }
}

struct ChannelPublisher {
    topic: String,
    sender: SyncSender<Published>,
}

impl Publisher for ChannelPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&mut self, message: Message) -> Result<()> {
        let published = Published {
            topic: self.topic.clone(),
            message,
        };
        self.sender.try_send(published).map_err(|e| match e {
            TrySendError::Full(_) => NodeError::Publish(format!("{}: queue full", self.topic)),
            TrySendError::Disconnected(_) => NodeError::Publish(format!("{}: receiver dropped", self.topic)),
        })
    }
}

/// Accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn create_publisher(&self, topic: &str, _depth: usize) -> Result<Box<dyn Publisher>> {
        Ok(Box::new(NullPublisher {
            topic: topic.to_string(),
        }))
    }
}

struct NullPublisher {
    topic: String,
}

impl Publisher for NullPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&mut self, _message: Message) -> Result<()> {
        Ok(())
    }
}
