//! Messaging trait abstractions

use crate::messaging::config::QueueTopology;
use crate::messaging::error::MessagingResult;
use async_trait::async_trait;

/// A delivery handed to the consumer, not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel-scoped tag used to ack or nack this delivery
    pub delivery_tag: u64,

    /// Raw message body
    pub payload: Vec<u8>,

    /// Routing key the message was published with
    pub routing_key: String,

    /// Set when the broker has delivered this message before
    pub redelivered: bool,
}

/// Queue depth as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Broker backend able to declare the topology and open a consumer
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Connect, declare exchange/queue/binding, set prefetch and start consuming
    async fn open(&self, topology: &QueueTopology) -> MessagingResult<Box<dyn MessageStream>>;

    /// Connect, declare the topology and report the queue status, then disconnect
    async fn queue_status(&self, topology: &QueueTopology) -> MessagingResult<QueueStatus>;

    /// Backend name for logs and metrics
    fn backend_name(&self) -> &'static str;
}

/// Message stream trait for consuming messages
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next delivery. `None` means the broker cancelled the consumer.
    async fn next(&mut self) -> MessagingResult<Option<InboundMessage>>;

    /// Acknowledge message processing
    async fn ack(&mut self, delivery_tag: u64) -> MessagingResult<()>;

    /// Negative acknowledge, optionally returning the message to the queue
    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> MessagingResult<()>;

    /// Cancel the consumer and close the connection. Safe to call twice.
    async fn close(&mut self) -> MessagingResult<()>;
}
