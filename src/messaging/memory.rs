//! Process-local broker with AMQP-like delivery semantics
//!
//! Mirrors the parts of RabbitMQ the consumer depends on: topic routing from
//! exchange to queue, a per-consumer prefetch window, requeue on nack,
//! dead-lettering on reject, and requeue of in-flight deliveries when a
//! consumer goes away.

use crate::messaging::config::QueueTopology;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{InboundMessage, MessageBroker, MessageStream, QueueStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    routing_key: String,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    consumers: u32,
    dead_letter_exchange: Option<String>,
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    next_delivery_tag: u64,
    disconnected: bool,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for queue in &targets {
            if let Some(state) = self.queues.get_mut(queue) {
                state.ready.push_back(StoredMessage {
                    payload: payload.to_vec(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                });
            }
        }

        targets.len()
    }

    fn deliver(&mut self, queue: &str) -> Option<InboundMessage> {
        let state = self.queues.get_mut(queue)?;
        let message = state.ready.pop_front()?;

        self.next_delivery_tag += 1;
        let delivery_tag = self.next_delivery_tag;
        let inbound = InboundMessage {
            delivery_tag,
            payload: message.payload.clone(),
            routing_key: message.routing_key.clone(),
            redelivered: message.redelivered,
        };
        state.unacked.insert(delivery_tag, message);
        Some(inbound)
    }

    /// Return an in-flight message to the head of its queue
    fn requeue(&mut self, queue: &str, delivery_tag: u64) -> bool {
        let Some(state) = self.queues.get_mut(queue) else {
            return false;
        };
        match state.unacked.remove(&delivery_tag) {
            Some(mut message) => {
                message.redelivered = true;
                state.ready.push_front(message);
                true
            }
            None => false,
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory broker. Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Declare the queue and bind it to the exchange
    pub fn declare(&self, topology: &QueueTopology) {
        let mut state = self.shared.state.lock();
        let queue = state.queues.entry(topology.queue.clone()).or_default();
        queue.dead_letter_exchange = topology.dead_letter_exchange.clone();
        drop(state);
        self.bind(&topology.exchange, &topology.queue, &topology.routing_key);
    }

    /// Declare `queue` if needed and bind it to `exchange` under a topic pattern
    pub fn bind(&self, exchange: &str, queue: &str, pattern: &str) {
        let mut state = self.shared.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        let exists = state
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.pattern == pattern);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: pattern.to_string(),
            });
        }
    }

    /// Publish to an exchange. Returns the number of queues the message reached.
    pub fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let routed = self.shared.state.lock().route(exchange, routing_key, payload);
        self.shared.notify.notify_waiters();
        routed
    }

    /// Messages waiting for delivery
    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Messages delivered but not yet acknowledged
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Payloads waiting in a queue, oldest first
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop the connection: open streams fail and in-flight messages return to their queues
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        state.disconnected = true;
        for queue in state.queues.values_mut() {
            let mut in_flight: Vec<(u64, StoredMessage)> = queue.unacked.drain().collect();
            in_flight.sort_by_key(|(tag, _)| *tag);
            for (_, mut message) in in_flight.into_iter().rev() {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            queue.consumers = 0;
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Allow new connections after `disconnect`
    pub fn reconnect(&self) {
        self.shared.state.lock().disconnected = false;
    }

    fn ensure_connected(&self) -> MessagingResult<()> {
        if self.shared.state.lock().disconnected {
            return Err(MessagingError::ConnectionFailed(
                "in-memory broker is disconnected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn open(&self, topology: &QueueTopology) -> MessagingResult<Box<dyn MessageStream>> {
        self.ensure_connected()?;
        self.declare(topology);

        if let Some(queue) = self.shared.state.lock().queues.get_mut(&topology.queue) {
            queue.consumers += 1;
        }

        tracing::info!(
            queue = %topology.queue,
            exchange = %topology.exchange,
            routing_key = %topology.routing_key,
            prefetch = topology.prefetch_count,
            "Connected to in-memory broker and bound to queue"
        );

        Ok(Box::new(InMemoryMessageStream {
            shared: self.shared.clone(),
            queue: topology.queue.clone(),
            prefetch: usize::from(topology.prefetch_count.max(1)),
            in_flight: HashSet::new(),
            closed: false,
        }))
    }

    async fn queue_status(&self, topology: &QueueTopology) -> MessagingResult<QueueStatus> {
        self.ensure_connected()?;
        self.declare(topology);

        let state = self.shared.state.lock();
        let queue = state.queues.get(&topology.queue);
        Ok(QueueStatus {
            queue: topology.queue.clone(),
            message_count: queue.map(|q| q.ready.len() as u32).unwrap_or(0),
            consumer_count: queue.map(|q| q.consumers).unwrap_or(0),
        })
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Consumer on an in-memory queue
pub struct InMemoryMessageStream {
    shared: Arc<Shared>,
    queue: String,
    prefetch: usize,
    in_flight: HashSet<u64>,
    closed: bool,
}

impl InMemoryMessageStream {
    fn check_tag(&mut self, delivery_tag: u64) -> MessagingResult<()> {
        if self.shared.state.lock().disconnected {
            return Err(MessagingError::ConnectionLost(
                "in-memory broker disconnected".to_string(),
            ));
        }
        if !self.in_flight.remove(&delivery_tag) {
            return Err(MessagingError::AckFailed(format!(
                "unknown delivery tag {}",
                delivery_tag
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStream for InMemoryMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<InboundMessage>> {
        let shared = self.shared.clone();
        loop {
            // Register interest before checking so a concurrent publish is not missed.
            let notified = shared.notify.notified();
            {
                let mut state = shared.state.lock();
                if state.disconnected {
                    return Err(MessagingError::ConnectionLost(
                        "in-memory broker disconnected".to_string(),
                    ));
                }
                if self.closed {
                    return Ok(None);
                }
                if self.in_flight.len() < self.prefetch {
                    if let Some(message) = state.deliver(&self.queue) {
                        self.in_flight.insert(message.delivery_tag);
                        return Ok(Some(message));
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> MessagingResult<()> {
        self.check_tag(delivery_tag)?;
        if let Some(queue) = self.shared.state.lock().queues.get_mut(&self.queue) {
            queue.unacked.remove(&delivery_tag);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> MessagingResult<()> {
        self.check_tag(delivery_tag)?;
        {
            let mut state = self.shared.state.lock();
            if requeue {
                state.requeue(&self.queue, delivery_tag);
            } else {
                let removed = state.queues.get_mut(&self.queue).and_then(|queue| {
                    queue
                        .unacked
                        .remove(&delivery_tag)
                        .map(|message| (message, queue.dead_letter_exchange.clone()))
                });
                if let Some((message, Some(dead_letter_exchange))) = removed {
                    state.route(&dead_letter_exchange, &message.routing_key, &message.payload);
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        {
            let mut state = self.shared.state.lock();
            let mut tags: Vec<u64> = self.in_flight.drain().collect();
            tags.sort_unstable();
            for tag in tags.into_iter().rev() {
                state.requeue(&self.queue, tag);
            }
            if let Some(queue) = state.queues.get_mut(&self.queue) {
                queue.consumers = queue.consumers.saturating_sub(1);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

/// AMQP topic matching: `*` matches one word, `#` matches zero or more words
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}
