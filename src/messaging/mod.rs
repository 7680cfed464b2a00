//! Durable queue consumer for candidate invitation events
//!
//! Invitations arrive on a RabbitMQ topic exchange, are validated, applied
//! to the store in one transaction, and then acknowledged. Any failure after
//! delivery is negatively acknowledged so the broker can redeliver it
//! (at-least-once processing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │         ConsumerLifecycle                        │
//! ├─────────────────────────────────────────────────┤
//! │  - connect()   - start_consuming()   - stop()    │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │      QueueConnector                              │
//! ├─────────────────────────────────────────────────┤
//! │  - validate → apply → ack / nack(requeue)        │
//! └─────────────────────────────────────────────────┘
//!           │                        │
//!           ▼                        ▼
//! ┌──────────────────┐    ┌──────────────────┐
//! │  AMQP Backend    │    │ In-Memory Backend│
//! ├──────────────────┤    ├──────────────────┤
//! │ - RabbitMQ       │    │ - Tests          │
//! │ - Durable queue  │    │ - Local runs     │
//! │ - Prefetch 1     │    │ - Prefetch 1     │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use candidate_invitation_consumer::messaging::{
//!     ConsumerLifecycle, InMemoryBroker, QueueConnector, QueueTopology,
//! };
//! use candidate_invitation_consumer::processing::UpsertCoordinator;
//! use candidate_invitation_consumer::state::create_in_memory_store;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = Arc::new(UpsertCoordinator::new(create_in_memory_store()));
//!     let connector = QueueConnector::new(
//!         Arc::new(InMemoryBroker::new()),
//!         QueueTopology::default(),
//!         coordinator,
//!     );
//!
//!     let mut consumer = ConsumerLifecycle::new(connector);
//!     consumer.connect().await?;
//!     consumer.start_consuming().await?;
//!     Ok(())
//! }
//! ```

mod amqp;
mod config;
mod connector;
mod error;
mod events;
mod factory;
mod lifecycle;
mod memory;
mod metrics;
mod traits;

pub use amqp::{AmqpBroker, AmqpMessageStream};
pub use config::{
    BrokerBackend, BrokerConfig, QueueTopology, DEFAULT_EXCHANGE, DEFAULT_QUEUE,
    DEFAULT_ROUTING_KEY, PREFETCH_COUNT,
};
pub use connector::{DeliveryDecision, ProcessedInvitation, QueueConnector};
pub use error::{MessagingError, MessagingResult};
pub use events::InvitationEvent;
pub use factory::create_broker;
pub use lifecycle::{ConsumerLifecycle, ConsumerState, StopHandle};
pub use memory::{topic_matches, InMemoryBroker, InMemoryMessageStream};
pub use metrics::{gather_metrics, init_consumer_metrics, CONSUMER_METRICS};
pub use traits::{InboundMessage, MessageBroker, MessageStream, QueueStatus};
