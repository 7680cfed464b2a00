use crate::messaging::amqp::AmqpBroker;
use crate::messaging::config::{BrokerBackend, BrokerConfig};
use crate::messaging::error::MessagingResult;
use crate::messaging::memory::InMemoryBroker;
use crate::messaging::traits::MessageBroker;
use std::sync::Arc;

/// Create a message broker based on configuration
pub fn create_broker(config: &BrokerConfig) -> MessagingResult<Arc<dyn MessageBroker>> {
    match config.backend {
        BrokerBackend::Amqp => {
            let broker = AmqpBroker::new(config)?;
            tracing::info!(connection_name = %config.connection_name, "Using RabbitMQ broker backend");
            Ok(Arc::new(broker))
        }
        BrokerBackend::InMemory => {
            tracing::warn!("Using in-memory broker backend; messages are not durable");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}
