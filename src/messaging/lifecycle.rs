//! Consumer lifecycle: connect, consume, stop

use crate::error::{AppError, Result};
use crate::messaging::connector::QueueConnector;
use crate::messaging::traits::MessageStream;
use std::sync::Arc;
use strum::Display;
use tokio::sync::watch;

/// Consumer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Consuming,
    Stopping,
}

/// Requests a running consumer to stop. Cloneable and idempotent.
#[derive(Clone)]
pub struct StopHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.signal.send_replace(true) {
            tracing::info!("Stopping consumer...");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        let mut receiver = self.signal.subscribe();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

/// Owns the broker connection for the life of the process
pub struct ConsumerLifecycle {
    connector: QueueConnector,
    state: ConsumerState,
    stream: Option<Box<dyn MessageStream>>,
    stop: StopHandle,
}

impl ConsumerLifecycle {
    pub fn new(connector: QueueConnector) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            connector,
            state: ConsumerState::Disconnected,
            stream: None,
            stop: StopHandle {
                signal: Arc::new(signal),
            },
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Handle for stopping the consumer from another task or a signal handler
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Connect and declare the topology.
    ///
    /// Blank topology names are a `Configuration` error; an unreachable broker
    /// surfaces as `ConnectionLost` or `Timeout`. Both are startup failures.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ConsumerState::Disconnected {
            return Ok(());
        }

        let topology = self.connector.topology();
        for (name, value) in [
            ("exchange", &topology.exchange),
            ("queue", &topology.queue),
            ("routing key", &topology.routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Configuration(format!("{} name is not set", name)));
            }
        }

        self.state = ConsumerState::Connecting;
        match self.connector.open().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConsumerState::Consuming;
                Ok(())
            }
            Err(e) => {
                self.state = ConsumerState::Disconnected;
                tracing::error!(error = %e, "Failed to connect to broker");
                Err(e.into())
            }
        }
    }

    /// Consume until `stop()` is requested or the channel fails.
    ///
    /// Returns `Ok(())` after a requested stop and `ConnectionLost` (or the
    /// acknowledgement error) when the broker goes away. The connection is
    /// closed and the state is `Disconnected` in both cases.
    pub async fn start_consuming(&mut self) -> Result<()> {
        let mut stream = self.stream.take().ok_or_else(|| {
            AppError::Configuration("start_consuming called before connect".to_string())
        })?;
        let mut stop_rx = self.stop.signal.subscribe();

        tracing::info!(
            queue = %self.connector.topology().queue,
            backend = self.connector.backend_name(),
            "Starting to consume candidate invitation messages..."
        );

        let result = loop {
            if *stop_rx.borrow_and_update() {
                break Ok(());
            }

            tokio::select! {
                biased;
                _ = stop_rx.changed() => continue,
                next = stream.next() => match next {
                    Ok(Some(message)) => {
                        if let Err(e) = self.connector.dispatch(stream.as_mut(), message).await {
                            tracing::error!(error = %e, "Error in consumer");
                            break Err(AppError::from(e));
                        }
                    }
                    Ok(None) => {
                        break Err(AppError::ConnectionLost(
                            "broker cancelled the consumer".to_string(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Error in consumer");
                        break Err(AppError::from(e));
                    }
                },
            }
        };

        self.shutdown(stream).await;
        result
    }

    /// Stop consuming and close the connection. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.stop.stop();
        if let Some(stream) = self.stream.take() {
            self.shutdown(stream).await;
        }
    }

    async fn shutdown(&mut self, mut stream: Box<dyn MessageStream>) {
        self.state = ConsumerState::Stopping;
        if let Err(e) = self.connector.close(stream.as_mut()).await {
            tracing::warn!(error = %e, "Error closing broker connection");
        }
        self.state = ConsumerState::Disconnected;
        tracing::info!("Consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryBroker, QueueTopology};
    use crate::processing::UpsertCoordinator;
    use crate::state::InMemoryStore;
    use std::time::Duration;

    fn lifecycle(broker: InMemoryBroker, topology: QueueTopology) -> ConsumerLifecycle {
        let coordinator = Arc::new(UpsertCoordinator::new(Arc::new(InMemoryStore::new())));
        ConsumerLifecycle::new(QueueConnector::new(Arc::new(broker), topology, coordinator))
    }

    #[tokio::test]
    async fn test_connect_transitions_to_consuming() {
        let mut consumer = lifecycle(InMemoryBroker::new(), QueueTopology::default());
        assert_eq!(consumer.state(), ConsumerState::Disconnected);

        consumer.connect().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Consuming);

        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_blank_queue_name_is_configuration_error() {
        let topology = QueueTopology {
            queue: " ".to_string(),
            ..QueueTopology::default()
        };
        let mut consumer = lifecycle(InMemoryBroker::new(), topology);

        let err = consumer.connect().await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_connect() {
        let broker = InMemoryBroker::new();
        broker.disconnect();
        let mut consumer = lifecycle(broker, QueueTopology::default());

        let err = consumer.connect().await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionLost(_)));
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_before_connect_fails() {
        let mut consumer = lifecycle(InMemoryBroker::new(), QueueTopology::default());
        assert!(consumer.start_consuming().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_handle_ends_consumption_cleanly() {
        let mut consumer = lifecycle(InMemoryBroker::new(), QueueTopology::default());
        consumer.connect().await.unwrap();
        let handle = consumer.stop_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.stop();
            handle.stop();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), consumer.start_consuming())
            .await
            .expect("consumer did not stop");
        assert!(result.is_ok());
        assert_eq!(consumer.state(), ConsumerState::Disconnected);

        consumer.stop().await;
        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let consumer = lifecycle(InMemoryBroker::new(), QueueTopology::default());
        let handle = consumer.stop_handle();

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.stopped().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("stopped() did not resolve")
            .unwrap();

        // Already stopped: resolves immediately
        handle.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_before_start_returns_immediately() {
        let mut consumer = lifecycle(InMemoryBroker::new(), QueueTopology::default());
        consumer.connect().await.unwrap();
        consumer.stop_handle().stop();

        assert!(consumer.start_consuming().await.is_ok());
        assert!(consumer.stop_handle().is_stopped());
    }

    #[tokio::test]
    async fn test_connection_loss_surfaces_as_error() {
        let broker = InMemoryBroker::new();
        let mut consumer = lifecycle(broker.clone(), QueueTopology::default());
        consumer.connect().await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            broker.disconnect();
        });

        let err = consumer.start_consuming().await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionLost(_)));
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }
}
