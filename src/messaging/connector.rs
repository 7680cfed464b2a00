//! Per-delivery handling and the ack/nack protocol

use crate::error::{AppError, Result};
use crate::messaging::config::QueueTopology;
use crate::messaging::error::MessagingResult;
use crate::messaging::events::InvitationEvent;
use crate::messaging::metrics::CONSUMER_METRICS;
use crate::messaging::traits::{InboundMessage, MessageBroker, MessageStream};
use crate::processing::UpsertCoordinator;
use crate::state::UpsertOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryDecision {
    /// Remove the message permanently
    Ack,
    /// Negative acknowledge with requeue; the message will be redelivered
    Requeue,
    /// Negative acknowledge without requeue; the broker dead-letters it
    Reject,
}

/// A successfully applied invitation
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedInvitation {
    pub invitation_id: String,
    pub assessment_id: i64,
    pub user_id: i64,
    pub outcome: UpsertOutcome,
}

/// Connects to the broker and settles every delivery with an ack or nack
pub struct QueueConnector {
    broker: Arc<dyn MessageBroker>,
    topology: QueueTopology,
    coordinator: Arc<UpsertCoordinator>,
    max_message_bytes: usize,
    processing_timeout: Option<Duration>,
    metrics_enabled: bool,
}

impl QueueConnector {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        topology: QueueTopology,
        coordinator: Arc<UpsertCoordinator>,
    ) -> Self {
        Self {
            broker,
            topology,
            coordinator,
            max_message_bytes: 1_048_576,
            processing_timeout: None,
            metrics_enabled: false,
        }
    }

    /// Reject payloads larger than `bytes` before parsing
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Bound the time spent applying one invitation
    pub fn with_processing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Record Prometheus metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        if enabled {
            crate::messaging::metrics::init_consumer_metrics();
        }
        self.metrics_enabled = enabled;
        self
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn backend_name(&self) -> &'static str {
        self.broker.backend_name()
    }

    /// Open the broker connection with the topology declared and prefetch set
    pub async fn open(&self) -> MessagingResult<Box<dyn MessageStream>> {
        let stream = self.broker.open(&self.topology).await?;
        if self.metrics_enabled {
            CONSUMER_METRICS
                .active_consumers
                .with_label_values(&[self.broker.backend_name()])
                .inc();
        }
        Ok(stream)
    }

    /// Close the stream opened by `open`
    pub async fn close(&self, stream: &mut dyn MessageStream) -> MessagingResult<()> {
        let result = stream.close().await;
        if self.metrics_enabled {
            CONSUMER_METRICS
                .active_consumers
                .with_label_values(&[self.broker.backend_name()])
                .dec();
        }
        result
    }

    /// Validate and apply one delivery. Never touches the broker.
    pub async fn handle(&self, message: &InboundMessage) -> Result<ProcessedInvitation> {
        if message.payload.len() > self.max_message_bytes {
            return Err(AppError::Validation(format!(
                "payload of {} bytes exceeds the {} byte limit",
                message.payload.len(),
                self.max_message_bytes
            )));
        }

        let event = InvitationEvent::from_slice(&message.payload)?;

        tracing::info!(
            invitation_id = %event.invitation_id,
            assessment_id = event.assessment_id,
            assessment_name = %event.assessment_name,
            redelivered = message.redelivered,
            "Processing candidate invitation"
        );

        let outcome = match self.processing_timeout {
            Some(limit) => tokio::time::timeout(limit, self.coordinator.apply(&event))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "invitation {} not applied within {:?}",
                        event.invitation_id, limit
                    ))
                })??,
            None => self.coordinator.apply(&event).await?,
        };

        Ok(ProcessedInvitation {
            invitation_id: event.invitation_id,
            assessment_id: event.assessment_id,
            user_id: event.user_id,
            outcome,
        })
    }

    /// Map a handling result onto an ack, a requeue or a reject.
    ///
    /// Permanent failures are only rejected when the queue has a dead-letter
    /// exchange; otherwise every failure is requeued.
    pub fn decide(&self, result: &Result<ProcessedInvitation>) -> DeliveryDecision {
        match result {
            Ok(_) => DeliveryDecision::Ack,
            Err(e) if !e.is_retryable() && self.topology.dead_letters_enabled() => {
                DeliveryDecision::Reject
            }
            Err(_) => DeliveryDecision::Requeue,
        }
    }

    /// Handle one delivery and settle it with the broker.
    ///
    /// Processing errors are consumed here; only a failed ack/nack (a broken
    /// channel) is returned.
    pub async fn dispatch(
        &self,
        stream: &mut dyn MessageStream,
        message: InboundMessage,
    ) -> MessagingResult<DeliveryDecision> {
        let started = Instant::now();
        let queue = self.topology.queue.as_str();
        if self.metrics_enabled {
            CONSUMER_METRICS
                .deliveries_received
                .with_label_values(&[queue])
                .inc();
        }

        let result = self.handle(&message).await;
        let decision = self.decide(&result);

        match decision {
            DeliveryDecision::Ack => stream.ack(message.delivery_tag).await?,
            DeliveryDecision::Requeue => stream.nack(message.delivery_tag, true).await?,
            DeliveryDecision::Reject => stream.nack(message.delivery_tag, false).await?,
        }

        match &result {
            Ok(processed) => {
                tracing::info!(
                    invitation_id = %processed.invitation_id,
                    delivery_tag = message.delivery_tag,
                    "Successfully processed candidate invitation"
                );
            }
            Err(e) => {
                tracing::error!(
                    delivery_tag = message.delivery_tag,
                    redelivered = message.redelivered,
                    error_code = e.error_code(),
                    decision = %decision,
                    error = %e,
                    "Error processing candidate invitation message"
                );
            }
        }

        if self.metrics_enabled {
            let error_code = result.as_ref().err().map(|e| e.error_code()).unwrap_or("");
            match decision {
                DeliveryDecision::Ack => CONSUMER_METRICS
                    .deliveries_acked
                    .with_label_values(&[queue])
                    .inc(),
                DeliveryDecision::Requeue => CONSUMER_METRICS
                    .deliveries_requeued
                    .with_label_values(&[queue, error_code])
                    .inc(),
                DeliveryDecision::Reject => CONSUMER_METRICS
                    .deliveries_rejected
                    .with_label_values(&[queue, error_code])
                    .inc(),
            }
            CONSUMER_METRICS
                .processing_latency
                .with_label_values(&[queue])
                .observe(started.elapsed().as_secs_f64());
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryBroker;
    use crate::state::{InMemoryStore, InvitationStore};

    fn connector(topology: QueueTopology) -> (QueueConnector, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(UpsertCoordinator::new(store.clone()));
        let connector = QueueConnector::new(Arc::new(InMemoryBroker::new()), topology, coordinator);
        (connector, store)
    }

    fn message(payload: &str) -> InboundMessage {
        InboundMessage {
            delivery_tag: 1,
            payload: payload.as_bytes().to_vec(),
            routing_key: "topic.candidate.invitation".to_string(),
            redelivered: false,
        }
    }

    const VALID: &str = r#"{"assessmentId":1,"assessmentName":"A1","assessmentType":"CODING","candidate":{},"userId":9,"userEmail":"a@b.com","invitationDate":"2024-01-01T00:00:00","invitationId":"u1"}"#;

    #[tokio::test]
    async fn test_handle_valid_message() {
        let (connector, store) = connector(QueueTopology::default());

        let processed = connector.handle(&message(VALID)).await.unwrap();

        assert_eq!(processed.invitation_id, "u1");
        assert_eq!(processed.assessment_id, 1);
        assert_eq!(connector.decide(&Ok(processed)), DeliveryDecision::Ack);
        assert_eq!(store.count_assessments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_invalid() {
        let (connector, store) = connector(QueueTopology::default());
        let connector = connector.with_max_message_bytes(16);

        let result = connector.handle(&message(VALID)).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.count_assessments().await.unwrap(), 0);
    }

    #[test]
    fn test_decisions_without_dead_letter_exchange() {
        let (connector, _) = connector(QueueTopology::default());

        let invalid: Result<ProcessedInvitation> = Err(AppError::Validation("x".to_string()));
        let transient: Result<ProcessedInvitation> =
            Err(AppError::TransientStore("x".to_string()));

        assert_eq!(connector.decide(&invalid), DeliveryDecision::Requeue);
        assert_eq!(connector.decide(&transient), DeliveryDecision::Requeue);
    }

    #[test]
    fn test_decisions_with_dead_letter_exchange() {
        let topology = QueueTopology {
            dead_letter_exchange: Some("dlx".to_string()),
            ..QueueTopology::default()
        };
        let (connector, _) = connector(topology);

        let invalid: Result<ProcessedInvitation> = Err(AppError::Validation("x".to_string()));
        let transient: Result<ProcessedInvitation> =
            Err(AppError::TransientStore("x".to_string()));
        let timeout: Result<ProcessedInvitation> = Err(AppError::Timeout("x".to_string()));

        assert_eq!(connector.decide(&invalid), DeliveryDecision::Reject);
        assert_eq!(connector.decide(&transient), DeliveryDecision::Requeue);
        assert_eq!(connector.decide(&timeout), DeliveryDecision::Requeue);
    }
}
