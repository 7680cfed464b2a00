//! Shared fixtures for the consumer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use candidate_invitation_consumer::{
    messaging::{InMemoryBroker, QueueConnector, QueueTopology},
    models::{Assessment, Candidate},
    processing::UpsertCoordinator,
    state::{InvitationStore, InvitationWrite, UpsertOutcome},
    AppError, Result,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The canonical invitation from the producer contract
pub const EXAMPLE_PAYLOAD: &str = r#"{"assessmentId":1,"assessmentName":"A1","assessmentType":"CODING","candidate":{},"userId":9,"userEmail":"a@b.com","invitationDate":"2024-01-01T00:00:00","invitationId":"u1"}"#;

/// Build an invitation payload for the given ids
pub fn invitation(assessment_id: i64, user_id: i64, email: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "assessmentId": assessment_id,
        "assessmentName": format!("Assessment {}", assessment_id),
        "assessmentType": "CODING",
        "candidate": {"firstName": "Ada"},
        "userId": user_id,
        "userEmail": email,
        "invitationDate": "2024-01-01T00:00:00",
        "invitationId": format!("inv-{}-{}", assessment_id, user_id),
    }))
    .unwrap()
}

pub fn connector(
    broker: &InMemoryBroker,
    topology: QueueTopology,
    store: Arc<dyn InvitationStore>,
) -> QueueConnector {
    let coordinator = Arc::new(UpsertCoordinator::new(store));
    QueueConnector::new(Arc::new(broker.clone()), topology, coordinator)
}

/// Publish with the topology's exchange and routing key
pub fn publish(broker: &InMemoryBroker, topology: &QueueTopology, payload: &[u8]) {
    let routed = broker.publish(&topology.exchange, &topology.routing_key, payload);
    assert_eq!(routed, 1, "message was not routed to the queue");
}

/// Wait until every message in `queue` has been acknowledged
pub async fn wait_until_drained(broker: &InMemoryBroker, queue: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.ready_count(queue) > 0 || broker.unacked_count(queue) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue was not drained");
}

/// Store that fails the first `failures` upserts with a transient error
pub struct FlakyStore {
    inner: Arc<dyn InvitationStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn InvitationStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl InvitationStore for FlakyStore {
    async fn upsert_invitation(&self, write: &InvitationWrite) -> Result<UpsertOutcome> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::TransientStore("database is locked".to_string()));
        }
        self.inner.upsert_invitation(write).await
    }

    async fn get_assessment(&self, id: i64) -> Result<Option<Assessment>> {
        self.inner.get_assessment(id).await
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        self.inner.get_candidate(id).await
    }

    async fn count_assessments(&self) -> Result<u64> {
        self.inner.count_assessments().await
    }

    async fn count_candidates(&self) -> Result<u64> {
        self.inner.count_candidates().await
    }
}

/// Store whose upserts never finish in time
pub struct StalledStore;

#[async_trait]
impl InvitationStore for StalledStore {
    async fn upsert_invitation(&self, _write: &InvitationWrite) -> Result<UpsertOutcome> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AppError::Internal("stalled store woke up".to_string()))
    }

    async fn get_assessment(&self, _id: i64) -> Result<Option<Assessment>> {
        Ok(None)
    }

    async fn get_candidate(&self, _id: i64) -> Result<Option<Candidate>> {
        Ok(None)
    }

    async fn count_assessments(&self) -> Result<u64> {
        Ok(0)
    }

    async fn count_candidates(&self) -> Result<u64> {
        Ok(0)
    }
}
