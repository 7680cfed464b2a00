use crate::error::{AppError, Result};
use crate::models::{Assessment, AssessmentFields, Candidate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Trait for invitation storage operations.
///
/// `upsert_invitation` must be atomic: either both the assessment and the
/// candidate write become visible, or neither does.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Create-or-overwrite the assessment and create-if-absent the candidate
    /// in one transaction
    async fn upsert_invitation(&self, write: &InvitationWrite) -> Result<UpsertOutcome>;

    /// Get an assessment by ID
    async fn get_assessment(&self, id: i64) -> Result<Option<Assessment>>;

    /// Get a candidate by ID
    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>>;

    /// Number of stored assessments
    async fn count_assessments(&self) -> Result<u64>;

    /// Number of stored candidates
    async fn count_candidates(&self) -> Result<u64>;
}

/// Everything one invitation writes
#[derive(Debug, Clone, PartialEq)]
pub struct InvitationWrite {
    pub assessment: AssessmentFields,
    pub candidate_id: i64,
    pub candidate_email: String,
    pub timestamp: DateTime<Utc>,
}

/// What happened to a row during an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RowChange {
    Created,
    Updated,
    Unchanged,
}

/// Result of applying one invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub assessment: RowChange,
    pub candidate: RowChange,
}

/// Rows to write once the current state of both tables is known
#[derive(Debug, Clone)]
pub struct UpsertPlan {
    pub assessment: Assessment,
    pub candidate: Option<Candidate>,
    pub outcome: UpsertOutcome,
}

impl InvitationWrite {
    /// Decide the rows to write given what is currently stored
    pub fn resolve(
        &self,
        existing_assessment: Option<Assessment>,
        candidate_exists: bool,
    ) -> UpsertPlan {
        let (assessment, assessment_change) = match existing_assessment {
            Some(mut assessment) => {
                assessment.overwrite(&self.assessment, self.timestamp);
                (assessment, RowChange::Updated)
            }
            None => (
                Assessment::create(&self.assessment, self.timestamp),
                RowChange::Created,
            ),
        };

        let (candidate, candidate_change) = if candidate_exists {
            (None, RowChange::Unchanged)
        } else {
            (
                Some(Candidate::new(
                    self.candidate_id,
                    self.candidate_email.clone(),
                    self.timestamp,
                )),
                RowChange::Created,
            )
        };

        UpsertPlan {
            assessment,
            candidate,
            outcome: UpsertOutcome {
                assessment: assessment_change,
                candidate: candidate_change,
            },
        }
    }
}

/// Fault hooks shared by the store backends.
///
/// Armed failures fire on candidate inserts, after the assessment row has
/// been written in the same transaction, so callers can check that the
/// assessment write is rolled back.
#[derive(Debug, Clone, Default)]
pub struct WriteFaults {
    candidate_inserts: Arc<AtomicUsize>,
}

impl WriteFaults {
    /// Fail the next `count` candidate inserts
    pub fn fail_candidate_inserts(&self, count: usize) {
        self.candidate_inserts.store(count, Ordering::SeqCst);
    }

    /// Consume one armed failure, if any
    pub(crate) fn candidate_insert_fails(&self) -> bool {
        self.candidate_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Default)]
struct Tables {
    assessments: HashMap<i64, Assessment>,
    candidates: HashMap<i64, Candidate>,
}

/// In-memory invitation store (for local runs and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: WriteFaults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &WriteFaults {
        &self.faults
    }
}

#[async_trait]
impl InvitationStore for InMemoryStore {
    async fn upsert_invitation(&self, write: &InvitationWrite) -> Result<UpsertOutcome> {
        let mut tables = self.tables.write();

        let previous = tables.assessments.get(&write.assessment.id).cloned();
        let plan = write.resolve(
            previous.clone(),
            tables.candidates.contains_key(&write.candidate_id),
        );

        tables.assessments.insert(plan.assessment.id, plan.assessment);
        if let Some(candidate) = plan.candidate {
            if self.faults.candidate_insert_fails() {
                // Undo the assessment write; nothing from this invitation stays.
                match previous {
                    Some(previous) => tables.assessments.insert(previous.id, previous),
                    None => tables.assessments.remove(&write.assessment.id),
                };
                return Err(AppError::TransientStore(format!(
                    "candidate {} insert failed",
                    write.candidate_id
                )));
            }
            tables.candidates.insert(candidate.id, candidate);
        }

        tracing::debug!(
            assessment_id = write.assessment.id,
            user_id = write.candidate_id,
            "Invitation upserted in memory"
        );
        Ok(plan.outcome)
    }

    async fn get_assessment(&self, id: i64) -> Result<Option<Assessment>> {
        Ok(self.tables.read().assessments.get(&id).cloned())
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        Ok(self.tables.read().candidates.get(&id).cloned())
    }

    async fn count_assessments(&self) -> Result<u64> {
        Ok(self.tables.read().assessments.len() as u64)
    }

    async fn count_candidates(&self) -> Result<u64> {
        Ok(self.tables.read().candidates.len() as u64)
    }
}
