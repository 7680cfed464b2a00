use crate::error::{AppError, Result};
use crate::models::{Assessment, Candidate};
use crate::state::{InvitationStore, InvitationWrite, UpsertOutcome, WriteFaults};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;

/// Persistent invitation store using Sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    assessments_tree: Tree,
    candidates_tree: Tree,
    faults: WriteFaults,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref();
        let db = sled::open(&path).map_err(|e| {
            AppError::TransientStore(format!("Failed to open Sled database: {}", e))
        })?;

        let assessments_tree = db.open_tree("assessments").map_err(|e| {
            AppError::TransientStore(format!("Failed to open assessments tree: {}", e))
        })?;

        let candidates_tree = db.open_tree("candidates").map_err(|e| {
            AppError::TransientStore(format!("Failed to open candidates tree: {}", e))
        })?;

        tracing::info!("Initialized Sled store at {:?}", path_str);

        Ok(Self {
            db: Arc::new(db),
            assessments_tree,
            candidates_tree,
            faults: WriteFaults::default(),
        })
    }

    /// Get row key (big-endian so keys sort numerically)
    fn row_key(id: i64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>> {
        bincode::serialize(row)
            .map_err(|e| AppError::Internal(format!("Failed to serialize row: {}", e)))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| AppError::Internal(format!("Failed to deserialize row: {}", e)))
    }

    /// Read-then-write both rows inside one serializable multi-tree
    /// transaction. Sled retries the closure on conflict, so two writers can
    /// never both observe "absent" and both insert.
    fn apply_in_transaction(
        assessments: &Tree,
        candidates: &Tree,
        write: &InvitationWrite,
        faults: &WriteFaults,
    ) -> Result<UpsertOutcome> {
        let assessment_key = Self::row_key(write.assessment.id);
        let candidate_key = Self::row_key(write.candidate_id);

        (assessments, candidates)
            .transaction(
                |(assessments, candidates)| -> ConflictableTransactionResult<UpsertOutcome, AppError> {
                    let existing = match assessments.get(assessment_key)? {
                        Some(bytes) => Some(
                            Self::decode::<Assessment>(&bytes)
                                .map_err(ConflictableTransactionError::Abort)?,
                        ),
                        None => None,
                    };
                    let candidate_exists = candidates.get(candidate_key)?.is_some();

                    let plan = write.resolve(existing, candidate_exists);

                    let assessment_row =
                        Self::encode(&plan.assessment).map_err(ConflictableTransactionError::Abort)?;
                    assessments.insert(assessment_key.to_vec(), assessment_row)?;

                    if let Some(ref candidate) = plan.candidate {
                        if faults.candidate_insert_fails() {
                            return Err(ConflictableTransactionError::Abort(
                                AppError::TransientStore(format!(
                                    "candidate {} insert failed",
                                    write.candidate_id
                                )),
                            ));
                        }
                        let candidate_row =
                            Self::encode(candidate).map_err(ConflictableTransactionError::Abort)?;
                        candidates.insert(candidate_key.to_vec(), candidate_row)?;
                    }

                    Ok(plan.outcome)
                },
            )
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => {
                    AppError::TransientStore(format!("Sled transaction failed: {}", e))
                }
            })
    }

    fn get_row<T: DeserializeOwned>(tree: &Tree, id: i64) -> Result<Option<T>> {
        match tree.get(Self::row_key(id)) {
            Ok(Some(bytes)) => Ok(Some(Self::decode(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(AppError::TransientStore(format!("Failed to read row: {}", e))),
        }
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::TransientStore(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    pub fn faults(&self) -> &WriteFaults {
        &self.faults
    }
}

#[async_trait]
impl InvitationStore for SledStore {
    async fn upsert_invitation(&self, write: &InvitationWrite) -> Result<UpsertOutcome> {
        let assessments = self.assessments_tree.clone();
        let candidates = self.candidates_tree.clone();
        let faults = self.faults.clone();
        let owned = write.clone();

        // Sled transactions block; keep them off the async workers.
        let outcome = tokio::task::spawn_blocking(move || {
            Self::apply_in_transaction(&assessments, &candidates, &owned, &faults)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Store task failed: {}", e)))??;

        // Flush to ensure durability before the delivery is acknowledged
        self.flush().await?;

        tracing::debug!(
            assessment_id = write.assessment.id,
            user_id = write.candidate_id,
            assessment = %outcome.assessment,
            candidate = %outcome.candidate,
            "Invitation upserted in Sled"
        );
        Ok(outcome)
    }

    async fn get_assessment(&self, id: i64) -> Result<Option<Assessment>> {
        Self::get_row(&self.assessments_tree, id)
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        Self::get_row(&self.candidates_tree, id)
    }

    async fn count_assessments(&self) -> Result<u64> {
        Ok(self.assessments_tree.len() as u64)
    }

    async fn count_candidates(&self) -> Result<u64> {
        Ok(self.candidates_tree.len() as u64)
    }
}
