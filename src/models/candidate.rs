use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate row keyed by the inviting user's id.
///
/// Written once and never updated by invitation processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(id: i64, email: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email,
            created_at: now,
            updated_at: now,
        }
    }
}
