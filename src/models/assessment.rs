use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Assessment replicated from invitation events.
///
/// The identifier is assigned by the system that owns assessments; this
/// service only mirrors the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    /// Externally assigned identifier
    pub id: i64,

    /// Display name
    pub name: String,

    /// Free-form description
    pub description: Option<String>,

    /// Assessment kind, e.g. `CODING`
    pub assessment_type: String,

    /// Window opening time
    pub start_date: Option<DateTime<Utc>>,

    /// Window closing time
    pub end_date: Option<DateTime<Utc>>,

    /// Duration in minutes
    pub duration: Option<i64>,

    /// User that created the assessment (not the person being assessed)
    pub user_id: i64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Every assessment field an invitation carries, identity included.
///
/// Applying it overwrites the descriptive fields of an existing row;
/// optional fields that are `None` clear the stored value. `user_id` only
/// sets the owner when the row is created.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentFields {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub assessment_type: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub user_id: i64,
}

impl Assessment {
    /// Build a new row from invitation fields
    pub fn create(fields: &AssessmentFields, now: DateTime<Utc>) -> Self {
        Self {
            id: fields.id,
            name: fields.name.clone(),
            description: fields.description.clone(),
            assessment_type: fields.assessment_type.clone(),
            start_date: fields.start_date,
            end_date: fields.end_date,
            duration: fields.duration,
            user_id: fields.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the assessment's own fields, keeping `created_at` and the owner
    pub fn overwrite(&mut self, fields: &AssessmentFields, now: DateTime<Utc>) {
        self.name = fields.name.clone();
        self.description = fields.description.clone();
        self.assessment_type = fields.assessment_type.clone();
        self.start_date = fields.start_date;
        self.end_date = fields.end_date;
        self.duration = fields.duration;
        self.updated_at = now;
    }
}
