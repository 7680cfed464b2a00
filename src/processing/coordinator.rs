use crate::error::{AppError, Result};
use crate::messaging::InvitationEvent;
use crate::models::AssessmentFields;
use crate::state::{InvitationStore, InvitationWrite, UpsertOutcome};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;

/// Applies validated invitations to the store
pub struct UpsertCoordinator {
    store: Arc<dyn InvitationStore>,
}

impl UpsertCoordinator {
    pub fn new(store: Arc<dyn InvitationStore>) -> Self {
        Self { store }
    }

    /// Create-or-overwrite the assessment and create-if-absent the candidate,
    /// atomically. Nothing is written when date parsing fails.
    pub async fn apply(&self, event: &InvitationEvent) -> Result<UpsertOutcome> {
        let write = Self::prepare(event, Utc::now())?;
        let outcome = self.store.upsert_invitation(&write).await?;

        tracing::info!(
            invitation_id = %event.invitation_id,
            assessment_id = event.assessment_id,
            user_id = event.user_id,
            assessment = %outcome.assessment,
            candidate = %outcome.candidate,
            "Database updated for invitation"
        );

        Ok(outcome)
    }

    /// Map an event onto the rows it writes, stamped with `now`
    pub fn prepare(event: &InvitationEvent, now: DateTime<Utc>) -> Result<InvitationWrite> {
        let start_date = event
            .assessment_start_date
            .as_deref()
            .map(|raw| parse_timestamp("assessmentStartDate", raw))
            .transpose()?;
        let end_date = event
            .assessment_end_date
            .as_deref()
            .map(|raw| parse_timestamp("assessmentEndDate", raw))
            .transpose()?;

        Ok(InvitationWrite {
            assessment: AssessmentFields {
                id: event.assessment_id,
                name: event.assessment_name.clone(),
                description: event.assessment_description.clone(),
                assessment_type: event.assessment_type.clone(),
                start_date,
                end_date,
                duration: event.assessment_duration,
                user_id: event.user_id,
            },
            candidate_id: event.user_id,
            candidate_email: event.user_email.clone(),
            timestamp: now,
        })
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with an offset (converted to UTC), naive date-times with
/// a `T` or space separator (taken as UTC), and bare dates (midnight UTC).
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    let value = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(AppError::Validation(format!(
        "{} is not an ISO-8601 timestamp: {:?}",
        field, raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InMemoryStore, RowChange};
    use chrono::TimeZone;
    use serde_json::json;

    fn event(value: serde_json::Value) -> InvitationEvent {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "assessmentId": 1,
            "assessmentName": "A1",
            "assessmentType": "CODING",
            "candidate": {},
            "userId": 9,
            "userEmail": "a@b.com",
            "invitationDate": "2024-01-01T00:00:00",
            "invitationId": "u1"
        })
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("f", "2024-01-15T10:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("f", "2024-01-15 10:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("f", "2024-01-15T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("f", "2024-01-15T12:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("f", "2024-01-15T10:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp("f", "2024-01-15").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("f", "2024-01-15T10:00:00.250")
                .unwrap()
                .timestamp_subsec_millis(),
            250
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("assessmentStartDate", "next tuesday").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("assessmentStartDate"));
        assert!(parse_timestamp("f", "2024-13-01T00:00:00").is_err());
    }

    #[test]
    fn test_prepare_maps_fields() {
        let mut payload = base();
        let fields = payload.as_object_mut().unwrap();
        fields.insert("assessmentStartDate".into(), json!("2024-01-15T10:00:00"));
        fields.insert("assessmentDuration".into(), json!(120));

        let now = Utc::now();
        let write = UpsertCoordinator::prepare(&event(payload), now).unwrap();

        assert_eq!(write.assessment.id, 1);
        assert_eq!(write.assessment.user_id, 9);
        assert_eq!(write.assessment.duration, Some(120));
        assert_eq!(
            write.assessment.start_date,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap())
        );
        assert!(write.assessment.end_date.is_none());
        assert_eq!(write.candidate_id, 9);
        assert_eq!(write.candidate_email, "a@b.com");
        assert_eq!(write.timestamp, now);
    }

    #[tokio::test]
    async fn test_bad_date_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = UpsertCoordinator::new(store.clone());

        let mut payload = base();
        payload
            .as_object_mut()
            .unwrap()
            .insert("assessmentEndDate".into(), json!("soon"));

        let result = coordinator.apply(&event(payload)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.count_assessments().await.unwrap(), 0);
        assert_eq!(store.count_candidates().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apply_twice_overwrites_assessment() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = UpsertCoordinator::new(store.clone());

        let mut first = base();
        first
            .as_object_mut()
            .unwrap()
            .insert("assessmentDescription".into(), json!("original"));
        let outcome = coordinator.apply(&event(first)).await.unwrap();
        assert_eq!(outcome.assessment, RowChange::Created);
        let created_at = store.get_assessment(1).await.unwrap().unwrap().created_at;

        let mut second = base();
        second
            .as_object_mut()
            .unwrap()
            .insert("assessmentName".into(), json!("A1 v2"));
        let outcome = coordinator.apply(&event(second)).await.unwrap();
        assert_eq!(outcome.assessment, RowChange::Updated);
        assert_eq!(outcome.candidate, RowChange::Unchanged);

        let stored = store.get_assessment(1).await.unwrap().unwrap();
        assert_eq!(stored.name, "A1 v2");
        assert!(stored.description.is_none());
        assert_eq!(stored.created_at, created_at);
        assert!(stored.updated_at >= created_at);
        assert_eq!(store.count_assessments().await.unwrap(), 1);
    }
}
