//! Inbound invitation event and its schema validation

use crate::error::{AppError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Candidate invitation event published by the assessment service.
///
/// Field names are camelCase on the wire; the snake_case spelling used by
/// older producers is accepted as an alias. Integer fields also accept
/// integral numeric strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvitationEvent {
    #[serde(alias = "assessment_id", deserialize_with = "lax_i64")]
    pub assessment_id: i64,

    #[serde(alias = "assessment_name")]
    pub assessment_name: String,

    #[serde(default, alias = "assessment_description")]
    pub assessment_description: Option<String>,

    #[serde(alias = "assessment_type")]
    pub assessment_type: String,

    /// ISO-8601 timestamp, parsed when the event is applied
    #[serde(default, alias = "assessment_start_date")]
    pub assessment_start_date: Option<String>,

    /// ISO-8601 timestamp, parsed when the event is applied
    #[serde(default, alias = "assessment_end_date")]
    pub assessment_end_date: Option<String>,

    /// Minutes
    #[serde(default, alias = "assessment_duration", deserialize_with = "lax_opt_i64")]
    pub assessment_duration: Option<i64>,

    /// Invited person as sent by the producer; not decomposed here
    pub candidate: Map<String, Value>,

    /// Owner of the assessment
    #[serde(alias = "user_id", deserialize_with = "lax_i64")]
    pub user_id: i64,

    #[serde(alias = "user_email")]
    pub user_email: String,

    #[serde(alias = "invitation_date")]
    pub invitation_date: String,

    /// Correlation id for logs. Not used for deduplication.
    #[serde(alias = "invitation_id")]
    pub invitation_id: String,
}

impl InvitationEvent {
    /// Decode and type-check a raw payload
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::Validation(format!("payload is not valid UTF-8: {}", e)))?;

        serde_json::from_str(text)
            .map_err(|e| AppError::Validation(format!("invalid invitation payload: {}", e)))
    }
}

fn lax_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_i64(&value).map_err(D::Error::custom)
}

fn lax_opt_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce_i64(&value).map(Some).map_err(D::Error::custom),
    }
}

fn coerce_i64(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| format!("expected an integer, found {}", number)),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, found string {:?}", text)),
        other => Err(format!("expected an integer, found {}", json_kind(other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
