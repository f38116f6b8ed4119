//! Job entity and submission DTOs.

use chrono::{DateTime, Utc};
use promptgate_core::error::CoreError;
use promptgate_core::model::{validate_model, validate_response_format};
use promptgate_core::status::JobStatus;
use serde::{Deserialize, Serialize};

/// A row from the `jobs` table.
///
/// Optional string columns are stored as `''` and omitted from the JSON
/// wire form when empty; `metadata` is client-supplied JSON passed through
/// verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system_prompt: String,
    pub model: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub response_format: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a fresh `queued` job from a validated submission.
    pub fn from_request(req: CreateJobRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: req.prompt,
            system_prompt: req.system_prompt,
            model: req.model,
            status: JobStatus::Queued,
            result: String::new(),
            error: String::new(),
            callback_url: req.callback_url,
            metadata: req.metadata,
            response_format: req.response_format,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Payload of `POST /api/v1/jobs`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub response_format: String,
}

impl CreateJobRequest {
    /// Validate the submission. The model field must already be filled in
    /// (handlers substitute the configured default before calling this).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.is_empty() {
            return Err(CoreError::Validation("prompt must not be empty".into()));
        }
        validate_model(&self.model)?;
        validate_response_format(&self.response_format)?;
        if !self.callback_url.is_empty()
            && !self.callback_url.starts_with("http://")
            && !self.callback_url.starts_with("https://")
        {
            return Err(CoreError::Validation(
                "callback_url must be an http(s) URL".into(),
            ));
        }
        Ok(())
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> CreateJobRequest {
        CreateJobRequest {
            prompt: "hello".into(),
            model: "haiku".into(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn empty_prompt_rejected() {
        let mut req = valid_request();
        req.prompt = String::new();
        assert!(req.validate().is_err());
    }

    #[test]
    fn unknown_model_rejected() {
        let mut req = valid_request();
        req.model = "gpt-4".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn bad_response_format_rejected() {
        let mut req = valid_request();
        req.response_format = "yaml".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn non_http_callback_rejected() {
        let mut req = valid_request();
        req.callback_url = "ftp://example.com/hook".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn job_json_omits_empty_optionals() {
        let job = Job::from_request(valid_request());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["job_id"], job.id.as_str());
        assert_eq!(json["status"], "queued");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("started_at").is_none());
    }
}
