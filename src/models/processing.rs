use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::LogStatus;

/// Status string written to the re-upload outbox.
pub const REUPLOAD_REQUIRED: &str = "REUPLOAD_REQUIRED";

/// One row of the per-document phase log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub id: Uuid,
    pub document_id: Uuid,
    pub step_name: String,
    pub status: LogStatus,
    pub execution_time_ms: u64,
    pub details: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
}

impl ProcessingLogEntry {
    pub fn new(document_id: Uuid, step_name: &str, status: LogStatus, execution_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            step_name: step_name.to_string(),
            status,
            execution_time_ms,
            details: None,
            error_message: None,
            created_at: Utc::now().naive_utc(),
        }
    }
}

/// Request for the uploader to send a clearer copy of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuploadRequest {
    pub id: Uuid,
    pub document_id: Uuid,
    pub filename: String,
    pub quality_score: f32,
    pub message: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

impl ReuploadRequest {
    pub fn new(document_id: Uuid, filename: &str, quality_score: f32, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            filename: filename.to_string(),
            quality_score,
            message: message.to_string(),
            status: REUPLOAD_REQUIRED.to_string(),
            created_at: Utc::now().naive_utc(),
        }
    }
}
