//! Re-upload notification delivery.
//!
//! The outbox row in `reupload_requests` is the durable record; the
//! notifier is best-effort and its failures never reach the pipeline.

use std::sync::Mutex;

use thiserror::Error;

use crate::models::ReuploadRequest;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel for re-upload requests (allows mocking for tests)
pub trait ReuploadNotifier {
    fn notify(&self, request: &ReuploadRequest) -> Result<(), NotifyError>;
}

/// Default notifier: writes the request to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ReuploadNotifier for LogNotifier {
    fn notify(&self, request: &ReuploadRequest) -> Result<(), NotifyError> {
        tracing::info!(
            document_id = %request.document_id,
            filename = %request.filename,
            quality_score = request.quality_score,
            message = %request.message,
            "Re-upload requested"
        );
        Ok(())
    }
}

/// Records every request it receives. Optionally fails after recording.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<ReuploadRequest>>,
    fail_with: Option<String>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<ReuploadRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ReuploadNotifier for MockNotifier {
    fn notify(&self, request: &ReuploadRequest) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request.clone());
        }
        match &self.fail_with {
            Some(message) => Err(NotifyError::Delivery(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::REUPLOAD_REQUIRED;
    use uuid::Uuid;

    #[test]
    fn mock_records_requests() {
        let notifier = MockNotifier::new();
        let request = ReuploadRequest::new(Uuid::new_v4(), "bol.png", 12.5, "too blurry");
        notifier.notify(&request).unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, REUPLOAD_REQUIRED);
    }

    #[test]
    fn failing_mock_still_records() {
        let notifier = MockNotifier::failing("smtp down");
        let request = ReuploadRequest::new(Uuid::new_v4(), "bol.png", 12.5, "too blurry");
        let err = notifier.notify(&request).unwrap_err();
        assert!(err.to_string().contains("smtp down"));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn log_notifier_never_fails() {
        let request = ReuploadRequest::new(Uuid::new_v4(), "pod.jpg", 0.0, "no text");
        assert!(LogNotifier.notify(&request).is_ok());
    }
}
