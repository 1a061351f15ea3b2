//! Signature Detector and the per-type signature requirement table.
//!
//! Whether detection runs is decided by [`requirement_for`], never by
//! comparing against a particular type in the orchestrator. Only
//! handwritten marks at or above [`MIN_MARK_CONFIDENCE`] are counted;
//! printed names and stamps are kept in the mark list for operators but
//! never increase the count.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::vision::{call_with_retry, VisionAnalyzer, VisionError, VisionTask, MAX_SIGNATURES};
use crate::models::enums::{DocumentType, MarkType};
use crate::models::SignatureMark;
use crate::pipeline_config::RetryPolicy;

/// Handwritten marks below this confidence are not counted.
pub const MIN_MARK_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Signature detection failed: {0}")]
    Vision(#[from] VisionError),
}

// ──────────────────────────────────────────────
// Requirements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignatureRequirement {
    pub requires_signature: bool,
    pub min_signatures: u32,
}

impl SignatureRequirement {
    const NONE: Self = Self {
        requires_signature: false,
        min_signatures: 0,
    };

    const fn at_least(min_signatures: u32) -> Self {
        Self {
            requires_signature: true,
            min_signatures,
        }
    }
}

/// Signature evidence each document type needs.
pub fn requirement_for(document_type: DocumentType) -> SignatureRequirement {
    match document_type {
        DocumentType::BillOfLading => SignatureRequirement::at_least(2),
        DocumentType::ProofOfDelivery
        | DocumentType::HazmatDocument
        | DocumentType::LumperReceipt
        | DocumentType::TripSheet => SignatureRequirement::at_least(1),
        DocumentType::PackingList
        | DocumentType::CommercialInvoice
        | DocumentType::FreightInvoice
        | DocumentType::Unknown => SignatureRequirement::NONE,
    }
}

// ──────────────────────────────────────────────
// Detection
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignatureReport {
    pub count: u32,
    pub has_signature: bool,
    pub marks: Vec<SignatureMark>,
    pub notes: Vec<String>,
}

impl SignatureReport {
    /// Count qualifying marks. Falls back to the provider's reported count
    /// only when it sent no per-mark details at all.
    pub fn from_marks(marks: Vec<SignatureMark>, reported_count: u32) -> Self {
        let mut notes = Vec::new();
        let count = if marks.is_empty() && reported_count > 0 {
            notes.push(format!(
                "provider reported {reported_count} signature(s) without details"
            ));
            reported_count
        } else {
            marks
                .iter()
                .filter(|m| m.mark_type == MarkType::Handwritten)
                .filter(|m| m.confidence >= MIN_MARK_CONFIDENCE)
                .count() as u32
        }
        .min(MAX_SIGNATURES);

        Self {
            count,
            has_signature: count > 0,
            marks,
            notes,
        }
    }
}

/// Signature detection capability (allows mocking for tests)
pub trait SignatureDetector {
    fn detect(
        &self,
        document_id: &Uuid,
        image_bytes: &[u8],
        document_type: DocumentType,
    ) -> Result<SignatureReport, SignatureError>;
}

/// Production detector: vision analysis with the signature task hint.
pub struct VisionSignatureDetector {
    vision: Arc<dyn VisionAnalyzer>,
    retry: RetryPolicy,
}

impl VisionSignatureDetector {
    pub fn new(vision: Arc<dyn VisionAnalyzer>, retry: RetryPolicy) -> Self {
        Self { vision, retry }
    }
}

impl SignatureDetector for VisionSignatureDetector {
    fn detect(
        &self,
        document_id: &Uuid,
        image_bytes: &[u8],
        document_type: DocumentType,
    ) -> Result<SignatureReport, SignatureError> {
        let analysis = call_with_retry(&self.retry, document_id, "signature_detection", || {
            self.vision
                .analyze(image_bytes, VisionTask::SignatureDetection, None)
        })?;

        let report = SignatureReport::from_marks(analysis.signatures, analysis.reported_signature_count);
        tracing::info!(
            document_id = %document_id,
            document_type = %document_type,
            count = report.count,
            marks = report.marks.len(),
            "Signature detection complete"
        );
        Ok(report)
    }
}

/// Mock detector: fixed report or failure, with a call counter.
pub struct MockSignatureDetector {
    result: Result<SignatureReport, String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockSignatureDetector {
    pub fn new(count: u32) -> Self {
        let marks = (0..count)
            .map(|i| SignatureMark {
                location: format!("signature line {}", i + 1),
                signer_role: None,
                mark_type: MarkType::Handwritten,
                confidence: 0.9,
            })
            .collect();
        Self {
            result: Ok(SignatureReport::from_marks(marks, count)),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl SignatureDetector for MockSignatureDetector {
    fn detect(
        &self,
        _document_id: &Uuid,
        _image_bytes: &[u8],
        _document_type: DocumentType,
    ) -> Result<SignatureReport, SignatureError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.result.clone().map_err(|message| {
            SignatureError::Vision(VisionError::Provider {
                status: 500,
                body: message,
            })
        })
    }
}
