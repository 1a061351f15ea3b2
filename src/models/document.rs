use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    DocumentType, MarkType, PipelineStatus, ReadabilityStatus, SignatureCheck, TextSource,
    ValidationStatus,
};

/// One mark reported by signature detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureMark {
    pub location: String,
    pub signer_role: Option<String>,
    pub mark_type: MarkType,
    pub confidence: f32,
}

/// A freight document moving through the pipeline.
///
/// The orchestrator is the only writer while a run is in flight and commits
/// this struct after every phase, so a stored row is always a consistent
/// snapshot of the last completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub id: Uuid,
    pub source_path: String,
    pub original_filename: String,

    // Quality
    pub quality_score: Option<f32>,
    pub readability: Option<ReadabilityStatus>,
    pub is_blurry: bool,
    pub quality_issues: Vec<String>,

    // Extraction
    pub ocr_text: String,
    pub ocr_confidence: f32,
    pub text_source: TextSource,
    pub extraction_degraded: bool,
    /// Field values the vision model read off the page, kept so a resumed
    /// run can still backfill fields the text parser misses.
    pub field_hints: BTreeMap<String, String>,

    // Classification
    pub document_type: DocumentType,
    pub classification_confidence: f32,

    // Signatures
    pub signature_check: SignatureCheck,
    pub signature_count: u32,
    pub has_signature: bool,
    pub signatures: Vec<SignatureMark>,

    // Fields
    pub extracted_fields: BTreeMap<String, String>,
    pub extraction_score: f32,

    // Outcome
    pub processing_error: Option<String>,
    pub is_processed: bool,
    pub validation_status: ValidationStatus,
    pub billing_ready: bool,
    pub needs_manual_review: bool,
    pub validation_summary: Option<String>,
    pub validation_result: Option<serde_json::Value>,
    pub pipeline_status: PipelineStatus,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DocumentState {
    /// Fresh record for a newly registered source file.
    pub fn new(source_path: &str, original_filename: &str) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            source_path: source_path.to_string(),
            original_filename: original_filename.to_string(),
            quality_score: None,
            readability: None,
            is_blurry: false,
            quality_issues: Vec::new(),
            ocr_text: String::new(),
            ocr_confidence: 0.0,
            text_source: TextSource::None,
            extraction_degraded: false,
            field_hints: BTreeMap::new(),
            document_type: DocumentType::Unknown,
            classification_confidence: 0.0,
            signature_check: SignatureCheck::NotRun,
            signature_count: 0,
            has_signature: false,
            signatures: Vec::new(),
            extracted_fields: BTreeMap::new(),
            extraction_score: 0.0,
            processing_error: None,
            is_processed: false,
            validation_status: ValidationStatus::Pending,
            billing_ready: false,
            needs_manual_review: false,
            validation_summary: None,
            validation_result: None,
            pipeline_status: PipelineStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a non-fatal diagnostic note, tagged with the phase that produced it.
    pub fn add_note(&mut self, phase: &str, note: &str) {
        let entry = format!("[{phase}] {note}");
        match &mut self.processing_error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&entry);
            }
            None => self.processing_error = Some(entry),
        }
    }

    /// Non-empty field value, if present. Blank strings count as missing.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.extracted_fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Clear every derived value so the full pipeline can run again.
    /// Identity, source, and creation time survive.
    pub fn reset_for_reprocess(&mut self) {
        let fresh = Self {
            id: self.id,
            created_at: self.created_at,
            ..Self::new(&self.source_path, &self.original_filename)
        };
        *self = fresh;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().naive_utc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_starts_pending() {
        let doc = DocumentState::new("/scans/bol.png", "bol.png");
        assert_eq!(doc.validation_status, ValidationStatus::Pending);
        assert_eq!(doc.pipeline_status, PipelineStatus::Queued);
        assert_eq!(doc.document_type, DocumentType::Unknown);
        assert!(!doc.is_processed);
        assert!(doc.quality_score.is_none());
    }

    #[test]
    fn notes_accumulate() {
        let mut doc = DocumentState::new("/a.png", "a.png");
        doc.add_note("extraction", "vision unavailable");
        doc.add_note("signature", "skipped");
        assert_eq!(
            doc.processing_error.as_deref(),
            Some("[extraction] vision unavailable; [signature] skipped")
        );
    }

    #[test]
    fn blank_field_counts_as_missing() {
        let mut doc = DocumentState::new("/a.png", "a.png");
        doc.extracted_fields.insert("order_number".into(), "   ".into());
        doc.extracted_fields.insert("shipper".into(), " Acme Foods ".into());
        assert_eq!(doc.field("order_number"), None);
        assert_eq!(doc.field("shipper"), Some("Acme Foods"));
        assert_eq!(doc.field("consignee"), None);
    }

    #[test]
    fn reset_keeps_identity() {
        let mut doc = DocumentState::new("/a.png", "a.png");
        let id = doc.id;
        doc.quality_score = Some(80.0);
        doc.is_processed = true;
        doc.validation_status = ValidationStatus::Fail;
        doc.add_note("quality", "x");
        doc.field_hints.insert("shipper".into(), "Acme Foods".into());

        doc.reset_for_reprocess();

        assert_eq!(doc.id, id);
        assert_eq!(doc.source_path, "/a.png");
        assert!(doc.quality_score.is_none());
        assert!(!doc.is_processed);
        assert_eq!(doc.validation_status, ValidationStatus::Pending);
        assert!(doc.processing_error.is_none());
        assert!(doc.field_hints.is_empty());
    }
}
