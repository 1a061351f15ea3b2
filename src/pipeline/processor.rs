//! Pipeline Orchestrator.
//!
//! Drives one document through the fixed phase order:
//! quality → extraction → classification → signatures → fields →
//! validation + status resolution.
//!
//! Uses trait-based DI for every capability so the orchestrator stays fully
//! testable with mock implementations. Phase errors never escape: they are
//! logged, appended to `processing_error`, and the phase output falls back
//! to its neutral value. The only caller-visible failures are corrupt input,
//! a missing record, and the database itself.
//!
//! The record is committed after every phase, so a crash mid-run leaves an
//! inspectable partial state. [`PipelineOrchestrator::resume`] picks such a
//! run back up from its phase log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::classification::{DocumentClassifier, HybridClassifier};
use super::diagnostic::{self, DiagnosticDump};
use super::extraction::{ExtractionCoordinator, OllamaOcrEngine};
use super::fields::FieldExtractor;
use super::notify::{LogNotifier, ReuploadNotifier};
use super::ollama::OllamaClient;
use super::quality::{ImageQualityAssessor, QualityAssessor};
use super::signature::{requirement_for, SignatureDetector, VisionSignatureDetector};
use super::status::{self, Resolution};
use super::validation::{Rulebook, ValidationVerdict};
use super::vision::{OllamaVisionAnalyzer, VisionAnalyzer};
use crate::db::{repository, DatabaseError};
use crate::models::enums::{
    DocumentType, LogStatus, PipelineStatus, SignatureCheck, ValidationStatus,
};
use crate::models::{DocumentState, ProcessingLogEntry, ReuploadRequest};
use crate::pipeline_config::PipelineConfig;

/// Inputs smaller than this cannot hold a decodable image.
pub const MIN_INPUT_BYTES: u64 = 67;

/// Inputs larger than this are refused outright.
pub const MAX_INPUT_BYTES: u64 = 50 * 1024 * 1024;

pub const STEP_QUALITY: &str = "Quality Assessment";
pub const STEP_EXTRACTION: &str = "Extraction";
pub const STEP_CLASSIFICATION: &str = "Classification";
pub const STEP_SIGNATURE: &str = "Signature Detection";
pub const STEP_FIELDS: &str = "Field Extraction";
pub const STEP_VALIDATION: &str = "Validation";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can surface from the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Document {id} is {status}, nothing to resume")]
    NotResumable { id: Uuid, status: PipelineStatus },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Capability setup failed: {0}")]
    Setup(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One executed (or skipped) phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub name: &'static str,
    pub status: LogStatus,
    pub elapsed_ms: u64,
    pub details: Option<String>,
    pub error: Option<String>,
}

impl PhaseRecord {
    fn success(name: &'static str, started: Instant, details: String) -> Self {
        Self {
            name,
            status: LogStatus::Success,
            elapsed_ms: started.elapsed().as_millis() as u64,
            details: Some(details),
            error: None,
        }
    }

    fn skipped(name: &'static str, started: Instant, details: String) -> Self {
        Self {
            status: LogStatus::Skipped,
            ..Self::success(name, started, details)
        }
    }

    fn failed(name: &'static str, started: Instant, error: String) -> Self {
        Self {
            name,
            status: LogStatus::Failed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            details: None,
            error: Some(error),
        }
    }
}

/// Summary returned to callers after a full run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub document_id: Uuid,
    pub original_filename: String,
    pub document_type: DocumentType,
    pub validation_status: ValidationStatus,
    pub pipeline_status: PipelineStatus,
    pub billing_ready: bool,
    pub needs_manual_review: bool,
    pub reupload_required: bool,
    pub summary: String,
    pub phases: Vec<PhaseRecord>,
}

/// Output of the synchronous troubleshooting run.
#[derive(Debug, Clone, Serialize)]
pub struct DebugReport {
    pub document_id: Uuid,
    pub verdict: ValidationVerdict,
    pub resolution: Resolution,
    pub phases: Vec<PhaseRecord>,
    pub document: DocumentState,
}

struct RunResult {
    verdict: ValidationVerdict,
    resolution: Resolution,
    phases: Vec<PhaseRecord>,
}

/// Collects phase records and, when a connection is present, commits the
/// record plus a log row after each phase. Steps in `done` were committed
/// by an earlier, interrupted run and are not executed again.
struct PhaseLog<'a> {
    conn: Option<&'a Connection>,
    done: &'a HashSet<String>,
    records: Vec<PhaseRecord>,
}

impl PhaseLog<'_> {
    fn pending(&self, step: &str) -> bool {
        !self.done.contains(step)
    }

    fn commit(&mut self, doc: &mut DocumentState, record: PhaseRecord) -> Result<(), ProcessingError> {
        if let Some(conn) = self.conn {
            doc.touch();
            repository::update_document(conn, doc)?;
            let mut entry =
                ProcessingLogEntry::new(doc.id, record.name, record.status, record.elapsed_ms);
            entry.details = record.details.clone();
            entry.error_message = record.error.clone();
            repository::insert_processing_log(conn, &entry)?;
        }
        self.records.push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PipelineOrchestrator {
    assessor: Box<dyn QualityAssessor + Send + Sync>,
    extraction: ExtractionCoordinator,
    classifier: Box<dyn DocumentClassifier + Send + Sync>,
    signatures: Arc<dyn SignatureDetector + Send + Sync>,
    fields: FieldExtractor,
    rulebook: Arc<Rulebook>,
    notifier: Arc<dyn ReuploadNotifier + Send + Sync>,
    dump_dir: Option<PathBuf>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        assessor: Box<dyn QualityAssessor + Send + Sync>,
        extraction: ExtractionCoordinator,
        classifier: Box<dyn DocumentClassifier + Send + Sync>,
        signatures: Arc<dyn SignatureDetector + Send + Sync>,
        notifier: Arc<dyn ReuploadNotifier + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            assessor,
            extraction,
            classifier,
            signatures,
            fields: FieldExtractor::new(),
            rulebook: Arc::new(Rulebook::standard(&config)),
            notifier,
            dump_dir: None,
            config,
        }
    }

    /// Where `debug_run` writes its artifacts. `None` disables dumps.
    pub fn with_dump_dir(mut self, dump_dir: Option<PathBuf>) -> Self {
        self.dump_dir = dump_dir;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rulebook(&self) -> &Rulebook {
        &self.rulebook
    }

    /// Create a queued record for a source file. The file itself is
    /// checked when processing starts.
    pub fn register_document(
        &self,
        conn: &Connection,
        source_path: &Path,
    ) -> Result<DocumentState, ProcessingError> {
        let filename = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.display().to_string());
        let doc = DocumentState::new(&source_path.display().to_string(), &filename);
        repository::insert_document(conn, &doc)?;
        tracing::info!(document_id = %doc.id, filename = %filename, "Document registered");
        Ok(doc)
    }

    /// Run the full pipeline for a stored document.
    pub fn process(
        &self,
        conn: &Connection,
        document_id: &Uuid,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let mut doc = load(conn, document_id)?;
        let image = read_or_reject(conn, &mut doc)?;

        tracing::info!(
            document_id = %document_id,
            filename = %doc.original_filename,
            bytes = image.len(),
            "Processing: starting pipeline"
        );
        doc.pipeline_status = PipelineStatus::Running;
        doc.touch();
        repository::update_document(conn, &doc)?;

        let run = self.run_phases(&mut doc, &image, Some(conn), &HashSet::new())?;
        self.finish(conn, doc, run)
    }

    /// Continue a run that stopped part way, typically because the process
    /// died. Phases with a `SUCCESS` or `SKIPPED` log row keep their committed
    /// output; failed and missing phases run again. Queued documents are
    /// processed from the start.
    pub fn resume(
        &self,
        conn: &Connection,
        document_id: &Uuid,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let mut doc = load(conn, document_id)?;
        match doc.pipeline_status {
            PipelineStatus::Running => {}
            PipelineStatus::Queued => return self.process(conn, document_id),
            status => {
                return Err(ProcessingError::NotResumable {
                    id: *document_id,
                    status,
                })
            }
        }

        let image = read_or_reject(conn, &mut doc)?;
        let done: HashSet<String> = repository::get_processing_log(conn, document_id)?
            .into_iter()
            .filter(|e| matches!(e.status, LogStatus::Success | LogStatus::Skipped))
            .map(|e| e.step_name)
            .collect();
        tracing::info!(
            document_id = %document_id,
            completed_phases = done.len(),
            "Resuming interrupted run"
        );

        let run = self.run_phases(&mut doc, &image, Some(conn), &done)?;
        self.finish(conn, doc, run)
    }

    /// Documents a previous process left `running`, oldest first.
    pub fn interrupted(&self, conn: &Connection) -> Result<Vec<Uuid>, ProcessingError> {
        let docs = repository::get_documents_by_pipeline_status(conn, PipelineStatus::Running)?;
        Ok(docs.into_iter().map(|d| d.id).collect())
    }

    fn finish(
        &self,
        conn: &Connection,
        doc: DocumentState,
        run: RunResult,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        if run.resolution.reupload_required {
            self.request_reupload(conn, &doc, &run.verdict)?;
        }

        tracing::info!(
            document_id = %doc.id,
            document_type = %doc.document_type,
            status = %doc.validation_status,
            billing_ready = doc.billing_ready,
            "Processing complete"
        );

        Ok(ProcessingOutcome {
            document_id: doc.id,
            original_filename: doc.original_filename.clone(),
            document_type: doc.document_type,
            validation_status: doc.validation_status,
            pipeline_status: doc.pipeline_status,
            billing_ready: doc.billing_ready,
            needs_manual_review: doc.needs_manual_review,
            reupload_required: run.resolution.reupload_required,
            summary: run.resolution.summary,
            phases: run.phases,
        })
    }

    /// Clear every derived value and the phase log, then run again.
    pub fn reprocess(
        &self,
        conn: &Connection,
        document_id: &Uuid,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let mut doc = load(conn, document_id)?;
        doc.reset_for_reprocess();
        repository::update_document(conn, &doc)?;
        let cleared = repository::clear_processing_log(conn, document_id)?;
        tracing::info!(document_id = %document_id, cleared_log_rows = cleared, "Reprocessing");
        self.process(conn, document_id)
    }

    /// Re-run every phase synchronously against the stored source file and
    /// return the verdict with per-phase timings. Writes nothing to the
    /// database, so repeated runs on an unchanged document agree.
    pub fn debug_run(
        &self,
        conn: &Connection,
        document_id: &Uuid,
    ) -> Result<DebugReport, ProcessingError> {
        let _span = tracing::info_span!("debug_run", document_id = %document_id).entered();
        let mut doc = load(conn, document_id)?;
        let image = read_input(Path::new(&doc.source_path))?;
        doc.reset_for_reprocess();

        let run = self.run_phases(&mut doc, &image, None, &HashSet::new())?;

        let report = DebugReport {
            document_id: *document_id,
            verdict: run.verdict,
            resolution: run.resolution,
            phases: run.phases,
            document: doc,
        };

        let dump = self
            .dump_dir
            .as_deref()
            .and_then(|base| DiagnosticDump::under(base, document_id));
        if let Some(dump) = dump {
            dump.json("01-phases.json", &report.phases);
            dump.json("02-document.json", &report.document);
            dump.json("03-verdict.json", &report.verdict);
            dump.json("04-resolution.json", &report.resolution);
            dump.text("05-ocr-text.txt", &report.document.ocr_text);
            tracing::info!(path = %dump.dir().display(), "Debug artifacts written");
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn run_phases(
        &self,
        doc: &mut DocumentState,
        image: &[u8],
        conn: Option<&Connection>,
        done: &HashSet<String>,
    ) -> Result<RunResult, ProcessingError> {
        let mut log = PhaseLog {
            conn,
            done,
            records: Vec::new(),
        };

        if log.pending(STEP_QUALITY) {
            let record = self.assess_quality(doc, image);
            log.commit(doc, record)?;
        }

        if log.pending(STEP_EXTRACTION) {
            let record = self.extract_text(doc, image);
            log.commit(doc, record)?;
        }

        if log.pending(STEP_CLASSIFICATION) {
            let record = self.classify(doc, image);
            log.commit(doc, record)?;
        }

        if log.pending(STEP_SIGNATURE) {
            let record = self.detect_signatures(doc, image);
            log.commit(doc, record)?;
        }

        if log.pending(STEP_FIELDS) {
            let record = self.extract_fields(doc);
            log.commit(doc, record)?;
        }

        // Always re-evaluated: the verdict itself is not stored per phase
        let started = Instant::now();
        let (verdict, resolution) = {
            let _span = tracing::info_span!("phase", phase = STEP_VALIDATION).entered();
            let verdict = self.rulebook.evaluate(doc);
            let resolution = status::resolve(&verdict);
            (verdict, resolution)
        };
        apply_resolution(doc, &verdict, &resolution)?;
        tracing::info!(
            document_id = %doc.id,
            status = %resolution.validation_status,
            billing_ready = resolution.billing_ready,
            reupload_required = resolution.reupload_required,
            "Status resolved"
        );
        let record = PhaseRecord::success(
            STEP_VALIDATION,
            started,
            format!(
                "status={} hard={} soft={} score={:.2}",
                resolution.validation_status,
                verdict.hard_failures.len(),
                verdict.soft_warnings.len(),
                verdict.score
            ),
        );
        log.commit(doc, record)?;

        Ok(RunResult {
            verdict,
            resolution,
            phases: log.records,
        })
    }

    fn assess_quality(&self, doc: &mut DocumentState, image: &[u8]) -> PhaseRecord {
        let _span = tracing::info_span!("phase", phase = STEP_QUALITY).entered();
        let started = Instant::now();
        let report = self.assessor.assess(image);

        doc.quality_score = Some(report.score);
        doc.readability = Some(report.readability);
        doc.is_blurry = report.is_blurry;
        doc.quality_issues = report.issues.clone();
        if let Some(note) = &report.note {
            doc.add_note("quality", note);
        }

        if report.score < self.config.quality_warning_threshold {
            tracing::warn!(
                document_id = %doc.id,
                score = report.score,
                threshold = self.config.quality_warning_threshold,
                "Low quality scan, continuing with review flag"
            );
        }

        PhaseRecord::success(
            STEP_QUALITY,
            started,
            format!(
                "score={:.2} readability={} blurry={} issues=[{}]",
                report.score,
                report.readability,
                report.is_blurry,
                report.issues.join(",")
            ),
        )
    }

    fn extract_text(&self, doc: &mut DocumentState, image: &[u8]) -> PhaseRecord {
        let _span = tracing::info_span!("phase", phase = STEP_EXTRACTION).entered();
        let started = Instant::now();
        let outcome = self.extraction.extract(&doc.id, image);

        doc.ocr_text = outcome.text.clone();
        doc.ocr_confidence = outcome.confidence;
        doc.text_source = outcome.text_source();
        doc.extraction_degraded = outcome.degraded;
        doc.field_hints = outcome.field_hints;
        for note in &outcome.notes {
            doc.add_note("extraction", note);
        }

        PhaseRecord::success(
            STEP_EXTRACTION,
            started,
            format!(
                "source={} chars={} confidence={:.2} vision={} degraded={} hints={}",
                doc.text_source,
                doc.ocr_text.chars().count(),
                outcome.confidence,
                outcome.vision_attempted,
                outcome.degraded,
                doc.field_hints.len()
            ),
        )
    }

    fn classify(&self, doc: &mut DocumentState, image: &[u8]) -> PhaseRecord {
        let _span = tracing::info_span!("phase", phase = STEP_CLASSIFICATION).entered();
        let started = Instant::now();

        match self.classifier.classify(&doc.id, &doc.ocr_text, image) {
            Ok(c) => {
                let threshold = self.config.classification_threshold;
                doc.classification_confidence = c.confidence;
                doc.document_type = if c.confidence >= threshold {
                    c.document_type
                } else {
                    DocumentType::Unknown
                };
                if c.document_type.is_known() && !doc.document_type.is_known() {
                    tracing::info!(
                        document_id = %doc.id,
                        candidate = %c.document_type,
                        confidence = c.confidence,
                        threshold,
                        "Classification uncertain, using unknown"
                    );
                }
                PhaseRecord::success(
                    STEP_CLASSIFICATION,
                    started,
                    format!(
                        "type={} candidate={} confidence={:.3} method={}",
                        doc.document_type, c.document_type, c.confidence, c.method
                    ),
                )
            }
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "Classification failed");
                doc.document_type = DocumentType::Unknown;
                doc.classification_confidence = 0.0;
                doc.add_note("classification", &e.to_string());
                PhaseRecord::failed(STEP_CLASSIFICATION, started, e.to_string())
            }
        }
    }

    fn detect_signatures(&self, doc: &mut DocumentState, image: &[u8]) -> PhaseRecord {
        let _span = tracing::info_span!("phase", phase = STEP_SIGNATURE).entered();
        let started = Instant::now();
        let requirement = requirement_for(doc.document_type);

        if !requirement.requires_signature {
            doc.signature_check = SignatureCheck::Skipped;
            tracing::info!(
                document_id = %doc.id,
                document_type = %doc.document_type,
                "Signature detection skipped"
            );
            return PhaseRecord::skipped(
                STEP_SIGNATURE,
                started,
                format!("{} does not require signatures", doc.document_type.display_name()),
            );
        }

        match self.signatures.detect(&doc.id, image, doc.document_type) {
            Ok(report) => {
                doc.signature_check = SignatureCheck::Detected;
                doc.signature_count = report.count;
                doc.has_signature = report.has_signature;
                doc.signatures = report.marks;
                for note in &report.notes {
                    doc.add_note("signature", note);
                }
                PhaseRecord::success(
                    STEP_SIGNATURE,
                    started,
                    format!(
                        "count={} required={} marks={}",
                        report.count,
                        requirement.min_signatures,
                        doc.signatures.len()
                    ),
                )
            }
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "Signature detection failed");
                doc.signature_check = SignatureCheck::Failed;
                doc.signature_count = 0;
                doc.has_signature = false;
                doc.signatures.clear();
                doc.add_note("signature", &e.to_string());
                PhaseRecord::failed(STEP_SIGNATURE, started, e.to_string())
            }
        }
    }

    fn extract_fields(&self, doc: &mut DocumentState) -> PhaseRecord {
        let _span = tracing::info_span!("phase", phase = STEP_FIELDS).entered();
        let started = Instant::now();
        let fields = self
            .fields
            .extract(&doc.ocr_text, doc.document_type, &doc.field_hints);
        doc.extracted_fields = fields.fields;
        doc.extraction_score = fields.score;
        PhaseRecord::success(
            STEP_FIELDS,
            started,
            format!(
                "filled={}/{} from_hints={} score={:.2}",
                fields.filled,
                fields.expected,
                fields.from_hints.len(),
                fields.score
            ),
        )
    }

    /// Write the outbox row, then hand it to the notifier. Delivery
    /// failures are logged only.
    fn request_reupload(
        &self,
        conn: &Connection,
        doc: &DocumentState,
        verdict: &ValidationVerdict,
    ) -> Result<(), ProcessingError> {
        let reasons: Vec<&str> = verdict.hard_failures.iter().map(|f| f.reason.as_str()).collect();
        let request = ReuploadRequest::new(
            doc.id,
            &doc.original_filename,
            doc.quality_score.unwrap_or(0.0),
            &reasons.join(" "),
        );
        repository::insert_reupload_request(conn, &request)?;
        tracing::info!(
            document_id = %doc.id,
            failed = ?verdict.failed_rule_ids(),
            "Re-upload request recorded"
        );

        if let Err(e) = self.notifier.notify(&request) {
            tracing::warn!(document_id = %doc.id, error = %e, "Re-upload notification failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(conn: &Connection, document_id: &Uuid) -> Result<DocumentState, ProcessingError> {
    repository::get_document(conn, document_id)?
        .ok_or(ProcessingError::DocumentNotFound(*document_id))
}

/// Read the source file. Corrupt input marks the record rejected before
/// the error is returned.
fn read_or_reject(conn: &Connection, doc: &mut DocumentState) -> Result<Vec<u8>, ProcessingError> {
    match read_input(Path::new(&doc.source_path)) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            tracing::warn!(document_id = %doc.id, error = %e, "Rejecting input");
            doc.pipeline_status = PipelineStatus::Rejected;
            doc.processing_error = Some(e.to_string());
            doc.touch();
            repository::update_document(conn, doc)?;
            Err(e)
        }
    }
}

fn apply_resolution(
    doc: &mut DocumentState,
    verdict: &ValidationVerdict,
    resolution: &Resolution,
) -> Result<(), ProcessingError> {
    doc.validation_status = resolution.validation_status;
    doc.billing_ready = resolution.billing_ready;
    doc.needs_manual_review = resolution.needs_manual_review;
    doc.validation_summary = Some(resolution.summary.clone());
    doc.validation_result = Some(serde_json::to_value(verdict).map_err(DatabaseError::from)?);
    doc.is_processed = true;
    doc.pipeline_status = PipelineStatus::Completed;
    Ok(())
}

/// Read the source file, refusing anything that cannot be an image.
pub fn read_input(path: &Path) -> Result<Vec<u8>, ProcessingError> {
    let corrupt = |reason: String| ProcessingError::CorruptInput(reason);

    let meta = std::fs::metadata(path)
        .map_err(|e| corrupt(format!("cannot read {}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(corrupt(format!("{} is not a file", path.display())));
    }
    if meta.len() < MIN_INPUT_BYTES {
        return Err(corrupt(format!("file too small ({} bytes)", meta.len())));
    }
    if meta.len() > MAX_INPUT_BYTES {
        return Err(corrupt(format!("file too large ({} bytes)", meta.len())));
    }

    let bytes = std::fs::read(path)
        .map_err(|e| corrupt(format!("cannot read {}: {e}", path.display())))?;
    if !is_supported_image(&bytes) {
        return Err(corrupt("not a PNG, JPEG, or TIFF image".into()));
    }
    Ok(bytes)
}

fn is_supported_image(bytes: &[u8]) -> bool {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const TIFF_LE: &[u8] = b"II*\0";
    const TIFF_BE: &[u8] = b"MM\0*";
    [PNG, JPEG, TIFF_LE, TIFF_BE]
        .iter()
        .any(|magic| bytes.starts_with(magic))
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build an orchestrator with production implementations.
///
/// - Quality: `ImageQualityAssessor`
/// - OCR: `OllamaOcrEngine` on `config.ocr_model`
/// - Vision + signatures: `OllamaVisionAnalyzer` on `config.vision_model`
/// - Classification: `HybridClassifier` (keywords, vision below
///   `config.vision_classification_threshold`)
/// - Notification: `LogNotifier`
/// - Debug dumps: `diagnostic::dump_base_dir()`
pub fn build_orchestrator(config: &PipelineConfig) -> Result<PipelineOrchestrator, ProcessingError> {
    let client = Arc::new(
        OllamaClient::new(&config.ollama_url, config.request_timeout_secs)
            .map_err(|e| ProcessingError::Setup(e.to_string()))?,
    );
    tracing::info!(
        url = %config.ollama_url,
        ocr_model = %config.ocr_model,
        vision_model = %config.vision_model,
        "Pipeline using Ollama models"
    );

    let vision: Arc<dyn VisionAnalyzer> =
        Arc::new(OllamaVisionAnalyzer::new(client.clone(), &config.vision_model));
    let ocr = Box::new(OllamaOcrEngine::new(client, &config.ocr_model));
    let extraction = ExtractionCoordinator::new(ocr, vision.clone(), config);
    let classifier = Box::new(HybridClassifier::new(vision.clone(), config));
    let signatures = Arc::new(VisionSignatureDetector::new(vision, config.vision_retry.clone()));

    Ok(PipelineOrchestrator::new(
        Box::new(ImageQualityAssessor),
        extraction,
        classifier,
        signatures,
        Arc::new(LogNotifier),
        config.clone(),
    )
    .with_dump_dir(diagnostic::dump_base_dir()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::REUPLOAD_REQUIRED;
    use crate::pipeline::classification::MockClassifier;
    use crate::pipeline::extraction::MockOcrEngine;
    use crate::pipeline::notify::MockNotifier;
    use crate::pipeline::quality::MockQualityAssessor;
    use crate::pipeline::signature::MockSignatureDetector;
    use crate::pipeline::signature::{SignatureError, SignatureReport};
    use crate::pipeline::vision::{MockVisionAnalyzer, VisionTask};
    use crate::pipeline_config::RetryPolicy;
    use std::path::PathBuf;

    const BOL_TEXT: &str = "\
STRAIGHT BILL OF LADING - SHORT FORM
B/L No: 44853-A
Load #: LD-77120
Ship Date: 03/14/2024
Shipper: Acme Foods Inc
Consignee: Metro Grocers LLC
Origin: Fresno, CA
Destination: Reno, NV
Carrier: FastFreight Lines
Total Weight: 12,400 lbs
Total Pieces: 26
Freight Terms: Prepaid";

    const INVOICE_TEXT: &str = "\
COMMERCIAL INVOICE
Invoice Number: INV-2024-118
Invoice Date: March 14, 2024
PO Number: PO-5521
Seller: Acme Exports Ltd
Buyer: Metro Imports Inc
Total Amount: $12,400.00 USD
Payment Terms: Net 30
Incoterms: FOB Oakland";

    struct Harness {
        conn: Connection,
        dir: tempfile::TempDir,
        signatures: Arc<MockSignatureDetector>,
        notifier: Arc<MockNotifier>,
        orchestrator: PipelineOrchestrator,
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            vision_retry: RetryPolicy::immediate(3),
            ..PipelineConfig::default()
        }
    }

    fn harness(
        quality: impl QualityAssessor + Send + Sync + 'static,
        text: &str,
        classifier: MockClassifier,
        signatures: MockSignatureDetector,
    ) -> Harness {
        let config = test_config();
        let signatures = Arc::new(signatures);
        let notifier = Arc::new(MockNotifier::new());
        let extraction = ExtractionCoordinator::new(
            Box::new(MockOcrEngine::new(text, 0.92)),
            Arc::new(MockVisionAnalyzer::with_text("", 0.0)),
            &config,
        );
        let orchestrator = PipelineOrchestrator::new(
            Box::new(quality),
            extraction,
            Box::new(classifier),
            signatures.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            conn: open_memory_database().unwrap(),
            dir: tempfile::tempdir().unwrap(),
            signatures,
            notifier,
            orchestrator,
        }
    }

    fn bol_harness(score: f32, signatures: u32) -> Harness {
        harness(
            MockQualityAssessor::new(score),
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            MockSignatureDetector::new(signatures),
        )
    }

    /// PNG magic followed by padding. Passes the input gate but does not decode.
    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend(std::iter::repeat(0u8).take(256));
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn register(h: &Harness, name: &str) -> Uuid {
        let path = write_png(h.dir.path(), name);
        h.orchestrator.register_document(&h.conn, &path).unwrap().id
    }

    fn stored(h: &Harness, id: &Uuid) -> DocumentState {
        repository::get_document(&h.conn, id).unwrap().unwrap()
    }

    #[test]
    fn complete_bol_with_two_signatures_passes() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::Pass);
        assert!(outcome.billing_ready);
        assert!(!outcome.reupload_required);

        let doc = stored(&h, &id);
        assert!(doc.is_processed);
        assert_eq!(doc.pipeline_status, PipelineStatus::Completed);
        assert_eq!(doc.validation_status, ValidationStatus::Pass);
        assert!(doc.billing_ready);
        assert!(!doc.needs_manual_review);
        assert_eq!(doc.signature_count, 2);
        assert!(doc.has_signature);
        assert_eq!(doc.field("bol_number"), Some("44853-A"));
        assert!(doc.validation_result.is_some());
        assert!(doc.processing_error.is_none());
    }

    #[test]
    fn bol_with_one_signature_fails() {
        let h = bol_harness(82.0, 1);
        let id = register(&h, "bol.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::Fail);
        assert!(!outcome.billing_ready);
        assert!(!outcome.reupload_required);
        let doc = stored(&h, &id);
        assert!(doc.is_processed);
        let result: ValidationVerdict =
            serde_json::from_value(doc.validation_result.unwrap()).unwrap();
        assert_eq!(result.failed_rule_ids(), vec!["BOL_001"]);
        assert!(repository::get_reupload_requests(&h.conn, &id).unwrap().is_empty());
    }

    #[test]
    fn low_quality_invoice_continues_but_needs_review() {
        let h = harness(
            MockQualityAssessor::new(40.0),
            INVOICE_TEXT,
            MockClassifier::new(DocumentType::CommercialInvoice, 0.85),
            MockSignatureDetector::new(0),
        );
        let id = register(&h, "invoice.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::NeedsReview);
        assert!(!outcome.billing_ready);
        assert!(!outcome.reupload_required);
        let doc = stored(&h, &id);
        assert!(doc.is_processed);
        let verdict: ValidationVerdict =
            serde_json::from_value(doc.validation_result.unwrap()).unwrap();
        assert!(verdict.hard_failures.is_empty());
        assert_eq!(verdict.failed_rule_ids(), vec!["GEN_001"]);
        assert!(h.notifier.sent().is_empty());
    }

    #[test]
    fn corrupt_input_runs_no_phases() {
        let h = bol_harness(82.0, 2);
        let path = h.dir.path().join("notes.txt");
        std::fs::write(&path, "this is plain text, certainly not an image of a bill of lading at all").unwrap();
        let id = h.orchestrator.register_document(&h.conn, &path).unwrap().id;

        let err = h.orchestrator.process(&h.conn, &id).unwrap_err();

        assert!(matches!(err, ProcessingError::CorruptInput(_)));
        let doc = stored(&h, &id);
        assert_eq!(doc.pipeline_status, PipelineStatus::Rejected);
        assert_eq!(doc.validation_status, ValidationStatus::Pending);
        assert!(!doc.is_processed);
        assert!(doc.quality_score.is_none());
        assert!(doc.processing_error.unwrap().starts_with("Corrupt input"));
        assert!(repository::get_processing_log(&h.conn, &id).unwrap().is_empty());
        assert_eq!(h.signatures.calls(), 0);
    }

    #[test]
    fn missing_and_tiny_files_are_corrupt() {
        let h = bol_harness(82.0, 2);
        let missing = h.dir.path().join("gone.png");
        assert!(matches!(read_input(&missing), Err(ProcessingError::CorruptInput(_))));

        let tiny = h.dir.path().join("tiny.png");
        std::fs::write(&tiny, b"\x89PNG\r\n\x1a\n").unwrap();
        let err = read_input(&tiny).unwrap_err();
        assert!(err.to_string().contains("too small"));

        assert!(read_input(&write_png(h.dir.path(), "ok.png")).is_ok());
    }

    #[test]
    fn unknown_document_id() {
        let h = bol_harness(82.0, 2);
        let err = h.orchestrator.process(&h.conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ProcessingError::DocumentNotFound(_)));
    }

    #[test]
    fn usable_quality_never_stops_processing() {
        for score in [45.0, 60.0, 75.5, 99.9] {
            let h = bol_harness(score, 2);
            let id = register(&h, "bol.png");
            let outcome = h.orchestrator.process(&h.conn, &id).unwrap();
            assert!(stored(&h, &id).is_processed, "score {score}");
            assert!(!outcome.reupload_required, "score {score}");
            assert_eq!(outcome.validation_status, ValidationStatus::Pass, "score {score}");
        }
    }

    #[test]
    fn low_quality_is_never_dropped() {
        for (score, blurry) in [(44.9, false), (30.0, true), (10.0, false), (10.0, true), (0.0, true)] {
            let h = harness(
                MockQualityAssessor::new(score).with_blur(blurry),
                BOL_TEXT,
                MockClassifier::new(DocumentType::BillOfLading, 0.9),
                MockSignatureDetector::new(2),
            );
            let id = register(&h, "bol.png");
            h.orchestrator.process(&h.conn, &id).unwrap();
            let doc = stored(&h, &id);
            assert!(doc.is_processed, "score {score}");
            assert!(
                matches!(
                    doc.validation_status,
                    ValidationStatus::NeedsReview | ValidationStatus::Fail
                ),
                "score {score} → {}",
                doc.validation_status
            );
        }
    }

    #[test]
    fn severe_blur_requests_reupload() {
        let h = harness(
            MockQualityAssessor::new(12.0).with_blur(true),
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            MockSignatureDetector::new(2),
        );
        let id = register(&h, "blurry.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert!(outcome.reupload_required);
        assert_eq!(outcome.validation_status, ValidationStatus::NeedsReview);
        let requests = repository::get_reupload_requests(&h.conn, &id).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].status, REUPLOAD_REQUIRED);
        assert!(requests[0].message.contains("too blurry"));
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[test]
    fn undecodable_image_halts_as_severely_blurry() {
        let h = harness(
            ImageQualityAssessor,
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            MockSignatureDetector::new(2),
        );
        let id = register(&h, "truncated.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert!(outcome.reupload_required);
        assert!(!outcome.billing_ready);
        let doc = stored(&h, &id);
        assert!(doc.is_processed);
        assert!(doc.is_blurry);
        assert_eq!(doc.quality_score, Some(0.0));
        let verdict: ValidationVerdict =
            serde_json::from_value(doc.validation_result.unwrap()).unwrap();
        assert!(verdict.failed_rule_ids().contains(&"GEN_004"));
        let requests = repository::get_reupload_requests(&h.conn, &id).unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].message.contains("too blurry"));
    }

    #[test]
    fn notifier_failure_does_not_fail_pipeline() {
        let config = test_config();
        let extraction = ExtractionCoordinator::new(
            Box::new(MockOcrEngine::new("", 0.0)),
            Arc::new(MockVisionAnalyzer::with_text("", 0.0)),
            &config,
        );
        let orchestrator = PipelineOrchestrator::new(
            Box::new(MockQualityAssessor::new(80.0)),
            extraction,
            Box::new(MockClassifier::new(DocumentType::Unknown, 0.0)),
            Arc::new(MockSignatureDetector::new(0)),
            Arc::new(MockNotifier::failing("mail relay down")),
            config,
        );
        let conn = open_memory_database().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "blank.png");
        let id = orchestrator.register_document(&conn, &path).unwrap().id;

        let outcome = orchestrator.process(&conn, &id).unwrap();

        assert!(outcome.reupload_required);
        assert_eq!(repository::get_reupload_requests(&conn, &id).unwrap().len(), 1);
    }

    #[test]
    fn signature_detection_only_for_types_that_need_it() {
        let mut types = DocumentType::KNOWN.to_vec();
        types.push(DocumentType::Unknown);

        for t in types {
            let h = harness(
                MockQualityAssessor::new(80.0),
                BOL_TEXT,
                MockClassifier::new(t, 0.9),
                MockSignatureDetector::new(1),
            );
            let id = register(&h, "doc.png");
            h.orchestrator.process(&h.conn, &id).unwrap();

            let required = requirement_for(t).requires_signature;
            assert_eq!(h.signatures.calls(), usize::from(required), "{t}");

            let doc = stored(&h, &id);
            let sig_row = repository::get_processing_log(&h.conn, &id)
                .unwrap()
                .into_iter()
                .find(|e| e.step_name == STEP_SIGNATURE)
                .unwrap();
            if required {
                assert_eq!(doc.signature_check, SignatureCheck::Detected, "{t}");
                assert_eq!(sig_row.status, LogStatus::Success);
            } else {
                assert_eq!(doc.signature_check, SignatureCheck::Skipped, "{t}");
                assert_eq!(doc.signature_count, 0);
                assert_eq!(sig_row.status, LogStatus::Skipped);
                assert!(sig_row.details.unwrap().contains("does not require"));
            }
        }
    }

    #[test]
    fn phase_failures_become_notes() {
        let h = harness(
            MockQualityAssessor::new(80.0),
            BOL_TEXT,
            MockClassifier::failing("model offline"),
            MockSignatureDetector::failing("vision down"),
        );
        let id = register(&h, "bol.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        // Classification fell back to unknown, which halts at GEN_003
        assert_eq!(outcome.document_type, DocumentType::Unknown);
        assert!(outcome.reupload_required);
        let doc = stored(&h, &id);
        assert!(doc.is_processed);
        assert!(doc.processing_error.unwrap().contains("model offline"));
        let log = repository::get_processing_log(&h.conn, &id).unwrap();
        let class_row = log.iter().find(|e| e.step_name == STEP_CLASSIFICATION).unwrap();
        assert_eq!(class_row.status, LogStatus::Failed);
    }

    #[test]
    fn signature_failure_records_zero_and_continues() {
        let h = harness(
            MockQualityAssessor::new(80.0),
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            MockSignatureDetector::failing("vision down"),
        );
        let id = register(&h, "bol.png");

        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::Fail);
        let doc = stored(&h, &id);
        assert_eq!(doc.signature_check, SignatureCheck::Failed);
        assert_eq!(doc.signature_count, 0);
        assert!(doc.processing_error.unwrap().contains("vision down"));
    }

    #[test]
    fn low_classifier_confidence_forces_unknown() {
        let h = harness(
            MockQualityAssessor::new(80.0),
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.3),
            MockSignatureDetector::new(2),
        );
        let id = register(&h, "bol.png");

        h.orchestrator.process(&h.conn, &id).unwrap();

        let doc = stored(&h, &id);
        assert_eq!(doc.document_type, DocumentType::Unknown);
        assert_eq!(doc.classification_confidence, 0.3);
        assert_eq!(h.signatures.calls(), 0);
    }

    #[test]
    fn every_phase_is_logged_in_order() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");
        h.orchestrator.process(&h.conn, &id).unwrap();

        let steps: Vec<String> = repository::get_processing_log(&h.conn, &id)
            .unwrap()
            .into_iter()
            .map(|e| e.step_name)
            .collect();
        assert_eq!(
            steps,
            vec![
                STEP_QUALITY,
                STEP_EXTRACTION,
                STEP_CLASSIFICATION,
                STEP_SIGNATURE,
                STEP_FIELDS,
                STEP_VALIDATION
            ]
        );
    }

    #[test]
    fn reprocess_resets_and_reruns() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");
        h.orchestrator.process(&h.conn, &id).unwrap();

        let outcome = h.orchestrator.reprocess(&h.conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::Pass);
        assert_eq!(repository::get_processing_log(&h.conn, &id).unwrap().len(), 6);
        assert_eq!(h.signatures.calls(), 2);
    }

    #[test]
    fn debug_run_is_idempotent_and_writes_nothing() {
        let h = bol_harness(82.0, 1);
        let id = register(&h, "bol.png");
        h.orchestrator.process(&h.conn, &id).unwrap();
        let before = stored(&h, &id);
        let log_rows = repository::get_processing_log(&h.conn, &id).unwrap().len();

        let first = h.orchestrator.debug_run(&h.conn, &id).unwrap();
        let second = h.orchestrator.debug_run(&h.conn, &id).unwrap();

        assert_eq!(first.verdict, second.verdict);
        assert_eq!(first.resolution, second.resolution);
        assert_eq!(first.phases.len(), 6);
        assert_eq!(first.resolution.validation_status, ValidationStatus::Fail);
        assert_eq!(stored(&h, &id), before);
        assert_eq!(repository::get_processing_log(&h.conn, &id).unwrap().len(), log_rows);
    }

    #[test]
    fn debug_run_dumps_only_when_given_a_directory() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");
        h.orchestrator.debug_run(&h.conn, &id).unwrap();
        assert!(!h.dir.path().join(id.to_string()).exists());

        let dumps = tempfile::tempdir().unwrap();
        let orchestrator = bol_harness(82.0, 2)
            .orchestrator
            .with_dump_dir(Some(dumps.path().to_path_buf()));
        orchestrator.debug_run(&h.conn, &id).unwrap();

        let dir = dumps.path().join(id.to_string());
        for name in [
            "01-phases.json",
            "02-document.json",
            "03-verdict.json",
            "04-resolution.json",
            "05-ocr-text.txt",
        ] {
            assert!(dir.join(name).is_file(), "{name}");
        }
        let text = std::fs::read_to_string(dir.join("05-ocr-text.txt")).unwrap();
        assert!(text.contains("44853-A"));
    }

    /// Dies inside signature detection, the way a killed worker would.
    struct PowerCut;

    impl SignatureDetector for PowerCut {
        fn detect(
            &self,
            _document_id: &Uuid,
            _image_bytes: &[u8],
            _document_type: DocumentType,
        ) -> Result<SignatureReport, SignatureError> {
            panic!("power cut during signature detection");
        }
    }

    fn enriching_orchestrator(
        ocr: MockOcrEngine,
        vision: Arc<MockVisionAnalyzer>,
        classifier: MockClassifier,
        signatures: Arc<dyn SignatureDetector + Send + Sync>,
    ) -> PipelineOrchestrator {
        let config = PipelineConfig {
            always_enrich_with_vision: true,
            ..test_config()
        };
        let extraction = ExtractionCoordinator::new(Box::new(ocr), vision, &config);
        PipelineOrchestrator::new(
            Box::new(MockQualityAssessor::new(82.0)),
            extraction,
            Box::new(classifier),
            signatures,
            Arc::new(MockNotifier::new()),
            config,
        )
    }

    #[test]
    fn resume_continues_after_interrupted_run() {
        // No shipper line: only the vision hint can satisfy BOL_004
        let text: String = BOL_TEXT
            .lines()
            .filter(|l| !l.starts_with("Shipper"))
            .collect::<Vec<_>>()
            .join("\n");
        let conn = open_memory_database().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "bol.png");

        let first = enriching_orchestrator(
            MockOcrEngine::new(&text, 0.92),
            Arc::new(MockVisionAnalyzer::with_text("", 0.0).with_fields(&[("shipper", "Acme Foods Inc")])),
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            Arc::new(PowerCut),
        );
        let id = first.register_document(&conn, &path).unwrap().id;
        let crashed =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| first.process(&conn, &id)));
        assert!(crashed.is_err());

        let interrupted = repository::get_document(&conn, &id).unwrap().unwrap();
        assert_eq!(interrupted.pipeline_status, PipelineStatus::Running);
        assert_eq!(interrupted.field_hints.get("shipper").map(String::as_str), Some("Acme Foods Inc"));
        assert_eq!(repository::get_processing_log(&conn, &id).unwrap().len(), 3);
        assert_eq!(first.interrupted(&conn).unwrap(), vec![id]);

        // Anything that re-ran OCR or classification would lose the document type
        let vision = Arc::new(MockVisionAnalyzer::with_text("", 0.0));
        let signatures = Arc::new(MockSignatureDetector::new(2));
        let second = enriching_orchestrator(
            MockOcrEngine::failing("ocr must not run"),
            vision.clone(),
            MockClassifier::failing("classifier must not run"),
            signatures.clone(),
        );

        let outcome = second.resume(&conn, &id).unwrap();

        assert_eq!(outcome.validation_status, ValidationStatus::Pass);
        assert_eq!(outcome.phases.len(), 3);
        assert_eq!(signatures.calls(), 1);
        assert_eq!(vision.call_count(VisionTask::DocumentAnalysis), 0);

        let doc = repository::get_document(&conn, &id).unwrap().unwrap();
        assert_eq!(doc.pipeline_status, PipelineStatus::Completed);
        assert_eq!(doc.document_type, DocumentType::BillOfLading);
        assert_eq!(doc.field("shipper"), Some("Acme Foods Inc"));
        assert!(doc.processing_error.is_none());

        let steps: Vec<String> = repository::get_processing_log(&conn, &id)
            .unwrap()
            .into_iter()
            .map(|e| e.step_name)
            .collect();
        assert_eq!(
            steps,
            vec![
                STEP_QUALITY,
                STEP_EXTRACTION,
                STEP_CLASSIFICATION,
                STEP_SIGNATURE,
                STEP_FIELDS,
                STEP_VALIDATION
            ]
        );
        assert!(second.interrupted(&conn).unwrap().is_empty());
    }

    #[test]
    fn resume_reruns_failed_phases() {
        let h = harness(
            MockQualityAssessor::new(82.0),
            BOL_TEXT,
            MockClassifier::new(DocumentType::BillOfLading, 0.9),
            MockSignatureDetector::new(2),
        );
        let id = register(&h, "bol.png");
        let mut doc = stored(&h, &id);
        doc.pipeline_status = PipelineStatus::Running;
        repository::update_document(&h.conn, &doc).unwrap();
        let mut failed = ProcessingLogEntry::new(id, STEP_QUALITY, LogStatus::Failed, 3);
        failed.error_message = Some("worker restarted".into());
        repository::insert_processing_log(&h.conn, &failed).unwrap();

        let outcome = h.orchestrator.resume(&h.conn, &id).unwrap();

        assert_eq!(outcome.phases.len(), 6);
        assert_eq!(outcome.validation_status, ValidationStatus::Pass);
        assert_eq!(stored(&h, &id).quality_score, Some(82.0));
    }

    #[test]
    fn resume_queued_runs_everything_and_refuses_finished() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");

        let outcome = h.orchestrator.resume(&h.conn, &id).unwrap();
        assert_eq!(outcome.phases.len(), 6);

        let err = h.orchestrator.resume(&h.conn, &id).unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::NotResumable {
                status: PipelineStatus::Completed,
                ..
            }
        ));
        assert_eq!(h.signatures.calls(), 1);
    }

    #[test]
    fn outcome_serializes() {
        let h = bol_harness(82.0, 2);
        let id = register(&h, "bol.png");
        let outcome = h.orchestrator.process(&h.conn, &id).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["validation_status"], "pass");
        assert_eq!(json["document_type"], "bill_of_lading");
        assert_eq!(json["phases"].as_array().unwrap().len(), 6);
    }
}
