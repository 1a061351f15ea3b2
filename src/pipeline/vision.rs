//! Vision analysis capability: enriched document reading, document type
//! second opinions, and signature detection through a multimodal model.
//!
//! The provider answers with one JSON object per call:
//! `extracted_text`, `extracted_fields`, `signatures {count, present, details[]}`,
//! `doc_type`, `confidence`. Calls are wrapped in [`call_with_retry`] so transient
//! provider trouble (overload, rate limits, restarts) is retried with
//! exponential backoff while authentication problems fail fast.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::ollama::OllamaClient;
use crate::models::enums::MarkType;
use crate::models::SignatureMark;
use crate::pipeline_config::RetryPolicy;

/// Upper bound on a believable signature count for one page.
pub const MAX_SIGNATURES: u32 = 10;

/// OCR hint forwarded to the model is cut to this many characters.
const OCR_HINT_CHARS: usize = 2000;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Vision provider not reachable at {0}")]
    Connection(String),

    #[error("Vision request timed out after {0}s")]
    Timeout(u64),

    #[error("Vision provider unavailable (status {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("Vision provider rejected credentials (status {status})")]
    Auth { status: u16 },

    #[error("Vision provider error (status {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Malformed vision response: {0}")]
    MalformedResponse(String),
}

/// Body fragments that mark a provider error as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "overloaded",
    "unavailable",
    "high demand",
    "rate limit",
    "quota",
    "try again",
    "temporarily",
];

impl VisionError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => VisionError::Auth { status },
            429 | 500..=599 => VisionError::Unavailable { status, body },
            _ => VisionError::Provider { status, body },
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisionError::Connection(_)
            | VisionError::Timeout(_)
            | VisionError::Unavailable { .. }
            | VisionError::MalformedResponse(_) => true,
            VisionError::Provider { body, .. } => {
                let lower = body.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
            }
            VisionError::Auth { .. }
            | VisionError::HttpClient(_)
            | VisionError::ResponseParsing(_) => false,
        }
    }
}

// ──────────────────────────────────────────────
// Types
// ──────────────────────────────────────────────

/// What the caller wants from the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionTask {
    DocumentAnalysis,
    Classification,
    SignatureDetection,
}

impl VisionTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionTask::DocumentAnalysis => "document_analysis",
            VisionTask::Classification => "classification",
            VisionTask::SignatureDetection => "signature_detection",
        }
    }
}

/// Parsed vision response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionAnalysis {
    pub extracted_text: String,
    pub extracted_fields: BTreeMap<String, String>,
    /// Count as reported by the model, clamped to `0..=MAX_SIGNATURES`.
    pub reported_signature_count: u32,
    pub signatures: Vec<SignatureMark>,
    /// Document type label as the model wrote it (classification task only).
    pub document_type: Option<String>,
    pub confidence: f32,
}

/// Vision analysis capability (allows mocking for tests).
pub trait VisionAnalyzer: Send + Sync {
    fn analyze(
        &self,
        image_bytes: &[u8],
        task: VisionTask,
        ocr_hint: Option<&str>,
    ) -> Result<VisionAnalysis, VisionError>;
}

// ──────────────────────────────────────────────
// Retry
// ──────────────────────────────────────────────

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Sleeps between attempts, so only call
/// this from blocking contexts.
pub fn call_with_retry<T, F>(
    policy: &RetryPolicy,
    document_id: &Uuid,
    operation: &str,
    mut op: F,
) -> Result<T, VisionError>
where
    F: FnMut() -> Result<T, VisionError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    document_id = %document_id,
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Vision call failed, retrying"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %document_id,
                    operation,
                    attempts = attempt + 1,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Vision call gave up"
                );
                return Err(e);
            }
        }
    }
}

// ──────────────────────────────────────────────
// Response parsing
// ──────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawAnalysis {
    extracted_text: String,
    extracted_fields: BTreeMap<String, serde_json::Value>,
    signatures: RawSignatures,
    doc_type: Option<String>,
    confidence: Option<f32>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawSignatures {
    count: Option<i64>,
    present: Option<bool>,
    details: Vec<RawSignatureDetail>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawSignatureDetail {
    location: String,
    signer: Option<String>,
    #[serde(rename = "type")]
    mark_type: String,
    confidence: Option<f32>,
}

/// Parse a model reply into a [`VisionAnalysis`].
///
/// Tolerates Markdown fences and prose around the JSON object. Field
/// values are flattened to strings; lists keep their first element.
pub fn parse_analysis(raw: &str) -> Result<VisionAnalysis, VisionError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| VisionError::MalformedResponse("no JSON object in response".into()))?;
    let parsed: RawAnalysis =
        serde_json::from_str(json).map_err(|e| VisionError::MalformedResponse(e.to_string()))?;

    let extracted_fields = parsed
        .extracted_fields
        .into_iter()
        .filter_map(|(k, v)| flatten_value(&v).map(|s| (k, s)))
        .collect();

    let signatures: Vec<SignatureMark> = parsed
        .signatures
        .details
        .into_iter()
        .map(|d| SignatureMark {
            location: d.location,
            signer_role: d.signer.filter(|s| !s.trim().is_empty()),
            mark_type: MarkType::from_str(d.mark_type.trim().to_lowercase().as_str())
                .unwrap_or(MarkType::Printed),
            confidence: d.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        })
        .collect();

    let mut count = parsed.signatures.count.unwrap_or(0).clamp(0, MAX_SIGNATURES as i64) as u32;
    if parsed.signatures.present == Some(false) {
        count = 0;
    } else if parsed.signatures.present == Some(true) && count == 0 {
        count = 1;
    }

    Ok(VisionAnalysis {
        extracted_text: parsed.extracted_text,
        extracted_fields,
        reported_signature_count: count,
        signatures,
        document_type: parsed.doc_type.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
    })
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn flatten_value(value: &serde_json::Value) -> Option<String> {
    let s = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Array(items) => return items.first().and_then(flatten_value),
        _ => return None,
    };
    (!s.is_empty() && !s.eq_ignore_ascii_case("null") && !s.eq_ignore_ascii_case("n/a"))
        .then_some(s)
}

// ──────────────────────────────────────────────
// OllamaVisionAnalyzer
// ──────────────────────────────────────────────

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You analyse scanned freight and logistics paperwork: bills of lading, proofs of \
delivery, packing lists, invoices, hazmat declarations, lumper receipts, trip sheets. \
Answer with a single JSON object and nothing else.";

const DOCUMENT_PROMPT: &str = "\
Read ALL visible text on this document, printed and handwritten, keeping line structure.
Extract key fields when present, using snake_case keys such as bol_number, order_number, \
invoice_number, pro_number, shipper, consignee, carrier_name, origin, destination, \
ship_date, delivery_date, invoice_date, total_weight, total_amount, total_charges.
Return JSON:
{\"extracted_text\": \"...\", \"extracted_fields\": {\"key\": \"value\"}, \
\"signatures\": {\"count\": 0, \"present\": false, \"details\": []}, \"confidence\": 0.0}";

const CLASSIFICATION_PROMPT: &str = "\
Classify this trucking or shipping document into EXACTLY ONE of these types:
Bill of Lading, Proof of Delivery, Packing List, Commercial Invoice, Hazmat Document, \
Lumper Receipt, Trip Sheet, Freight Invoice, Unknown.
Use both the visual layout and the text.
Return JSON:
{\"doc_type\": \"exact name from the list\", \"confidence\": 0.0}";

const SIGNATURE_PROMPT: &str = "\
Find handwritten signatures on this document.
Count only real handwritten marks. Do NOT count printed names, empty signature lines, \
checkboxes, or form labels; report printed names with type \"printed\".
Return JSON:
{\"signatures\": {\"count\": <number>, \"present\": true/false, \"details\": \
[{\"location\": \"bottom left\", \"signer\": \"shipper\", \"type\": \"handwritten|printed|stamp|digital\", \
\"confidence\": 0.0}]}, \"confidence\": 0.0}";

/// Production vision analyzer backed by an Ollama multimodal model.
pub struct OllamaVisionAnalyzer {
    client: Arc<OllamaClient>,
    model_name: String,
}

impl OllamaVisionAnalyzer {
    pub fn new(client: Arc<OllamaClient>, model_name: &str) -> Self {
        Self {
            client,
            model_name: model_name.to_string(),
        }
    }
}

impl VisionAnalyzer for OllamaVisionAnalyzer {
    fn analyze(
        &self,
        image_bytes: &[u8],
        task: VisionTask,
        ocr_hint: Option<&str>,
    ) -> Result<VisionAnalysis, VisionError> {
        let _span = tracing::info_span!(
            "vision_analyze",
            model = %self.model_name,
            task = task.as_str(),
            image_size = image_bytes.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let images = vec![base64::engine::general_purpose::STANDARD.encode(image_bytes)];
        let prompt = build_prompt(task, ocr_hint);

        let raw = self.client.chat_with_images(
            &self.model_name,
            &prompt,
            &images,
            Some(ANALYSIS_SYSTEM_PROMPT),
            true,
        )?;
        let analysis = parse_analysis(&raw)?;

        tracing::info!(
            elapsed_ms = %start.elapsed().as_millis(),
            text_len = analysis.extracted_text.len(),
            fields = analysis.extracted_fields.len(),
            signatures = analysis.reported_signature_count,
            "Vision analysis complete"
        );
        Ok(analysis)
    }
}

fn build_prompt(task: VisionTask, ocr_hint: Option<&str>) -> String {
    match task {
        VisionTask::SignatureDetection => SIGNATURE_PROMPT.to_string(),
        VisionTask::DocumentAnalysis => with_ocr_hint(DOCUMENT_PROMPT, ocr_hint),
        VisionTask::Classification => with_ocr_hint(CLASSIFICATION_PROMPT, ocr_hint),
    }
}

fn with_ocr_hint(prompt: &str, ocr_hint: Option<&str>) -> String {
    match ocr_hint.filter(|h| !h.trim().is_empty()) {
        Some(hint) => {
            let clipped: String = hint.chars().take(OCR_HINT_CHARS).collect();
            format!(
                "{prompt}\n\nPre-extracted OCR text for reference \
                 (read the image yourself too):\n{clipped}"
            )
        }
        None => prompt.to_string(),
    }
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock vision analyzer. Returns a configured analysis, optionally after
/// a number of scripted failures. Counts calls per task.
pub struct MockVisionAnalyzer {
    analysis: VisionAnalysis,
    failures: std::sync::Mutex<Vec<VisionError>>,
    calls: std::sync::Mutex<Vec<VisionTask>>,
}

impl MockVisionAnalyzer {
    pub fn new(analysis: VisionAnalysis) -> Self {
        Self {
            analysis,
            failures: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Text-only analysis with the given confidence.
    pub fn with_text(text: &str, confidence: f32) -> Self {
        Self::new(VisionAnalysis {
            extracted_text: text.to_string(),
            confidence,
            ..VisionAnalysis::default()
        })
    }

    /// Fail with these errors (in order) before answering.
    pub fn with_failures(self, failures: Vec<VisionError>) -> Self {
        let mut queue = failures;
        queue.reverse();
        *self.failures.lock().unwrap_or_else(|p| p.into_inner()) = queue;
        self
    }

    /// Add handwritten signatures with the given confidence.
    pub fn with_handwritten_signatures(mut self, count: u32, confidence: f32) -> Self {
        for i in 0..count {
            self.analysis.signatures.push(SignatureMark {
                location: format!("signature block {}", i + 1),
                signer_role: None,
                mark_type: MarkType::Handwritten,
                confidence,
            });
        }
        self.analysis.reported_signature_count += count;
        self
    }

    pub fn with_marks(mut self, marks: Vec<SignatureMark>) -> Self {
        self.analysis.reported_signature_count = marks.len() as u32;
        self.analysis.signatures = marks;
        self
    }

    pub fn with_fields(mut self, fields: &[(&str, &str)]) -> Self {
        for (k, v) in fields {
            self.analysis
                .extracted_fields
                .insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Answer classification requests with this label.
    pub fn with_document_type(mut self, label: &str, confidence: f32) -> Self {
        self.analysis.document_type = Some(label.to_string());
        self.analysis.confidence = confidence;
        self
    }

    pub fn call_count(&self, task: VisionTask) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|t| **t == task)
            .count()
    }
}

impl VisionAnalyzer for MockVisionAnalyzer {
    fn analyze(
        &self,
        _image_bytes: &[u8],
        task: VisionTask,
        _ocr_hint: Option<&str>,
    ) -> Result<VisionAnalysis, VisionError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(task);
        if let Some(err) = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
        {
            return Err(err);
        }
        Ok(self.analysis.clone())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
