//! Extraction Coordinator: local OCR first, vision enrichment when the local
//! text is unusable or enrichment is requested.
//!
//! The coordinator never fails. Every capability error is turned into a
//! diagnostic note and the best text obtained so far is returned, possibly
//! empty. Vision calls go through the shared retry policy; once retries are
//! exhausted the local result is kept and the outcome is marked degraded.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::ollama::OllamaClient;
use super::vision::{call_with_retry, VisionAnalysis, VisionAnalyzer, VisionError, VisionTask};
use crate::models::enums::TextSource;
use crate::pipeline_config::{PipelineConfig, RetryPolicy};

/// Vision text wins outright above this confidence when it is also longer.
const VISION_TRUST_CONFIDENCE: f32 = 0.8;

/// Local text wins when it is this many times longer than the vision text.
const LOCAL_LENGTH_RATIO: f32 = 1.5;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("OCR provider error: {0}")]
    Provider(#[from] VisionError),
}

// ──────────────────────────────────────────────
// OCR capability
// ──────────────────────────────────────────────

/// Raw OCR result from the engine
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPageResult {
    pub text: String,
    pub confidence: f32,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// DeepSeek-OCR uses a grounding token and no system prompt.
const DEEPSEEK_OCR_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

const GENERIC_SYSTEM_PROMPT: &str = "\
You are a freight document text extractor. Extract ALL visible text from the \
provided scan, preserving line structure. Include handwritten text where legible.";

const GENERIC_USER_PROMPT: &str = "\
Extract all visible text from this document image. Keep one line of output per \
printed line. Preserve tables using Markdown table syntax.";

/// Local OCR through an Ollama-served OCR model.
pub struct OllamaOcrEngine {
    client: Arc<OllamaClient>,
    model_name: String,
}

impl OllamaOcrEngine {
    pub fn new(client: Arc<OllamaClient>, model_name: &str) -> Self {
        Self {
            client,
            model_name: model_name.to_string(),
        }
    }

    fn is_deepseek_ocr(&self) -> bool {
        self.model_name
            .rsplit('/')
            .next()
            .is_some_and(|m| m.starts_with("deepseek-ocr"))
    }
}

impl OcrEngine for OllamaOcrEngine {
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let _span = tracing::info_span!(
            "local_ocr",
            model = %self.model_name,
            image_size = image_bytes.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let images = vec![base64::engine::general_purpose::STANDARD.encode(image_bytes)];
        let (prompt, system) = if self.is_deepseek_ocr() {
            (DEEPSEEK_OCR_PROMPT, None)
        } else {
            (GENERIC_USER_PROMPT, Some(GENERIC_SYSTEM_PROMPT))
        };

        let text = self
            .client
            .chat_with_images(&self.model_name, prompt, &images, system, false)?
            .trim()
            .to_string();
        let confidence = heuristic_confidence(&text);

        tracing::info!(
            elapsed_ms = %start.elapsed().as_millis(),
            text_len = text.len(),
            confidence,
            "Local OCR complete"
        );

        Ok(OcrPageResult { text, confidence })
    }
}

/// Estimate OCR confidence from output characteristics.
///
/// Generative OCR models report no per-word confidence, so length is the
/// primary signal, with a small bonus for tabular structure. Capped at 0.95.
pub fn heuristic_confidence(text: &str) -> f32 {
    let len = text.trim().chars().count();
    let base: f32 = match len {
        0 => return 0.0,
        1..=49 => 0.2,
        50..=199 => 0.4,
        200..=499 => 0.6,
        _ => 0.8,
    };
    let has_tables = text.lines().any(|l| l.matches('|').count() >= 2);
    let bonus = if has_tables { 0.05 } else { 0.0 };
    (base + bonus).min(0.95)
}

/// Mock OCR engine for testing.
pub struct MockOcrEngine {
    result: Result<OcrPageResult, String>,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            result: Ok(OcrPageResult {
                text: text.to_string(),
                confidence,
            }),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        self.result
            .clone()
            .map_err(ExtractionError::OcrProcessing)
    }
}

// ──────────────────────────────────────────────
// Coordinator
// ──────────────────────────────────────────────

/// Best-effort text for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    pub text: String,
    pub confidence: f32,
    pub source: Option<TextSource>,
    /// Vision enrichment was wanted but its retries were exhausted.
    pub degraded: bool,
    pub vision_attempted: bool,
    /// Fields the vision model read directly; used to fill gaps later.
    pub field_hints: BTreeMap<String, String>,
    pub notes: Vec<String>,
}

impl ExtractionOutcome {
    pub fn text_source(&self) -> TextSource {
        self.source.unwrap_or(TextSource::None)
    }
}

pub struct ExtractionCoordinator {
    ocr: Box<dyn OcrEngine + Send + Sync>,
    vision: Arc<dyn VisionAnalyzer>,
    min_usable_chars: usize,
    always_enrich: bool,
    retry: RetryPolicy,
}

impl ExtractionCoordinator {
    pub fn new(
        ocr: Box<dyn OcrEngine + Send + Sync>,
        vision: Arc<dyn VisionAnalyzer>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            ocr,
            vision,
            min_usable_chars: config.min_usable_ocr_chars,
            always_enrich: config.always_enrich_with_vision,
            retry: config.vision_retry.clone(),
        }
    }

    /// Obtain text for `image_bytes`. Never fails.
    pub fn extract(&self, document_id: &Uuid, image_bytes: &[u8]) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();

        let local = match self.ocr.ocr_image(image_bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "Local OCR failed");
                outcome.notes.push(format!("local OCR failed: {e}"));
                None
            }
        };

        let local_len = local.as_ref().map_or(0, |r| char_len(&r.text));
        let wants_vision = local.is_none() || local_len < self.min_usable_chars || self.always_enrich;

        if let Some(result) = &local {
            outcome.text = result.text.trim().to_string();
            outcome.confidence = result.confidence;
            outcome.source = (!outcome.text.is_empty()).then_some(TextSource::Local);
        }

        if !wants_vision {
            return outcome;
        }

        tracing::debug!(
            document_id = %document_id,
            local_len,
            always_enrich = self.always_enrich,
            "Requesting vision enrichment"
        );
        outcome.vision_attempted = true;
        let hint = local.as_ref().map(|r| r.text.as_str());

        match call_with_retry(&self.retry, document_id, "document_analysis", || {
            self.vision
                .analyze(image_bytes, VisionTask::DocumentAnalysis, hint)
        }) {
            Ok(analysis) => {
                merge_into(&mut outcome, local.as_ref(), &analysis);
                outcome.field_hints = analysis.extracted_fields;
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %document_id,
                    error = %e,
                    fallback_len = outcome.text.len(),
                    "Vision enrichment unavailable, keeping local OCR text"
                );
                outcome.degraded = true;
                outcome
                    .notes
                    .push(format!("vision enrichment failed, using local OCR: {e}"));
            }
        }

        outcome
    }
}

/// Pick between local and vision text.
fn merge_into(
    outcome: &mut ExtractionOutcome,
    local: Option<&OcrPageResult>,
    vision: &VisionAnalysis,
) {
    let vision_text = vision.extracted_text.trim();
    let vision_len = char_len(vision_text) as f32;
    let local_len = local.map_or(0, |r| char_len(&r.text)) as f32;

    let use_vision = if vision.confidence > VISION_TRUST_CONFIDENCE && vision_len > local_len {
        true
    } else if local_len > vision_len * LOCAL_LENGTH_RATIO {
        false
    } else {
        vision_len > local_len
    };

    if use_vision {
        outcome.text = vision_text.to_string();
        outcome.confidence = vision.confidence;
        outcome.source = Some(TextSource::Vision);
    }
}

fn char_len(text: &str) -> usize {
    text.trim().chars().count()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
