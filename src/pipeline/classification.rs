//! Document classification over the fixed eight-type freight vocabulary.
//!
//! The keyword classifier scores keyword hits per type: the type's own
//! name weighs 5, multi-word phrases 2, single words 1. Confidence is the
//! winning score over the sum of all scores.
//!
//! The production classifier is [`HybridClassifier`]: keywords first, and
//! when their confidence is low a second opinion from the vision model.
//! Agreement raises confidence to `min(0.99, mean + 0.2)`; disagreement
//! takes the vision answer at 85% of its confidence. If vision cannot
//! answer, the keyword result stands.
//!
//! The orchestrator, not the classifier, applies the confidence threshold
//! that forces `Unknown`.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::vision::{call_with_retry, VisionAnalyzer, VisionTask};
use crate::models::enums::DocumentType;
use crate::pipeline_config::{PipelineConfig, RetryPolicy};

/// Trimmed text shorter than this cannot be classified.
const MIN_CLASSIFIABLE_CHARS: usize = 10;

const NAME_WEIGHT: f32 = 5.0;
const PHRASE_WEIGHT: f32 = 2.0;
const WORD_WEIGHT: f32 = 1.0;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Classifier returned an invalid result: {0}")]
    InvalidResult(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub document_type: DocumentType,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub method: &'static str,
}

impl Classification {
    pub fn unknown(method: &'static str) -> Self {
        Self {
            document_type: DocumentType::Unknown,
            confidence: 0.0,
            matched_keywords: Vec::new(),
            method,
        }
    }
}

/// Classifier capability (allows mocking for tests)
pub trait DocumentClassifier {
    fn classify(
        &self,
        document_id: &Uuid,
        text: &str,
        image_bytes: &[u8],
    ) -> Result<Classification, ClassificationError>;
}

// ──────────────────────────────────────────────
// Keyword table
// ──────────────────────────────────────────────

/// Per-type keywords. The first entry of each list is the type's own name.
const STRONG_SIGNALS: [(DocumentType, &[&str]); 8] = [
    (
        DocumentType::BillOfLading,
        &[
            "bill of lading", "b/l", "bol", "shipper", "consignee", "notify party",
            "vessel", "port of loading", "port of discharge", "freight collect",
            "freight prepaid", "on board", "carrier", "scac", "pro number", "shipment",
            "freight charges",
        ],
    ),
    (
        DocumentType::ProofOfDelivery,
        &[
            "proof of delivery", "pod", "delivered to", "received in good condition",
            "delivery receipt", "consignee signature", "delivery confirmation",
            "goods received", "recipient signature", "delivery date", "received by",
            "date received",
        ],
    ),
    (
        DocumentType::PackingList,
        &[
            "packing list", "pack list", "carton", "gross weight", "net weight",
            "dimensions", "pieces", "packages", "hs code", "item description", "quantity",
            "total packages", "package contents", "packing details",
        ],
    ),
    (
        DocumentType::CommercialInvoice,
        &[
            "commercial invoice", "invoice no", "invoice number", "invoice date",
            "payment terms", "unit price", "total amount", "tax invoice", "seller", "buyer",
            "incoterms", "vat", "subtotal", "net total", "invoice total", "invoice amount",
        ],
    ),
    (
        DocumentType::HazmatDocument,
        &[
            "hazmat", "hazardous", "dangerous goods", "un number", "un no", "class",
            "packing group", "emergency contact", "proper shipping name", "flashpoint",
            "placard", "imdg", "dot", "msds", "safety data", "un id", "hazard class",
            "emergency response",
        ],
    ),
    (
        DocumentType::LumperReceipt,
        &[
            "lumper receipt", "lumper", "unloading", "loading labor", "labor receipt",
            "lumper service", "unload receipt", "warehouse labor", "lumper fee",
            "lumper payment", "lumper charges",
        ],
    ),
    (
        DocumentType::TripSheet,
        &[
            "trip sheet", "trip report", "odometer", "miles driven", "fuel stop",
            "state crossing", "driver log", "trip log", "departure time", "arrival time",
            "mileage", "fuel receipt", "trip number", "route", "stops",
        ],
    ),
    (
        DocumentType::FreightInvoice,
        &[
            "freight invoice", "freight bill", "carrier invoice", "transportation charges",
            "freight charges", "linehaul", "fuel surcharge", "accessorial", "pro number",
            "pro#", "carrier charges", "transportation invoice",
        ],
    ),
];

struct KeywordPattern {
    keyword: &'static str,
    weight: f32,
    regex: Regex,
}

/// Compiled keyword patterns, one list per type in vocabulary order.
/// Boundaries are alphanumeric-based so `b/l` and `pro#` still match.
static PATTERNS: LazyLock<Vec<(DocumentType, Vec<KeywordPattern>)>> = LazyLock::new(|| {
    STRONG_SIGNALS
        .iter()
        .map(|(doc_type, keywords)| {
            let patterns = keywords
                .iter()
                .enumerate()
                .filter_map(|(i, kw)| {
                    let weight = if i == 0 {
                        NAME_WEIGHT
                    } else if kw.contains(' ') {
                        PHRASE_WEIGHT
                    } else {
                        WORD_WEIGHT
                    };
                    let pattern = format!(
                        r"(?i)(?:^|[^[:alnum:]]){}(?:[^[:alnum:]]|$)",
                        regex::escape(kw)
                    );
                    Regex::new(&pattern).ok().map(|regex| KeywordPattern {
                        keyword: *kw,
                        weight,
                        regex,
                    })
                })
                .collect();
            (*doc_type, patterns)
        })
        .collect()
});

// ──────────────────────────────────────────────
// KeywordClassifier
// ──────────────────────────────────────────────

/// Keyword-scoring classifier. Ignores the image.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Score every type. Exposed for diagnostics.
    pub fn scores(text: &str) -> Vec<(DocumentType, f32, Vec<String>)> {
        PATTERNS
            .iter()
            .map(|(doc_type, patterns)| {
                let hits: Vec<&KeywordPattern> =
                    patterns.iter().filter(|p| p.regex.is_match(text)).collect();
                let score: f32 = hits.iter().map(|p| p.weight).sum();
                let matched: Vec<String> = hits.iter().map(|p| p.keyword.to_string()).collect();
                (*doc_type, score, matched)
            })
            .collect()
    }
}

impl DocumentClassifier for KeywordClassifier {
    fn classify(
        &self,
        _document_id: &Uuid,
        text: &str,
        _image_bytes: &[u8],
    ) -> Result<Classification, ClassificationError> {
        if text.trim().chars().count() < MIN_CLASSIFIABLE_CHARS {
            return Ok(Classification::unknown("keyword"));
        }

        let scores = Self::scores(text);
        let total: f32 = scores.iter().map(|(_, s, _)| s).sum();
        if total <= 0.0 {
            return Ok(Classification::unknown("keyword"));
        }

        // Strictly greater keeps the earliest type on ties
        let mut best = &scores[0];
        for candidate in &scores[1..] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }

        let confidence = ((best.1 / total) * 1000.0).round() / 1000.0;
        tracing::debug!(
            document_type = %best.0,
            confidence,
            matched = ?best.2.iter().take(3).collect::<Vec<_>>(),
            "Keyword classification"
        );

        Ok(Classification {
            document_type: best.0,
            confidence,
            matched_keywords: best.2.clone(),
            method: "keyword",
        })
    }
}

// ──────────────────────────────────────────────
// HybridClassifier
// ──────────────────────────────────────────────

const AGREEMENT_BONUS: f32 = 0.2;
const AGREEMENT_CAP: f32 = 0.99;
const DISAGREEMENT_FACTOR: f32 = 0.85;

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

/// Keyword classifier with a vision second opinion below
/// `vision_classification_threshold`.
pub struct HybridClassifier {
    keywords: KeywordClassifier,
    vision: Arc<dyn VisionAnalyzer>,
    retry: RetryPolicy,
    escalation_threshold: f32,
}

impl HybridClassifier {
    pub fn new(vision: Arc<dyn VisionAnalyzer>, config: &PipelineConfig) -> Self {
        Self {
            keywords: KeywordClassifier::new(),
            vision,
            retry: config.vision_retry.clone(),
            escalation_threshold: config.vision_classification_threshold,
        }
    }

    fn ask_vision(
        &self,
        document_id: &Uuid,
        text: &str,
        image_bytes: &[u8],
    ) -> Result<Classification, ClassificationError> {
        let hint = (!text.trim().is_empty()).then_some(text);
        let analysis = call_with_retry(&self.retry, document_id, "classification", || {
            self.vision.analyze(image_bytes, VisionTask::Classification, hint)
        })
        .map_err(|e| ClassificationError::Unavailable(e.to_string()))?;

        let label = analysis.document_type.unwrap_or_default();
        let document_type = DocumentType::from_label(&label).ok_or_else(|| {
            ClassificationError::InvalidResult(format!("unrecognised document type {label:?}"))
        })?;
        Ok(Classification {
            document_type,
            confidence: analysis.confidence,
            matched_keywords: Vec::new(),
            method: "vision",
        })
    }
}

/// Combine a low-confidence keyword result with the vision answer.
pub fn merge_with_vision(keyword: Classification, vision: Classification) -> Classification {
    if keyword.document_type == vision.document_type {
        let mean = (keyword.confidence + vision.confidence) / 2.0;
        Classification {
            document_type: vision.document_type,
            confidence: round3((mean + AGREEMENT_BONUS).min(AGREEMENT_CAP)),
            matched_keywords: keyword.matched_keywords,
            method: "keyword+vision",
        }
    } else {
        Classification {
            document_type: vision.document_type,
            confidence: round3(vision.confidence * DISAGREEMENT_FACTOR),
            matched_keywords: Vec::new(),
            method: "vision_override",
        }
    }
}

impl DocumentClassifier for HybridClassifier {
    fn classify(
        &self,
        document_id: &Uuid,
        text: &str,
        image_bytes: &[u8],
    ) -> Result<Classification, ClassificationError> {
        let keyword = self.keywords.classify(document_id, text, image_bytes)?;
        if keyword.confidence >= self.escalation_threshold {
            return Ok(keyword);
        }

        tracing::info!(
            document_id = %document_id,
            candidate = %keyword.document_type,
            confidence = keyword.confidence,
            threshold = self.escalation_threshold,
            "Low keyword confidence, asking vision"
        );
        match self.ask_vision(document_id, text, image_bytes) {
            Ok(vision) => {
                if vision.document_type != keyword.document_type {
                    tracing::info!(
                        document_id = %document_id,
                        keyword = %keyword.document_type,
                        vision = %vision.document_type,
                        "Classifiers disagree, using vision"
                    );
                }
                Ok(merge_with_vision(keyword, vision))
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %document_id,
                    error = %e,
                    "Vision classification unavailable, keeping keyword result"
                );
                Ok(keyword)
            }
        }
    }
}

// ──────────────────────────────────────────────
// MockClassifier
// ──────────────────────────────────────────────

/// Mock classifier: fixed answer or fixed failure.
pub struct MockClassifier {
    result: Result<(DocumentType, f32), String>,
}

impl MockClassifier {
    pub fn new(document_type: DocumentType, confidence: f32) -> Self {
        Self {
            result: Ok((document_type, confidence)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
        }
    }
}

impl DocumentClassifier for MockClassifier {
    fn classify(
        &self,
        _document_id: &Uuid,
        _text: &str,
        _image_bytes: &[u8],
    ) -> Result<Classification, ClassificationError> {
        match &self.result {
            Ok((document_type, confidence)) => Ok(Classification {
                document_type: *document_type,
                confidence: *confidence,
                matched_keywords: Vec::new(),
                method: "mock",
            }),
            Err(message) => Err(ClassificationError::Unavailable(message.clone())),
        }
    }
}
