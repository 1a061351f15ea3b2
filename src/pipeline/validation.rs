//! Two-stage Rule Validation Engine.
//!
//! Stage 1 applies the general rules to every document. A Hard failure
//! there halts evaluation (`stop_processing`) and routes the document to
//! re-upload. Stage 2 applies the rule set selected by document type; its
//! Hard failures block billing but never halt.
//!
//! Rules are data: a [`Check`] predicate, a severity, and a reason template.
//! The [`Rulebook`] is built once from [`PipelineConfig`] and shared
//! read-only. Evaluation is order-independent: outcome lists are sorted by
//! rule id and the score only counts passes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::signature::requirement_for;
use crate::models::enums::DocumentType;
use crate::models::DocumentState;
use crate::pipeline_config::PipelineConfig;

/// Fields that satisfy the general "date present" rule.
pub const DATE_FIELDS: &[&str] = &[
    "date",
    "document_date",
    "ship_date",
    "delivery_date",
    "invoice_date",
    "packing_date",
];

/// Id of the soft quality rule; the status resolver keys off it.
pub const QUALITY_RULE_ID: &str = "GEN_001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    General,
    DocumentType(DocumentType),
}

impl RuleScope {
    pub fn stage(&self) -> u8 {
        match self {
            RuleScope::General => 1,
            RuleScope::DocumentType(_) => 2,
        }
    }
}

/// Predicate over a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    QualityAtLeast(f32),
    TextLengthAtLeast(usize),
    /// Known type with classification confidence at or above the bound.
    ClassifiedWith(f32),
    /// Fails only when the scan is blurry AND scores below the floor.
    NotSeverelyBlurred { floor: f32 },
    AnyFieldPresent(&'static [&'static str]),
    ExtractionAtLeast(f32),
    SignaturesAtLeast(u32),
    FieldPresent(&'static str),
    AllFieldsPresent(&'static [&'static str]),
    /// Passes when the field is absent or not one of `values`.
    FieldNotIn {
        field: &'static str,
        values: &'static [&'static str],
    },
}

impl Check {
    pub fn passes(&self, doc: &DocumentState) -> bool {
        match self {
            Check::QualityAtLeast(min) => doc.quality_score.unwrap_or(0.0) >= *min,
            Check::TextLengthAtLeast(min) => doc.ocr_text.trim().chars().count() >= *min,
            Check::ClassifiedWith(min) => {
                doc.document_type.is_known() && doc.classification_confidence >= *min
            }
            Check::NotSeverelyBlurred { floor } => {
                !(doc.is_blurry && doc.quality_score.unwrap_or(0.0) < *floor)
            }
            Check::AnyFieldPresent(fields) => fields.iter().any(|f| doc.field(f).is_some()),
            Check::ExtractionAtLeast(min) => doc.extraction_score >= *min,
            Check::SignaturesAtLeast(min) => doc.signature_count >= *min,
            Check::FieldPresent(field) => doc.field(field).is_some(),
            Check::AllFieldsPresent(fields) => fields.iter().all(|f| doc.field(f).is_some()),
            Check::FieldNotIn { field, values } => doc
                .field(field)
                .map_or(true, |v| !values.iter().any(|bad| v.eq_ignore_ascii_case(bad))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pub scope: RuleScope,
    pub severity: Severity,
    pub check: Check,
    /// Placeholders: `{count}` `{required}` `{score}` `{threshold}`
    /// `{length}` `{confidence}`.
    pub reason: &'static str,
}

impl Rule {
    pub fn reason_for(&self, doc: &DocumentState) -> String {
        let threshold = match &self.check {
            Check::QualityAtLeast(v) | Check::ClassifiedWith(v) | Check::ExtractionAtLeast(v) => {
                format!("{v}")
            }
            Check::NotSeverelyBlurred { floor } => format!("{floor}"),
            Check::TextLengthAtLeast(n) => n.to_string(),
            Check::SignaturesAtLeast(n) => n.to_string(),
            _ => String::new(),
        };
        self.reason
            .replace("{count}", &doc.signature_count.to_string())
            .replace("{required}", &threshold)
            .replace("{threshold}", &threshold)
            .replace("{score}", &format!("{:.1}", doc.quality_score.unwrap_or(0.0)))
            .replace("{length}", &doc.ocr_text.trim().chars().count().to_string())
            .replace("{confidence}", &format!("{:.2}", doc.classification_confidence))
    }
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub name: String,
    pub severity: Severity,
    pub stage: u8,
    pub reason: String,
}

impl RuleOutcome {
    fn failed(rule: &Rule, doc: &DocumentState) -> Self {
        Self {
            rule_id: rule.id.to_string(),
            name: rule.name.to_string(),
            severity: rule.severity,
            stage: rule.scope.stage(),
            reason: rule.reason_for(doc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub hard_failures: Vec<RuleOutcome>,
    pub soft_warnings: Vec<RuleOutcome>,
    pub passed_rules: Vec<String>,
    pub total_rules_checked: usize,
    /// passed / evaluated. Stage 2 counts only when it ran.
    pub score: f32,
    pub billing_ready: bool,
    pub needs_manual_review: bool,
    /// Set only by a Hard failure among the general rules.
    pub stop_processing: bool,
    pub summary: String,
    /// Stage-2 failures computed after a halt for operator tooling.
    /// Never part of the verdict's own lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage2_diagnostics: Option<Vec<RuleOutcome>>,
}

impl ValidationVerdict {
    pub fn has_warning(&self, rule_id: &str) -> bool {
        self.soft_warnings.iter().any(|w| w.rule_id == rule_id)
    }

    pub fn failed_rule_ids(&self) -> Vec<&str> {
        self.hard_failures
            .iter()
            .chain(&self.soft_warnings)
            .map(|o| o.rule_id.as_str())
            .collect()
    }
}

#[derive(Default)]
struct StageResult {
    hard: Vec<RuleOutcome>,
    soft: Vec<RuleOutcome>,
    passed: Vec<String>,
    evaluated: usize,
}

fn run_stage(rules: &[Rule], doc: &DocumentState, into: &mut StageResult) {
    for rule in rules {
        into.evaluated += 1;
        if rule.check.passes(doc) {
            into.passed.push(rule.id.to_string());
            continue;
        }
        let outcome = RuleOutcome::failed(rule, doc);
        tracing::debug!(
            document_id = %doc.id,
            rule_id = rule.id,
            severity = ?rule.severity,
            reason = %outcome.reason,
            "Rule failed"
        );
        match rule.severity {
            Severity::Hard => into.hard.push(outcome),
            Severity::Soft => into.soft.push(outcome),
        }
    }
}

fn build_summary(hard: usize, soft: usize, stop: bool) -> String {
    if stop {
        format!("Document failed {hard} critical rule(s) in general checks. Re-upload required.")
    } else if hard > 0 {
        format!("Document failed {hard} critical rule(s). Action required.")
    } else if soft > 0 {
        format!("Document passed with {soft} warning(s). Review recommended.")
    } else {
        "All validation rules passed. Document ready for processing.".to_string()
    }
}

// ═══════════════════════════════════════════════════════════
// Rulebook
// ═══════════════════════════════════════════════════════════

/// Immutable rule configuration: general rules plus one set per type.
#[derive(Debug, Clone)]
pub struct Rulebook {
    general: Vec<Rule>,
    by_type: HashMap<DocumentType, Vec<Rule>>,
    stage2_on_halt: bool,
}

impl Rulebook {
    pub fn from_rules(
        general: Vec<Rule>,
        by_type: HashMap<DocumentType, Vec<Rule>>,
        stage2_on_halt: bool,
    ) -> Self {
        Self {
            general,
            by_type,
            stage2_on_halt,
        }
    }

    /// The standard freight rulebook with thresholds from `config`.
    pub fn standard(config: &PipelineConfig) -> Self {
        let by_type = DocumentType::KNOWN
            .iter()
            .map(|t| (*t, document_rules(*t)))
            .collect();
        Self::from_rules(general_rules(config), by_type, config.stage2_diagnostics_on_halt)
    }

    pub fn general_rules(&self) -> &[Rule] {
        &self.general
    }

    /// Stage-2 rules for a type. Empty for `Unknown`.
    pub fn rules_for(&self, document_type: DocumentType) -> &[Rule] {
        self.by_type
            .get(&document_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn evaluate(&self, doc: &DocumentState) -> ValidationVerdict {
        let mut stage = StageResult::default();
        run_stage(&self.general, doc, &mut stage);

        let stop_processing = !stage.hard.is_empty();
        let specific = self.rules_for(doc.document_type);
        let mut stage2_diagnostics = None;

        if stop_processing {
            tracing::info!(
                document_id = %doc.id,
                hard_failures = stage.hard.len(),
                "General rules failed, skipping document-specific rules"
            );
            if self.stage2_on_halt {
                let mut diag = StageResult::default();
                run_stage(specific, doc, &mut diag);
                let mut failures: Vec<RuleOutcome> = diag.hard.into_iter().chain(diag.soft).collect();
                failures.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
                stage2_diagnostics = Some(failures);
            }
        } else {
            run_stage(specific, doc, &mut stage);
        }

        stage.hard.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        stage.soft.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        stage.passed.sort();

        let score = if stage.evaluated > 0 {
            stage.passed.len() as f32 / stage.evaluated as f32
        } else {
            0.0
        };
        let billing_ready = stage.hard.is_empty() && stage.soft.is_empty();

        let verdict = ValidationVerdict {
            summary: build_summary(stage.hard.len(), stage.soft.len(), stop_processing),
            needs_manual_review: !billing_ready,
            billing_ready,
            stop_processing,
            score,
            total_rules_checked: stage.evaluated,
            passed_rules: stage.passed,
            hard_failures: stage.hard,
            soft_warnings: stage.soft,
            stage2_diagnostics,
        };

        tracing::info!(
            document_id = %doc.id,
            document_type = %doc.document_type,
            checked = verdict.total_rules_checked,
            hard = verdict.hard_failures.len(),
            soft = verdict.soft_warnings.len(),
            score = verdict.score,
            "Validation complete"
        );
        verdict
    }
}

// ─── Rule tables ───────────────────────────────────────────

fn general_rules(config: &PipelineConfig) -> Vec<Rule> {
    let rule = |id, name, severity, check, reason| Rule {
        id,
        name,
        scope: RuleScope::General,
        severity,
        check,
        reason,
    };
    vec![
        rule(
            QUALITY_RULE_ID,
            "Image Quality Check",
            Severity::Soft,
            Check::QualityAtLeast(config.quality_warning_threshold),
            "Image quality is low ({score} < {threshold}). Document flagged for manual review.",
        ),
        rule(
            "GEN_002",
            "Minimum Text Extracted",
            Severity::Hard,
            Check::TextLengthAtLeast(config.min_text_length),
            "Could not extract enough text (< {threshold} characters). Document may be blank or unreadable.",
        ),
        rule(
            "GEN_003",
            "Document Type Identified",
            Severity::Hard,
            Check::ClassifiedWith(config.classification_threshold),
            "Document type could not be identified confidently. Manual review needed.",
        ),
        rule(
            "GEN_004",
            "Not Severely Blurry",
            Severity::Hard,
            Check::NotSeverelyBlurred {
                floor: config.severe_quality_floor,
            },
            "Document is too blurry. Please re-upload a clearer image.",
        ),
        rule(
            "GEN_005",
            "Date Present",
            Severity::Soft,
            Check::AnyFieldPresent(DATE_FIELDS),
            "No date found on document. Date is required for tracking.",
        ),
        rule(
            "GEN_006",
            "Extraction Completeness",
            Severity::Soft,
            Check::ExtractionAtLeast(config.extraction_completeness_threshold),
            "Less than {threshold} of expected fields could be read from document.",
        ),
    ]
}

fn document_rules(document_type: DocumentType) -> Vec<Rule> {
    use Check::*;
    use Severity::{Hard, Soft};

    let min_signatures = requirement_for(document_type).min_signatures;
    let rule = |id, name, severity, check, reason| Rule {
        id,
        name,
        scope: RuleScope::DocumentType(document_type),
        severity,
        check,
        reason,
    };

    match document_type {
        DocumentType::BillOfLading => vec![
            rule("BOL_001", "Required Signatures", Hard, SignaturesAtLeast(min_signatures),
                "BOL must have minimum {required} signatures (shipper + carrier). Found {count}."),
            rule("BOL_002", "BOL Number Present", Hard, FieldPresent("bol_number"),
                "BOL number is missing. This is required for tracking."),
            rule("BOL_003", "Order/Load Number Present", Hard, FieldPresent("order_number"),
                "Order or Load number is missing."),
            rule("BOL_004", "Shipper Name Present", Hard, FieldPresent("shipper"),
                "Shipper name is missing."),
            rule("BOL_005", "Consignee Name Present", Hard, FieldPresent("consignee"),
                "Consignee name is missing."),
            rule("BOL_006", "Origin and Destination Present", Soft,
                AllFieldsPresent(&["origin", "destination"]),
                "Origin or Destination location is missing."),
            rule("BOL_007", "Freight Terms Specified", Soft, FieldPresent("freight_terms"),
                "Freight terms (Prepaid/Collect) not specified."),
            rule("BOL_008", "Weight Present", Soft, FieldPresent("total_weight"),
                "Total weight is missing."),
        ],
        DocumentType::ProofOfDelivery => vec![
            rule("POD_001", "Consignee Signature Required", Hard, SignaturesAtLeast(min_signatures),
                "POD must have consignee signature to confirm delivery."),
            rule("POD_002", "Order Number Present", Hard, FieldPresent("order_number"),
                "Order/Load number is missing on POD."),
            rule("POD_003", "Delivery Date Present", Hard, FieldPresent("delivery_date"),
                "Delivery date is missing."),
            rule("POD_004", "Delivered To Name Present", Soft, FieldPresent("delivered_to"),
                "Recipient name is missing."),
            rule("POD_005", "Delivery Condition Noted", Soft, FieldPresent("condition"),
                "Delivery condition (Good/Damaged) not noted."),
            rule("POD_006", "No Damage Reported", Soft,
                FieldNotIn { field: "condition", values: &["damaged", "refused", "partial"] },
                "Delivery condition shows damage or refusal - escalate for review."),
        ],
        DocumentType::CommercialInvoice => vec![
            rule("INV_001", "Invoice Number Present", Hard, FieldPresent("invoice_number"),
                "Invoice number is missing."),
            rule("INV_002", "Order Number Present", Hard, FieldPresent("order_number"),
                "Order/PO number is missing."),
            rule("INV_003", "Total Amount Present", Hard, FieldPresent("total_amount"),
                "Invoice total amount is missing."),
            rule("INV_004", "Seller and Buyer Present", Hard,
                AllFieldsPresent(&["seller", "buyer"]),
                "Seller or Buyer name is missing."),
            rule("INV_005", "Payment Terms Present", Soft, FieldPresent("payment_terms"),
                "Payment terms are missing."),
            rule("INV_006", "Invoice Date Present", Soft, FieldPresent("invoice_date"),
                "Invoice date is missing."),
        ],
        DocumentType::PackingList => vec![
            rule("PKG_001", "Order Number Present", Hard, FieldPresent("order_number"),
                "Order number is missing on packing list."),
            rule("PKG_002", "Total Cartons Present", Hard, FieldPresent("total_cartons"),
                "Total carton count is missing."),
            rule("PKG_003", "Weight Present", Soft, FieldPresent("gross_weight"),
                "Gross weight is missing."),
            rule("PKG_004", "Destination Present", Soft, FieldPresent("destination"),
                "Destination is missing."),
        ],
        DocumentType::HazmatDocument => vec![
            rule("HAZ_001", "UN Number Required", Hard, FieldPresent("un_number"),
                "UN number is mandatory for hazmat documents."),
            rule("HAZ_002", "Proper Shipping Name Required", Hard, FieldPresent("shipping_name"),
                "Proper shipping name is required."),
            rule("HAZ_003", "Hazard Class Required", Hard, FieldPresent("hazard_class"),
                "Hazard class is missing."),
            rule("HAZ_004", "Emergency Contact Required", Hard, FieldPresent("emergency_contact"),
                "Emergency contact number is mandatory for hazmat."),
            rule("HAZ_005", "Packing Group Present", Soft, FieldPresent("packing_group"),
                "Packing group (I/II/III) is missing."),
            rule("HAZ_006", "Shipper Signature Required", Hard, SignaturesAtLeast(min_signatures),
                "Hazmat document requires shipper signature."),
        ],
        DocumentType::LumperReceipt => vec![
            rule("LMP_001", "Signature Required", Hard, SignaturesAtLeast(min_signatures),
                "Lumper receipt must be signed."),
            rule("LMP_002", "Order Number Present", Hard, FieldPresent("order_number"),
                "Order/Load number is missing."),
            rule("LMP_003", "Amount Present", Hard, FieldPresent("amount"),
                "Payment amount is missing."),
            rule("LMP_004", "Date Present", Soft, FieldPresent("date"),
                "Date is missing on lumper receipt."),
            rule("LMP_005", "Service Type Present", Soft, FieldPresent("service_type"),
                "Service type (Loading/Unloading) not specified."),
        ],
        DocumentType::TripSheet => vec![
            rule("TRP_001", "Trip Number Present", Hard, FieldPresent("trip_number"),
                "Trip/Load number is missing."),
            rule("TRP_002", "Driver Name Present", Hard, FieldPresent("driver_name"),
                "Driver name is missing."),
            rule("TRP_003", "Driver Signature Required", Hard, SignaturesAtLeast(min_signatures),
                "Driver signature is required on trip sheet."),
            rule("TRP_004", "Mileage Present", Soft, FieldPresent("total_miles"),
                "Total mileage is missing."),
            rule("TRP_005", "Truck Number Present", Soft, FieldPresent("truck_number"),
                "Truck/Unit number is missing."),
        ],
        DocumentType::FreightInvoice => vec![
            rule("FRT_001", "PRO Number Present", Hard, FieldPresent("pro_number"),
                "PRO number is missing on freight invoice."),
            rule("FRT_002", "Order Number Present", Hard, FieldPresent("order_number"),
                "Order/Load number is missing."),
            rule("FRT_003", "Total Charges Present", Hard, FieldPresent("total_charges"),
                "Total charges amount is missing."),
            rule("FRT_004", "Carrier Name Present", Soft, FieldPresent("carrier_name"),
                "Carrier name is missing."),
            rule("FRT_005", "Invoice Date Present", Soft, FieldPresent("invoice_date"),
                "Invoice date is missing."),
        ],
        DocumentType::Unknown => Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
