//! Status Resolver: maps a validation verdict to the final document status.
//!
//! Precedence, first match wins:
//! 1. general Hard failure → `needs_review`, re-upload requested
//! 2. any Hard failure → `fail`
//! 3. low-quality warning → `needs_review`
//! 4. other warnings → `pass_with_warnings`
//! 5. otherwise → `pass`

use serde::Serialize;

use super::validation::{ValidationVerdict, QUALITY_RULE_ID};
use crate::models::enums::ValidationStatus;

const LOW_QUALITY_PREFIX: &str = "Low scan quality, routed for manual review.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub validation_status: ValidationStatus,
    pub billing_ready: bool,
    pub needs_manual_review: bool,
    pub reupload_required: bool,
    pub summary: String,
}

pub fn resolve(verdict: &ValidationVerdict) -> Resolution {
    let (validation_status, summary) = if verdict.stop_processing {
        (ValidationStatus::NeedsReview, verdict.summary.clone())
    } else if !verdict.hard_failures.is_empty() {
        (ValidationStatus::Fail, verdict.summary.clone())
    } else if verdict.has_warning(QUALITY_RULE_ID) {
        (
            ValidationStatus::NeedsReview,
            format!("{LOW_QUALITY_PREFIX} {}", verdict.summary),
        )
    } else if !verdict.soft_warnings.is_empty() {
        (ValidationStatus::PassWithWarnings, verdict.summary.clone())
    } else {
        (ValidationStatus::Pass, verdict.summary.clone())
    };

    Resolution {
        validation_status,
        billing_ready: validation_status == ValidationStatus::Pass && verdict.billing_ready,
        needs_manual_review: verdict.needs_manual_review,
        reupload_required: verdict.stop_processing,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validation::{RuleOutcome, Severity};

    fn outcome(rule_id: &str, severity: Severity, stage: u8) -> RuleOutcome {
        RuleOutcome {
            rule_id: rule_id.into(),
            name: rule_id.into(),
            severity,
            stage,
            reason: format!("{rule_id} failed"),
        }
    }

    fn verdict(hard: Vec<RuleOutcome>, soft: Vec<RuleOutcome>, stop: bool) -> ValidationVerdict {
        let clean = hard.is_empty() && soft.is_empty();
        ValidationVerdict {
            hard_failures: hard,
            soft_warnings: soft,
            passed_rules: Vec::new(),
            total_rules_checked: 6,
            score: 0.5,
            billing_ready: clean,
            needs_manual_review: !clean,
            stop_processing: stop,
            summary: "summary".into(),
            stage2_diagnostics: None,
        }
    }

    #[test]
    fn clean_verdict_passes() {
        let r = resolve(&verdict(vec![], vec![], false));
        assert_eq!(r.validation_status, ValidationStatus::Pass);
        assert!(r.billing_ready);
        assert!(!r.needs_manual_review);
        assert!(!r.reupload_required);
    }

    #[test]
    fn general_hard_failure_requests_reupload() {
        let r = resolve(&verdict(vec![outcome("GEN_004", Severity::Hard, 1)], vec![], true));
        assert_eq!(r.validation_status, ValidationStatus::NeedsReview);
        assert!(r.reupload_required);
        assert!(!r.billing_ready);
    }

    #[test]
    fn document_hard_failure_fails() {
        let r = resolve(&verdict(
            vec![outcome("BOL_001", Severity::Hard, 2)],
            vec![outcome("GEN_001", Severity::Soft, 1)],
            false,
        ));
        assert_eq!(r.validation_status, ValidationStatus::Fail);
        assert!(!r.reupload_required);
    }

    #[test]
    fn low_quality_warning_needs_review() {
        let r = resolve(&verdict(vec![], vec![outcome("GEN_001", Severity::Soft, 1)], false));
        assert_eq!(r.validation_status, ValidationStatus::NeedsReview);
        assert!(r.needs_manual_review);
        assert!(!r.billing_ready);
        assert!(r.summary.starts_with(LOW_QUALITY_PREFIX));
    }

    #[test]
    fn other_warnings_pass_with_warnings() {
        let r = resolve(&verdict(vec![], vec![outcome("BOL_008", Severity::Soft, 2)], false));
        assert_eq!(r.validation_status, ValidationStatus::PassWithWarnings);
        assert!(!r.billing_ready);
        assert_eq!(r.summary, "summary");
    }
}
