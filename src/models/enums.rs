use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde uses the same string as the database column.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(DocumentType {
    BillOfLading => "bill_of_lading",
    ProofOfDelivery => "proof_of_delivery",
    PackingList => "packing_list",
    CommercialInvoice => "commercial_invoice",
    HazmatDocument => "hazmat_document",
    LumperReceipt => "lumper_receipt",
    TripSheet => "trip_sheet",
    FreightInvoice => "freight_invoice",
    Unknown => "unknown",
});

impl DocumentType {
    /// The eight classifiable types, in tie-break order.
    pub const KNOWN: [DocumentType; 8] = [
        DocumentType::BillOfLading,
        DocumentType::ProofOfDelivery,
        DocumentType::PackingList,
        DocumentType::CommercialInvoice,
        DocumentType::HazmatDocument,
        DocumentType::LumperReceipt,
        DocumentType::TripSheet,
        DocumentType::FreightInvoice,
    ];

    /// Human-facing name used in reasons and summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::BillOfLading => "Bill of Lading",
            Self::ProofOfDelivery => "Proof of Delivery",
            Self::PackingList => "Packing List",
            Self::CommercialInvoice => "Commercial Invoice",
            Self::HazmatDocument => "Hazmat Document",
            Self::LumperReceipt => "Lumper Receipt",
            Self::TripSheet => "Trip Sheet",
            Self::FreightInvoice => "Freight Invoice",
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Accepts either the stored form (`proof_of_delivery`) or the display
    /// name (`Proof of Delivery`), in any case.
    pub fn from_label(label: &str) -> Option<Self> {
        label.trim().to_lowercase().replace([' ', '-'], "_").parse().ok()
    }
}

str_enum!(ValidationStatus {
    Pending => "pending",
    Pass => "pass",
    PassWithWarnings => "pass_with_warnings",
    Fail => "fail",
    NeedsReview => "needs_review",
});

str_enum!(PipelineStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Rejected => "rejected",
});

str_enum!(ReadabilityStatus {
    Clear => "clear",
    PartiallyClear => "partially_clear",
    Unreadable => "unreadable",
});

str_enum!(TextSource {
    None => "none",
    Local => "local",
    Vision => "vision",
});

str_enum!(SignatureCheck {
    NotRun => "not_run",
    Detected => "detected",
    Skipped => "skipped",
    Failed => "failed",
});

str_enum!(MarkType {
    Handwritten => "handwritten",
    Printed => "printed",
    Stamp => "stamp",
    Digital => "digital",
});

str_enum!(LogStatus {
    Success => "SUCCESS",
    Failed => "FAILED",
    Skipped => "SKIPPED",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn document_type_round_trip() {
        for variant in DocumentType::KNOWN
            .iter()
            .chain(std::iter::once(&DocumentType::Unknown))
        {
            assert_eq!(DocumentType::from_str(variant.as_str()).unwrap(), *variant);
        }
    }

    #[test]
    fn document_type_display_names() {
        assert_eq!(DocumentType::BillOfLading.display_name(), "Bill of Lading");
        assert_eq!(DocumentType::HazmatDocument.display_name(), "Hazmat Document");
        assert!(!DocumentType::Unknown.is_known());
        assert!(DocumentType::TripSheet.is_known());
    }

    #[test]
    fn document_type_from_label() {
        assert_eq!(
            DocumentType::from_label("Proof of Delivery"),
            Some(DocumentType::ProofOfDelivery)
        );
        assert_eq!(
            DocumentType::from_label(" bill_of_lading "),
            Some(DocumentType::BillOfLading)
        );
        assert_eq!(DocumentType::from_label("UNKNOWN"), Some(DocumentType::Unknown));
        assert_eq!(DocumentType::from_label("Customs Form"), None);
    }

    #[test]
    fn validation_status_round_trip() {
        for (variant, s) in [
            (ValidationStatus::Pending, "pending"),
            (ValidationStatus::Pass, "pass"),
            (ValidationStatus::PassWithWarnings, "pass_with_warnings"),
            (ValidationStatus::Fail, "fail"),
            (ValidationStatus::NeedsReview, "needs_review"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(ValidationStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn serde_uses_column_strings() {
        let json = serde_json::to_string(&DocumentType::CommercialInvoice).unwrap();
        assert_eq!(json, "\"commercial_invoice\"");
        let status: LogStatus = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(status, LogStatus::Skipped);
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(DocumentType::from_str("invoice").is_err());
        assert!(PipelineStatus::from_str("done").is_err());
        assert!(MarkType::from_str("").is_err());
    }
}
