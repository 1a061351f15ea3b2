//! Field Extractor: type-dependent key/value extraction from document text.
//!
//! Each document type has a schema of fields. A field is found by locating
//! one of its labels on a line (case-insensitive, word-bounded) and parsing
//! a value of the field's kind from the rest of that line. Labels are tried
//! in order, so specific labels come before generic ones. A label written as
//! `^key` only matches when `key` is the whole label at the start of a line
//! ("Date: ..." but not "Ship Date: ..."). Fields that cannot be read are
//! absent from the result, never stored as empty strings.
//!
//! Vision hints fill schema fields the text did not yield; they never
//! override a value read from the text.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::enums::DocumentType;

/// Shortest value accepted for any field.
const MIN_VALUE_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Reference number; must contain a digit.
    Identifier,
    /// Names, places, and free-form terms.
    Text,
    Date,
    /// Money, currency symbol optional.
    Amount,
    /// Whole number (pieces, cartons, miles).
    Count,
    /// Number with an optional unit (weight, hours, volume).
    Quantity,
    /// One of a closed set of options, returned in canonical spelling.
    Choice(&'static [&'static str]),
    Phone,
    /// `UN1203` style hazmat identifier; found anywhere on a line.
    UnNumber,
    /// Hazard class or division, e.g. `3` or `2.1`.
    HazardClass,
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub labels: &'static [&'static str],
    pub kind: ValueKind,
}

const fn field(name: &'static str, labels: &'static [&'static str], kind: ValueKind) -> FieldSpec {
    FieldSpec { name, labels, kind }
}

// ═══════════════════════════════════════════════════════════
// Schemas
// ═══════════════════════════════════════════════════════════

const ORDER_LABELS: &[&str] = &[
    "order number", "order no", "order #", "load number", "load no", "load #", "order", "load",
];

const BOL_FIELDS: &[FieldSpec] = &[
    field(
        "bol_number",
        &["bill of lading number", "bill of lading no", "b/l number", "b/l no", "bol number", "bol no", "bol #", "b/l", "bol"],
        ValueKind::Identifier,
    ),
    field("order_number", ORDER_LABELS, ValueKind::Identifier),
    field("shipper", &["shipper name", "shipper"], ValueKind::Text),
    field("consignee", &["consignee name", "consignee"], ValueKind::Text),
    field("origin", &["origin", "ship from", "port of loading"], ValueKind::Text),
    field("destination", &["destination", "ship to", "port of discharge"], ValueKind::Text),
    field("ship_date", &["ship date", "pickup date", "date shipped", "^date"], ValueKind::Date),
    field("carrier", &["carrier name", "carrier"], ValueKind::Text),
    field("total_weight", &["total weight", "gross weight", "weight"], ValueKind::Quantity),
    field("total_pieces", &["total pieces", "pieces", "units", "pcs"], ValueKind::Count),
    field(
        "freight_terms",
        &["freight terms", "freight charges", "terms"],
        ValueKind::Choice(&["prepaid", "collect", "third party"]),
    ),
];

const POD_FIELDS: &[FieldSpec] = &[
    field("order_number", ORDER_LABELS, ValueKind::Identifier),
    field(
        "delivery_date",
        &["delivery date", "delivered on", "date delivered", "date received", "^date"],
        ValueKind::Date,
    ),
    field("delivered_to", &["delivered to", "received by", "recipient", "receiver"], ValueKind::Text),
    field(
        "condition",
        &["goods condition", "condition", "received in"],
        ValueKind::Choice(&["damaged", "refused", "partial", "good"]),
    ),
    field("driver_name", &["driver name", "driver"], ValueKind::Text),
];

const INVOICE_FIELDS: &[FieldSpec] = &[
    field(
        "invoice_number",
        &["invoice number", "invoice no", "invoice #", "inv no", "invoice"],
        ValueKind::Identifier,
    ),
    field("invoice_date", &["invoice date", "^date"], ValueKind::Date),
    field(
        "order_number",
        &["po number", "po no", "po #", "purchase order", "order number", "order no", "order"],
        ValueKind::Identifier,
    ),
    field("seller", &["seller", "vendor", "exporter", "sold by"], ValueKind::Text),
    field("buyer", &["buyer", "bill to", "sold to", "importer"], ValueKind::Text),
    field(
        "total_amount",
        &["total amount", "grand total", "invoice total", "amount due", "total"],
        ValueKind::Amount,
    ),
    field(
        "currency",
        &["currency"],
        ValueKind::Choice(&["USD", "EUR", "GBP", "CAD", "MXN", "INR"]),
    ),
    field("payment_terms", &["payment terms", "terms of payment"], ValueKind::Text),
    field(
        "incoterms",
        &["incoterms", "incoterm", "terms of delivery"],
        ValueKind::Choice(&["FOB", "CIF", "EXW", "DDP", "DAP", "CFR", "FCA"]),
    ),
];

const PACKING_FIELDS: &[FieldSpec] = &[
    field(
        "order_number",
        &["order number", "order no", "po number", "reference", "order", "ref"],
        ValueKind::Identifier,
    ),
    field("packing_date", &["packing date", "^date"], ValueKind::Date),
    field(
        "total_cartons",
        &["total cartons", "total packages", "cartons", "packages", "ctns"],
        ValueKind::Count,
    ),
    field("gross_weight", &["gross weight", "total gross", "gross wt"], ValueKind::Quantity),
    field("net_weight", &["net weight", "total net", "net wt"], ValueKind::Quantity),
    field("destination", &["destination", "ship to", "deliver to"], ValueKind::Text),
];

const HAZMAT_FIELDS: &[FieldSpec] = &[
    field("un_number", &[], ValueKind::UnNumber),
    field("shipping_name", &["proper shipping name", "shipping name"], ValueKind::Text),
    field("hazard_class", &["hazard class", "class", "division"], ValueKind::HazardClass),
    field(
        "packing_group",
        &["packing group", "pg"],
        ValueKind::Choice(&["III", "II", "I"]),
    ),
    field("total_quantity", &["total quantity", "quantity", "qty"], ValueKind::Quantity),
    field(
        "emergency_contact",
        &["emergency contact", "emergency phone", "emergency response", "chemtrec", "emergency"],
        ValueKind::Phone,
    ),
    field("shipper", &["shipper name", "shipper"], ValueKind::Text),
];

const LUMPER_FIELDS: &[FieldSpec] = &[
    field("order_number", ORDER_LABELS, ValueKind::Identifier),
    field("date", &["service date", "^date"], ValueKind::Date),
    field("lumper_company", &["lumper company", "company", "service provider"], ValueKind::Text),
    field("worker_name", &["worker name", "worker", "employee"], ValueKind::Text),
    field(
        "service_type",
        &["service type", "service", "type"],
        ValueKind::Choice(&["unloading", "loading", "both"]),
    ),
    field("hours_worked", &["hours worked", "hrs worked", "hours"], ValueKind::Quantity),
    field("amount", &["total amount", "amount", "total", "fee", "charge"], ValueKind::Amount),
    field("facility", &["facility", "warehouse", "location"], ValueKind::Text),
];

const TRIP_FIELDS: &[FieldSpec] = &[
    field(
        "trip_number",
        &["trip number", "trip no", "trip #", "trip", "load number", "load"],
        ValueKind::Identifier,
    ),
    field("driver_name", &["driver name", "driver"], ValueKind::Text),
    field(
        "truck_number",
        &["truck number", "truck no", "truck #", "truck", "unit number", "unit", "tractor"],
        ValueKind::Identifier,
    ),
    field("date", &["trip date", "^date"], ValueKind::Date),
    field("start_odometer", &["start odometer", "odometer start", "beginning odometer"], ValueKind::Count),
    field("end_odometer", &["end odometer", "odometer end", "ending odometer"], ValueKind::Count),
    field("total_miles", &["total miles", "miles driven", "mileage"], ValueKind::Count),
    field("origin", &["origin", "start location"], ValueKind::Text),
    field("destination", &["destination", "end location"], ValueKind::Text),
    field("fuel_stops", &["fuel stops"], ValueKind::Count),
];

const FREIGHT_INVOICE_FIELDS: &[FieldSpec] = &[
    field("pro_number", &["pro number", "pro no", "pro #", "pro#", "pro"], ValueKind::Identifier),
    field(
        "invoice_number",
        &["invoice number", "invoice no", "invoice #", "invoice"],
        ValueKind::Identifier,
    ),
    field(
        "order_number",
        &["order number", "order no", "load number", "load #", "reference", "order", "load", "ref"],
        ValueKind::Identifier,
    ),
    field("invoice_date", &["invoice date", "bill date", "^date"], ValueKind::Date),
    field("carrier_name", &["carrier name", "carrier", "remit to"], ValueKind::Text),
    field("origin", &["origin", "ship from"], ValueKind::Text),
    field("destination", &["destination", "ship to"], ValueKind::Text),
    field("linehaul", &["linehaul", "line haul"], ValueKind::Amount),
    field("fuel_surcharge", &["fuel surcharge", "fsc"], ValueKind::Amount),
    field("accessorial", &["accessorial charges", "accessorials", "accessorial"], ValueKind::Amount),
    field(
        "total_charges",
        &["total charges", "amount due", "total due", "balance due", "total"],
        ValueKind::Amount,
    ),
    field("payment_due", &["due date", "payment due", "pay by"], ValueKind::Date),
];

/// Extraction schema for a document type. `Unknown` has none.
pub fn schema_for(document_type: DocumentType) -> &'static [FieldSpec] {
    match document_type {
        DocumentType::BillOfLading => BOL_FIELDS,
        DocumentType::ProofOfDelivery => POD_FIELDS,
        DocumentType::CommercialInvoice => INVOICE_FIELDS,
        DocumentType::PackingList => PACKING_FIELDS,
        DocumentType::HazmatDocument => HAZMAT_FIELDS,
        DocumentType::LumperReceipt => LUMPER_FIELDS,
        DocumentType::TripSheet => TRIP_FIELDS,
        DocumentType::FreightInvoice => FREIGHT_INVOICE_FIELDS,
        DocumentType::Unknown => &[],
    }
}

// ═══════════════════════════════════════════════════════════
// Value patterns
// ═══════════════════════════════════════════════════════════

/// Separators and filler words between a label and its value.
static FILLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s:#.=\-]*(?:(?:name|no|nbr|num|number|amount|charges)\b\.?)?[\s:#.=\-]*")
        .unwrap()
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9][A-Za-z0-9\-/]*)").unwrap());

static TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9,.&'/\-]*(?: [A-Za-z0-9,.&'/\-]+)*)").unwrap()
});

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{4}-\d{2}-\d{2}|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}|\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{4})\b",
    )
    .unwrap()
});

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:usd|us\$|\$|€|£)?\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap()
});

static COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9][0-9,]*)").unwrap());

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^([0-9][0-9,]*(?:\.[0-9]+)?(?:\s*(?:lbs|lb|kgs|kg|pounds|kilograms|hours|hrs|hr|gallons|gal|cbm|m3|ft3|l)\b)?)",
    )
    .unwrap()
});

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\+?\(?[0-9][0-9\s().\-]{6,}[0-9])").unwrap());

static UN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(UN|NA)\s*-?\s*([0-9]{4})\b").unwrap());

static HAZARD_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9](?:\.[1-6])?[A-Za-z]?)\b").unwrap());

/// Text values that are really form labels.
const NON_VALUES: &[&str] = &["signature", "sign", "n/a", "na", "none", "date", "name", "and"];

/// Label patterns compiled once per schema. The capture group ends where
/// the value part of the line begins.
static LABEL_PATTERNS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    DocumentType::KNOWN
        .iter()
        .flat_map(|t| schema_for(*t).iter())
        .flat_map(|spec| spec.labels.iter())
        .filter_map(|label| {
            let pattern = match label.strip_prefix('^') {
                Some(key) => format!(r"(?i)^\s*({})\s*[:#=]", regex::escape(key)),
                None => format!(
                    r"(?i)(?:^|[^[:alnum:]])({})(?:[^[:alnum:]]|$)",
                    regex::escape(label)
                ),
            };
            Regex::new(&pattern).ok().map(|re| (*label, re))
        })
        .collect()
});

// ═══════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldExtraction {
    pub fields: BTreeMap<String, String>,
    /// Fields filled from vision hints rather than text.
    pub from_hints: Vec<String>,
    pub filled: usize,
    pub expected: usize,
    /// filled / expected, rounded to two decimals. 0 for an empty schema.
    pub score: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        text: &str,
        document_type: DocumentType,
        hints: &BTreeMap<String, String>,
    ) -> FieldExtraction {
        let schema = schema_for(document_type);
        let mut result = FieldExtraction {
            expected: schema.len(),
            ..FieldExtraction::default()
        };

        for spec in schema {
            if let Some(value) = find_field(text, spec) {
                result.fields.insert(spec.name.to_string(), value);
                continue;
            }
            let hint = hints
                .get(spec.name)
                .map(|v| v.trim())
                .filter(|v| v.chars().count() >= MIN_VALUE_CHARS);
            if let Some(value) = hint {
                result.fields.insert(spec.name.to_string(), value.to_string());
                result.from_hints.push(spec.name.to_string());
            }
        }

        result.filled = result.fields.len();
        if result.expected > 0 {
            let ratio = result.filled as f32 / result.expected as f32;
            result.score = (ratio * 100.0).round() / 100.0;
        }

        tracing::debug!(
            document_type = %document_type,
            filled = result.filled,
            expected = result.expected,
            from_hints = result.from_hints.len(),
            "Field extraction complete"
        );
        result
    }
}

fn find_field(text: &str, spec: &FieldSpec) -> Option<String> {
    if spec.kind == ValueKind::UnNumber {
        return text.lines().find_map(|line| {
            UN_NUMBER.captures(line).map(|c| {
                format!("{}{}", c[1].to_uppercase(), &c[2])
            })
        });
    }

    for label in spec.labels {
        let Some(pattern) = LABEL_PATTERNS.get(label) else {
            continue;
        };
        for line in text.lines() {
            let Some(m) = pattern.captures(line).and_then(|c| c.get(1)) else {
                continue;
            };
            if let Some(value) = parse_value(&line[m.end()..], spec.kind) {
                return Some(value);
            }
        }
    }
    None
}

/// Parse a value of `kind` from the text following a label.
fn parse_value(rest: &str, kind: ValueKind) -> Option<String> {
    let rest = &rest[FILLER.find(rest).map_or(0, |m| m.end())..];

    let value = match kind {
        ValueKind::Identifier => IDENTIFIER
            .captures(rest)
            .map(|c| c[1].to_string())
            .filter(|v| v.chars().any(|ch| ch.is_ascii_digit())),
        ValueKind::Text => TEXT
            .captures(rest)
            .map(|c| c[1].trim_end_matches([',', '.', '-', ' ']).to_string())
            .filter(|v| !NON_VALUES.contains(&v.to_lowercase().as_str()))
            .filter(|v| !v.to_lowercase().starts_with("signature")),
        ValueKind::Date => DATE.captures(rest).map(|c| c[1].to_string()),
        ValueKind::Amount => AMOUNT.captures(rest).map(|c| c[1].to_string()),
        ValueKind::Count => COUNT.captures(rest).map(|c| c[1].to_string()),
        ValueKind::Quantity => QUANTITY.captures(rest).map(|c| c[1].trim().to_string()),
        ValueKind::Choice(options) => options
            .iter()
            .find(|opt| contains_word(rest, opt))
            .map(|opt| opt.to_string()),
        ValueKind::Phone => PHONE
            .captures(rest)
            .map(|c| c[1].trim().to_string())
            .filter(|v| v.chars().filter(|ch| ch.is_ascii_digit()).count() >= 7),
        ValueKind::HazardClass => HAZARD_CLASS.captures(rest).map(|c| c[1].to_string()),
        ValueKind::UnNumber => None,
    }?;

    let single_char_ok = matches!(kind, ValueKind::HazardClass | ValueKind::Count | ValueKind::Choice(_));
    (single_char_ok || value.chars().count() >= MIN_VALUE_CHARS).then_some(value)
}

/// Case-insensitive whole-word containment.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let hay = haystack.to_lowercase();
    let needle = needle.to_lowercase();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric());
    hay.match_indices(&needle).any(|(i, _)| {
        let before = hay[..i].chars().next_back();
        let after = hay[i + needle.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
