use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const DOCUMENT_COLUMNS: &str = "id, source_path, original_filename, quality_score, readability,
    is_blurry, quality_issues, ocr_text, ocr_confidence, text_source, extraction_degraded,
    document_type, classification_confidence, signature_check, signature_count, has_signature,
    signatures, extracted_fields, extraction_score, processing_error, is_processed,
    validation_status, billing_ready, needs_manual_review, validation_summary,
    validation_result, pipeline_status, created_at, updated_at, field_hints";

pub fn insert_document(conn: &Connection, doc: &DocumentState) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29,
                     ?30)"
        ),
        params![
            doc.id.to_string(),
            doc.source_path,
            doc.original_filename,
            doc.quality_score,
            doc.readability.map(|r| r.as_str()),
            doc.is_blurry as i32,
            serde_json::to_string(&doc.quality_issues)?,
            doc.ocr_text,
            doc.ocr_confidence,
            doc.text_source.as_str(),
            doc.extraction_degraded as i32,
            doc.document_type.as_str(),
            doc.classification_confidence,
            doc.signature_check.as_str(),
            doc.signature_count,
            doc.has_signature as i32,
            serde_json::to_string(&doc.signatures)?,
            serde_json::to_string(&doc.extracted_fields)?,
            doc.extraction_score,
            doc.processing_error,
            doc.is_processed as i32,
            doc.validation_status.as_str(),
            doc.billing_ready as i32,
            doc.needs_manual_review as i32,
            doc.validation_summary,
            doc.validation_result.as_ref().map(|v| v.to_string()),
            doc.pipeline_status.as_str(),
            doc.created_at.to_string(),
            doc.updated_at.to_string(),
            serde_json::to_string(&doc.field_hints)?,
        ],
    )?;
    Ok(())
}

pub fn get_document(conn: &Connection, id: &Uuid) -> Result<Option<DocumentState>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id.to_string()], read_document_row);

    match result {
        Ok(row) => Ok(Some(document_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Overwrite every mutable column. Returns `NotFound` when no row matched.
pub fn update_document(conn: &Connection, doc: &DocumentState) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET quality_score = ?2, readability = ?3, is_blurry = ?4,
         quality_issues = ?5, ocr_text = ?6, ocr_confidence = ?7, text_source = ?8,
         extraction_degraded = ?9, document_type = ?10, classification_confidence = ?11,
         signature_check = ?12, signature_count = ?13, has_signature = ?14, signatures = ?15,
         extracted_fields = ?16, extraction_score = ?17, processing_error = ?18,
         is_processed = ?19, validation_status = ?20, billing_ready = ?21,
         needs_manual_review = ?22, validation_summary = ?23, validation_result = ?24,
         pipeline_status = ?25, updated_at = ?26, field_hints = ?27
         WHERE id = ?1",
        params![
            doc.id.to_string(),
            doc.quality_score,
            doc.readability.map(|r| r.as_str()),
            doc.is_blurry as i32,
            serde_json::to_string(&doc.quality_issues)?,
            doc.ocr_text,
            doc.ocr_confidence,
            doc.text_source.as_str(),
            doc.extraction_degraded as i32,
            doc.document_type.as_str(),
            doc.classification_confidence,
            doc.signature_check.as_str(),
            doc.signature_count,
            doc.has_signature as i32,
            serde_json::to_string(&doc.signatures)?,
            serde_json::to_string(&doc.extracted_fields)?,
            doc.extraction_score,
            doc.processing_error,
            doc.is_processed as i32,
            doc.validation_status.as_str(),
            doc.billing_ready as i32,
            doc.needs_manual_review as i32,
            doc.validation_summary,
            doc.validation_result.as_ref().map(|v| v.to_string()),
            doc.pipeline_status.as_str(),
            doc.updated_at.to_string(),
            serde_json::to_string(&doc.field_hints)?,
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: doc.id.to_string(),
        });
    }
    Ok(())
}

/// Get all documents matching a pipeline status, oldest first.
pub fn get_documents_by_pipeline_status(
    conn: &Connection,
    status: PipelineStatus,
) -> Result<Vec<DocumentState>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE pipeline_status = ?1 ORDER BY created_at ASC"
    ))?;

    let rows = stmt.query_map(params![status.as_str()], read_document_row)?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(document_from_row(row?)?);
    }
    Ok(docs)
}

/// Get all documents with a given validation outcome, newest first.
pub fn get_documents_by_validation_status(
    conn: &Connection,
    status: ValidationStatus,
) -> Result<Vec<DocumentState>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE validation_status = ?1 ORDER BY updated_at DESC"
    ))?;

    let rows = stmt.query_map(params![status.as_str()], read_document_row)?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(document_from_row(row?)?);
    }
    Ok(docs)
}

// Internal row type for Document mapping
struct DocumentRow {
    id: String,
    source_path: String,
    original_filename: String,
    quality_score: Option<f32>,
    readability: Option<String>,
    is_blurry: i32,
    quality_issues: String,
    ocr_text: String,
    ocr_confidence: f32,
    text_source: String,
    extraction_degraded: i32,
    document_type: String,
    classification_confidence: f32,
    signature_check: String,
    signature_count: u32,
    has_signature: i32,
    signatures: String,
    extracted_fields: String,
    extraction_score: f32,
    processing_error: Option<String>,
    is_processed: i32,
    validation_status: String,
    billing_ready: i32,
    needs_manual_review: i32,
    validation_summary: Option<String>,
    validation_result: Option<String>,
    pipeline_status: String,
    created_at: String,
    updated_at: String,
    field_hints: String,
}

fn read_document_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        source_path: row.get(1)?,
        original_filename: row.get(2)?,
        quality_score: row.get(3)?,
        readability: row.get(4)?,
        is_blurry: row.get(5)?,
        quality_issues: row.get(6)?,
        ocr_text: row.get(7)?,
        ocr_confidence: row.get(8)?,
        text_source: row.get(9)?,
        extraction_degraded: row.get(10)?,
        document_type: row.get(11)?,
        classification_confidence: row.get(12)?,
        signature_check: row.get(13)?,
        signature_count: row.get(14)?,
        has_signature: row.get(15)?,
        signatures: row.get(16)?,
        extracted_fields: row.get(17)?,
        extraction_score: row.get(18)?,
        processing_error: row.get(19)?,
        is_processed: row.get(20)?,
        validation_status: row.get(21)?,
        billing_ready: row.get(22)?,
        needs_manual_review: row.get(23)?,
        validation_summary: row.get(24)?,
        validation_result: row.get(25)?,
        pipeline_status: row.get(26)?,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
        field_hints: row.get(29)?,
    })
}

fn document_from_row(row: DocumentRow) -> Result<DocumentState, DatabaseError> {
    Ok(DocumentState {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        source_path: row.source_path,
        original_filename: row.original_filename,
        quality_score: row.quality_score,
        readability: row
            .readability
            .as_deref()
            .map(ReadabilityStatus::from_str)
            .transpose()?,
        is_blurry: row.is_blurry != 0,
        quality_issues: serde_json::from_str(&row.quality_issues)?,
        ocr_text: row.ocr_text,
        ocr_confidence: row.ocr_confidence,
        text_source: TextSource::from_str(&row.text_source)?,
        extraction_degraded: row.extraction_degraded != 0,
        field_hints: serde_json::from_str(&row.field_hints)?,
        document_type: DocumentType::from_str(&row.document_type)?,
        classification_confidence: row.classification_confidence,
        signature_check: SignatureCheck::from_str(&row.signature_check)?,
        signature_count: row.signature_count,
        has_signature: row.has_signature != 0,
        signatures: serde_json::from_str(&row.signatures)?,
        extracted_fields: serde_json::from_str(&row.extracted_fields)?,
        extraction_score: row.extraction_score,
        processing_error: row.processing_error,
        is_processed: row.is_processed != 0,
        validation_status: ValidationStatus::from_str(&row.validation_status)?,
        billing_ready: row.billing_ready != 0,
        needs_manual_review: row.needs_manual_review != 0,
        validation_summary: row.validation_summary,
        validation_result: row
            .validation_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        pipeline_status: PipelineStatus::from_str(&row.pipeline_status)?,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_default()
}
