use rusqlite::{params, Connection};
use uuid::Uuid;

use super::document::parse_timestamp;
use crate::db::DatabaseError;
use crate::models::ReuploadRequest;

pub fn insert_reupload_request(
    conn: &Connection,
    request: &ReuploadRequest,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reupload_requests (id, document_id, filename, quality_score, message,
         status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            request.id.to_string(),
            request.document_id.to_string(),
            request.filename,
            request.quality_score,
            request.message,
            request.status,
            request.created_at.to_string(),
        ],
    )?;
    Ok(())
}

/// Re-upload requests raised for a document, oldest first.
pub fn get_reupload_requests(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Vec<ReuploadRequest>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, filename, quality_score, message, status, created_at
         FROM reupload_requests WHERE document_id = ?1 ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map(params![document_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f32>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut requests = Vec::new();
    for row in rows {
        let (id, doc_id, filename, quality_score, message, status, created_at) = row?;
        requests.push(ReuploadRequest {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            document_id: Uuid::parse_str(&doc_id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            filename,
            quality_score,
            message,
            status,
            created_at: parse_timestamp(&created_at),
        });
    }
    Ok(requests)
}
