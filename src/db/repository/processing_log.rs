use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::document::parse_timestamp;
use crate::db::DatabaseError;
use crate::models::enums::LogStatus;
use crate::models::ProcessingLogEntry;

pub fn insert_processing_log(
    conn: &Connection,
    entry: &ProcessingLogEntry,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO processing_log (id, document_id, step_name, status, execution_time_ms,
         details, error_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id.to_string(),
            entry.document_id.to_string(),
            entry.step_name,
            entry.status.as_str(),
            entry.execution_time_ms as i64,
            entry.details,
            entry.error_message,
            entry.created_at.to_string(),
        ],
    )?;
    Ok(())
}

/// Phase log for one document, in execution order.
pub fn get_processing_log(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, step_name, status, execution_time_ms, details,
         error_message, created_at
         FROM processing_log WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![document_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, doc_id, step_name, status, elapsed, details, error_message, created_at) = row?;
        entries.push(ProcessingLogEntry {
            id: parse_uuid(&id)?,
            document_id: parse_uuid(&doc_id)?,
            step_name,
            status: LogStatus::from_str(&status)?,
            execution_time_ms: elapsed.max(0) as u64,
            details,
            error_message,
            created_at: parse_timestamp(&created_at),
        });
    }
    Ok(entries)
}

/// Drop the phase log of a document before it is re-driven.
pub fn clear_processing_log(conn: &Connection, document_id: &Uuid) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM processing_log WHERE document_id = ?1",
        params![document_id.to_string()],
    )?;
    Ok(deleted)
}

fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_document;
    use crate::db::sqlite::open_memory_database;
    use crate::models::DocumentState;

    #[test]
    fn log_entries_round_trip_in_order() {
        let conn = open_memory_database().unwrap();
        let doc = DocumentState::new("/a.png", "a.png");
        insert_document(&conn, &doc).unwrap();

        let first = ProcessingLogEntry::new(doc.id, "quality", LogStatus::Success, 12);
        let mut second = ProcessingLogEntry::new(doc.id, "signature", LogStatus::Skipped, 0);
        second.details = Some("commercial_invoice does not require signatures".into());
        insert_processing_log(&conn, &first).unwrap();
        insert_processing_log(&conn, &second).unwrap();

        let log = get_processing_log(&conn, &doc.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].step_name, "quality");
        assert_eq!(log[1].status, LogStatus::Skipped);
        assert!(log[1].details.as_deref().unwrap().contains("does not require"));
    }

    #[test]
    fn log_requires_existing_document() {
        let conn = open_memory_database().unwrap();
        let orphan = ProcessingLogEntry::new(Uuid::new_v4(), "quality", LogStatus::Success, 1);
        assert!(insert_processing_log(&conn, &orphan).is_err());
    }

    #[test]
    fn clear_removes_only_that_document() {
        let conn = open_memory_database().unwrap();
        let a = DocumentState::new("/a.png", "a.png");
        let b = DocumentState::new("/b.png", "b.png");
        insert_document(&conn, &a).unwrap();
        insert_document(&conn, &b).unwrap();
        insert_processing_log(&conn, &ProcessingLogEntry::new(a.id, "quality", LogStatus::Success, 1)).unwrap();
        insert_processing_log(&conn, &ProcessingLogEntry::new(b.id, "quality", LogStatus::Success, 1)).unwrap();

        assert_eq!(clear_processing_log(&conn, &a.id).unwrap(), 1);
        assert!(get_processing_log(&conn, &a.id).unwrap().is_empty());
        assert_eq!(get_processing_log(&conn, &b.id).unwrap().len(), 1);
    }
}
