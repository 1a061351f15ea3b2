//! Background document processing.
//!
//! One blocking task per document. Tasks share only the read-only
//! orchestrator; each opens its own SQLite connection, so no lock is held
//! across documents. Tasks are not cancellable once started.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use rusqlite::Connection;
use uuid::Uuid;

use super::processor::{DebugReport, PipelineOrchestrator, ProcessingError, ProcessingOutcome};
use crate::db::sqlite::open_database;

#[derive(Clone)]
pub struct PipelineService {
    orchestrator: Arc<PipelineOrchestrator>,
    db_path: PathBuf,
}

impl PipelineService {
    /// Opens the database once so migrations run before any task starts.
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, db_path: &Path) -> Result<Self, ProcessingError> {
        open_database(db_path)?;
        Ok(Self {
            orchestrator,
            db_path: db_path.to_path_buf(),
        })
    }

    /// Run `job` on a blocking thread with a fresh connection.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T, ProcessingError>
    where
        T: Send + 'static,
        F: FnOnce(&PipelineOrchestrator, &Connection) -> Result<T, ProcessingError> + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_database(&db_path)?;
            job(&orchestrator, &conn)
        })
        .await
        .map_err(|e| ProcessingError::Task(e.to_string()))?
    }

    pub async fn register(&self, source_path: PathBuf) -> Result<Uuid, ProcessingError> {
        self.run_blocking(move |orchestrator, conn| {
            orchestrator
                .register_document(conn, &source_path)
                .map(|doc| doc.id)
        })
        .await
    }

    /// Process one document on its own task.
    pub async fn submit(&self, document_id: Uuid) -> Result<ProcessingOutcome, ProcessingError> {
        self.run_blocking(move |orchestrator, conn| orchestrator.process(conn, &document_id))
            .await
    }

    /// Process documents in parallel. Results keep the input order; one
    /// document's failure never affects the others.
    pub async fn submit_batch(
        &self,
        document_ids: Vec<Uuid>,
    ) -> Vec<(Uuid, Result<ProcessingOutcome, ProcessingError>)> {
        tracing::info!(count = document_ids.len(), "Submitting batch");
        let tasks = document_ids.iter().map(|id| self.submit(*id));
        let results = join_all(tasks).await;
        document_ids.into_iter().zip(results).collect()
    }

    pub async fn resume(&self, document_id: Uuid) -> Result<ProcessingOutcome, ProcessingError> {
        self.run_blocking(move |orchestrator, conn| orchestrator.resume(conn, &document_id))
            .await
    }

    /// Startup sweep: resume every document a previous process left
    /// `running`. Each resumes on its own task.
    pub async fn resume_interrupted(
        &self,
    ) -> Result<Vec<(Uuid, Result<ProcessingOutcome, ProcessingError>)>, ProcessingError> {
        let ids = self
            .run_blocking(|orchestrator, conn| orchestrator.interrupted(conn))
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = ids.len(), "Resuming interrupted documents");
        let results = join_all(ids.iter().map(|id| self.resume(*id))).await;
        Ok(ids.into_iter().zip(results).collect())
    }

    pub async fn reprocess(&self, document_id: Uuid) -> Result<ProcessingOutcome, ProcessingError> {
        self.run_blocking(move |orchestrator, conn| orchestrator.reprocess(conn, &document_id))
            .await
    }

    pub async fn inspect(&self, document_id: Uuid) -> Result<DebugReport, ProcessingError> {
        self.run_blocking(move |orchestrator, conn| orchestrator.debug_run(conn, &document_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository;
    use crate::models::enums::{DocumentType, LogStatus, PipelineStatus, ValidationStatus};
    use crate::models::ProcessingLogEntry;
    use crate::pipeline::classification::MockClassifier;
    use crate::pipeline::extraction::{ExtractionCoordinator, MockOcrEngine};
    use crate::pipeline::notify::MockNotifier;
    use crate::pipeline::processor::{STEP_EXTRACTION, STEP_QUALITY};
    use crate::pipeline::quality::MockQualityAssessor;
    use crate::pipeline::signature::MockSignatureDetector;
    use crate::pipeline::vision::MockVisionAnalyzer;
    use crate::pipeline_config::{PipelineConfig, RetryPolicy};

    const PACKING_TEXT: &str = "\
PACKING LIST
Order No: ORD-99120
Total Cartons: 48
Gross Weight: 1,920 kg
Destination: Laredo, TX
Packing Date: 04/02/2024";

    fn service(dir: &Path) -> PipelineService {
        let config = PipelineConfig {
            vision_retry: RetryPolicy::immediate(3),
            ..PipelineConfig::default()
        };
        let extraction = ExtractionCoordinator::new(
            Box::new(MockOcrEngine::new(PACKING_TEXT, 0.9)),
            Arc::new(MockVisionAnalyzer::with_text("", 0.0)),
            &config,
        );
        let orchestrator = PipelineOrchestrator::new(
            Box::new(MockQualityAssessor::new(88.0)),
            extraction,
            Box::new(MockClassifier::new(DocumentType::PackingList, 0.9)),
            Arc::new(MockSignatureDetector::new(0)),
            Arc::new(MockNotifier::new()),
            config,
        );
        PipelineService::new(Arc::new(orchestrator), &dir.join("freight.db")).unwrap()
    }

    fn write_scan(dir: &Path, name: &str) -> PathBuf {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat(0u8).take(200));
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn submit_processes_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = svc.register(write_scan(dir.path(), "pack.jpg")).await.unwrap();

        let outcome = svc.submit(id).await.unwrap();

        assert_eq!(outcome.document_id, id);
        assert_eq!(outcome.pipeline_status, PipelineStatus::Completed);
        assert!(outcome.validation_status != ValidationStatus::Pending);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(svc.register(write_scan(dir.path(), &format!("pack-{i}.jpg"))).await.unwrap());
        }
        let bad = dir.path().join("broken.jpg");
        std::fs::write(&bad, b"not an image").unwrap();
        let bad_id = svc.register(bad).await.unwrap();
        ids.insert(2, bad_id);

        let results = svc.submit_batch(ids.clone()).await;

        assert_eq!(results.len(), 5);
        for (id, result) in &results {
            if *id == bad_id {
                assert!(matches!(result, Err(ProcessingError::CorruptInput(_))));
            } else {
                assert!(result.is_ok(), "{id}: {result:?}");
            }
        }
        let returned: Vec<Uuid> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(returned, ids);

        let conn = open_database(&dir.path().join("freight.db")).unwrap();
        let completed =
            repository::get_documents_by_pipeline_status(&conn, PipelineStatus::Completed).unwrap();
        assert_eq!(completed.len(), 4);
    }

    #[tokio::test]
    async fn inspect_does_not_change_stored_record() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let id = svc.register(write_scan(dir.path(), "pack.jpg")).await.unwrap();
        svc.submit(id).await.unwrap();

        let conn = open_database(&dir.path().join("freight.db")).unwrap();
        let before = repository::get_document(&conn, &id).unwrap().unwrap();
        let report = svc.inspect(id).await.unwrap();
        let after = repository::get_document(&conn, &id).unwrap().unwrap();

        assert_eq!(before, after);
        assert_eq!(report.document.document_type, DocumentType::PackingList);
    }

    #[tokio::test]
    async fn sweep_resumes_documents_left_running() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let stuck = svc.register(write_scan(dir.path(), "stuck.jpg")).await.unwrap();
        let waiting = svc.register(write_scan(dir.path(), "waiting.jpg")).await.unwrap();

        // Quality and extraction committed before the previous process died
        {
            let conn = open_database(&dir.path().join("freight.db")).unwrap();
            let mut doc = repository::get_document(&conn, &stuck).unwrap().unwrap();
            doc.pipeline_status = PipelineStatus::Running;
            doc.quality_score = Some(88.0);
            doc.ocr_text = PACKING_TEXT.into();
            repository::update_document(&conn, &doc).unwrap();
            for step in [STEP_QUALITY, STEP_EXTRACTION] {
                let entry = ProcessingLogEntry::new(stuck, step, LogStatus::Success, 5);
                repository::insert_processing_log(&conn, &entry).unwrap();
            }
        }

        let resumed = svc.resume_interrupted().await.unwrap();

        assert_eq!(resumed.len(), 1);
        let (id, result) = &resumed[0];
        assert_eq!(*id, stuck);
        let outcome = result.as_ref().unwrap();
        assert_eq!(outcome.pipeline_status, PipelineStatus::Completed);
        assert_eq!(outcome.phases.len(), 4);

        let conn = open_database(&dir.path().join("freight.db")).unwrap();
        assert_eq!(repository::get_processing_log(&conn, &stuck).unwrap().len(), 6);
        let untouched = repository::get_document(&conn, &waiting).unwrap().unwrap();
        assert_eq!(untouched.pipeline_status, PipelineStatus::Queued);
        assert!(svc.resume_interrupted().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let err = svc.submit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProcessingError::DocumentNotFound(_)));
    }
}
