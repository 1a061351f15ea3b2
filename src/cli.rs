//! Command-line surface: clap definitions and command dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::db::{self, repository, DatabaseError};
use crate::models::{DocumentState, ProcessingLogEntry, ReuploadRequest};
use crate::pipeline::background::PipelineService;
use crate::pipeline::processor::{build_orchestrator, ProcessingError};
use crate::pipeline_config::{ConfigError, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "freightcheck")]
#[command(about = "Validates scanned freight paperwork before billing", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Document database (defaults to the app data directory)
    #[arg(long, global = true, env = "FREIGHTCHECK_DB")]
    pub db: Option<PathBuf>,

    /// Pipeline configuration JSON
    #[arg(long, global = true, env = "FREIGHTCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register scans and process them in parallel
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Reset a document and run the full pipeline again
    Reprocess { id: Uuid },

    /// Finish an interrupted run; without an id, every document left running
    Resume { id: Option<Uuid> },

    /// Re-run every phase without saving and print the verdict with timings
    Inspect { id: Uuid },

    /// Print the stored record, its phase log, and re-upload requests
    Show { id: Uuid },

    /// Print the effective pipeline configuration
    Config,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Output encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ProcessLine {
    file: PathBuf,
    document_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<crate::pipeline::processor::ProcessingOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ResumeLine {
    document_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<crate::pipeline::processor::ProcessingOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ShowOutput {
    document: DocumentState,
    processing_log: Vec<ProcessingLogEntry>,
    reupload_requests: Vec<ReuploadRequest>,
}

impl Cli {
    fn db_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(config::default_db_path)
    }

    fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(config::default_pipeline_config_path);
        PipelineConfig::resolve(Some(&path))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the parsed command to completion.
pub fn execute(cli: Cli) -> Result<(), CliError> {
    let pipeline_config = cli.pipeline_config()?;
    let db_path = cli.db_path();
    tracing::debug!(db = %db_path.display(), command = ?cli.command, "Executing command");

    match &cli.command {
        Commands::Config => print_json(&pipeline_config),
        Commands::Show { id } => show(&db_path, id),
        Commands::Inspect { id } => {
            let orchestrator = build_orchestrator(&pipeline_config)?;
            let conn = db::open_database(&db_path)?;
            let report = orchestrator.debug_run(&conn, id)?;
            print_json(&report)
        }
        Commands::Reprocess { id } => {
            let service = service(&pipeline_config, &db_path)?;
            let outcome = runtime()?.block_on(service.reprocess(*id))?;
            print_json(&outcome)
        }
        Commands::Resume { id: Some(id) } => {
            let service = service(&pipeline_config, &db_path)?;
            let outcome = runtime()?.block_on(service.resume(*id))?;
            print_json(&outcome)
        }
        Commands::Resume { id: None } => {
            let service = service(&pipeline_config, &db_path)?;
            let lines = runtime()?.block_on(resume_interrupted(&service))?;
            print_json(&lines)
        }
        Commands::Process { files } => {
            let service = service(&pipeline_config, &db_path)?;
            let runtime = runtime()?;
            // Finish whatever a killed run left behind before taking new work
            let resumed = runtime.block_on(resume_interrupted(&service))?;
            for line in resumed.iter().filter(|l| l.error.is_some()) {
                tracing::warn!(document_id = %line.document_id, error = ?line.error, "Resume failed");
            }
            let lines = runtime.block_on(process_files(&service, files));
            print_json(&lines)
        }
    }
}

fn service(config: &PipelineConfig, db_path: &Path) -> Result<PipelineService, CliError> {
    let orchestrator = Arc::new(build_orchestrator(config)?);
    Ok(PipelineService::new(orchestrator, db_path)?)
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}

async fn resume_interrupted(service: &PipelineService) -> Result<Vec<ResumeLine>, CliError> {
    let results = service.resume_interrupted().await?;
    Ok(results
        .into_iter()
        .map(|(document_id, result)| match result {
            Ok(outcome) => ResumeLine {
                document_id,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => ResumeLine {
                document_id,
                outcome: None,
                error: Some(e.to_string()),
            },
        })
        .collect())
}

async fn process_files(service: &PipelineService, files: &[PathBuf]) -> Vec<ProcessLine> {
    let mut lines = Vec::new();
    let mut registered = Vec::new();
    for file in files {
        match service.register(file.clone()).await {
            Ok(id) => registered.push((file.clone(), id)),
            Err(e) => lines.push(ProcessLine {
                file: file.clone(),
                document_id: None,
                outcome: None,
                error: Some(e.to_string()),
            }),
        }
    }

    let ids = registered.iter().map(|(_, id)| *id).collect();
    let results = service.submit_batch(ids).await;
    for ((file, _), (id, result)) in registered.into_iter().zip(results) {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => (None, Some(e.to_string())),
        };
        lines.push(ProcessLine {
            file,
            document_id: Some(id),
            outcome,
            error,
        });
    }
    lines
}

fn show(db_path: &Path, id: &Uuid) -> Result<(), CliError> {
    let conn = db::open_database(db_path)?;
    let document = repository::get_document(&conn, id)?
        .ok_or(ProcessingError::DocumentNotFound(*id))?;
    print_json(&ShowOutput {
        processing_log: repository::get_processing_log(&conn, id)?,
        reupload_requests: repository::get_reupload_requests(&conn, id)?,
        document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_process_with_globals() {
        let cli = Cli::parse_from([
            "freightcheck",
            "process",
            "a.png",
            "b.jpg",
            "--db",
            "/tmp/f.db",
        ]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/f.db")));
        match cli.command {
            Commands::Process { files } => assert_eq!(files.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn process_requires_files() {
        assert!(Cli::try_parse_from(["freightcheck", "process"]).is_err());
    }

    #[test]
    fn ids_must_be_uuids() {
        assert!(Cli::try_parse_from(["freightcheck", "show", "not-a-uuid"]).is_err());
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["freightcheck", "inspect", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::Inspect { id: parsed } if parsed == id));
    }

    #[test]
    fn resume_id_is_optional() {
        let cli = Cli::try_parse_from(["freightcheck", "resume"]).unwrap();
        assert!(matches!(cli.command, Commands::Resume { id: None }));
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["freightcheck", "resume", &id.to_string()]).unwrap();
        assert!(matches!(cli.command, Commands::Resume { id: Some(parsed) } if parsed == id));
    }

    #[test]
    fn show_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let err = show(&dir.path().join("f.db"), &Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            CliError::Processing(ProcessingError::DocumentNotFound(_))
        ));
    }
}
