//! Diagnostic dumps for the synchronous debug run.
//!
//! The orchestrator only dumps when it was given a base directory.
//! `build_orchestrator` resolves one with [`dump_base_dir`]:
//! - `FREIGHTCHECK_DUMP_DIR` set: dumps go there, in any build
//! - otherwise dev builds dump to `{app_data}/diagnostic/`
//! - otherwise disabled
//!
//! Layout:
//! ```text
//! {dump_dir}/{doc_id}/
//!   01-phases.json
//!   02-document.json
//!   03-verdict.json
//!   04-resolution.json
//!   05-ocr-text.txt
//! ```
//!
//! Dump failures are logged at `warn` and never affect the run.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config;

pub const DUMP_DIR_ENV: &str = "FREIGHTCHECK_DUMP_DIR";

const DIAGNOSTIC_SUBDIR: &str = "diagnostic";

/// Base directory for debug-run dumps, or `None` when dumping is off.
pub fn dump_base_dir() -> Option<PathBuf> {
    match std::env::var(DUMP_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Some(PathBuf::from(dir)),
        _ if config::is_dev() => Some(config::app_data_dir().join(DIAGNOSTIC_SUBDIR)),
        _ => None,
    }
}

/// Per-document dump directory.
#[derive(Debug, Clone)]
pub struct DiagnosticDump {
    dir: PathBuf,
}

impl DiagnosticDump {
    /// `None` when the directory cannot be created.
    pub fn under(base: &Path, document_id: &Uuid) -> Option<Self> {
        let dir = base.join(document_id.to_string());
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(Self { dir }),
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Diagnostic dump disabled");
                None
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn json<T: serde::Serialize>(&self, filename: &str, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => self.write(filename, json.as_bytes()),
            Err(e) => tracing::warn!(filename, error = %e, "Diagnostic dump: serialization failed"),
        }
    }

    pub fn text(&self, filename: &str, text: &str) {
        self.write(filename, text.as_bytes());
    }

    fn write(&self, filename: &str, bytes: &[u8]) {
        let path = self.dir.join(filename);
        match std::fs::write(&path, bytes) {
            Ok(()) => tracing::debug!(path = %path.display(), size = bytes.len(), "Diagnostic dump written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Diagnostic dump failed"),
        }
    }
}
