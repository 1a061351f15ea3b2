pub mod background;
pub mod classification;
pub mod diagnostic; // Debug-run artifact dumps (auto in dev, FREIGHTCHECK_DUMP_DIR in prod)
pub mod extraction;
pub mod fields;
pub mod notify;
pub mod ollama;
pub mod processor; // Pipeline Orchestrator
pub mod quality;
pub mod signature;
pub mod status;
pub mod validation;
pub mod vision;
