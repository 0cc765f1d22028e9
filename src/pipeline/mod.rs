pub mod ingestion;
pub mod orchestrator;
pub mod processing;
