//! Ingestion Pipeline
//!
//! Entry point for data producers (OBD2 adapters). See [`IngestPipeline`].

pub mod pipeline;

pub use pipeline::{
    sanitize_parameters, validate_session_id, Accepted, BatchError, BatchOutcome, IngestPipeline,
    MAX_BATCH_SIZE, MAX_PARAMETER_NAME_LEN, MAX_SESSION_ID_LEN,
};
