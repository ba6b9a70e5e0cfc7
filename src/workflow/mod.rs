//! Workflow module - drives one uploaded file through Design Automation
//!
//! Structure:
//! - `engine`: closed table of supported engines and their activity templates
//! - `provision`: idempotent app bundle / activity provisioning
//! - `job`: work item input parsing and argument binding
//! - `submit`: synchronous part of a work item submission
//! - `monitor`: background polling of a submitted work item
//! - `translate`: viewer translation of a produced output
//! - `supervisor`: ownership of spawned background tasks

pub mod engine;
pub mod job;
pub mod monitor;
pub mod provision;
pub mod submit;
pub mod supervisor;
pub mod translate;

use std::time::Duration;
use thiserror::Error;

use crate::aps::ApsError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid engine '{0}'")]
    UnknownEngine(String),
    #[error(
        "There are already resources associated with this clientId or nickname '{0}' is in use. Please use a different clientId or nickname."
    )]
    NicknameConflict(String),
    #[error("These credentials already own nickname '{actual}', expected '{expected}'")]
    NicknameMismatch { expected: String, actual: String },
    #[error("Translation of {urn} did not complete within {timeout:?}")]
    TranslationTimeout { urn: String, timeout: Duration },
    #[error("Work item {0} finished without a report")]
    MissingReport(String),
    #[error(transparent)]
    Remote(#[from] ApsError),
    #[error("Local file operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode work item status: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation(message.into())
    }
}
