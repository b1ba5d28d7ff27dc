//! crates/tutor_core/src/error.rs
//!
//! The error kinds allowed to cross the core boundary. Pipeline-internal
//! failures (model or vector-store outages) are degraded inside the core and
//! never show up here.

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not authorized")]
    NotAuthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A generation is already running for section {section_id}")]
    GenerationInProgress { section_id: i64 },

    #[error("Service port error: {0}")]
    Port(PortError),
}

impl From<PortError> for CoreError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => Self::NotFound(what),
            PortError::Unauthorized => Self::NotAuthorized,
            other => Self::Port(other),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
