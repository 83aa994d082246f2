//! Engine-wide error taxonomy (§7, §9)
//!
//! Per the propagation policy, these errors surface only at setup/load/export
//! boundaries. The frame-driven orchestrator APIs never return `Result` —
//! failures there are translated into silence plus a log event instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("native backend error: {0}")]
    Backend(String),

    #[error("failed to load stream '{path}': {reason}")]
    StreamLoad { path: String, reason: String },

    #[error("invalid clip duration: {0}")]
    InvalidDuration(f64),

    #[error("export already in progress")]
    ExportInProgress,

    #[error("export I/O error: {0}")]
    ExportIo(#[from] std::io::Error),

    #[error("invalid export time range")]
    InvalidExportRange,

    #[error("config error at '{key}': {reason}")]
    Config { key: String, reason: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
