use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal pipeline errors. Each variant maps to its own process exit code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to initialise {what}: {reason}")]
    SyncInit { what: &'static str, reason: String },

    #[error("cannot open {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("display geometry query failed: {0}")]
    Geometry(String),

    #[error("cannot allocate {bytes} byte {what} buffer")]
    Alloc { what: &'static str, bytes: usize },

    #[error("capture read failed")]
    Read(#[source] io::Error),

    #[error("display write failed")]
    Write(#[source] io::Error),

    #[error("cannot spawn {unit} thread")]
    Spawn {
        unit: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{unit} unit panicked")]
    UnitPanicked { unit: &'static str },
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SyncInit { .. } => 1,
            Self::Open { .. } => 2,
            Self::Geometry(_) => 3,
            Self::Alloc { .. } => 4,
            Self::Read(_) => 5,
            Self::Write(_) => 6,
            Self::Spawn { .. } => 7,
            Self::UnitPanicked { .. } => 8,
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
