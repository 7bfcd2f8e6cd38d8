use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZapataError>;

/// Exit code of a malformed command line, distinct from every error class
pub const USAGE_EXIT_CODE: i32 = 64;

#[derive(Error, Debug)]
pub enum ZapataError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mesh parse error: {0}")]
    Parse(String),

    #[error("Mesher error: {0}")]
    Mesher(String),

    #[error("Translation error: {0}")]
    Translation(String),
}

impl ZapataError {
    /// Wraps an `std::io::Error` with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ZapataError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code reported by the binary for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            ZapataError::Configuration(_) => 2,
            ZapataError::Validation(_) => 3,
            ZapataError::Io { .. } | ZapataError::Parse(_) => 4,
            ZapataError::Mesher(_) => 5,
            ZapataError::Translation(_) => 70,
        }
    }
}
