//! Error taxonomy for the workspace core

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Generic configuration problem detected before any scheduling.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicate package name '{name}' at {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Could not resolve git ref '{0}'")]
    UnresolvableRef(String),

    /// A git operation failed while computing changes.
    #[error("Failed to detect changes since {baseline}: {source}")]
    ChangeDetection {
        baseline: String,
        #[source]
        source: git2::Error,
    },

    #[error("Invalid manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// A package script exited unsuccessfully; signals are reported as code 1.
    #[error("Received non-zero exit code {exit_code} during execution of '{package}'")]
    TaskExecution { package: String, exit_code: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn glob(pattern: &str, source: glob::PatternError) -> Self {
        Error::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        }
    }
}
