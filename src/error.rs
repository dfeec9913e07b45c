//! Error taxonomy for the extract, normalize and load stages.
//!
//! Row-level problems (malformed CSV lines, rows missing required fields)
//! never show up here: the normalizer absorbs them and only reports counts.
//! Everything in this module terminates a run.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("export request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("export request could not be completed")]
    Transport(#[from] reqwest::Error),
    #[error("export body could not be decoded: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Transport(err) => err.status(),
            FetchError::Decode(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to connect to the database")]
    Connect(#[source] sqlx::Error),
    #[error("statement failed: {statement}")]
    Statement {
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("insert of row {row} failed")]
    Insert {
        row: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("row {row}: value '{value}' in column '{column}' is not a valid {expected}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: &'static str,
        value: String,
    },
    #[error("failed to commit the load transaction")]
    Commit(#[source] sqlx::Error),
    #[error("failed to close the database connection")]
    Close(#[source] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("PG_PORT '{value}' is not a valid port number")]
    InvalidPort { value: String },
    #[error("failed to read env file {path:?}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("export could not be parsed as CSV")]
    Parse(#[from] csv::Error),
    #[error("export contained no usable rows ({malformed} malformed line(s) skipped)")]
    NoUsableRows { malformed: usize },
    #[error("required column '{column}' is not present in the export")]
    MissingRequiredColumn { column: String },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to read export file {path:?}: {message}")]
    Read { path: PathBuf, message: String },
}
