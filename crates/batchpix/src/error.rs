use thiserror::Error;

use crate::job::JobState;

#[derive(Error, Debug)]
pub enum BatchpixError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Batch-level validation errors. Any of these rejects the whole submission
/// before a single task is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Too many files: {count} submitted, limit is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("File '{name}' is too large: {size} bytes, limit is {max}")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("No valid files in submission")]
    NoValidFiles,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Primary codec failed: {0}")]
    Primary(String),

    #[error("Primary codec produced no output")]
    EmptyOutput,

    #[error("Failed to decode fallback image: {0}")]
    FallbackDecode(String),

    #[error("Failed to encode target image: {0}")]
    TargetEncode(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to write archive entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to finalize archive: {0}")]
    Finalize(#[from] zip::result::ZipError),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Operation '{operation}' is not valid in state '{state}'")]
    InvalidState {
        operation: &'static str,
        state: JobState,
    },

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Batch was cancelled")]
    Cancelled,

    #[error("All {failed} conversions failed")]
    AllConversionsFailed { failed: usize },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

pub type Result<T> = std::result::Result<T, BatchpixError>;
