//! Post-execution pipeline run records and the metadata-store reader
//! contract.
//!
//! The stack store never writes these records; they are produced by
//! execution engines and read back through the metadata-store component
//! of an assembled stack.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Lifecycle state of one recorded pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<RunStatus> {
        match value {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of one recorded pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunView {
    pub pipeline_name: String,
    pub run_name: String,
    pub status: RunStatus,
    /// Unix epoch milliseconds; `None` while the run is still in flight.
    pub finished_at_ms: Option<i64>,
}

/// Errors raised while reading post-execution records.
#[derive(Debug)]
pub enum MetadataError {
    Sqlite(rusqlite::Error),
    /// A persisted record failed to decode.
    Corrupt(String),
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Corrupt(message) => write!(f, "corrupt pipeline run record: {message}"),
        }
    }
}

impl Error for MetadataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Corrupt(_) => None,
        }
    }
}

impl From<rusqlite::Error> for MetadataError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Collaborator contract exposed by metadata-store components that can
/// serve post-execution records.
pub trait MetadataReader {
    /// All recorded runs, newest first.
    fn pipeline_runs(&self) -> Result<Vec<PipelineRunView>, MetadataError>;

    /// One run by name, or `None` when no such run was recorded.
    fn pipeline_run(&self, run_name: &str) -> Result<Option<PipelineRunView>, MetadataError>;
}
