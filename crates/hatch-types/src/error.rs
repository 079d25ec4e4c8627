//! Error taxonomy for the runtime.

use thiserror::Error;

use crate::frame::ErrorRecord;

/// Failures while launching or steering a subprocess.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpawnError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, String),
    #[error("process already started")]
    AlreadyStarted,
    #[error("io error: {0}")]
    Io(String),
}

/// Failures on the IPC channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("unsupported message: {0}")]
    Unsupported(String),
}

/// A job's resolved failure.
///
/// `Remote` reconstitutes a structured [`ErrorRecord`] the child wrote to
/// stderr; `Output` wraps raw stderr text when no record was found.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("{kind}: {message}")]
    Remote {
        kind: String,
        message: String,
        trace: Option<String>,
    },
    #[error("{0}")]
    Output(String),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl JobError {
    /// Resolve a failure from accumulated stderr text.
    ///
    /// A decodable [`ErrorRecord`] becomes [`JobError::Remote`]; anything
    /// else is surfaced verbatim as [`JobError::Output`].
    pub fn from_record(record: ErrorRecord) -> Self {
        JobError::Remote {
            kind: record.kind,
            message: record.message,
            trace: record.trace,
        }
    }
}

/// Child-side failures in the worker bootstrap.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("usage: {0}")]
    Usage(String),
    #[error("unknown op: {0}")]
    UnknownOp(String),
    #[error("bad payload: {0}")]
    Decode(String),
    #[error("{0}")]
    Op(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self {
        WorkerError::Io(e.to_string())
    }
}

impl WorkerError {
    /// The record a child writes to stderr for this failure.
    pub fn to_record(&self) -> ErrorRecord {
        let kind = match self {
            WorkerError::Usage(_) => "UsageError",
            WorkerError::UnknownOp(_) => "UnknownOpError",
            WorkerError::Decode(_) => "DecodeError",
            WorkerError::Op(_) => "OpError",
            WorkerError::Io(_) => "IoError",
        };
        ErrorRecord::new(kind, self.to_string())
    }
}
