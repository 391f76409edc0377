/// Error Module
///
/// Every failure the ingester can hit while fetching, decoding, draining, or persisting a
/// ledger. Each error maps to an [`ErrorKind`] so the scheduler can decide between
/// retrying the ledger and halting the run without inspecting message text.
use std::time::Duration;

use thiserror::Error;

use crate::verify::StateError;

/// Failure talking to the ledger backend. Always transient from the ingester's view.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}")]
    Status { status: u16 },

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("ledger sequence {0} is outside the backend's range")]
    SequenceOutOfRange(i64),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("ledger {sequence} not found")]
    NotFound { sequence: u32 },

    #[error("could not fetch ledger {sequence}: {source}")]
    Backend {
        sequence: u32,
        #[source]
        source: BackendError,
    },

    #[error("could not decode ledger {sequence}: {reason}")]
    Decode { sequence: u32, reason: String },

    #[error("ledger reader is closed")]
    Closed,
}

/// Failure from the history store. Passed through opaquely and treated as transient.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("could not encode ledger header: {0}")]
    Encode(#[from] bincode::Error),

    #[error("{column} value {value} does not fit in its column")]
    OutOfRange { column: &'static str, value: u64 },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct WriterError(pub String);

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("could not close ledger reader: {0}")]
    Reader(#[source] ReaderError),

    #[error("could not close ledger writer: {0}")]
    Writer(#[source] WriterError),
}

/// Coarse classification attached to every [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Backend,
    Decode,
    Storage,
    Downstream,
    State,
    Cleanup,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Backend => write!(f, "Backend"),
            ErrorKind::Decode => write!(f, "Decode"),
            ErrorKind::Storage => write!(f, "Storage"),
            ErrorKind::Downstream => write!(f, "Downstream"),
            ErrorKind::State => write!(f, "State"),
            ErrorKind::Cleanup => write!(f, "Cleanup"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Error returned from processing a single ledger.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("could not write ledger transaction: {0}")]
    Writer(#[from] WriterError),

    #[error("Could not insert ledger: {0}")]
    Insert(#[source] StorageError),

    #[error("Could not load previous ledger hash: {0}")]
    PreviousLedger(#[source] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("ledger processing cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Reader(ReaderError::NotFound { .. }) => ErrorKind::NotFound,
            IngestError::Reader(ReaderError::Backend { .. }) => ErrorKind::Backend,
            IngestError::Reader(ReaderError::Decode { .. }) => ErrorKind::Decode,
            IngestError::Reader(ReaderError::Closed) | IngestError::Writer(_) => ErrorKind::Downstream,
            IngestError::Insert(_) | IngestError::PreviousLedger(_) => ErrorKind::Storage,
            IngestError::State(_) => ErrorKind::State,
            IngestError::Cleanup(_) => ErrorKind::Cleanup,
            IngestError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Only state errors are withheld from retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::State
    }

    pub fn state_error(&self) -> Option<&StateError> {
        match self {
            IngestError::State(err) => Some(err),
            _ => None,
        }
    }
}
