use mailbox_es::{DtoError, HistoryError};
use thiserror::Error;

/// Error enum.
#[derive(Debug, Error)]
pub enum Error {
    /// An IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A stored line could not be converted to an event.
    #[error("line {line}: {source}")]
    Dto {
        /// One-based line number in the file.
        line: usize,
        /// The conversion error.
        source: DtoError,
    },
    /// An event could not be converted to its stored form.
    #[error(transparent)]
    Serialize(DtoError),
    /// Stored events of an aggregate do not form a valid history.
    #[error("corrupt history for {aggregate_key}: {source}")]
    CorruptHistory {
        /// The aggregate whose events are invalid.
        aggregate_key: String,
        /// Why the events are invalid.
        source: HistoryError,
    },
    /// The file lock was poisoned by a panicking writer.
    #[error("could not get file lock")]
    Poisoned,
}
