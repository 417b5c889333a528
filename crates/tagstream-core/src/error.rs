//! Failure kinds for pipeline processing.
//!
//! `EndOfProcessing` is a *non-error* termination signal: a processor may
//! deliberately stop the run early (stop-with-success, histogram
//! stop-on-overflow), and the outer driver treats it as normal completion.
//! Every other variant is a genuine failure.

use thiserror::Error;

/// Error type returned by processor `handle`/`flush`/`pump` operations.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Deliberate early termination; treated as success by drivers.
    #[error("end of processing: {0}")]
    EndOfProcessing(String),

    /// The producer side of a buffer halted without flushing.
    #[error("source halted without flushing")]
    SourceHalted,

    /// A histogram bin would exceed its configured maximum with no
    /// applicable recovery.
    #[error("histogram overflow: {0}")]
    HistogramOverflow(String),

    /// A bounded buffer (merge fabric) exceeded its capacity.
    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    /// An event arrived outside the tolerated reordering window.
    #[error("out of order: {0}")]
    OutOfOrder(String),

    /// Malformed input data (for example, trailing bytes smaller than one
    /// record at end of stream).
    #[error("format error: {0}")]
    Format(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stop-with-error wrapper observed an event from its error set.
    #[error("{0}")]
    Stopped(String),
}

impl ProcessingError {
    /// Whether this is the non-error end-of-processing signal.
    pub fn is_end_of_processing(&self) -> bool {
        matches!(self, ProcessingError::EndOfProcessing(_))
    }
}

/// Shorthand result for processor operations.
pub type Result<T = ()> = std::result::Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_processing_is_not_an_error_kind() {
        assert!(ProcessingError::EndOfProcessing("done".into()).is_end_of_processing());
        assert!(!ProcessingError::SourceHalted.is_end_of_processing());
    }

    #[test]
    fn display_includes_message() {
        let e = ProcessingError::HistogramOverflow("bin 3".into());
        assert!(e.to_string().contains("bin 3"));
    }
}
