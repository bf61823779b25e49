//! Error types for the word-histogram engine and its wire protocol.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a counting job or a client session can hit. All of them are terminal to the
//! unit of work they occur in: a failed session never escalates to the server
//! and nothing is retried.
//!
//! ## Error Cases
//! - `EmptyCorpus`: A word source was built over a corpus with no tokens.
//! - `MalformedRequest`: The peer closed before sending a full request.
//! - `InvalidRequest`: The request decoded but carried out-of-range values.
//! - `Transport`: Reading from or writing to the connection failed.
//! - `TaskFailed`: A producer or consumer task panicked or was aborted.
//! - `Io`: Loading the corpus from disk failed.

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the histogram engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The corpus yields no tokens, even after wrapping once.
    #[error("Corpus contains no words")]
    EmptyCorpus,

    /// The peer sent fewer than the 8 request bytes before closing.
    #[error("Malformed request: received {received} of 8 bytes")]
    MalformedRequest { received: usize },

    /// The request was well-formed but its values are not acceptable.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The connection failed while reading or writing.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// A job task did not run to completion.
    #[error("{task} task failed: {reason}")]
    TaskFailed { task: &'static str, reason: String },

    /// Reading the corpus source failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Whether the peer should still receive an error record and sentinel.
    ///
    /// Transport and malformed-request failures mean the peer is gone or never
    /// finished talking, so nothing more is written.
    pub const fn is_reportable(&self) -> bool {
        matches!(
            self,
            Self::EmptyCorpus | Self::InvalidRequest { .. } | Self::TaskFailed { .. }
        )
    }
}
