//! # `wordhist`: concurrent word-histogram engine
//!
//! `wordhist` counts how often each word of a text corpus appears while the
//! corpus is fed, one word at a time, through a paced producer/consumer
//! pipeline. It is the engine behind `wordhist-server`, which runs one
//! [`HistogramJob`] per TCP client and streams the sorted result back.
//!
//! ## Highlights
//!
//! - **Shared corpus**: a [`Corpus`] is tokenized once and shared read-only by
//!   every job; words are zero-copy [`bytes::Bytes`] slices.
//! - **Cyclic sources**: a [`WordSource`] repeats its corpus forever and can be
//!   fast-forwarded by any number of words.
//! - **Single-slot handoff**: producer and consumer meet in a capacity-one
//!   [`slot`], so at most one word is ever in flight.
//! - **Cooperative cancellation**: jobs stop on a
//!   [`tokio_util::sync::CancellationToken`] without losing or double counting
//!   a word.
//! - **Wire codec**: [`wire`] implements the 8-byte request and the
//!   newline-terminated response records for both servers and clients.
//!
//! ## Module Overview
//!
//! - [`corpus`] - Tokenizer and shared corpus.
//! - [`source`] - Cyclic word source.
//! - [`table`] - Frequency table and sorted histogram snapshot.
//! - [`slot`] - Producer/consumer handoff.
//! - [`job`] - Counting job state machine.
//! - [`wire`] - Request/response encoding.
//! - [`error`] - Shared error type.

pub mod corpus;
pub mod error;
pub mod job;
pub mod slot;
pub mod source;
pub mod table;
pub mod wire;

pub use crate::corpus::{Corpus, SEPARATORS, Word};
pub use crate::error::{Error, Result};
pub use crate::job::{DEFAULT_TICK, HistogramJob, JobConfig, JobReport, JobState};
pub use crate::source::WordSource;
pub use crate::table::{FrequencyTable, Histogram};
pub use crate::wire::{Record, Request, Response};
