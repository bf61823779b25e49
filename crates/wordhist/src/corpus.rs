//! Tokenized, read-only text corpus shared by every counting job.
//!
//! A [`Corpus`] is built once from a line-oriented reader and then handed to
//! sessions behind an [`Arc`]. All tokens are slices of a single frozen
//! [`Bytes`] buffer, so handing a word to a job, the slot, or the frequency
//! table is a reference-count bump rather than a copy.

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    ops::Range,
    path::Path,
    sync::Arc,
};

/// A single token: a non-empty, case-sensitive run of non-separator bytes.
pub type Word = Bytes;

/// Bytes that split words. Everything else, including non-ASCII bytes, is part
/// of a word.
pub const SEPARATORS: &[u8] = b" \t\n\r.!,:;?<>()[]{}\\\"|+-*%=^&/";

/// Returns `true` if `byte` separates words.
#[inline]
pub fn is_separator(byte: u8) -> bool {
    SEPARATORS.contains(&byte)
}

/// Ordered, immutable sequence of words.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    words: Vec<Word>,
}

impl Corpus {
    /// Tokenizes every line of `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if reading fails.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut text = BytesMut::new();
        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).map_err(|e| Error::Io {
                context: "failed to read corpus".to_string(),
                source: e,
            })?;
            if read == 0 {
                break;
            }

            for word in line.split(|b| is_separator(*b)).filter(|w| !w.is_empty()) {
                let start = text.len();
                text.extend_from_slice(word);
                spans.push(start..text.len());
            }
        }

        let text = text.freeze();
        let words = spans.into_iter().map(|span| text.slice(span)).collect();
        Ok(Self { words })
    }

    /// Opens and tokenizes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::Io {
            context: format!("cannot open {}", path.display()),
            source: e,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Tokenizes an in-memory string.
    pub fn from_text(text: &str) -> Self {
        // Reading from a byte slice cannot fail.
        Self::from_reader(text.as_bytes()).unwrap_or_default()
    }

    /// Wraps the corpus for sharing across sessions.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the word at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Word> {
        self.words.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Word> {
        self.words.iter()
    }
}
