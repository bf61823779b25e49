use crate::{Corpus, Error, Result, Word};
use std::sync::Arc;

/// Cyclic word stream over a shared [`Corpus`].
///
/// The corpus is treated as an infinitely repeating sequence: once the last
/// word has been returned, the cursor wraps back to the first one. Sources are
/// cheap to create, so each job builds its own over the same `Arc<Corpus>`.
#[derive(Debug, Clone)]
pub struct WordSource {
    corpus: Arc<Corpus>,
    cursor: usize,
}

impl WordSource {
    /// Creates a source positioned at the first word of `corpus`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCorpus`] if the corpus holds no words.
    pub fn new(corpus: Arc<Corpus>) -> Result<Self> {
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        Ok(Self { corpus, cursor: 0 })
    }

    /// Creates a source that has already discarded its first `skip` words.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCorpus`] if the corpus holds no words.
    pub fn with_skip(corpus: Arc<Corpus>, skip: usize) -> Result<Self> {
        let mut source = Self::new(corpus)?;
        source.skip(skip);
        Ok(source)
    }

    /// Discards the next `n` words. Equivalent to calling [`next`] `n` times.
    ///
    /// [`next`]: WordSource::next
    pub fn skip(&mut self, n: usize) {
        let len = self.corpus.len();
        self.cursor = (self.cursor + n % len) % len;
    }

    /// Returns the next word, wrapping to the start after the last one.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Word {
        // The corpus is non-empty and the cursor is always reduced modulo its
        // length, so the index is in bounds.
        let word = self.corpus.get(self.cursor).cloned().unwrap_or_default();
        self.cursor = (self.cursor + 1) % self.corpus.len();
        word
    }

    /// Index of the word the next call to [`next`] will return.
    ///
    /// [`next`]: WordSource::next
    pub const fn position(&self) -> usize {
        self.cursor
    }

    /// Number of distinct positions in one cycle.
    pub fn cycle_len(&self) -> usize {
        self.corpus.len()
    }
}
