//! One client conversation.
//!
//! A [`ClientSession`] owns an accepted connection for its whole life: it
//! reads the 8-byte request, runs a [`HistogramJob`] for the requested number
//! of seconds, streams the sorted histogram and the sentinel, then closes its
//! write half. Nothing is shared with other sessions except the read-only
//! corpus.

use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use wordhist::{Corpus, DEFAULT_TICK, HistogramJob, JobConfig, Request, Result, wire};

/// Settings applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Pause between two words fed to the session's counter.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { tick: DEFAULT_TICK }
    }
}

impl SessionConfig {
    pub const fn job_config(&self) -> JobConfig {
        JobConfig { tick: self.tick }
    }
}

/// What a finished session did, for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub request: Request,
    /// Records streamed, not counting the sentinel.
    pub distinct_words: usize,
    /// Sum of all streamed counts.
    pub total_count: u64,
    /// Words the producer placed.
    pub produced: u64,
    pub bytes_written: usize,
    pub elapsed: Duration,
    /// Whether server shutdown cut the counting window short.
    pub interrupted: bool,
}

pub struct ClientSession<IO> {
    id: u64,
    stream: IO,
    corpus: Arc<Corpus>,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl<IO> ClientSession<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an accepted connection.
    ///
    /// Cancelling `shutdown` interrupts the counting window; the session then
    /// answers with whatever it counted so far.
    pub fn new(
        id: u64,
        stream: IO,
        corpus: Arc<Corpus>,
        config: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            stream,
            corpus,
            config,
            shutdown,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Serves the connection to completion and closes it.
    ///
    /// Empty corpus, invalid requests and failed job tasks are answered with
    /// the error record and the sentinel before the error is returned. A
    /// short request or a broken connection gets no answer at all.
    ///
    /// # Errors
    ///
    /// Returns the [`wordhist::Error`] that ended the session.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let started = Instant::now();

        #[cfg(feature = "tracing")]
        tracing::info!("Session {} starting", self.id);

        let outcome = self.serve(started).await;

        if let Err(e) = &outcome {
            if e.is_reportable() {
                if let Err(_write_err) = wire::write_failure(&mut self.stream).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Could not report failure to peer: {}", _write_err);
                }
            }
        }

        if let Err(_e) = self.stream.shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Closing connection failed: {}", _e);
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Session {} quitting", self.id);

        outcome
    }

    async fn serve(&mut self, started: Instant) -> Result<SessionSummary> {
        let request = wire::read_request(&mut self.stream).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            offset = request.start_offset,
            duration = request.duration_secs,
            "Session {} received request",
            self.id
        );

        let job = HistogramJob::from_corpus(
            Arc::clone(&self.corpus),
            request.skip(),
            self.config.job_config(),
            self.shutdown.child_token(),
        )?;
        let report = job.run_for(request.duration()).await?;
        let interrupted = self.shutdown.is_cancelled();

        let bytes_written = wire::write_histogram(&mut self.stream, &report.histogram).await?;

        Ok(SessionSummary {
            request,
            distinct_words: report.histogram.len(),
            total_count: report.histogram.total(),
            produced: report.produced,
            bytes_written,
            elapsed: started.elapsed(),
            interrupted,
        })
    }
}
