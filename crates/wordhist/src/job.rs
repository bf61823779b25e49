//! A single counting session: paced producer, draining consumer.
//!
//! A [`HistogramJob`] moves through `Created → Running → Cancelling →
//! Finalized`. Starting it spawns two tokio tasks that share nothing but a
//! [`slot`](crate::slot) and a [`CancellationToken`]:
//!
//! - the **producer** waits one pacing tick, waits for the slot to be empty,
//!   pulls the next word from its [`WordSource`] and places it;
//! - the **consumer** takes each word out of the slot and records it in its
//!   own [`FrequencyTable`].
//!
//! Cancellation is cooperative. Once the token fires, the producer stops
//! before fetching another word and the consumer drains whatever is still in
//! the slot, so the final [`Histogram`] holds exactly the words that were
//! placed. The job token may be a child of a wider token (for example the
//! server's shutdown token), in which case cancelling the parent also cancels
//! the job.

use crate::{
    Corpus, Error, FrequencyTable, Histogram, Result, Word, WordSource,
    slot::{self, Placement, SlotReceiver, SlotSender},
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    task::{JoinError, JoinHandle},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Default producer pacing: one word per second.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Tunables for a [`HistogramJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfig {
    /// Interval between words placed by the producer. Zero disables pacing.
    pub tick: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { tick: DEFAULT_TICK }
    }
}

/// Lifecycle of a [`HistogramJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Source and table exist; no task has been spawned.
    Created,
    /// Producer and consumer are running.
    Running,
    /// Cancellation has been requested; tasks are winding down.
    Cancelling,
    /// Both tasks have finished and the histogram has been taken.
    Finalized,
}

/// Result of a finalized job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Every word the consumer recorded, ascending.
    pub histogram: Histogram,
    /// Number of words the producer placed in the slot.
    pub produced: u64,
}

struct JobTasks {
    producer: JoinHandle<u64>,
    consumer: JoinHandle<FrequencyTable>,
}

/// One producer/consumer counting session over a [`WordSource`].
pub struct HistogramJob {
    state: JobState,
    source: Option<WordSource>,
    config: JobConfig,
    token: CancellationToken,
    tasks: Option<JobTasks>,
}

impl HistogramJob {
    /// Creates a job with its own cancellation token.
    pub fn new(source: WordSource, config: JobConfig) -> Self {
        Self::with_token(source, config, CancellationToken::new())
    }

    /// Creates a job driven by `token`.
    ///
    /// Pass a child token (`parent.child_token()`) to have the job cancelled
    /// together with a wider scope.
    pub fn with_token(source: WordSource, config: JobConfig, token: CancellationToken) -> Self {
        Self {
            state: JobState::Created,
            source: Some(source),
            config,
            token,
            tasks: None,
        }
    }

    /// Builds the source for `corpus` skipped by `skip` words and wraps it in
    /// a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCorpus`] before anything is spawned if the corpus
    /// holds no words.
    pub fn from_corpus(
        corpus: Arc<Corpus>,
        skip: usize,
        config: JobConfig,
        token: CancellationToken,
    ) -> Result<Self> {
        let source = WordSource::with_skip(corpus, skip)?;
        Ok(Self::with_token(source, config, token))
    }

    /// Current lifecycle state.
    ///
    /// A running job whose token was cancelled from outside reports
    /// [`JobState::Cancelling`].
    pub fn state(&self) -> JobState {
        match self.state {
            JobState::Running if self.token.is_cancelled() => JobState::Cancelling,
            state => state,
        }
    }

    pub const fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Token that cancels this job.
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawns the producer and consumer tasks.
    ///
    /// Only has an effect in [`JobState::Created`]; a job cancelled before it
    /// was started never spawns anything. Must be called from within a tokio
    /// runtime.
    pub fn start(&mut self) {
        if self.state != JobState::Created || self.token.is_cancelled() {
            return;
        }
        let Some(source) = self.source.take() else {
            return;
        };

        let (tx, rx) = slot::handoff(self.token.clone());
        self.tasks = Some(JobTasks {
            producer: tokio::spawn(produce(source, tx, self.config.tick)),
            consumer: tokio::spawn(consume(rx)),
        });
        self.state = JobState::Running;

        #[cfg(feature = "tracing")]
        tracing::debug!(tick = ?self.config.tick, "histogram job started");
    }

    /// Requests cancellation. Safe to call any number of times.
    pub fn cancel(&mut self) {
        self.token.cancel();
        if matches!(self.state, JobState::Created | JobState::Running) {
            self.state = JobState::Cancelling;
        }
    }

    /// Cancels the job, waits for both tasks and returns the sorted result.
    ///
    /// A job that never started (or was cancelled before producing anything)
    /// finalizes to an empty histogram.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the producer or consumer panicked.
    pub async fn finish(mut self) -> Result<JobReport> {
        self.cancel();

        let Some(JobTasks { producer, consumer }) = self.tasks.take() else {
            self.state = JobState::Finalized;
            return Ok(JobReport::default());
        };

        let (produced, table) = tokio::join!(producer, consumer);
        self.state = JobState::Finalized;

        let produced = produced.map_err(|e| task_failed("producer", &e))?;
        let table = table.map_err(|e| task_failed("consumer", &e))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            produced,
            distinct = table.len(),
            "histogram job finalized"
        );

        Ok(JobReport {
            histogram: table.snapshot_sorted(),
            produced,
        })
    }

    /// Starts the job, lets it run for `duration` (or until its token is
    /// cancelled from outside, whichever comes first) and finalizes it.
    ///
    /// # Errors
    ///
    /// See [`HistogramJob::finish`].
    pub async fn run_for(mut self, duration: Duration) -> Result<JobReport> {
        self.start();
        tokio::select! {
            () = time::sleep(duration) => {}
            () = self.token.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("histogram job interrupted before its deadline");
            }
        }
        self.finish().await
    }
}

impl Drop for HistogramJob {
    fn drop(&mut self) {
        // Never leave detached tasks running for an abandoned job.
        self.token.cancel();
    }
}

fn task_failed(task: &'static str, err: &JoinError) -> Error {
    Error::TaskFailed {
        task,
        reason: err.to_string(),
    }
}

async fn produce(mut source: WordSource, slot: SlotSender<Word>, tick: Duration) -> u64 {
    let mut pacer = (!tick.is_zero()).then(|| {
        let mut interval = time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut placed = 0_u64;

    loop {
        if let Some(pacer) = pacer.as_mut() {
            tokio::select! {
                biased;
                () = slot.cancelled() => break,
                _ = pacer.tick() => {}
            }
        }

        match slot.place_with(|| source.next()).await {
            Placement::Placed => placed += 1,
            Placement::Cancelled | Placement::Closed => break,
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(placed, position = source.position(), "producer stopped");

    placed
}

async fn consume(mut slot: SlotReceiver<Word>) -> FrequencyTable {
    let mut table = FrequencyTable::new();

    while let Some(word) = slot.take().await {
        table.record_occurrence(word);
    }
    let _drained = slot.drain(|word| table.record_occurrence(word)).await;

    #[cfg(feature = "tracing")]
    tracing::trace!(drained = _drained, distinct = table.len(), "consumer stopped");

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn corpus(text: &str) -> Arc<Corpus> {
        Corpus::from_text(text).into_shared()
    }

    fn entries(report: &JobReport) -> Vec<(String, u32)> {
        report
            .histogram
            .iter()
            .map(|(w, c)| (String::from_utf8_lossy(w).into_owned(), c))
            .collect()
    }

    fn paced(tick_ms: u64) -> JobConfig {
        JobConfig {
            tick: Duration::from_millis(tick_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counts_whole_corpus_in_order() {
        let job = HistogramJob::from_corpus(
            corpus("the quick the fox"),
            0,
            paced(900),
            CancellationToken::new(),
        )
        .unwrap();

        // Words land at 0.9s, 1.8s, 2.7s and 3.6s; the next would be 4.5s.
        let report = job.run_for(Duration::from_secs(4)).await.unwrap();
        assert_eq!(report.produced, 4);
        assert_eq!(
            entries(&report),
            vec![
                ("fox".to_string(), 1),
                ("quick".to_string(), 1),
                ("the".to_string(), 2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skip_starts_at_offset() {
        let job = HistogramJob::from_corpus(
            corpus("the quick the fox"),
            2,
            paced(1_000),
            CancellationToken::new(),
        )
        .unwrap();

        let report = job.run_for(Duration::from_millis(2_500)).await.unwrap();
        assert_eq!(report.produced, 2);
        assert_eq!(
            entries(&report),
            vec![("fox".to_string(), 1), ("the".to_string(), 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wraps_around_the_corpus() {
        let job = HistogramJob::from_corpus(
            corpus("a b"),
            1,
            paced(1_000),
            CancellationToken::new(),
        )
        .unwrap();

        // b a b a b
        let report = job.run_for(Duration::from_millis(5_500)).await.unwrap();
        assert_eq!(
            entries(&report),
            vec![("a".to_string(), 2), ("b".to_string(), 3)]
        );
    }

    #[test]
    fn empty_corpus_fails_before_start() {
        let result = HistogramJob::from_corpus(
            corpus(""),
            0,
            JobConfig::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::EmptyCorpus)));
    }

    #[tokio::test]
    async fn cancelled_before_first_word_is_empty() {
        let source = WordSource::new(corpus("never counted")).unwrap();
        let mut job = HistogramJob::new(source, JobConfig::default());
        job.start();
        assert_eq!(job.state(), JobState::Running);

        job.cancel();
        job.cancel();
        assert_eq!(job.state(), JobState::Cancelling);

        let report = job.finish().await.unwrap();
        assert!(report.histogram.is_empty());
        assert_eq!(report.produced, 0);
    }

    #[tokio::test]
    async fn finishing_an_unstarted_job_is_empty() {
        let source = WordSource::new(corpus("idle")).unwrap();
        let job = HistogramJob::new(source, JobConfig::default());
        assert_eq!(job.state(), JobState::Created);
        assert_eq!(job.finish().await.unwrap(), JobReport::default());
    }

    #[tokio::test]
    async fn start_after_cancel_spawns_nothing() {
        let source = WordSource::new(corpus("idle")).unwrap();
        let mut job = HistogramJob::new(source, paced(0));
        job.cancel();
        job.start();
        assert_eq!(job.state(), JobState::Cancelling);
        assert_eq!(job.finish().await.unwrap().produced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_token_interrupts_run() {
        let parent = CancellationToken::new();
        let job = HistogramJob::from_corpus(
            corpus("x y z"),
            0,
            paced(1_000),
            parent.child_token(),
        )
        .unwrap();

        let canceller = {
            let parent = parent.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(2_500)).await;
                parent.cancel();
            })
        };

        let started = Instant::now();
        let report = job.run_for(Duration::from_secs(3_600)).await.unwrap();
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report.produced, 2);
        assert_eq!(report.histogram.total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_through_the_job_token() {
        let source = WordSource::new(corpus("w")).unwrap();
        let mut job = HistogramJob::new(source, paced(250));
        assert_eq!(job.config().tick, Duration::from_millis(250));

        let token = job.cancellation_token().clone();
        job.start();
        assert_eq!(job.state(), JobState::Running);
        token.cancel();
        assert_eq!(job.state(), JobState::Cancelling);
        assert!(job.cancellation_token().is_cancelled());
        assert_eq!(job.finish().await.unwrap().produced, 0);
    }

    #[tokio::test]
    async fn external_cancel_is_reported_as_cancelling() {
        let token = CancellationToken::new();
        let source = WordSource::new(corpus("w")).unwrap();
        let mut job = HistogramJob::with_token(source, JobConfig::default(), token.clone());
        job.start();
        token.cancel();
        assert_eq!(job.state(), JobState::Cancelling);
        assert!(job.finish().await.is_ok());
    }

    /// Cancels unpaced jobs at random moments and checks that the consumer
    /// recorded exactly the words the producer placed, in cyclic order.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn random_cancellation_never_loses_or_duplicates() {
        const WORDS: usize = 7;
        let text = (0..WORDS)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let shared = corpus(&text);
        let mut rng = SmallRng::seed_from_u64(0x5EED);

        for round in 0..200 {
            let skip = rng.random_range(0..WORDS * 3);
            let mut job = HistogramJob::from_corpus(
                Arc::clone(&shared),
                skip,
                paced(0),
                CancellationToken::new(),
            )
            .unwrap();
            job.start();

            match rng.random_range(0..3) {
                0 => {}
                1 => {
                    for _ in 0..rng.random_range(0..64) {
                        tokio::task::yield_now().await;
                    }
                }
                _ => time::sleep(Duration::from_micros(rng.random_range(0..500))).await,
            }

            let report = job.finish().await.unwrap();
            let produced = usize::try_from(report.produced).unwrap();
            assert_eq!(report.histogram.total(), report.produced, "round {round}");

            for j in 0..WORDS {
                let offset = (j + WORDS - skip % WORDS) % WORDS;
                let expected = produced / WORDS + usize::from(offset < produced % WORDS);
                let got = report
                    .histogram
                    .get(format!("w{j}").as_bytes())
                    .unwrap_or(0);
                assert_eq!(got as usize, expected, "round {round}, word w{j}, skip {skip}");
            }
        }
    }
}
