//! Accept loop and session lifecycle.
//!
//! The [`Server`] pulls connections from any stream of accepted transports and
//! spawns one [`ClientSession`] task per connection. There is no admission
//! limit: every accepted connection is served immediately, so memory grows
//! with the number of concurrent clients.
//!
//! ## Shutdown
//!
//! When the shutdown future resolves the server stops accepting, cancels the
//! server-wide token (every in-flight session stops counting and answers with
//! what it has), then waits up to `shutdown_timeout` for those sessions to
//! finish writing.

use crate::server::{
    session::{ClientSession, SessionConfig},
    telemetry::{
        decrement_sessions_inflight, increment_session_errors, increment_sessions,
        increment_sessions_inflight, increment_words_counted, record_distinct_words,
        record_session_duration,
    },
};
use anyhow::Context;
use futures::{Stream, StreamExt};
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    net::TcpStream,
    time::{Instant, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use wordhist::Corpus;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// EMFILE and ENFILE share these values on Linux and the BSDs.
const TOO_MANY_OPEN_FILES: [i32; 2] = [24, 23];

/// How an accept error affects the listening loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Belongs to one connection; keep accepting.
    Connection,
    /// Transient exhaustion (file descriptors, memory); retry after a pause.
    Resources,
    /// The listener itself is broken.
    Fatal,
}

impl AcceptFailure {
    fn classify(err: &io::Error) -> Self {
        if cfg!(unix)
            && err
                .raw_os_error()
                .is_some_and(|code| TOO_MANY_OPEN_FILES.contains(&code))
        {
            return Self::Resources;
        }

        match err.kind() {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut => Self::Connection,
            io::ErrorKind::OutOfMemory => Self::Resources,
            _ => Self::Fatal,
        }
    }
}

/// A transport the server can run a session over.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Connection for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

impl Connection for DuplexStream {}

pub struct Server {
    corpus: Arc<Corpus>,
    config: SessionConfig,
    shutdown_timeout: Duration,
    shutdown: CancellationToken,
    inflight: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl Server {
    pub fn new(corpus: Arc<Corpus>, config: SessionConfig, shutdown_timeout: Duration) -> Self {
        Self {
            corpus,
            config,
            shutdown_timeout,
            shutdown: CancellationToken::new(),
            inflight: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of sessions that have been accepted and not yet finished.
    pub fn sessions_inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Token cancelled when the server shuts down. Every session observes a
    /// child of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Accepts connections from `incoming` until `signal` resolves, the
    /// stream ends, or the listener fails for good.
    ///
    /// A failing session is logged and never stops the loop. Accept errors
    /// tied to a single connection are skipped; running out of file
    /// descriptors pauses accepting briefly. When `incoming`
    /// runs dry, sessions already accepted are allowed to finish.
    ///
    /// # Errors
    ///
    /// Returns the unrecoverable accept error that stopped the loop. Sessions are shut down
    /// gracefully before it is returned.
    pub async fn serve<I, IO, F>(&self, incoming: I, signal: F) -> anyhow::Result<()>
    where
        I: Stream<Item = io::Result<IO>>,
        IO: Connection,
        F: Future<Output = ()>,
    {
        tokio::pin!(incoming);
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;
                () = &mut signal => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Shutdown signal received, terminating gracefully...");
                    self.shutdown().await;
                    return Ok(());
                }
                accepted = incoming.next() => match accepted {
                    Some(Ok(io)) => self.spawn_session(io),
                    Some(Err(e)) => match AcceptFailure::classify(&e) {
                        AcceptFailure::Connection => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Dropped a connection during accept: {}", e);
                        }
                        AcceptFailure::Resources => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Accept is out of resources, backing off: {}", e);
                            sleep(ACCEPT_BACKOFF).await;
                        }
                        AcceptFailure::Fatal => {
                            #[cfg(feature = "tracing")]
                            tracing::error!("Accept failed: {}", e);
                            self.shutdown().await;
                            return Err(e).context("failed to accept connection");
                        }
                    },
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(
                            "Listener closed, waiting for {} sessions",
                            self.sessions_inflight()
                        );
                        self.wait_idle().await;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn spawn_session<IO: Connection>(&self, io: IO) {
        let _peer = io.peer_addr();
        let session = ClientSession::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            io,
            Arc::clone(&self.corpus),
            self.config,
            self.shutdown.child_token(),
        );
        let id = session.id();
        let guard = InflightGuard::enter(Arc::clone(&self.inflight));

        let task = async move {
            let _guard = guard;
            let accepted = Instant::now();
            increment_sessions();

            match session.run().await {
                Ok(summary) => {
                    increment_words_counted(summary.produced);
                    record_distinct_words(summary.distinct_words as f64);

                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        distinct = summary.distinct_words,
                        total = summary.total_count,
                        bytes = summary.bytes_written,
                        interrupted = summary.interrupted,
                        "Session {} answered in {:?}",
                        id,
                        summary.elapsed
                    );
                }
                Err(_e) => {
                    increment_session_errors();
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Session {} failed: {}", id, _e);
                }
            }

            record_session_duration(accepted.elapsed().as_secs_f64() * 1000.0);
        };

        #[cfg(feature = "tracing")]
        let task = {
            use tracing::Instrument;
            task.instrument(tracing::info_span!("session", id, peer = ?_peer))
        };

        tokio::spawn(task);
    }

    async fn shutdown(&self) {
        // === Phase 0: Stop accepting (the caller left the accept loop) ===
        // === Phase 1: Interrupt every session ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Interrupting in-flight sessions ({} active)",
            self.sessions_inflight()
        );
        self.shutdown.cancel();

        // === Phase 2: Wait for their final writes ===
        match timeout(self.shutdown_timeout, self.wait_idle()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight sessions drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} sessions still active)",
                    self.sessions_inflight()
                );
            }
        }
    }

    async fn wait_idle(&self) {
        while self.sessions_inflight() > 0 {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Counts a session as in flight until dropped, even if its task panics.
struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        increment_sessions_inflight();
        Self(counter)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_sessions_inflight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, BufReader, duplex},
        net::TcpListener,
        sync::{mpsc, oneshot},
        task::JoinHandle,
    };
    use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
    use wordhist::{Request, Response, Word, wire};

    type Incoming = mpsc::Sender<io::Result<DuplexStream>>;

    struct Harness {
        server: Arc<Server>,
        incoming: Incoming,
        stop: oneshot::Sender<()>,
        serving: JoinHandle<anyhow::Result<()>>,
    }

    fn start(text: &str, shutdown_timeout: Duration) -> Harness {
        let server = Arc::new(Server::new(
            Corpus::from_text(text).into_shared(),
            SessionConfig {
                tick: Duration::from_millis(900),
            },
            shutdown_timeout,
        ));
        let (incoming, rx) = mpsc::channel(8);
        let (stop, stopped) = oneshot::channel::<()>();

        let serving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .serve(ReceiverStream::new(rx), async move {
                        let _ = stopped.await;
                    })
                    .await
            })
        };

        Harness {
            server,
            incoming,
            stop,
            serving,
        }
    }

    async fn connect(incoming: &Incoming) -> DuplexStream {
        let (client, server) = duplex(64 * 1024);
        incoming.send(Ok(server)).await.unwrap();
        client
    }

    async fn ask(client: DuplexStream, request: Request) -> Response {
        let mut reader = BufReader::new(client);
        reader.get_mut().write_all(&request.encode()).await.unwrap();
        wire::read_response(&mut reader).await.unwrap()
    }

    fn entries(pairs: &[(&str, u32)]) -> Vec<(Word, u32)> {
        pairs
            .iter()
            .map(|(w, c)| (Word::copy_from_slice(w.as_bytes()), *c))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_run_independently() {
        let h = start("the quick the fox", Duration::from_secs(3));

        let a = connect(&h.incoming).await;
        let b = connect(&h.incoming).await;
        let c = connect(&h.incoming).await;

        let (a, b, c) = tokio::join!(
            ask(a, Request::new(0, 4)),
            ask(b, Request::new(1, 2)),
            ask(c, Request::new(0, 0)),
        );

        assert_eq!(a.entries, entries(&[("fox", 1), ("quick", 1), ("the", 2)]));
        assert_eq!(b.entries, entries(&[("quick", 1), ("the", 1)]));
        assert!(c.entries.is_empty());
        assert!(!a.failed && !b.failed && !c.failed);

        h.stop.send(()).unwrap();
        h.serving.await.unwrap().unwrap();
        assert_eq!(h.server.sessions_inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_session_does_not_stop_accepting() {
        let h = start("the quick the fox", Duration::from_secs(3));

        let mut short = connect(&h.incoming).await;
        short.write_all(&[0, 0]).await.unwrap();
        short.shutdown().await.unwrap();
        let mut raw = Vec::new();
        short.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());

        let next = connect(&h.incoming).await;
        let response = ask(next, Request::new(0, 2)).await;
        assert_eq!(response.entries, entries(&[("quick", 1), ("the", 1)]));

        h.stop.send(()).unwrap();
        h.serving.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_answers_long_sessions() {
        let h = start("the quick the fox", Duration::from_secs(3));

        let client = connect(&h.incoming).await;
        let pending = tokio::spawn(ask(client, Request::new(0, 3600)));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.server.sessions_inflight(), 1);
        h.stop.send(()).unwrap();

        let response = pending.await.unwrap();
        assert_eq!(response.entries, entries(&[("quick", 1), ("the", 1)]));
        h.serving.await.unwrap().unwrap();
        assert!(h.server.shutdown_token().is_cancelled());
        assert_eq!(h.server.sessions_inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_timeout() {
        let h = start("the quick the fox", Duration::from_secs(1));

        // Connected but silent: the session waits for a request forever.
        let _silent = connect(&h.incoming).await;
        while h.server.sessions_inflight() == 0 {
            tokio::task::yield_now().await;
        }

        let stopped = Instant::now();
        h.stop.send(()).unwrap();
        h.serving.await.unwrap().unwrap();

        assert!(stopped.elapsed() >= Duration::from_secs(1));
        assert_eq!(h.server.sessions_inflight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_error_is_fatal() {
        let h = start("the quick the fox", Duration::from_secs(1));
        h.incoming
            .send(Err(io::Error::other("accept exploded")))
            .await
            .unwrap();

        let err = h.serving.await.unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("accept exploded"));
        assert!(h.server.shutdown_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_level_accept_errors_are_skipped() {
        let h = start("the quick the fox", Duration::from_secs(1));
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            h.incoming.send(Err(io::Error::from(kind))).await.unwrap();
        }

        let client = connect(&h.incoming).await;
        let response = ask(client, Request::new(0, 1)).await;
        assert_eq!(response.entries, entries(&[("the", 1)]));
        assert!(!h.server.shutdown_token().is_cancelled());

        h.stop.send(()).unwrap();
        h.serving.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn fd_exhaustion_backs_off_and_recovers() {
        let h = start("the quick the fox", Duration::from_secs(1));
        // EMFILE, then ENFILE.
        h.incoming
            .send(Err(io::Error::from_raw_os_error(24)))
            .await
            .unwrap();
        h.incoming
            .send(Err(io::Error::from_raw_os_error(23)))
            .await
            .unwrap();

        let started = Instant::now();
        let client = connect(&h.incoming).await;
        let response = ask(client, Request::new(0, 1)).await;
        assert_eq!(response.entries, entries(&[("the", 1)]));
        assert!(started.elapsed() >= 2 * ACCEPT_BACKOFF);
        assert!(!h.server.shutdown_token().is_cancelled());

        h.stop.send(()).unwrap();
        h.serving.await.unwrap().unwrap();
    }

    #[test]
    fn accept_errors_are_classified() {
        let classify = |e: io::Error| AcceptFailure::classify(&e);
        assert_eq!(
            classify(io::ErrorKind::ConnectionAborted.into()),
            AcceptFailure::Connection
        );
        assert_eq!(
            classify(io::ErrorKind::OutOfMemory.into()),
            AcceptFailure::Resources
        );
        assert_eq!(
            classify(io::ErrorKind::PermissionDenied.into()),
            AcceptFailure::Fatal
        );
        assert_eq!(classify(io::Error::other("boom")), AcceptFailure::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_listener_lets_sessions_finish() {
        let h = start("the quick the fox", Duration::from_secs(1));
        let client = connect(&h.incoming).await;
        drop(h.incoming);

        let response = ask(client, Request::new(0, 4)).await;
        assert_eq!(response.entries.len(), 3);
        h.serving.await.unwrap().unwrap();
        assert!(!h.server.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(
            Corpus::from_text("the quick the fox").into_shared(),
            SessionConfig::default(),
            Duration::from_secs(1),
        ));
        let (stop, stopped) = oneshot::channel::<()>();
        let serving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .serve(TcpListenerStream::new(listener), async move {
                        let _ = stopped.await;
                    })
                    .await
            })
        };

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&Request::new(0, 0).encode()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, vec![0, 0, 0, 0, b'\n']);

        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }
}
