use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use wordhist::Corpus;
use wordhist_server::server::{
    config::{CliArgs, ServerConfig},
    listener::Server,
    telemetry::{init_telemetry, shutdown_telemetry},
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let corpus = Corpus::load(&config.corpus_path)
        .with_context(|| format!("failed to load corpus from {}", config.corpus_path.display()))?
        .into_shared();
    if corpus.is_empty() {
        #[cfg(feature = "tracing")]
        tracing::warn!("Corpus has no words; every session will answer with an error record");
    }

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config, corpus.len());

    let server = Server::new(corpus, config.session_config(), config.shutdown_timeout);
    let res = server
        .serve(TcpListenerStream::new(listener), shutdown_signal())
        .await;

    #[cfg(feature = "tracing")]
    match &res {
        Ok(()) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Service stopped: {:#}", e),
    }

    shutdown_telemetry(providers);
    res
}

fn log_startup_info(_config: &ServerConfig, _words: usize) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting histogram service on {} over {} words with full config: {:#?}",
            _config.server_addr,
            _words,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting histogram service on {} over {} words",
            _config.server_addr,
            _words
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
