use crate::server::session::SessionConfig;
use anyhow::bail;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Runtime configuration for the `wordhist-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored), with defaults that match the reference client.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "wordhist-server",
    version,
    about = "A TCP service that streams word histograms counted over a corpus"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Text file tokenized into the shared corpus at startup.
    ///
    /// The file is read once; every session counts over the same words.
    ///
    /// Environment variable: `CORPUS_PATH`
    #[arg(long, env = "CORPUS_PATH", default_value = "file.txt")]
    pub corpus_path: PathBuf,

    /// Milliseconds between two words fed to a session's counter.
    ///
    /// The producer of every session emits at most one word per tick, so a
    /// request of `d` seconds counts roughly `d * 1000 / tick_ms` words.
    ///
    /// Environment variable: `TICK_MS`
    #[arg(long, env = "TICK_MS", default_value_t = 1000)]
    pub tick_ms: u64,

    /// Seconds to wait for in-flight sessions after a shutdown signal.
    ///
    /// Sessions are interrupted immediately and flush partial results; this
    /// bounds how long the server waits for those writes.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub corpus_path: PathBuf,
    pub tick: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Per-session settings derived from this configuration.
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig { tick: self.tick }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.tick_ms == 0 {
            bail!("TICK_MS must be greater than 0");
        }

        if args.corpus_path.as_os_str().is_empty() {
            bail!("CORPUS_PATH must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            corpus_path: args.corpus_path,
            tick: Duration::from_millis(args.tick_ms),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
