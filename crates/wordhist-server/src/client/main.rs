//! Minimal client: asks a `wordhist-server` for one histogram and prints it.

use anyhow::{Context, bail};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use wordhist::{Record, Request, wire};

#[derive(Parser, Debug)]
#[command(
    name = "wordhist-client",
    version,
    about = "Request a word histogram from a wordhist server"
)]
struct Args {
    /// Server address.
    ///
    /// Environment variable: `WORDHIST_ADDR`
    #[arg(long, env = "WORDHIST_ADDR", default_value_t = String::from("127.0.0.1:8080"))]
    addr: String,

    /// Corpus words to skip before counting starts.
    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Seconds to count for.
    #[arg(long, default_value_t = 5)]
    duration: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // The wire carries signed integers.
    if i32::try_from(args.offset).is_err() || i32::try_from(args.duration).is_err() {
        bail!("--offset and --duration must fit in a signed 32-bit integer");
    }

    let stream = TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let mut reader = BufReader::new(stream);

    reader
        .get_mut()
        .write_all(&Request::new(args.offset, args.duration).encode())
        .await
        .context("failed to send request")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    loop {
        match wire::read_record(&mut reader)
            .await
            .context("connection closed before the end of results")?
        {
            Record::Entry { count, word } => {
                writeln!(out, "{count} {}", String::from_utf8_lossy(&word))?;
            }
            Record::Failure => eprintln!("server could not produce a histogram"),
            Record::End => break,
        }
    }
    out.flush()?;
    Ok(())
}
