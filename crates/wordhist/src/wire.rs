//! Byte-level protocol spoken between `wordhist` clients and servers.
//!
//! ## Request (client → server, 8 bytes)
//!
//! | offset | size | field           | encoding                   |
//! |--------|------|-----------------|----------------------------|
//! | 0      | 4    | `start_offset`  | big-endian `i32`, `>= 0`   |
//! | 4      | 4    | `duration_secs` | big-endian `i32`, `>= 0`   |
//!
//! ## Response (server → client)
//!
//! One record per distinct word in ascending byte order:
//!
//! ```text
//! [count: u32 BE][word bytes ...]['\n']
//! ```
//!
//! followed by the sentinel `[0u32 BE]['\n']`. A failed session sends the
//! error record `[0xFFFF_FFFF]['\n']` right before the sentinel. Words never
//! contain `'\n'`, so clients read four count bytes and then everything up to
//! and including the next newline.

use crate::{Error, Histogram, Result, Word};
use bytes::{BufMut, Bytes, BytesMut};
use core::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of an encoded [`Request`].
pub const REQUEST_LEN: usize = 8;

/// Count value that terminates a response.
pub const SENTINEL_COUNT: u32 = 0;

/// Count value of the error record (`-1` as a signed integer).
pub const ERROR_COUNT: u32 = u32::MAX;

/// Terminator of every response record.
pub const RECORD_END: u8 = b'\n';

/// Upper bound on bytes buffered before a flush while streaming a histogram.
const WRITE_BATCH_BYTES: usize = 16 * 1024;

/// A decoded client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Number of corpus words to skip before counting.
    pub start_offset: u32,
    /// How long to count for, in seconds.
    pub duration_secs: u32,
}

impl Request {
    pub const fn new(start_offset: u32, duration_secs: u32) -> Self {
        Self {
            start_offset,
            duration_secs,
        }
    }

    /// Decodes the 8 request bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if either field is negative.
    pub fn decode(bytes: [u8; REQUEST_LEN]) -> Result<Self> {
        let start_offset = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let duration_secs = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        let start_offset = u32::try_from(start_offset).map_err(|_| Error::InvalidRequest {
            reason: format!("start offset must be non-negative, got {start_offset}"),
        })?;
        let duration_secs = u32::try_from(duration_secs).map_err(|_| Error::InvalidRequest {
            reason: format!("duration must be non-negative, got {duration_secs}"),
        })?;

        Ok(Self::new(start_offset, duration_secs))
    }

    /// Encodes the request as sent by a client.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut out = [0_u8; REQUEST_LEN];
        out[..4].copy_from_slice(&self.start_offset.to_be_bytes());
        out[4..].copy_from_slice(&self.duration_secs.to_be_bytes());
        out
    }

    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs as u64)
    }

    /// Offset as a skip count for a word source.
    pub const fn skip(&self) -> usize {
        self.start_offset as usize
    }
}

/// Reads and decodes one request from `reader`.
///
/// # Errors
///
/// - [`Error::MalformedRequest`] if the stream ends before 8 bytes arrive.
/// - [`Error::InvalidRequest`] if a field is negative.
/// - [`Error::Transport`] on any other read failure.
pub async fn read_request<R>(reader: &mut R) -> Result<Request>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0_u8; REQUEST_LEN];
    let mut filled = 0;

    while filled < REQUEST_LEN {
        match reader.read(&mut buf[filled..]).await? {
            0 => return Err(Error::MalformedRequest { received: filled }),
            n => filled += n,
        }
    }

    Request::decode(buf)
}

/// Appends one data record to `buf`.
pub fn encode_entry(buf: &mut BytesMut, count: u32, word: &[u8]) {
    buf.reserve(4 + word.len() + 1);
    buf.put_u32(count);
    buf.put_slice(word);
    buf.put_u8(RECORD_END);
}

/// Appends the end-of-results sentinel to `buf`.
pub fn encode_sentinel(buf: &mut BytesMut) {
    buf.put_u32(SENTINEL_COUNT);
    buf.put_u8(RECORD_END);
}

/// Appends the error record to `buf`.
pub fn encode_error(buf: &mut BytesMut) {
    buf.put_u32(ERROR_COUNT);
    buf.put_u8(RECORD_END);
}

/// Streams every record of `histogram` followed by the sentinel, then
/// flushes.
///
/// Records are batched so a large histogram is not written one syscall per
/// word. Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`Error::Transport`] as soon as a write fails.
pub async fn write_histogram<W>(writer: &mut W, histogram: &Histogram) -> Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(WRITE_BATCH_BYTES);
    let mut written = 0;

    for (word, count) in histogram.iter() {
        encode_entry(&mut buf, count, word);
        if buf.len() >= WRITE_BATCH_BYTES {
            writer.write_all(&buf).await?;
            written += buf.len();
            buf.clear();
        }
    }

    encode_sentinel(&mut buf);
    writer.write_all(&buf).await?;
    written += buf.len();
    writer.flush().await?;
    Ok(written)
}

/// Writes the error record and the sentinel, then flushes.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the write fails.
pub async fn write_failure<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(10);
    encode_error(&mut buf);
    encode_sentinel(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// One decoded response record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A word and how often it was seen.
    Entry { count: u32, word: Word },
    /// The server could not produce a histogram.
    Failure,
    /// End of results.
    End,
}

/// Reads the next response record.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the stream fails or ends mid-record.
pub async fn read_record<R>(reader: &mut R) -> Result<Record>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let count = reader.read_u32().await?;

    let mut word = Vec::new();
    reader.read_until(RECORD_END, &mut word).await?;
    if word.pop() != Some(RECORD_END) {
        return Err(Error::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "response record is missing its newline",
        )));
    }

    Ok(match count {
        SENTINEL_COUNT => Record::End,
        ERROR_COUNT if word.is_empty() => Record::Failure,
        count => Record::Entry {
            count,
            word: Bytes::from(word),
        },
    })
}

/// A fully read response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Data records in the order they arrived.
    pub entries: Vec<(Word, u32)>,
    /// Whether the server sent the error record.
    pub failed: bool,
}

/// Reads records until the sentinel.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the stream ends before the sentinel.
pub async fn read_response<R>(reader: &mut R) -> Result<Response>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut response = Response::default();
    loop {
        match read_record(reader).await? {
            Record::Entry { count, word } => response.entries.push((word, count)),
            Record::Failure => response.failed = true,
            Record::End => return Ok(response),
        }
    }
}
