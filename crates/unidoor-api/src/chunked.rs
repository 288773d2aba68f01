//! HTTP/1.1 chunked transfer decoding with bounded waits.
//!
//! [`ChunkedTransferDecoder`] sits between a response body socket and the
//! document parser. It strips `<hex-size>\r\n ... \r\n` framing and yields
//! only content bytes, terminating at the zero-size chunk:
//!
//! ```text
//! NeedChunkSize ──► ReadingChunk ──► SkipTrailer ──┬─► NeedChunkSize
//!       │                                          └─► (next size 0) Finished
//!       └─ bad hex / stall / EOF ─► Finished (Malformed | Truncated)
//! ```
//!
//! Stalls and malformed framing end the stream early instead of failing
//! it: the caller inspects [`termination()`](ChunkedTransferDecoder::termination)
//! and decides whether the document is usable. When the body is not
//! chunked the decoder passes bytes through under the same timeouts, so
//! callers never special-case framing.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Bound on reading one chunk-size line.
pub const CHUNK_SIZE_LINE_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on each wait for chunk data.
pub const CHUNK_DATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest accepted chunk-size line (size plus extensions).
const MAX_SIZE_LINE: u64 = 256;
/// Yield to the scheduler after this many reads that completed without
/// waiting.
const YIELD_EVERY: u32 = 32;
/// Read size used by [`ChunkedTransferDecoder::into_stream`].
const STREAM_READ_SIZE: usize = 2048;

/// How the decoder reached `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Zero-size chunk seen, or the declared/implicit end of an
    /// unchunked body.
    Complete,
    /// The source stalled past its bound or closed mid-body.
    Truncated,
    /// A chunk-size line was not hexadecimal.
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    NeedChunkSize,
    ReadingChunk { remaining: u64 },
    SkipTrailer,
    Passthrough { remaining: Option<u64> },
    Finished(Termination),
}

/// Removes chunked transfer framing from a byte source.
#[derive(Debug)]
pub struct ChunkedTransferDecoder<R> {
    inner: R,
    state: DecodeState,
    size_line_timeout: Duration,
    data_timeout: Duration,
    reads_since_yield: u32,
}

impl<R> ChunkedTransferDecoder<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap `inner`. When `is_chunked` is false the body is passed
    /// through until EOF.
    pub fn new(inner: R, is_chunked: bool) -> Self {
        let state = if is_chunked {
            DecodeState::NeedChunkSize
        } else {
            DecodeState::Passthrough { remaining: None }
        };
        Self {
            inner,
            state,
            size_line_timeout: CHUNK_SIZE_LINE_TIMEOUT,
            data_timeout: CHUNK_DATA_TIMEOUT,
            reads_since_yield: 0,
        }
    }

    /// Pass-through decoder that stops after `content_length` bytes.
    pub fn with_content_length(inner: R, content_length: u64) -> Self {
        let mut decoder = Self::new(inner, false);
        decoder.state = if content_length == 0 {
            DecodeState::Finished(Termination::Complete)
        } else {
            DecodeState::Passthrough {
                remaining: Some(content_length),
            }
        };
        decoder
    }

    /// Override the default 2s waits.
    pub fn with_timeouts(mut self, size_line: Duration, data: Duration) -> Self {
        self.size_line_timeout = size_line;
        self.data_timeout = data;
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, DecodeState::Finished(_))
    }

    /// `Some` once the stream has ended, with the reason.
    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            DecodeState::Finished(t) => Some(t),
            _ => None,
        }
    }

    /// Read one content byte, or `None` at the end of the stream.
    pub async fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.read_into(&mut byte).await {
            0 => None,
            _ => Some(byte[0]),
        }
    }

    /// Fill `buf` with up to `buf.len()` content bytes. Returns 0 only
    /// when the stream has finished (or `buf` is empty).
    pub async fn read_into(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        loop {
            match self.state {
                DecodeState::Finished(_) => return 0,
                DecodeState::NeedChunkSize => self.read_chunk_size().await,
                DecodeState::SkipTrailer => self.skip_trailer().await,
                DecodeState::ReadingChunk { remaining } => {
                    let n = self.read_data(buf, Some(remaining)).await;
                    if n == 0 {
                        return 0;
                    }
                    let left = remaining - n as u64;
                    self.state = if left == 0 {
                        DecodeState::SkipTrailer
                    } else {
                        DecodeState::ReadingChunk { remaining: left }
                    };
                    return n;
                }
                DecodeState::Passthrough { remaining } => {
                    let n = self.read_data(buf, remaining).await;
                    if n == 0 {
                        return 0;
                    }
                    if let Some(total) = remaining {
                        let left = total - n as u64;
                        self.state = if left == 0 {
                            DecodeState::Finished(Termination::Complete)
                        } else {
                            DecodeState::Passthrough {
                                remaining: Some(left),
                            }
                        };
                    }
                    return n;
                }
            }
        }
    }

    /// Consume the decoder into a stream of content chunks.
    ///
    /// Early termination surfaces as an `io::Error` so downstream parsers
    /// see a failed read rather than a clean end of input:
    /// `UnexpectedEof` for a truncated body, `InvalidData` for bad framing.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
    where
        R: Send + 'static,
    {
        self.into_stream_until(CancellationToken::new())
    }

    /// Like [`into_stream`](Self::into_stream), but ends with a
    /// `ConnectionAborted` error as soon as `cancel` fires. The source is
    /// dropped with the stream, so a cancelled read releases its socket
    /// even while the peer keeps trickling bytes.
    pub fn into_stream_until(
        mut self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
    where
        R: Send + 'static,
    {
        async_stream::stream! {
            let mut buf = vec![0u8; STREAM_READ_SIZE];
            loop {
                let read = tokio::select! {
                    () = cancel.cancelled() => None,
                    n = self.read_into(&mut buf) => Some(n),
                };
                let Some(n) = read else {
                    debug!("body read cancelled");
                    yield Err(io::Error::new(io::ErrorKind::ConnectionAborted, "body read cancelled"));
                    break;
                };
                if n == 0 {
                    match self.termination() {
                        Some(Termination::Truncated) => {
                            yield Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "body ended before the final chunk",
                            ));
                        }
                        Some(Termination::Malformed) => {
                            yield Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "malformed chunk-size line",
                            ));
                        }
                        Some(Termination::Complete) | None => {}
                    }
                    break;
                }
                yield Ok(Bytes::copy_from_slice(&buf[..n]));
            }
        }
    }

    // ── State handlers ───────────────────────────────────────────────

    async fn read_chunk_size(&mut self) {
        let mut line = Vec::new();
        let read = timeout(
            self.size_line_timeout,
            (&mut self.inner)
                .take(MAX_SIZE_LINE)
                .read_until(b'\n', &mut line),
        )
        .await;

        match read {
            Ok(Ok(0)) | Err(_) => {
                debug!("chunk-size line missing or stalled");
                self.finish(Termination::Truncated);
                return;
            }
            Ok(Err(e)) => {
                debug!(error = %e, "chunk-size read failed");
                self.finish(Termination::Truncated);
                return;
            }
            Ok(Ok(_)) => {}
        }

        if line.last() != Some(&b'\n') {
            // Either the size line is absurdly long or the source closed
            // mid-line; neither yields a usable size.
            let term = if line.len() as u64 >= MAX_SIZE_LINE {
                Termination::Malformed
            } else {
                Termination::Truncated
            };
            self.finish(term);
            return;
        }

        match parse_chunk_size(&line) {
            Some(0) => {
                trace!("final chunk");
                self.finish(Termination::Complete);
            }
            Some(size) => {
                trace!(size, "chunk");
                self.state = DecodeState::ReadingChunk { remaining: size };
            }
            None => {
                debug!(line = %String::from_utf8_lossy(&line).trim_end(), "bad chunk-size line");
                self.finish(Termination::Malformed);
            }
        }
    }

    /// Consume the CRLF that follows chunk data. Tolerates a bare LF and
    /// leaves any other byte for the next size line.
    async fn skip_trailer(&mut self) {
        for _ in 0..2 {
            let next = match timeout(self.data_timeout, self.inner.fill_buf()).await {
                Ok(Ok(available)) => available.first().copied(),
                Ok(Err(_)) | Err(_) => None,
            };
            let Some(byte) = next else {
                self.finish(Termination::Truncated);
                return;
            };
            match byte {
                b'\r' => self.inner.consume(1),
                b'\n' => {
                    self.inner.consume(1);
                    break;
                }
                _ => break,
            }
        }
        self.state = DecodeState::NeedChunkSize;
    }

    /// Copy available bytes into `buf`, waiting at most `data_timeout`.
    async fn read_data(&mut self, buf: &mut [u8], limit: Option<u64>) -> usize {
        self.maybe_yield().await;

        let cap = limit.map_or(buf.len(), |l| {
            buf.len().min(usize::try_from(l).unwrap_or(usize::MAX))
        });
        let read = match timeout(self.data_timeout, self.inner.fill_buf()).await {
            Ok(Ok(available)) => {
                let n = available.len().min(cap);
                buf[..n].copy_from_slice(&available[..n]);
                Ok(n)
            }
            Ok(Err(e)) => Err(Some(e)),
            Err(_) => Err(None),
        };

        match read {
            Ok(0) => {
                self.finish_data(limit);
                0
            }
            Ok(n) => {
                self.inner.consume(n);
                n
            }
            Err(Some(e)) => {
                debug!(error = %e, "body read failed");
                self.finish_data(limit);
                0
            }
            Err(None) => {
                debug!(timeout_ms = self.data_timeout.as_millis(), "body read stalled");
                self.finish(Termination::Truncated);
                0
            }
        }
    }

    /// EOF while reading data: an unchunked body without a declared length
    /// ends cleanly, anything else was cut short.
    fn finish_data(&mut self, limit: Option<u64>) {
        let clean = matches!(self.state, DecodeState::Passthrough { .. }) && limit.is_none();
        self.finish(if clean {
            Termination::Complete
        } else {
            Termination::Truncated
        });
    }

    fn finish(&mut self, termination: Termination) {
        self.state = DecodeState::Finished(termination);
    }

    async fn maybe_yield(&mut self) {
        self.reads_since_yield += 1;
        if self.reads_since_yield >= YIELD_EVERY {
            self.reads_since_yield = 0;
            tokio::task::yield_now().await;
        }
    }
}

/// Parse `<hex-size>[;extensions]\r\n`.
fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?;
    let size = text.split(';').next()?.trim();
    if size.is_empty() {
        return None;
    }
    u64::from_str_radix(size, 16).ok()
}
