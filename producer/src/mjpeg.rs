use bytes::{Bytes, BytesMut};
use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::LiveSettings;
use futures_util::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ProducerError;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Largest part payload accepted from upstream.
pub const MAX_PART_LEN: usize = 16 * 1024 * 1024;

/// Largest part header block accepted from upstream.
const MAX_HEADER_LEN: usize = 16 * 1024;

/// Parse state for an MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Part declared a Content-Length, collecting exactly that many bytes.
    CollectingSized(usize),
    /// No Content-Length, collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter that turns arbitrary chunks of a
/// `multipart/x-mixed-replace` body into complete part payloads.
///
/// Parts that declare `Content-Length` are emitted as soon as their last
/// byte arrives; parts without one are emitted when the next boundary shows
/// up. A declared length that overruns the next boundary is ignored, and
/// anything larger than [`MAX_PART_LEN`] is dropped so the splitter resyncs
/// on the following boundary.
pub struct PartSplitter {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl PartSplitter {
    /// `boundary` is the token as it appears after the leading `--` on each
    /// delimiter line, e.g. `myboundary` for `--myboundary\r\n`.
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed the next chunk; returns every part completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.delimiter) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + self.delimiter.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > self.delimiter.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.delimiter.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let headers = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = match content_length(&headers[..pos]) {
                            Some(len) if len <= MAX_PART_LEN => ParseState::CollectingSized(len),
                            Some(len) => {
                                warn!(
                                    declared = len,
                                    max = MAX_PART_LEN,
                                    "oversized Content-Length, splitting on boundary"
                                );
                                ParseState::CollectingJpeg
                            }
                            None => ParseState::CollectingJpeg,
                        };
                    } else if self.buffer.len() > MAX_HEADER_LEN {
                        warn!(buffered = self.buffer.len(), "part headers too long, resyncing");
                        self.discard_keeping_tail();
                        self.state = ParseState::SeekingBoundary;
                        break;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingSized(len) => {
                    // A boundary inside the declared payload means the length lied.
                    let overrun = find_subsequence(&self.buffer[self.jpeg_start..], &self.delimiter)
                        .map(|pos| self.jpeg_start + pos)
                        .filter(|&pos| pos < len);
                    if overrun.is_some() {
                        warn!(
                            declared = len,
                            "Content-Length overruns next boundary, splitting on boundary"
                        );
                        self.state = ParseState::CollectingJpeg;
                        continue;
                    }
                    if self.buffer.len() < len {
                        self.jpeg_start = self.buffer.len().saturating_sub(self.delimiter.len());
                        break;
                    }
                    parts.push(self.buffer.split_to(len).freeze());
                    // The trailing \r\n is skipped while seeking the next boundary.
                    self.state = ParseState::SeekingBoundary;
                }
                ParseState::CollectingJpeg => {
                    // Look for the next boundary to know where JPEG ends
                    if let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.delimiter)
                    {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg = self.buffer.split_to(end).freeze();
                        // Advance past the (optional) \r\n and the boundary
                        let _ = self.buffer.split_to(jpeg_end - end + self.delimiter.len());

                        if !jpeg.is_empty() {
                            parts.push(jpeg);
                        }
                        // Already past boundary, go to header parsing
                        self.state = ParseState::SeekingHeaderEnd;
                    } else if self.buffer.len() > MAX_PART_LEN {
                        warn!(
                            buffered = self.buffer.len(),
                            max = MAX_PART_LEN,
                            "part too large, dropping it"
                        );
                        self.discard_keeping_tail();
                        self.state = ParseState::SeekingBoundary;
                        break;
                    } else {
                        // Update jpeg_start to avoid re-scanning old data
                        self.jpeg_start = self.buffer.len().saturating_sub(self.delimiter.len());
                        break;
                    }
                }
            }
        }

        parts
    }

    /// Drop buffered bytes except a tail that may hold a split delimiter.
    fn discard_keeping_tail(&mut self) {
        let keep = self.delimiter.len().min(self.buffer.len());
        let _ = self.buffer.split_to(self.buffer.len() - keep);
        self.jpeg_start = 0;
    }
}

/// Relay an upstream MJPEG stream into `frames`.
/// Reconnects with exponential backoff on failure, returns on cancel.
pub async fn run_mjpeg_relay(
    url: &str,
    boundary: &str,
    frames: &FrameBuffer,
    settings: &LiveSettings,
    cancel: &CancellationToken,
) -> Result<(), ProducerError> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url, "connecting to upstream MJPEG stream");
        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = consume_stream(url, boundary, frames, settings) => result,
        };
        match result {
            Ok(()) => {
                info!("upstream stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "upstream stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    url: &str,
    boundary: &str,
    frames: &FrameBuffer,
    settings: &LiveSettings,
) -> Result<(), ProducerError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ProducerError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(ProducerError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(ProducerError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to upstream MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut splitter = PartSplitter::new(boundary);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProducerError::HttpStream)?;
        for jpeg in splitter.push(&chunk) {
            if settings.is_paused() {
                continue;
            }
            debug!(bytes = jpeg.len(), "relaying upstream frame");
            frames.publish(jpeg);
        }
    }

    Ok(())
}

/// Polling-based fallback: periodically fetch single frames.
pub async fn run_snapshot_poller(
    frame_url: &str,
    interval: Duration,
    frames: &FrameBuffer,
    settings: &LiveSettings,
    cancel: &CancellationToken,
) -> Result<(), ProducerError> {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if settings.is_paused() {
            continue;
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            fetched = fetch_snapshot(&client, frame_url) => fetched,
        };
        match fetched {
            Ok(jpeg) => {
                frames.publish(jpeg);
            }
            Err(e) => warn!(error = %e, "failed to fetch upstream snapshot"),
        }
    }
}

async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<Bytes, ProducerError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(ProducerError::HttpConnect)?;
    if !resp.status().is_success() {
        return Err(ProducerError::HttpStatus(resp.status().as_u16()));
    }
    resp.bytes().await.map_err(ProducerError::HttpStream)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
