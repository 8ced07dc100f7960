//! Latest-wins hand-off of encoded frames between one producer and many
//! streaming connections.
//!
//! ```text
//!   producer ──publish()──►  FrameBuffer  ──wait()──► connection 1
//!                           [ one slot ]  ──wait()──► connection 2
//!                                         ──wait()──► ...
//! ```
//!
//! There is no queue: a publish replaces the slot and wakes every waiter, a
//! slow reader simply never sees the frames it was too slow for.

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One complete JPEG image as handed over by a producer.
///
/// The payload is never inspected. Cloning is cheap, the bytes are
/// reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    seq: u64,
    captured_at_ms: i64,
}

impl Frame {
    /// Raw JPEG bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Publish sequence number, starting at 0 for the first frame of a buffer.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wall-clock time of publication in Unix millis.
    pub fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }
}

/// Single-slot, thread-safe holder for the most recently published frame.
pub struct FrameBuffer {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current frame and wake every waiting reader. Returns the
    /// sequence number given to the new frame.
    ///
    /// Never blocks on readers: they only hold the slot long enough to clone
    /// a reference-counted handle.
    pub fn publish(&self, data: impl Into<Bytes>) -> u64 {
        let data = data.into();
        let captured_at_ms = Utc::now().timestamp_millis();
        let len = data.len();
        let mut seq = 0;
        self.tx.send_modify(|slot| {
            seq = slot.as_ref().map_or(0, |prev| prev.seq + 1);
            *slot = Some(Frame {
                data,
                seq,
                captured_at_ms,
            });
        });
        tracing::trace!(seq, bytes = len, "frame published");
        seq
    }

    /// Non-blocking peek at the current frame.
    pub fn current(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.tx.borrow().as_ref().map_or(0, |f| f.seq + 1)
    }

    /// A reader handle for one consumer, typically one HTTP connection.
    pub fn reader(&self) -> FrameReader {
        FrameReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Current frame, or suspend until the first one is published.
    ///
    /// Returns `None` only if `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> Option<Frame> {
        self.reader().wait(cancel).await
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-consumer view of a [`FrameBuffer`].
pub struct FrameReader {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameReader {
    /// Returns the current frame immediately if one exists, otherwise waits
    /// for the first publish.
    ///
    /// Returns `None` when `cancel` fires or the buffer has been dropped.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Option<Frame> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            slot = self.rx.wait_for(Option::is_some) => slot.ok().and_then(|f| f.clone()),
        }
    }
}
