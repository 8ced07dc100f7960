use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use frame_relay_common::frame::FrameReader;
use frame_relay_common::settings::LiveSettings;
use futures_util::Stream;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::multipart;
use crate::routes::AppState;

/// One `/stream` connection: `Accepted → Streaming → Closed`.
///
/// Dropping the session (client gone, write failed, or shutdown) releases
/// everything it holds and logs the close.
pub(crate) struct StreamSession {
    conn_id: u64,
    peer: SocketAddr,
    reader: FrameReader,
    settings: Arc<LiveSettings>,
    cancel: CancellationToken,
    parts_sent: u64,
    last_seq: Option<u64>,
    opened_at: Instant,
    active: Arc<AtomicUsize>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl StreamSession {
    pub(crate) fn open(
        state: &AppState,
        conn_id: u64,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let active = state.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
        info!(conn_id, peer = %peer, active, "stream client connected");

        Self {
            conn_id,
            peer,
            reader: state.frames.reader(),
            settings: Arc::clone(&state.settings),
            cancel: state.cancel.child_token(),
            parts_sent: 0,
            last_seq: None,
            opened_at: Instant::now(),
            active: Arc::clone(&state.active_streams),
            _permit: permit,
        }
    }

    /// Pace, wait for a frame, frame it. `None` ends the response.
    async fn next_part(&mut self) -> Option<Bytes> {
        if self.parts_sent > 0 {
            // Read fresh every cycle so control-plane changes apply on the next part.
            let interval = self.settings.frame_interval();
            if !interval.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        let frame = self.reader.wait(&self.cancel).await?;
        debug_assert!(self.last_seq.map_or(true, |seq| seq <= frame.seq()));
        self.last_seq = Some(frame.seq());
        self.parts_sent += 1;
        trace!(
            conn_id = self.conn_id,
            seq = frame.seq(),
            bytes = frame.len(),
            "emitting part"
        );
        Some(multipart::encode_part(frame.data()))
    }

    /// The infinite part sequence as a response body stream.
    pub(crate) fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut session| async move {
            let part = session.next_part().await?;
            Some((Ok(part), session))
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        info!(
            conn_id = self.conn_id,
            peer = %self.peer,
            parts_sent = self.parts_sent,
            last_seq = ?self.last_seq,
            duration_ms = self.opened_at.elapsed().as_millis() as u64,
            shutdown = self.cancel.is_cancelled(),
            active,
            "stream client disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::frame::FrameBuffer;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn state(interval_ms: u64) -> AppState {
        let settings = LiveSettings::default();
        settings.set_frame_interval_ms(interval_ms);
        AppState {
            frames: Arc::new(FrameBuffer::new()),
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
            stream_limit: None,
            active_streams: Arc::new(AtomicUsize::new(0)),
            next_conn_id: AtomicU64::new(0),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn first_part_is_the_current_frame() {
        let state = state(0);
        state.frames.publish(&b"jpeg"[..]);
        let mut stream = Box::pin(StreamSession::open(&state, 1, peer(), None).into_stream());

        let part = stream.next().await.unwrap().unwrap();
        assert_eq!(part, multipart::encode_part(b"jpeg"));
    }

    #[tokio::test]
    async fn active_count_tracks_session_lifetime() {
        let state = state(0);
        let a = StreamSession::open(&state, 1, peer(), None);
        let b = StreamSession::open(&state, 2, peer(), None);
        assert_eq!(state.active_streams.load(Ordering::Relaxed), 2);
        drop(a);
        assert_eq!(state.active_streams.load(Ordering::Relaxed), 1);
        drop(b.into_stream());
        assert_eq!(state.active_streams.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_wait_for_first_frame() {
        let state = state(0);
        let mut stream = Box::pin(StreamSession::open(&state, 1, peer(), None).into_stream());

        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn shutdown_interrupts_pacing_sleep() {
        let state = state(60_000);
        state.frames.publish(&b"x"[..]);
        let mut stream = Box::pin(StreamSession::open(&state, 1, peer(), None).into_stream());
        assert!(stream.next().await.is_some());

        state.cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn parts_are_paced_by_live_interval() {
        let state = state(100);
        state.frames.publish(&b"x"[..]);
        let mut stream = Box::pin(StreamSession::open(&state, 1, peer(), None).into_stream());

        let start = tokio::time::Instant::now();
        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        state.settings.set_frame_interval_ms(250);
        let before = tokio::time::Instant::now();
        stream.next().await.unwrap().unwrap();
        assert!(before.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn newer_frame_replaces_older_between_parts() {
        let state = state(0);
        state.frames.publish(&b"old"[..]);
        let mut stream = Box::pin(StreamSession::open(&state, 1, peer(), None).into_stream());
        assert_eq!(stream.next().await.unwrap().unwrap(), multipart::encode_part(b"old"));

        state.frames.publish(&b"mid"[..]);
        state.frames.publish(&b"new"[..]);
        assert_eq!(stream.next().await.unwrap().unwrap(), multipart::encode_part(b"new"));
    }
}
