//! Server lifecycle: bind, serve in the background, stop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_relay_common::config::ServerConfig;
use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::LiveSettings;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::routes::{router, AppState};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// HTTP server exposing `/stream`, `/ping`, `/obs` and a landing page over a
/// shared [`FrameBuffer`].
///
/// `start` may be called again after a previous instance was stopped.
pub struct MjpegStreamServer {
    config: ServerConfig,
    frames: Arc<FrameBuffer>,
    settings: Arc<LiveSettings>,
}

impl MjpegStreamServer {
    pub fn new(config: ServerConfig, frames: Arc<FrameBuffer>, settings: Arc<LiveSettings>) -> Self {
        Self {
            config,
            frames,
            settings,
        }
    }

    /// Bind and start accepting. On error nothing is left running.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.listen_addr();
        let bind_err = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = bind_listener(&addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let cancel = CancellationToken::new();
        let active_streams = Arc::new(AtomicUsize::new(0));
        let state = Arc::new(AppState {
            frames: Arc::clone(&self.frames),
            settings: Arc::clone(&self.settings),
            cancel: cancel.clone(),
            stream_limit: (self.config.max_streams > 0)
                .then(|| Arc::new(Semaphore::new(self.config.max_streams))),
            active_streams: Arc::clone(&active_streams),
            next_conn_id: AtomicU64::new(1),
        });

        let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        info!(
            addr = %local_addr,
            max_streams = self.config.max_streams,
            "MJPEG server listening"
        );

        Ok(ServerHandle {
            local_addr,
            cancel,
            task,
            active_streams,
            shutdown_timeout: Duration::from_millis(self.config.shutdown_timeout_ms),
        })
    }
}

/// Bind with `SO_REUSEADDR` so a restart is not blocked by connections the
/// previous instance left in TIME_WAIT. A live listener on the port still
/// makes this fail.
async fn bind_listener(addr: &str) -> std::io::Result<TcpListener> {
    let mut last_err = None;
    for candidate in tokio::net::lookup_host(addr).await? {
        let socket = if candidate.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        match socket.bind(candidate) {
            Ok(()) => return socket.listen(1024),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, format!("{addr} did not resolve"))
    }))
}

/// A running server. Dropping it without calling [`stop`](Self::stop)
/// still signals shutdown but does not wait for it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
    active_streams: Arc<AtomicUsize>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address actually bound, useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of `/stream` connections currently open.
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Relaxed)
    }

    /// Close the listener, end every stream and wait (bounded by
    /// `shutdown_timeout_ms`) for in-flight connections to finish. The port
    /// is free once this returns.
    pub async fn stop(mut self) {
        info!(
            addr = %self.local_addr,
            active = self.active_streams(),
            "stopping MJPEG server"
        );
        self.cancel.cancel();

        match tokio::time::timeout(self.shutdown_timeout, &mut self.task).await {
            Ok(Ok(Ok(()))) => info!(addr = %self.local_addr, "MJPEG server stopped"),
            Ok(Ok(Err(e))) => error!(error = %e, "MJPEG server exited with error"),
            Ok(Err(e)) => error!(error = %e, "MJPEG server task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    active = self.active_streams(),
                    "connections still open after shutdown timeout, aborting"
                );
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
