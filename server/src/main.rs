use std::path::PathBuf;
use std::sync::Arc;

use frame_relay_common::config::Config;
use frame_relay_common::frame::FrameBuffer;
use frame_relay_common::settings::LiveSettings;
use frame_relay_producer::Source;
use frame_relay_server::control;
use frame_relay_server::MjpegStreamServer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        addr = config.server.listen_addr(),
        source = config.source.mode,
        frame_interval_ms = config.stream.frame_interval_ms,
        max_streams = config.server.max_streams,
        "starting frame-relay"
    );

    let source = match Source::from_config(&config.source) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid frame source");
            std::process::exit(1);
        }
    };

    let frames = Arc::new(FrameBuffer::new());
    let settings = Arc::new(LiveSettings::from_config(&config.stream, &config.source));

    let server = MjpegStreamServer::new(config.server.clone(), Arc::clone(&frames), Arc::clone(&settings));
    let handle = match server.start().await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to start MJPEG server");
            std::process::exit(1);
        }
    };

    let addr = handle.local_addr();
    info!(
        stream = format!("http://{addr}/stream"),
        obs = format!("http://{addr}/obs"),
        "ready"
    );

    let cancel = CancellationToken::new();
    let producer = {
        let run = source.run(Arc::clone(&frames), Arc::clone(&settings), cancel.clone());
        tokio::spawn(async move {
            // The server keeps serving the last frame if the source dies.
            if let Err(e) = run.await {
                error!(error = %e, "frame source failed");
            }
        })
    };
    let console = tokio::spawn(control::run_console(
        control::spawn_stdin_reader(),
        Arc::clone(&settings),
        Arc::clone(&frames),
        cancel.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");

    cancel.cancel();
    handle.stop().await;

    if let Err(e) = producer.await {
        error!(error = %e, "frame source task panicked");
    }
    let _ = console.await;
    info!("frame-relay stopped");
}
