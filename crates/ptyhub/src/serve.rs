//! `ptyhub serve`: bind, start the session manager, serve until a signal.

use tokio::sync::watch;
use tracing::info;

use ptyhub_daemon::start_daemon;
use ptyhub_daemon::transport::websocket::bind_listener;
use ptyhub_daemon::transport::websocket::format_ws_url;
use ptyhub_daemon::transport::websocket::serve;
use ptyhub_daemon::DaemonConfig;
use ptyhub_daemon::DaemonError;
use ptyhub_ipc::Appearance;

pub async fn run(config: DaemonConfig, appearance: Appearance) -> Result<(), DaemonError> {
    let (listener, addr) = bind_listener(&config.listen, config.allow_remote)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let _signals = install_signal_handler(&shutdown_tx)?;

    let daemon = start_daemon(config, appearance);
    info!(url = %format_ws_url(&addr), pid = std::process::id(), "ptyhub ready");

    let result = serve(listener, daemon.events(), daemon.notices(), shutdown_rx).await;
    daemon.shutdown().await;
    info!("ptyhub stopped");
    result
}

#[cfg(unix)]
fn install_signal_handler(
    shutdown: &watch::Sender<bool>,
) -> Result<ptyhub_daemon::SignalHandler, DaemonError> {
    ptyhub_daemon::SignalHandler::setup(shutdown.clone())
}

#[cfg(not(unix))]
fn install_signal_handler(shutdown: &watch::Sender<bool>) -> Result<(), DaemonError> {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating graceful shutdown");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
