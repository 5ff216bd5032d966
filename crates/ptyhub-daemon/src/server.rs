//! The event loop that owns the `SessionManager`.
//!
//! PTY threads, timers, probes and transport connections never touch session
//! state directly; they send `ManagerEvent`s here.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use ptyhub_core::SystemClock;
use ptyhub_core::TokioScheduler;
use ptyhub_ipc::Appearance;
use ptyhub_ipc::DisplaySettings;
use ptyhub_ipc::Envelope;
use ptyhub_ipc::RuntimeConfig;
use ptyhub_ipc::SessionId;
use ptyhub_ipc::SessionMessage;
use ptyhub_ipc::SharedInbound;
use ptyhub_ipc::Theme;
use ptyhub_terminal::PtyEvent;

use crate::config::DaemonConfig;
use crate::error::SessionError;
use crate::manager::CreateRequest;
use crate::manager::ManagerDeps;
use crate::manager::SessionManager;
use crate::manager::SessionTimer;
use crate::probe::BlockingPathProbe;
use crate::probe::ProbeRequest;
use crate::process::NativeProcessAdapter;
use crate::services::DesktopServices;
use crate::surface::ChannelRef;

const NOTICE_CAPACITY: usize = 64;

pub enum ManagerEvent {
    Pty {
        id: SessionId,
        event: PtyEvent,
    },
    Timer(SessionTimer),
    Probed(ProbeRequest),
    OpenIsolated {
        channel: ChannelRef,
        request: CreateRequest,
        reply: oneshot::Sender<Result<SessionId, SessionError>>,
    },
    SessionFrame {
        id: SessionId,
        message: SessionMessage,
    },
    CloseIsolated {
        id: SessionId,
    },
    AttachShared {
        connection_id: u64,
        channel: ChannelRef,
    },
    SharedFrame {
        connection_id: u64,
        inbound: SharedInbound,
    },
    DetachShared {
        connection_id: u64,
    },
    UpdateSettings(DisplaySettings),
    UpdateTheme(Theme),
    UpdateRuntimeConfig(RuntimeConfig),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

impl SessionManager {
    /// Apply one event. Returns false once the loop should stop.
    pub fn handle_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::Pty { id, event } => self.handle_pty_event(&id, event),
            ManagerEvent::Timer(timer) => self.handle_timer(timer),
            ManagerEvent::Probed(request) => self.finish_probe(request),
            ManagerEvent::OpenIsolated {
                channel,
                request,
                reply,
            } => {
                let result = self.open_isolated(channel, request);
                if let Err(Ok(id)) = reply.send(result) {
                    debug!(session_id = %id, "Connection gone before session opened");
                    self.destroy(&id);
                }
            }
            ManagerEvent::SessionFrame { id, message } => {
                // Isolated connections may only address their own session.
                if self
                    .get(&id)
                    .is_some_and(|s| !s.topology().is_shared())
                {
                    self.handle_session_message(&id, message);
                }
            }
            ManagerEvent::CloseIsolated { id } => {
                self.destroy(&id);
            }
            ManagerEvent::AttachShared {
                connection_id,
                channel,
            } => self.attach_shared_surface(connection_id, channel),
            ManagerEvent::SharedFrame {
                connection_id,
                inbound,
            } => {
                if self.is_current_surface(connection_id) {
                    self.handle_shared_message(inbound);
                }
            }
            ManagerEvent::DetachShared { connection_id } => {
                self.detach_shared_surface(connection_id)
            }
            ManagerEvent::UpdateSettings(settings) => self.update_settings(settings),
            ManagerEvent::UpdateTheme(theme) => self.update_theme(theme),
            ManagerEvent::UpdateRuntimeConfig(config) => self.update_runtime_config(config),
            ManagerEvent::Shutdown { done } => {
                self.dispose_all();
                let _ = done.send(());
                return false;
            }
        }
        true
    }
}

/// Drive `manager` until shutdown or until every sender is gone.
pub async fn run_event_loop(
    mut manager: SessionManager,
    mut events: mpsc::UnboundedReceiver<ManagerEvent>,
) {
    while let Some(event) = events.recv().await {
        if !manager.handle_event(event) {
            info!("Event loop stopped");
            return;
        }
    }
    manager.dispose_all();
    info!("Event loop closed");
}

pub struct DaemonHandle {
    events: mpsc::UnboundedSender<ManagerEvent>,
    notices: broadcast::Sender<Envelope>,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn events(&self) -> mpsc::UnboundedSender<ManagerEvent> {
        self.events.clone()
    }

    pub fn notices(&self) -> broadcast::Sender<Envelope> {
        self.notices.clone()
    }

    /// Dispose every session and wait for the loop to finish.
    pub async fn shutdown(self) {
        let (done, wait) = oneshot::channel();
        if self.events.send(ManagerEvent::Shutdown { done }).is_ok() {
            let _ = wait.await;
        }
        let _ = self.task.await;
    }
}

/// Build the production manager and spawn its loop on the current runtime.
pub fn start_daemon(config: DaemonConfig, appearance: Appearance) -> DaemonHandle {
    let runtime = tokio::runtime::Handle::current();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

    let timer_tx = events_tx.clone();
    let scheduler = TokioScheduler::new(runtime.clone(), move |timer: SessionTimer| {
        let _ = timer_tx.send(ManagerEvent::Timer(timer));
    });

    let pty_tx = events_tx.clone();
    let process = NativeProcessAdapter::new(Arc::new(move |id: SessionId, event: PtyEvent| {
        let _ = pty_tx.send(ManagerEvent::Pty { id, event });
    }));

    let deps = ManagerDeps {
        process: Box::new(process),
        services: Arc::new(DesktopServices::new(notices.clone())),
        scheduler: Arc::new(scheduler),
        probe: Arc::new(BlockingPathProbe::new(runtime.clone(), events_tx.clone())),
        clock: Arc::new(SystemClock),
    };

    info!(
        max_sessions = config.max_sessions,
        state_path = ?config.state_path,
        "Starting session manager"
    );
    let manager = SessionManager::new(config, appearance, deps);
    let task = runtime.spawn(run_event_loop(manager, events_rx));

    DaemonHandle {
        events: events_tx,
        notices,
        task,
    }
}
