//! Session registry and lifecycle supervisor.
//!
//! `SessionManager` is the only owner of session state. It is driven from a
//! single event loop, so teardown idempotency rests on registry removal:
//! whichever path removes a session first does the teardown, every later
//! attempt finds nothing.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use ptyhub_common::home_dir;
use ptyhub_core::extract_notification;
use ptyhub_core::extract_working_directory;
use ptyhub_core::resolve_link_path;
use ptyhub_core::Clock;
use ptyhub_core::ExistenceCache;
use ptyhub_core::IndexPool;
use ptyhub_core::Scheduler;
use ptyhub_ipc::Appearance;
use ptyhub_ipc::DisplaySettings;
use ptyhub_ipc::Envelope;
use ptyhub_ipc::OutboundMessage;
use ptyhub_ipc::PathExists;
use ptyhub_ipc::RuntimeConfig;
use ptyhub_ipc::SessionId;
use ptyhub_ipc::TabDescriptor;
use ptyhub_ipc::TabStateStore;
use ptyhub_ipc::Theme;
use ptyhub_terminal::PtyError;
use ptyhub_terminal::PtyEvent;

use crate::config::DaemonConfig;
use crate::error::SessionError;
use crate::probe::PathProbe;
use crate::probe::ProbeEntry;
use crate::probe::ProbePurpose;
use crate::probe::ProbeRequest;
use crate::process::ProcessAdapter;
use crate::services::HostServices;
use crate::session::Session;
use crate::session::Topology;
use crate::surface::ChannelRef;

/// OS error number for "Input/output error", raised when the PTY slave closes.
const EIO: i32 = 5;
const EXPECTED_CLOSE_MARKERS: [&str; 4] = ["input/output error", "eio", "read eof", "broken pipe"];

/// Per-session timers, delivered back through the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTimer {
    ReadyTimeout(SessionId),
    ExitGrace(SessionId),
}

/// Collaborators the manager drives. Swapped for recording fakes in tests.
pub struct ManagerDeps {
    pub process: Box<dyn ProcessAdapter>,
    pub services: Arc<dyn HostServices>,
    pub scheduler: Arc<dyn Scheduler<SessionTimer>>,
    pub probe: Arc<dyn PathProbe>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub title: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub cwd: Option<PathBuf>,
    /// Shared tabs only: make this the active tab.
    pub active: bool,
}

impl CreateRequest {
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// The one multi-tab surface, if connected.
#[derive(Default)]
struct SharedSurface {
    connection: Option<(u64, ChannelRef)>,
    visible: bool,
    /// Tab order as shown on the surface.
    tabs: Vec<SessionId>,
}

impl SharedSurface {
    fn channel(&self) -> Option<&ChannelRef> {
        self.connection.as_ref().map(|(_, channel)| channel)
    }

    fn post(&self, message: OutboundMessage) {
        if let Some(channel) = self.channel() {
            if let Err(e) = channel.post(Envelope::direct(message)) {
                debug!(error = %e, "Shared surface unreachable");
            }
        }
    }
}

pub struct SessionManager {
    config: DaemonConfig,
    process: Box<dyn ProcessAdapter>,
    services: Arc<dyn HostServices>,
    scheduler: Arc<dyn Scheduler<SessionTimer>>,
    probe: Arc<dyn PathProbe>,
    sessions: HashMap<SessionId, Session>,
    indices: IndexPool,
    appearance: Appearance,
    shared: SharedSurface,
    tab_store: Option<TabStateStore>,
    path_cache: ExistenceCache,
}

impl SessionManager {
    pub fn new(config: DaemonConfig, appearance: Appearance, deps: ManagerDeps) -> Self {
        let tab_store = config.state_path.clone().map(TabStateStore::new);
        let path_cache =
            ExistenceCache::with_clock(config.path_cache_size, config.path_cache_ttl, deps.clock);
        Self {
            config,
            process: deps.process,
            services: deps.services,
            scheduler: deps.scheduler,
            probe: deps.probe,
            sessions: HashMap::new(),
            indices: IndexPool::new(),
            appearance,
            shared: SharedSurface::default(),
            tab_store,
            path_cache,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn shared_tabs(&self) -> &[SessionId] {
        &self.shared.tabs
    }

    pub fn appearance(&self) -> &Appearance {
        &self.appearance
    }

    pub fn is_surface_visible(&self) -> bool {
        self.shared.visible
    }

    /// Register a session and start its process.
    ///
    /// On spawn failure nothing is registered and the index is released.
    pub fn create_session(
        &mut self,
        topology: Topology,
        request: CreateRequest,
    ) -> Result<SessionId, SessionError> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(SessionError::LimitReached(self.config.max_sessions));
        }

        let index = self.indices.allocate();
        let id = SessionId::new(Uuid::new_v4().to_string());

        let mut spawn = self.config.spawn_config();
        if let Some(cwd) = request.cwd {
            spawn.cwd = Some(cwd);
        }
        spawn.cols = request.cols.unwrap_or(spawn.cols);
        spawn.rows = request.rows.unwrap_or(spawn.rows);

        if let Err(e) = self.process.spawn(&id, &spawn) {
            self.indices.release(index);
            warn!(index, error = %e, "Failed to spawn terminal process");
            return Err(SessionError::Spawn(e));
        }

        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Terminal {}", index));
        let shared = topology.is_shared();

        let mut session = Session::new(
            id.clone(),
            index,
            title,
            topology,
            self.config.max_pending_chunks,
        );
        session.ready_timer = Some(self.scheduler.schedule(
            self.config.ready_timeout,
            SessionTimer::ReadyTimeout(id.clone()),
        ));

        if shared {
            if request.active {
                self.deactivate_tabs();
            }
            session.active = request.active;
            self.shared.post(OutboundMessage::AddTab {
                tab_id: id.clone(),
                title: session.title.clone(),
                active: session.active,
            });
            self.shared.tabs.push(id.clone());
        }

        info!(session_id = %id, index, shared, "Session created");
        self.sessions.insert(id.clone(), session);
        if shared {
            self.persist_tabs();
        }
        Ok(id)
    }

    /// Complete the handshake: resize to the surface's measurements, then push
    /// settings, theme, runtime config and the buffered output, in that order.
    pub fn mark_ready(&mut self, id: &SessionId, cols: u16, rows: u16) {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!(session_id = %id, "Ready for unknown session");
            return;
        };

        session.ready_timer = None;
        if let Err(e) = self.process.resize(id, cols, rows) {
            warn!(session_id = %id, cols, rows, error = %e, "Resize on ready failed");
        }
        if session.ready {
            return;
        }

        let pending: Vec<String> = session.queue.drain().collect();
        deliver(
            &self.shared,
            session,
            OutboundMessage::SettingsUpdate {
                settings: self.appearance.settings.clone(),
            },
        );
        deliver(
            &self.shared,
            session,
            OutboundMessage::ThemeUpdate {
                theme: self.appearance.theme.clone(),
            },
        );
        deliver(
            &self.shared,
            session,
            OutboundMessage::RuntimeConfigUpdate {
                config: self.appearance.runtime.clone(),
            },
        );
        let flushed = pending.len();
        for data in pending {
            deliver(&self.shared, session, OutboundMessage::Output { data });
        }
        session.ready = true;
        info!(session_id = %id, cols, rows, flushed, "Session ready");
    }

    /// Deliver to a ready session. Absent or not-ready sessions drop the message.
    pub fn post_to_session(&self, id: &SessionId, message: OutboundMessage) {
        match self.sessions.get(id) {
            Some(session) if session.ready => deliver(&self.shared, session, message),
            Some(_) => debug!(session_id = %id, kind = message.kind(), "Session not ready, dropping"),
            None => debug!(session_id = %id, kind = message.kind(), "Session gone, dropping"),
        }
    }

    /// Tear a session down. Returns false if it was already gone.
    pub fn destroy(&mut self, id: &SessionId) -> bool {
        self.teardown(id, true)
    }

    fn teardown(&mut self, id: &SessionId, persist: bool) -> bool {
        let Some(mut session) = self.sessions.remove(id) else {
            debug!(session_id = %id, "Session already removed");
            return false;
        };

        self.indices.release(session.index);
        session.cancel_timers();
        self.process.kill(id);

        match &session.topology {
            Topology::Isolated { channel } => channel.dispose(),
            Topology::Shared => {
                self.shared.tabs.retain(|tab| tab != id);
                self.shared
                    .post(OutboundMessage::RemoveTab { tab_id: id.clone() });

                if session.active {
                    self.activate_fallback_tab();
                }
                if self.shared.tabs.is_empty() && self.shared.visible {
                    self.shared.post(OutboundMessage::HideSurface);
                    self.shared.visible = false;
                }
                if persist {
                    self.persist_tabs();
                }
            }
        }

        info!(session_id = %id, index = session.index, "Session destroyed");
        true
    }

    pub fn handle_pty_event(&mut self, id: &SessionId, event: PtyEvent) {
        match event {
            PtyEvent::Data(data) => self.on_output(id, data),
            PtyEvent::Exit(code) => self.on_exit(id, code),
            PtyEvent::Error(err) => self.on_error(id, err),
        }
    }

    fn on_output(&mut self, id: &SessionId, data: String) {
        let Some(session) = self.sessions.get_mut(id) else {
            debug!(session_id = %id, "Output for removed session");
            return;
        };

        let cwd_update = match extract_working_directory(&data) {
            Some(cwd) if session.cwd.as_deref() != Some(cwd.as_str()) => {
                session.cwd = Some(cwd.clone());
                Some(cwd)
            }
            _ => None,
        };
        let notification = extract_notification(&data);

        if session.ready {
            deliver(&self.shared, session, OutboundMessage::Output { data });
            if let Some(cwd) = cwd_update {
                deliver(&self.shared, session, OutboundMessage::CwdUpdate { cwd });
            }
        } else {
            session.buffer(data);
        }

        if let Some(message) = notification {
            self.services.notify(&session.title, &message);
        }
    }

    fn on_exit(&mut self, id: &SessionId, code: u32) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };

        info!(session_id = %id, code, "Terminal process exited");
        if session.ready {
            deliver(&self.shared, session, OutboundMessage::Exit { code });
        }
        if session.exit_timer.is_none() {
            session.exit_timer = Some(
                self.scheduler
                    .schedule(self.config.exit_grace, SessionTimer::ExitGrace(id.clone())),
            );
        }
    }

    fn on_error(&mut self, id: &SessionId, err: PtyError) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };

        if is_expected_close(&err) {
            if session.is_exiting() {
                debug!(session_id = %id, error = %err, "Close after exit, teardown already scheduled");
                return;
            }
            debug!(session_id = %id, error = %err, "Terminal closed");
        } else {
            error!(session_id = %id, error = %err, "Terminal process failed");
            self.services
                .show_error(&format!("Terminal '{}' failed: {}", session.title, err));
        }
        self.destroy(id);
    }

    pub fn handle_timer(&mut self, timer: SessionTimer) {
        match timer {
            SessionTimer::ReadyTimeout(id) => {
                let Some(session) = self.sessions.get(&id) else {
                    return;
                };
                if session.ready {
                    return;
                }
                let err = SessionError::ReadyTimeout(session.title.clone());
                warn!(session_id = %id, timeout = ?self.config.ready_timeout, "Handshake timed out");
                self.services.show_error(&err.to_string());
                self.destroy(&id);
            }
            SessionTimer::ExitGrace(id) => {
                self.destroy(&id);
            }
        }
    }

    pub fn update_settings(&mut self, settings: DisplaySettings) {
        self.appearance.settings = settings.clone();
        self.broadcast(OutboundMessage::SettingsUpdate { settings });
    }

    pub fn update_theme(&mut self, theme: Theme) {
        self.appearance.theme = theme.clone();
        self.broadcast(OutboundMessage::ThemeUpdate { theme });
    }

    pub fn update_runtime_config(&mut self, config: RuntimeConfig) {
        self.appearance.runtime = config.clone();
        self.broadcast(OutboundMessage::RuntimeConfigUpdate { config });
    }

    fn broadcast(&self, message: OutboundMessage) {
        for id in self.sessions.keys() {
            self.post_to_session(id, message.clone());
        }
    }

    /// Kill every process, cancel every timer and persist the shared layout.
    pub fn dispose_all(&mut self) {
        if !self.shared.tabs.is_empty() {
            self.persist_tabs();
        }

        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            session.cancel_timers();
            if let Topology::Isolated { channel } = &session.topology {
                channel.dispose();
            }
        }
        self.process.dispose_all();
        self.indices.clear();
        self.shared.tabs.clear();
        self.shared.visible = false;
        if let Some((_, channel)) = self.shared.connection.take() {
            channel.dispose();
        }
        info!(count, "All sessions disposed");
    }

    /// Open an isolated session bound to `channel`. Failures are surfaced to
    /// the user and returned so the transport can close the connection.
    pub fn open_isolated(
        &mut self,
        channel: ChannelRef,
        request: CreateRequest,
    ) -> Result<SessionId, SessionError> {
        self.create_session(Topology::Isolated { channel }, request)
            .inspect_err(|e| self.services.show_error(&e.to_string()))
    }

    pub(crate) fn open_shared_tab(&mut self, title: Option<String>, active: bool) -> Option<SessionId> {
        let request = CreateRequest {
            title,
            active,
            ..CreateRequest::default()
        };
        match self.create_session(Topology::Shared, request) {
            Ok(id) => Some(id),
            Err(e) => {
                self.services.show_error(&e.to_string());
                None
            }
        }
    }

    /// Attach the shared surface. A newer connection replaces the older one.
    pub fn attach_shared_surface(&mut self, connection_id: u64, channel: ChannelRef) {
        if let Some((previous, old)) = self.shared.connection.replace((connection_id, channel)) {
            info!(previous, connection_id, "Shared surface replaced");
            old.dispose();
        }
        self.shared.visible = true;
    }

    pub fn is_current_surface(&self, connection_id: u64) -> bool {
        matches!(self.shared.connection, Some((current, _)) if current == connection_id)
    }

    /// The shared surface went away: persist its layout, then drop its tabs.
    pub fn detach_shared_surface(&mut self, connection_id: u64) {
        if !self.is_current_surface(connection_id) {
            debug!(connection_id, "Stale shared surface closed");
            return;
        }

        self.persist_tabs();
        self.shared.connection = None;
        self.shared.visible = false;
        for id in self.shared.tabs.clone() {
            self.teardown(&id, false);
        }
        info!(connection_id, "Shared surface detached");
    }

    /// `surface-ready`: resend live tabs, else restore saved ones, else open one.
    pub(crate) fn restore_tabs(&mut self) {
        if !self.shared.tabs.is_empty() {
            for id in self.shared.tabs.clone() {
                let timer = self.scheduler.schedule(
                    self.config.ready_timeout,
                    SessionTimer::ReadyTimeout(id.clone()),
                );
                let Some(session) = self.sessions.get_mut(&id) else {
                    continue;
                };
                // The new surface has fresh views that need the full handshake.
                session.ready = false;
                session.ready_timer = Some(timer);
                let message = OutboundMessage::AddTab {
                    tab_id: id.clone(),
                    title: session.title.clone(),
                    active: session.active,
                };
                self.shared.post(message);
            }
            return;
        }

        let saved = self
            .tab_store
            .as_ref()
            .map(TabStateStore::load)
            .unwrap_or_default();
        if saved.is_empty() {
            self.open_shared_tab(None, true);
            return;
        }

        info!(count = saved.len(), "Restoring saved tabs");
        let any_active = saved.iter().any(|tab| tab.active);
        for (position, tab) in saved.into_iter().enumerate() {
            let active = tab.active || (!any_active && position == 0);
            self.open_shared_tab(Some(tab.title), active);
        }
    }

    pub(crate) fn activate_tab(&mut self, id: &SessionId, cols: u16, rows: u16) {
        if !self.sessions.get(id).is_some_and(|s| s.topology.is_shared()) {
            debug!(session_id = %id, "Activate for unknown tab");
            return;
        }
        self.deactivate_tabs();
        if let Some(session) = self.sessions.get_mut(id) {
            session.active = true;
        }
        if let Err(e) = self.process.resize(id, cols, rows) {
            warn!(session_id = %id, cols, rows, error = %e, "Resize on activate failed");
        }
        self.persist_tabs();
    }

    pub(crate) fn rename_session(&mut self, id: &SessionId, title: String) {
        let title = title.trim().to_string();
        if title.is_empty() {
            return;
        }
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        session.title = title.clone();
        if session.topology.is_shared() {
            self.shared.post(OutboundMessage::RenameTab {
                tab_id: id.clone(),
                title,
            });
            self.persist_tabs();
        }
    }

    pub(crate) fn set_surface_visible(&mut self, visible: bool) {
        self.shared.visible = visible;
    }

    /// Hide a visible shared surface, or ask a hidden one to take focus.
    pub(crate) fn toggle_surface(&mut self) {
        if self.shared.channel().is_none() {
            return;
        }
        if self.shared.visible {
            self.shared.post(OutboundMessage::HideSurface);
            self.shared.visible = false;
        } else {
            self.shared.post(OutboundMessage::FocusRequest);
        }
    }

    pub(crate) fn bell(&self, id: &SessionId) {
        if !self.appearance.runtime.bell_notifications {
            return;
        }
        if let Some(session) = self.sessions.get(id) {
            self.services.bell(&session.title);
        }
    }

    pub(crate) fn write_input(&mut self, id: &SessionId, data: &str) {
        if !self.sessions.contains_key(id) {
            return;
        }
        if let Err(e) = self.process.write(id, data.as_bytes()) {
            warn!(session_id = %id, error = %e, "Input write failed");
        }
    }

    pub(crate) fn resize(&mut self, id: &SessionId, cols: u16, rows: u16) {
        if !self.sessions.contains_key(id) || cols == 0 || rows == 0 {
            return;
        }
        if let Err(e) = self.process.resize(id, cols, rows) {
            warn!(session_id = %id, cols, rows, error = %e, "Resize failed");
        }
    }

    pub(crate) fn services(&self) -> &dyn HostServices {
        self.services.as_ref()
    }

    /// Resolve `paths` against the session cwd and answer from the cache
    /// where possible; the rest go to the probe.
    pub(crate) fn check_paths(&mut self, id: &SessionId, batch_id: u64, paths: Vec<String>) {
        let Some(cwd) = self.sessions.get(id).map(|s| s.cwd.clone()) else {
            return;
        };
        let home = home_dir();

        let entries = paths
            .into_iter()
            .map(|requested| {
                let resolved =
                    resolve_link_path(&requested, cwd.as_deref().map(Path::new), home.as_deref());
                let exists = self.path_cache.get(&resolved.to_string_lossy());
                ProbeEntry {
                    requested,
                    resolved,
                    exists,
                    cached: exists.is_some(),
                }
            })
            .collect();

        let request = ProbeRequest {
            session_id: id.clone(),
            purpose: ProbePurpose::Batch { batch_id },
            entries,
        };
        if request.is_complete() {
            self.finish_probe(request);
        } else {
            debug!(session_id = %id, batch_id, "Probing paths");
            self.probe.probe(request);
        }
    }

    pub(crate) fn open_file(
        &mut self,
        id: &SessionId,
        path: String,
        line: Option<u32>,
        column: Option<u32>,
    ) {
        let Some(cwd) = self.sessions.get(id).map(|s| s.cwd.clone()) else {
            return;
        };
        let home = home_dir();
        let resolved = resolve_link_path(&path, cwd.as_deref().map(Path::new), home.as_deref());
        self.probe.probe(ProbeRequest {
            session_id: id.clone(),
            purpose: ProbePurpose::OpenFile { line, column },
            entries: vec![ProbeEntry {
                requested: path,
                resolved,
                exists: None,
                cached: false,
            }],
        });
    }

    /// A probe came back. The session may have gone away in the meantime.
    pub fn finish_probe(&mut self, request: ProbeRequest) {
        for entry in request.entries.iter().filter(|e| !e.cached) {
            if let Some(exists) = entry.exists {
                self.path_cache
                    .insert(entry.resolved.to_string_lossy().into_owned(), exists);
            }
        }

        if !self.sessions.contains_key(&request.session_id) {
            debug!(session_id = %request.session_id, "Session gone before probe finished");
            return;
        }

        match request.purpose {
            ProbePurpose::Batch { batch_id } => {
                let results = request
                    .entries
                    .into_iter()
                    .map(|entry| PathExists {
                        path: entry.requested,
                        exists: entry.exists.unwrap_or(false),
                    })
                    .collect();
                self.post_to_session(
                    &request.session_id,
                    OutboundMessage::BatchResult { batch_id, results },
                );
            }
            ProbePurpose::OpenFile { line, column } => match request.entries.first() {
                Some(entry) if entry.exists == Some(true) => {
                    self.services.open_file(&entry.resolved, line, column);
                }
                Some(entry) => {
                    warn!(path = %entry.resolved.display(), "File link target does not exist");
                }
                None => {}
            },
        }
    }

    fn deactivate_tabs(&mut self) {
        for id in &self.shared.tabs {
            if let Some(session) = self.sessions.get_mut(id) {
                session.active = false;
            }
        }
    }

    fn activate_fallback_tab(&mut self) {
        let Some(next) = self.shared.tabs.last().cloned() else {
            return;
        };
        if let Some(session) = self.sessions.get_mut(&next) {
            session.active = true;
        }
        self.shared
            .post(OutboundMessage::ActivateTab { tab_id: next });
    }

    fn persist_tabs(&self) {
        let Some(store) = &self.tab_store else {
            return;
        };
        let tabs: Vec<TabDescriptor> = self
            .shared
            .tabs
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|session| TabDescriptor {
                id: session.id.to_string(),
                title: session.title.clone(),
                active: session.active,
            })
            .collect();
        if let Err(e) = store.save(&tabs) {
            warn!(error = %e, "Failed to persist tab state");
        }
    }
}

/// Send without the readiness gate. Errors from a torn-down surface are
/// swallowed here.
fn deliver(shared: &SharedSurface, session: &Session, message: OutboundMessage) {
    let (channel, envelope) = match &session.topology {
        Topology::Isolated { channel } => (Some(channel), Envelope::direct(message)),
        Topology::Shared => (
            shared.channel(),
            Envelope::for_tab(session.id.clone(), message),
        ),
    };
    let Some(channel) = channel else {
        debug!(session_id = %session.id, "No surface attached");
        return;
    };
    if let Err(e) = channel.post(envelope) {
        debug!(session_id = %session.id, error = %e, "Surface unreachable");
    }
}

/// An I/O-closed error consistent with the shell exiting normally.
pub fn is_expected_close(err: &PtyError) -> bool {
    if err.raw_os_error() == Some(EIO) {
        return true;
    }
    let reason = err.reason().to_ascii_lowercase();
    EXPECTED_CLOSE_MARKERS
        .iter()
        .any(|marker| reason.contains(marker))
}
