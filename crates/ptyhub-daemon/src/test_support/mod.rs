//! Recording fakes for driving a `SessionManager` without processes,
//! sockets or real time.

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use url::Url;

use ptyhub_common::mutex_lock_or_recover;
use ptyhub_core::ManualScheduler;
use ptyhub_ipc::Appearance;
use ptyhub_ipc::Envelope;
use ptyhub_ipc::OutboundMessage;
use ptyhub_ipc::SessionId;
use ptyhub_terminal::PtyError;
use ptyhub_terminal::PtyEvent;
use ptyhub_terminal::SpawnConfig;
use ptyhub_terminal::SpawnErrorKind;

use crate::config::DaemonConfig;
use crate::manager::CreateRequest;
use crate::manager::ManagerDeps;
use crate::manager::SessionManager;
use crate::manager::SessionTimer;
use crate::probe::PathProbe;
use crate::probe::ProbeRequest;
use crate::process::ProcessAdapter;
use crate::services::HostServices;
use crate::session::Topology;
use crate::surface::ChannelError;
use crate::surface::UiChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCall {
    Spawn { id: SessionId, config: SpawnConfig },
    Write { id: SessionId, data: Vec<u8> },
    Resize { id: SessionId, cols: u16, rows: u16 },
    Kill { id: SessionId },
    DisposeAll,
}

#[derive(Clone, Default)]
pub struct RecordingProcess {
    calls: Arc<Mutex<Vec<ProcessCall>>>,
    fail_spawns: Arc<AtomicBool>,
}

impl RecordingProcess {
    pub fn calls(&self) -> Vec<ProcessCall> {
        mutex_lock_or_recover(&self.calls).clone()
    }

    /// Make every following spawn fail with a not-found error.
    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.count(|call| matches!(call, ProcessCall::Spawn { .. }))
    }

    pub fn kill_count(&self, id: &SessionId) -> usize {
        self.count(|call| matches!(call, ProcessCall::Kill { id: killed } if killed == id))
    }

    pub fn resizes(&self, id: &SessionId) -> Vec<(u16, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProcessCall::Resize {
                    id: resized,
                    cols,
                    rows,
                } if &resized == id => Some((cols, rows)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self, id: &SessionId) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProcessCall::Write { id: written, data } if &written == id => Some(data),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&ProcessCall) -> bool) -> usize {
        mutex_lock_or_recover(&self.calls)
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn record(&self, call: ProcessCall) {
        mutex_lock_or_recover(&self.calls).push(call);
    }
}

impl ProcessAdapter for RecordingProcess {
    fn spawn(&mut self, id: &SessionId, config: &SpawnConfig) -> Result<Option<u32>, PtyError> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(PtyError::Spawn {
                reason: "No such file or directory (os error 2)".to_string(),
                kind: SpawnErrorKind::NotFound,
            });
        }
        self.record(ProcessCall::Spawn {
            id: id.clone(),
            config: config.clone(),
        });
        Ok(Some(4242))
    }

    fn write(&mut self, id: &SessionId, data: &[u8]) -> Result<(), PtyError> {
        self.record(ProcessCall::Write {
            id: id.clone(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn resize(&mut self, id: &SessionId, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.record(ProcessCall::Resize {
            id: id.clone(),
            cols,
            rows,
        });
        Ok(())
    }

    fn kill(&mut self, id: &SessionId) {
        self.record(ProcessCall::Kill { id: id.clone() });
    }

    fn dispose_all(&mut self) {
        self.record(ProcessCall::DisposeAll);
    }
}

#[derive(Clone, Default)]
pub struct RecordingChannel {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
    disposed: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub fn envelopes(&self) -> Vec<Envelope> {
        mutex_lock_or_recover(&self.envelopes).clone()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.envelopes().into_iter().map(|e| e.message).collect()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.envelopes().iter().map(|e| e.message.kind()).collect()
    }

    /// Messages addressed to one tab of a shared surface.
    pub fn messages_for(&self, tab: &SessionId) -> Vec<OutboundMessage> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.tab_id.as_ref() == Some(tab))
            .map(|e| e.message)
            .collect()
    }

    pub fn clear(&self) {
        mutex_lock_or_recover(&self.envelopes).clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl UiChannel for RecordingChannel {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError> {
        if self.is_disposed() {
            return Err(ChannelError::Closed);
        }
        mutex_lock_or_recover(&self.envelopes).push(envelope);
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceLog {
    pub errors: Vec<String>,
    pub notifications: Vec<(String, String)>,
    pub bells: Vec<String>,
    pub opened_files: Vec<(PathBuf, Option<u32>, Option<u32>)>,
    pub opened_urls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct RecordingServices {
    log: Arc<Mutex<ServiceLog>>,
}

impl RecordingServices {
    pub fn log(&self) -> ServiceLog {
        mutex_lock_or_recover(&self.log).clone()
    }
}

impl HostServices for RecordingServices {
    fn show_error(&self, message: &str) {
        mutex_lock_or_recover(&self.log)
            .errors
            .push(message.to_string());
    }

    fn notify(&self, title: &str, message: &str) {
        mutex_lock_or_recover(&self.log)
            .notifications
            .push((title.to_string(), message.to_string()));
    }

    fn bell(&self, title: &str) {
        mutex_lock_or_recover(&self.log)
            .bells
            .push(title.to_string());
    }

    fn open_file(&self, path: &Path, line: Option<u32>, column: Option<u32>) {
        mutex_lock_or_recover(&self.log)
            .opened_files
            .push((path.to_path_buf(), line, column));
    }

    fn open_url(&self, url: &Url) {
        mutex_lock_or_recover(&self.log)
            .opened_urls
            .push(url.to_string());
    }
}

/// Holds probe requests until the test decides what exists.
#[derive(Clone, Default)]
pub struct RecordingProbe {
    requests: Arc<Mutex<Vec<ProbeRequest>>>,
}

impl RecordingProbe {
    pub fn take(&self) -> Vec<ProbeRequest> {
        std::mem::take(&mut *mutex_lock_or_recover(&self.requests))
    }

    pub fn pending(&self) -> usize {
        mutex_lock_or_recover(&self.requests).len()
    }
}

impl PathProbe for RecordingProbe {
    fn probe(&self, request: ProbeRequest) {
        mutex_lock_or_recover(&self.requests).push(request);
    }
}

/// Settings with fixed timing and no persistence, independent of the environment.
pub fn test_config() -> DaemonConfig {
    DaemonConfig::from_env()
        .with_max_sessions(32)
        .with_max_pending_chunks(1000)
        .with_ready_timeout(Duration::from_secs(10))
        .with_exit_grace(Duration::from_secs(1))
        .with_path_cache(500, Duration::from_secs(30))
        .with_state_path(None)
}

/// A manager wired to recording fakes and a manual clock.
pub struct Harness {
    pub manager: SessionManager,
    pub process: RecordingProcess,
    pub services: RecordingServices,
    pub scheduler: Arc<ManualScheduler<SessionTimer>>,
    pub probe: RecordingProbe,
}

impl Harness {
    pub fn new(config: DaemonConfig) -> Self {
        Self::with_appearance(config, Appearance::default())
    }

    pub fn with_appearance(config: DaemonConfig, appearance: Appearance) -> Self {
        let process = RecordingProcess::default();
        let services = RecordingServices::default();
        let scheduler = Arc::new(ManualScheduler::default());
        let probe = RecordingProbe::default();

        let deps = ManagerDeps {
            process: Box::new(process.clone()),
            services: Arc::new(services.clone()),
            scheduler: scheduler.clone(),
            probe: Arc::new(probe.clone()),
            clock: Arc::new(scheduler.clock().clone()),
        };

        Self {
            manager: SessionManager::new(config, appearance, deps),
            process,
            services,
            scheduler,
            probe,
        }
    }

    /// Move time forward, firing due timers into the manager.
    pub fn advance(&mut self, by: Duration) {
        for timer in self.scheduler.advance(by) {
            self.manager.handle_timer(timer);
        }
    }

    pub fn open_isolated(
        &mut self,
        request: CreateRequest,
    ) -> Result<(SessionId, RecordingChannel), crate::error::SessionError> {
        let channel = RecordingChannel::default();
        let id = self.manager.create_session(
            Topology::Isolated {
                channel: Arc::new(channel.clone()),
            },
            request,
        )?;
        Ok((id, channel))
    }

    pub fn attach_shared(&mut self, connection_id: u64) -> RecordingChannel {
        let channel = RecordingChannel::default();
        self.manager
            .attach_shared_surface(connection_id, Arc::new(channel.clone()));
        channel
    }

    pub fn output(&mut self, id: &SessionId, data: &str) {
        self.manager
            .handle_pty_event(id, PtyEvent::Data(data.to_string()));
    }

    /// Answer outstanding probes with `exists`.
    pub fn complete_probes(&mut self, exists: impl Fn(&Path) -> bool) {
        for request in self.probe.take() {
            self.manager.finish_probe(request.complete(&exists));
        }
    }
}
