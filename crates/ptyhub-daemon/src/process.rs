//! Process adapter port and its native PTY implementation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::info;

use ptyhub_common::home_dir;
use ptyhub_ipc::SessionId;
use ptyhub_terminal::build_environment;
use ptyhub_terminal::resolve_cwd;
use ptyhub_terminal::resolve_shell;
use ptyhub_terminal::PtyError;
use ptyhub_terminal::PtyEvent;
use ptyhub_terminal::PtyHandle;
use ptyhub_terminal::SpawnConfig;

/// Everything the registry needs from the OS process layer.
///
/// Output, exit and error signals for a spawned session arrive out of band
/// (for the native adapter, through the sink it was built with).
pub trait ProcessAdapter: Send {
    fn spawn(&mut self, id: &SessionId, config: &SpawnConfig) -> Result<Option<u32>, PtyError>;
    fn write(&mut self, id: &SessionId, data: &[u8]) -> Result<(), PtyError>;
    fn resize(&mut self, id: &SessionId, cols: u16, rows: u16) -> Result<(), PtyError>;
    /// Kill the process if it is still tracked. Safe to call for dead or unknown ids.
    fn kill(&mut self, id: &SessionId);
    fn dispose_all(&mut self);
}

pub type ProcessEventSink = Arc<dyn Fn(SessionId, PtyEvent) + Send + Sync>;

pub struct NativeProcessAdapter {
    handles: HashMap<SessionId, PtyHandle>,
    sink: ProcessEventSink,
}

impl NativeProcessAdapter {
    pub fn new(sink: ProcessEventSink) -> Self {
        Self {
            handles: HashMap::new(),
            sink,
        }
    }
}

impl ProcessAdapter for NativeProcessAdapter {
    fn spawn(&mut self, id: &SessionId, config: &SpawnConfig) -> Result<Option<u32>, PtyError> {
        let shell = resolve_shell(config.shell.as_deref(), |key| std::env::var(key).ok());
        let cwd = resolve_cwd(config.cwd.as_deref(), home_dir());
        let env = build_environment(std::env::vars_os(), &config.env);

        let session_sink = Arc::clone(&self.sink);
        let session_id = id.clone();
        let handle = PtyHandle::spawn(
            &shell,
            &config.args,
            &cwd,
            env,
            config.cols,
            config.rows,
            Arc::new(move |event: PtyEvent| session_sink(session_id.clone(), event)),
        )?;

        let pid = handle.pid();
        info!(
            session_id = %id,
            shell = %shell,
            cwd = %cwd.display(),
            pid = ?pid,
            "Spawned terminal process"
        );
        self.handles.insert(id.clone(), handle);
        Ok(pid)
    }

    fn write(&mut self, id: &SessionId, data: &[u8]) -> Result<(), PtyError> {
        match self.handles.get(id) {
            Some(handle) => handle.write(data),
            None => Err(PtyError::Write {
                reason: format!("no process for session {}", id),
            }),
        }
    }

    fn resize(&mut self, id: &SessionId, cols: u16, rows: u16) -> Result<(), PtyError> {
        match self.handles.get_mut(id) {
            Some(handle) => handle.resize(cols, rows),
            None => Err(PtyError::Resize {
                reason: format!("no process for session {}", id),
            }),
        }
    }

    fn kill(&mut self, id: &SessionId) {
        if let Some(mut handle) = self.handles.remove(id) {
            debug!(session_id = %id, "Killing terminal process");
            handle.kill();
        }
    }

    fn dispose_all(&mut self) {
        for (id, mut handle) in self.handles.drain() {
            debug!(session_id = %id, "Killing terminal process");
            handle.kill();
        }
    }
}
