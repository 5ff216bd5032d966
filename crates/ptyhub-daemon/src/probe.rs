//! Off-loop file existence checks.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use ptyhub_ipc::SessionId;

use crate::server::ManagerEvent;

/// What a finished probe is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePurpose {
    /// Answer a `batch-path-check` with `batch-result`.
    Batch { batch_id: u64 },
    /// Open the first path if it exists.
    OpenFile {
        line: Option<u32>,
        column: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    /// Path as the surface sent it; echoed back in results.
    pub requested: String,
    pub resolved: PathBuf,
    /// Known answer, from the cache or the probe itself.
    pub exists: Option<bool>,
    /// Answered from the existence cache; not written back.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub session_id: SessionId,
    pub purpose: ProbePurpose,
    pub entries: Vec<ProbeEntry>,
}

impl ProbeRequest {
    /// Fill every unknown entry with `check`.
    pub fn complete(mut self, check: impl Fn(&std::path::Path) -> bool) -> Self {
        for entry in &mut self.entries {
            if entry.exists.is_none() {
                entry.exists = Some(check(&entry.resolved));
            }
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.exists.is_some())
    }
}

/// Runs filesystem checks somewhere that may block, then reports back as a
/// `ManagerEvent::Probed`.
pub trait PathProbe: Send + Sync {
    fn probe(&self, request: ProbeRequest);
}

pub struct BlockingPathProbe {
    runtime: tokio::runtime::Handle,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl BlockingPathProbe {
    pub fn new(
        runtime: tokio::runtime::Handle,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        Self { runtime, events }
    }
}

impl PathProbe for BlockingPathProbe {
    fn probe(&self, request: ProbeRequest) {
        let events = self.events.clone();
        self.runtime.spawn_blocking(move || {
            let done = request.complete(|path| path.exists());
            if events.send(ManagerEvent::Probed(done)).is_err() {
                debug!("Event loop gone, dropping probe result");
            }
        });
    }
}
