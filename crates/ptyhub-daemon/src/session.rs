//! Per-session state owned by the registry.

use std::collections::VecDeque;

use tracing::debug;

use ptyhub_core::TimerHandle;
use ptyhub_ipc::SessionId;

use crate::surface::ChannelRef;

/// Which surface a session renders into. Fixed at creation.
pub enum Topology {
    /// Owns a dedicated channel, torn down with the session.
    Isolated { channel: ChannelRef },
    /// A tab inside the one shared surface, addressed by session id.
    Shared,
}

impl Topology {
    pub fn is_shared(&self) -> bool {
        matches!(self, Topology::Shared)
    }
}

/// Output held back until the surface completes its handshake.
///
/// Bounded: once full, new chunks are dropped so the earliest output survives.
#[derive(Debug)]
pub struct OutputQueue {
    chunks: VecDeque<String>,
    cap: usize,
    dropped: usize,
}

impl OutputQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            cap,
            dropped: 0,
        }
    }

    /// Returns false when the chunk was dropped.
    pub fn push(&mut self, chunk: String) -> bool {
        if self.chunks.len() >= self.cap {
            self.dropped += 1;
            return false;
        }
        self.chunks.push_back(chunk);
        true
    }

    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.chunks.drain(..)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) index: u32,
    pub(crate) title: String,
    pub(crate) topology: Topology,
    pub(crate) ready: bool,
    pub(crate) active: bool,
    pub(crate) queue: OutputQueue,
    pub(crate) cwd: Option<String>,
    pub(crate) ready_timer: Option<TimerHandle>,
    pub(crate) exit_timer: Option<TimerHandle>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        index: u32,
        title: String,
        topology: Topology,
        queue_cap: usize,
    ) -> Self {
        Self {
            id,
            index,
            title,
            topology,
            ready: false,
            active: false,
            queue: OutputQueue::new(queue_cap),
            cwd: None,
            ready_timer: None,
            exit_timer: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn pending_output(&self) -> usize {
        self.queue.len()
    }

    /// True once the process exited and teardown is scheduled.
    pub fn is_exiting(&self) -> bool {
        self.exit_timer.is_some()
    }

    /// Queue output for a session that is not ready yet.
    pub(crate) fn buffer(&mut self, chunk: String) {
        if !self.queue.push(chunk) {
            debug!(
                session_id = %self.id,
                dropped = self.queue.dropped(),
                "Output queue full, dropping chunk"
            );
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.ready_timer = None;
        self.exit_timer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_queue_drops_new_chunks_at_cap() {
        let mut queue = OutputQueue::new(2);
        assert!(queue.push("a".into()));
        assert!(queue.push("b".into()));
        assert!(!queue.push("c".into()));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_queue_keeps_earliest_chunks_in_order(
            cap in 0usize..16,
            chunks in proptest::collection::vec("[a-z]{0,4}", 0..40),
        ) {
            let mut queue = OutputQueue::new(cap);
            for chunk in &chunks {
                queue.push(chunk.clone());
                prop_assert!(queue.len() <= cap);
            }
            let kept: Vec<String> = queue.drain().collect();
            let expected: Vec<String> = chunks.iter().take(cap).cloned().collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
