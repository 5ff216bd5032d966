//! UI channel port.

use std::sync::Arc;

use thiserror::Error;

use ptyhub_ipc::Envelope;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("UI channel closed")]
    Closed,
}

/// One UI surface connection. Implementations must not block.
pub trait UiChannel: Send + Sync {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError>;

    /// Tear down the surface. Later posts fail with `ChannelError::Closed`.
    fn dispose(&self);
}

pub type ChannelRef = Arc<dyn UiChannel>;
