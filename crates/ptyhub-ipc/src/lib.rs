#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod error;
mod messages;
mod session_id;
mod settings;
mod tab_state;

pub use error::ProtocolError;
pub use messages::parse_session_frame;
pub use messages::parse_shared_frame;
pub use messages::Envelope;
pub use messages::NoticeLevel;
pub use messages::OutboundMessage;
pub use messages::PathExists;
pub use messages::SessionMessage;
pub use messages::SharedInbound;
pub use messages::SharedMessage;
pub use session_id::SessionId;
pub use settings::Appearance;
pub use settings::CursorStyle;
pub use settings::DisplaySettings;
pub use settings::RuntimeConfig;
pub use settings::Theme;
pub use settings::ThemeKind;
pub use tab_state::TabDescriptor;
pub use tab_state::TabStateError;
pub use tab_state::TabStateStore;
