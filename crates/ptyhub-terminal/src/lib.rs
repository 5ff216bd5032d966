#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod decoder;
pub mod error;
mod pty;
mod spawn;

pub use decoder::Utf8Decoder;
pub use error::PtyError;
pub use error::SpawnErrorKind;
pub use pty::PtyEvent;
pub use pty::PtyEventSink;
pub use pty::PtyHandle;
pub use spawn::build_environment;
pub use spawn::resolve_cwd;
pub use spawn::resolve_shell;
pub use spawn::SpawnConfig;
pub use spawn::FORCED_ENV;

pub type Result<T> = std::result::Result<T, PtyError>;
