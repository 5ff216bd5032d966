#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod error;
mod manager;
mod probe;
mod process;
mod router;
mod server;
mod services;
mod session;
#[cfg(unix)]
mod signal_handler;
mod surface;
/// Fakes shared with the integration tests. Not part of the public API.
#[doc(hidden)]
pub mod test_support;
pub mod transport;

pub use config::DaemonConfig;
pub use config::DEFAULT_LISTEN;
pub use config::DEFAULT_MAX_PENDING_CHUNKS;
pub use config::DEFAULT_MAX_SESSIONS;
pub use error::DaemonError;
pub use error::ErrorCategory;
pub use error::SessionError;
pub use manager::is_expected_close;
pub use manager::CreateRequest;
pub use manager::ManagerDeps;
pub use manager::SessionManager;
pub use manager::SessionTimer;
pub use probe::BlockingPathProbe;
pub use probe::PathProbe;
pub use probe::ProbeEntry;
pub use probe::ProbePurpose;
pub use probe::ProbeRequest;
pub use process::NativeProcessAdapter;
pub use process::ProcessAdapter;
pub use process::ProcessEventSink;
pub use server::run_event_loop;
pub use server::start_daemon;
pub use server::DaemonHandle;
pub use server::ManagerEvent;
pub use services::DesktopServices;
pub use services::HostServices;
pub use session::OutputQueue;
pub use session::Session;
pub use session::Topology;
#[cfg(unix)]
pub use signal_handler::SignalHandler;
pub use surface::ChannelError;
pub use surface::ChannelRef;
pub use surface::UiChannel;

pub type Result<T> = std::result::Result<T, SessionError>;
