#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod batch;
pub mod cache;
pub mod index_pool;
pub mod links;
pub mod osc;
pub mod time;

pub use batch::BatchCoordinator;
pub use batch::BatchTimer;
pub use batch::BatchTransport;
pub use cache::ExistenceCache;
pub use index_pool::IndexPool;
pub use links::resolve_link_path;
pub use links::validate_external_url;
pub use links::LinkError;
pub use links::ALLOWED_URL_SCHEMES;
pub use osc::extract_notification;
pub use osc::extract_working_directory;
pub use time::Clock;
pub use time::ManualClock;
pub use time::ManualScheduler;
pub use time::Scheduler;
pub use time::SystemClock;
pub use time::TimerHandle;
pub use time::TokioScheduler;
