#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod env;
mod sync;

pub use env::env_bool;
pub use env::env_duration_ms;
pub use env::env_parse;
pub use env::home_dir;
pub use env::non_empty;
pub use env::parse_bool;
pub use sync::mutex_lock_or_recover;
pub use sync::poison_recovery_count;
