use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ptyhub_common::env_bool;
use ptyhub_common::env_duration_ms;
use ptyhub_common::env_parse;
use ptyhub_common::home_dir;
use ptyhub_common::non_empty;
use ptyhub_terminal::SpawnConfig;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7681";
pub const DEFAULT_MAX_SESSIONS: usize = 32;
pub const DEFAULT_MAX_PENDING_CHUNKS: usize = 1000;
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_PATH_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_PATH_CACHE_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen: String,
    pub allow_remote: bool,
    pub max_sessions: usize,
    pub max_pending_chunks: usize,
    pub ready_timeout: Duration,
    pub exit_grace: Duration,
    pub default_cols: u16,
    pub default_rows: u16,
    pub shell: Option<String>,
    pub shell_args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Where shared-surface tabs are persisted. `None` disables persistence.
    pub state_path: Option<PathBuf>,
    pub path_cache_ttl: Duration,
    pub path_cache_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            listen: std::env::var("PTYHUB_LISTEN")
                .ok()
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            allow_remote: env_bool("PTYHUB_ALLOW_REMOTE").unwrap_or(false),
            max_sessions: env_parse("PTYHUB_MAX_SESSIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_MAX_SESSIONS),
            max_pending_chunks: env_parse("PTYHUB_MAX_PENDING_CHUNKS")
                .unwrap_or(DEFAULT_MAX_PENDING_CHUNKS),
            ready_timeout: env_duration_ms("PTYHUB_READY_TIMEOUT_MS")
                .unwrap_or(DEFAULT_READY_TIMEOUT),
            exit_grace: env_duration_ms("PTYHUB_EXIT_GRACE_MS").unwrap_or(DEFAULT_EXIT_GRACE),
            default_cols: DEFAULT_COLS,
            default_rows: DEFAULT_ROWS,
            shell: std::env::var("PTYHUB_SHELL").ok().and_then(non_empty),
            shell_args: Vec::new(),
            cwd: std::env::var("PTYHUB_CWD")
                .ok()
                .and_then(non_empty)
                .map(PathBuf::from),
            env: BTreeMap::new(),
            state_path: std::env::var("PTYHUB_STATE")
                .ok()
                .and_then(non_empty)
                .map(PathBuf::from)
                .or_else(default_state_path),
            path_cache_ttl: env_duration_ms("PTYHUB_PATH_CACHE_TTL_MS")
                .unwrap_or(DEFAULT_PATH_CACHE_TTL),
            path_cache_size: env_parse("PTYHUB_PATH_CACHE_SIZE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_PATH_CACHE_SIZE),
        }
    }

    /// Base spawn settings for a new session, before per-session overrides.
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            shell: self.shell.clone(),
            args: self.shell_args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            cols: self.default_cols,
            rows: self.default_rows,
        }
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_max_pending_chunks(mut self, max: usize) -> Self {
        self.max_pending_chunks = max;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>, args: Vec<String>) -> Self {
        self.shell = Some(shell.into());
        self.shell_args = args;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_state_path(mut self, path: Option<PathBuf>) -> Self {
        self.state_path = path;
        self
    }

    pub fn with_path_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.path_cache_size = size;
        self.path_cache_ttl = ttl;
        self
    }
}

fn default_state_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ptyhub").join("tabs.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let config = DaemonConfig::from_env()
            .with_listen("127.0.0.1:9000")
            .with_max_sessions(4)
            .with_max_pending_chunks(10)
            .with_ready_timeout(Duration::from_millis(250))
            .with_exit_grace(Duration::from_millis(50))
            .with_shell("/bin/bash", vec!["-l".to_string()])
            .with_env("FOO", "bar")
            .with_state_path(None);

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.max_pending_chunks, 10);
        assert_eq!(config.ready_timeout, Duration::from_millis(250));
        assert_eq!(config.exit_grace, Duration::from_millis(50));
        assert!(config.state_path.is_none());

        let spawn = config.spawn_config();
        assert_eq!(spawn.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(spawn.args, vec!["-l".to_string()]);
        assert_eq!(spawn.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!((spawn.cols, spawn.rows), (80, 24));
    }
}
