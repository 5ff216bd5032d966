//! Spawn configuration: shell and working-directory fallbacks plus the
//! environment every session starts with.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

/// Variables every session sets so interactive programs can identify the
/// host. Applied after the inherited environment and before user overrides.
pub const FORCED_ENV: [(&str, &str); 3] = [
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("TERM_PROGRAM", "ptyhub"),
];

#[cfg(windows)]
const LAST_RESORT_SHELL: &str = "cmd.exe";
#[cfg(not(windows))]
const LAST_RESORT_SHELL: &str = "/bin/sh";

#[cfg(windows)]
const SHELL_ENV_VAR: &str = "COMSPEC";
#[cfg(not(windows))]
const SHELL_ENV_VAR: &str = "SHELL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            cols: 80,
            rows: 24,
        }
    }
}

impl SpawnConfig {
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Explicit config, then the environment's default shell, then a fixed fallback.
pub fn resolve_shell(configured: Option<&str>, lookup: impl Fn(&str) -> Option<String>) -> String {
    configured
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| lookup(SHELL_ENV_VAR).filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| LAST_RESORT_SHELL.to_string())
}

/// Explicit config when it names a directory, then home, then the filesystem root.
pub fn resolve_cwd(configured: Option<&Path>, home: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = configured.filter(|p| p.is_dir()) {
        return dir.to_path_buf();
    }
    home.filter(|p| p.is_dir())
        .unwrap_or_else(|| PathBuf::from(if cfg!(windows) { "C:\\" } else { "/" }))
}

/// Inherit, force the identification variables, then let user overrides win.
///
/// Inherited entries are OS strings so a variable that is not valid UTF-8
/// passes through untouched instead of aborting the spawn.
pub fn build_environment<I>(
    inherited: I,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();
    for (key, value) in FORCED_ENV {
        env.insert(key.into(), value.into());
    }
    for (key, value) in overrides {
        env.insert(key.into(), value.into());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_shell_prefers_config() {
        let shell = resolve_shell(Some("/usr/bin/fish"), |_| Some("/bin/zsh".into()));
        assert_eq!(shell, "/usr/bin/fish");
    }

    #[test]
    fn test_resolve_shell_falls_back_to_env_then_default() {
        assert_eq!(resolve_shell(None, |_| Some("/bin/zsh".into())), "/bin/zsh");
        assert_eq!(resolve_shell(Some("  "), |_| None), LAST_RESORT_SHELL);
        assert_eq!(resolve_shell(None, |_| Some(String::new())), LAST_RESORT_SHELL);
    }

    #[test]
    fn test_resolve_cwd_skips_missing_directory() {
        let home = tempfile::tempdir().unwrap();
        let cwd = resolve_cwd(
            Some(Path::new("/definitely/not/here")),
            Some(home.path().to_path_buf()),
        );
        assert_eq!(cwd, home.path());
    }

    #[test]
    fn test_resolve_cwd_uses_config_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = resolve_cwd(Some(dir.path()), None);
        assert_eq!(cwd, dir.path());
    }

    #[test]
    fn test_environment_forced_over_inherited() {
        let inherited = vec![
            (OsString::from("TERM"), OsString::from("dumb")),
            (OsString::from("PATH"), OsString::from("/usr/bin")),
        ];
        let env = build_environment(inherited, &BTreeMap::new());
        assert_eq!(env[&OsString::from("TERM")], "xterm-256color");
        assert_eq!(env[&OsString::from("COLORTERM")], "truecolor");
        assert_eq!(env[&OsString::from("TERM_PROGRAM")], "ptyhub");
        assert_eq!(env[&OsString::from("PATH")], "/usr/bin");
    }

    #[test]
    fn test_environment_user_override_wins() {
        let mut overrides = BTreeMap::new();
        overrides.insert("TERM".to_string(), "screen-256color".to_string());
        overrides.insert("EDITOR".to_string(), "vim".to_string());
        let env = build_environment(Vec::new(), &overrides);
        assert_eq!(env[&OsString::from("TERM")], "screen-256color");
        assert_eq!(env[&OsString::from("TERM_PROGRAM")], "ptyhub");
        assert_eq!(env[&OsString::from("EDITOR")], "vim");
    }

    #[cfg(unix)]
    #[test]
    fn test_environment_keeps_non_utf8_values() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![0xff, 0xfe]);
        let inherited = vec![(OsString::from("LEGACY_BYTES"), raw.clone())];
        let env = build_environment(inherited, &BTreeMap::new());
        assert_eq!(env[&OsString::from("LEGACY_BYTES")], raw);
        assert_eq!(env[&OsString::from("TERM")], "xterm-256color");
    }
}
