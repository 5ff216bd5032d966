use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use ptyhub_daemon::DaemonConfig;

#[derive(Debug, Parser)]
#[command(
    name = "ptyhub",
    version,
    about = "Serve PTY-backed shells to browser terminal surfaces",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the session manager and WebSocket server
    Serve(ServeArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Address to listen on (defaults to PTYHUB_LISTEN or 127.0.0.1:7681)
    #[arg(long, value_name = "HOST:PORT", help_heading = "Server Options")]
    pub listen: Option<String>,

    /// Allow binding a non-loopback address
    #[arg(long, help_heading = "Server Options")]
    pub allow_remote: bool,

    /// Maximum number of live sessions
    #[arg(long, value_name = "N", help_heading = "Server Options")]
    pub max_sessions: Option<usize>,

    /// Shell to launch instead of $SHELL
    #[arg(long, value_name = "PROGRAM", help_heading = "Session Options")]
    pub shell: Option<String>,

    /// Argument passed to the shell (repeatable)
    #[arg(
        long = "shell-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        requires = "shell",
        help_heading = "Session Options"
    )]
    pub shell_args: Vec<String>,

    /// Starting directory for new sessions
    #[arg(long, value_name = "DIR", help_heading = "Session Options")]
    pub cwd: Option<PathBuf>,

    /// Where the shared surface's tab layout is saved
    #[arg(long, value_name = "PATH", help_heading = "State Options")]
    pub state: Option<PathBuf>,

    /// Do not save or restore the tab layout
    #[arg(long, conflicts_with = "state", help_heading = "State Options")]
    pub no_state: bool,

    /// JSON file with display settings, theme and runtime flags
    #[arg(
        long,
        env = "PTYHUB_APPEARANCE",
        value_name = "PATH",
        help_heading = "State Options"
    )]
    pub appearance: Option<PathBuf>,
}

impl ServeArgs {
    /// Layer command-line overrides on top of `config`.
    pub fn apply(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(listen) = &self.listen {
            config = config.with_listen(listen.clone());
        }
        if self.allow_remote {
            config = config.with_allow_remote(true);
        }
        if let Some(max) = self.max_sessions.filter(|n| *n > 0) {
            config = config.with_max_sessions(max);
        }
        if let Some(shell) = &self.shell {
            config = config.with_shell(shell.clone(), self.shell_args.clone());
        }
        if let Some(cwd) = &self.cwd {
            config = config.with_cwd(cwd.clone());
        }
        if self.no_state {
            config = config.with_state_path(None);
        } else if let Some(state) = &self.state {
            config = config.with_state_path(Some(state.clone()));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(args: &[&str]) -> ServeArgs {
        let mut argv = vec!["ptyhub", "serve"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Serve(args) => args,
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_overrides_config() {
        let args = serve_args(&[
            "--listen",
            "127.0.0.1:9000",
            "--max-sessions",
            "4",
            "--shell",
            "/bin/zsh",
            "--shell-arg",
            "-l",
            "--cwd",
            "/tmp",
            "--no-state",
        ]);

        let config = args.apply(DaemonConfig::from_env());

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.shell_args, vec!["-l".to_string()]);
        assert_eq!(config.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.state_path, None);
    }

    #[test]
    fn test_zero_max_sessions_keeps_default() {
        let base = DaemonConfig::from_env();
        let expected = base.max_sessions;
        let config = serve_args(&["--max-sessions", "0"]).apply(base);
        assert_eq!(config.max_sessions, expected);
    }

    #[test]
    fn test_state_conflicts_with_no_state() {
        let result = Cli::try_parse_from(["ptyhub", "serve", "--state", "/tmp/t.json", "--no-state"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_shell_arg_requires_shell() {
        let result = Cli::try_parse_from(["ptyhub", "serve", "--shell-arg", "-l"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_version_subcommand() {
        let cli = Cli::try_parse_from(["ptyhub", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }
}
