//! Host collaborators: user-visible errors, notifications and external opens.

use std::path::Path;
use std::process::Command;

use tokio::sync::broadcast;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use url::Url;

use ptyhub_ipc::Envelope;
use ptyhub_ipc::NoticeLevel;
use ptyhub_ipc::OutboundMessage;

pub trait HostServices: Send + Sync {
    fn show_error(&self, message: &str);
    fn notify(&self, title: &str, message: &str);
    fn bell(&self, title: &str);
    fn open_file(&self, path: &Path, line: Option<u32>, column: Option<u32>);
    /// Only ever called with a URL that passed the scheme allow-list.
    fn open_url(&self, url: &Url);
}

/// Services for a desktop host: notices fan out to every connected surface,
/// opens go through the platform opener.
pub struct DesktopServices {
    notices: broadcast::Sender<Envelope>,
    browser: Option<String>,
}

impl DesktopServices {
    pub fn new(notices: broadcast::Sender<Envelope>) -> Self {
        Self {
            notices,
            browser: std::env::var("BROWSER").ok(),
        }
    }

    fn broadcast(&self, level: NoticeLevel, message: String) {
        // No receivers just means no surface is connected.
        let _ = self
            .notices
            .send(Envelope::direct(OutboundMessage::Notice { level, message }));
    }

    fn open_with_platform(&self, target: &str) {
        let mut cmd = match opener_command(self.browser.as_deref()) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(error = %e, "No opener available");
                return;
            }
        };
        cmd.arg(target);

        let target = target.to_string();
        let spawned = std::thread::Builder::new()
            .name("opener".to_string())
            .spawn(move || match cmd.status() {
                Ok(status) if status.success() => debug!(target = %target, "Opened"),
                Ok(status) => warn!(target = %target, %status, "Opener exited with failure"),
                Err(e) => warn!(target = %target, error = %e, "Failed to run opener"),
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn opener thread");
        }
    }
}

impl HostServices for DesktopServices {
    fn show_error(&self, message: &str) {
        error!(error = message, "Terminal error");
        self.broadcast(NoticeLevel::Error, message.to_string());
    }

    fn notify(&self, title: &str, message: &str) {
        info!(title, body = message, "Terminal notification");
        self.broadcast(NoticeLevel::Info, format!("{}: {}", title, message));
    }

    fn bell(&self, title: &str) {
        debug!(title, "Bell");
        self.broadcast(NoticeLevel::Info, format!("{}: bell", title));
    }

    fn open_file(&self, path: &Path, line: Option<u32>, column: Option<u32>) {
        debug!(path = %path.display(), line, column, "Opening file");
        self.open_with_platform(&path.to_string_lossy());
    }

    fn open_url(&self, url: &Url) {
        debug!(url = %url, "Opening URL");
        self.open_with_platform(url.as_str());
    }
}

fn opener_command(browser: Option<&str>) -> Result<Command, String> {
    if let Some(browser) = browser {
        let mut parts = browser.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| "Browser command is empty".to_string())?;
        let mut cmd = Command::new(program);
        cmd.args(parts);
        return Ok(cmd);
    }

    let cmd = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        Command::new("xdg-open")
    };
    Ok(cmd)
}
