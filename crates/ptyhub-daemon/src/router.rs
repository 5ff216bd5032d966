//! Inbound message dispatch.
//!
//! Session-addressed messages go through one table no matter which surface
//! sent them. The shared surface adds its tab lifecycle kinds on top and falls
//! through to that table for everything else.

use tracing::debug;
use tracing::warn;

use ptyhub_core::validate_external_url;
use ptyhub_ipc::SessionId;
use ptyhub_ipc::SessionMessage;
use ptyhub_ipc::SharedInbound;
use ptyhub_ipc::SharedMessage;

use crate::manager::SessionManager;

impl SessionManager {
    pub fn handle_session_message(&mut self, id: &SessionId, message: SessionMessage) {
        debug!(session_id = %id, kind = message.kind(), "Dispatching");
        match message {
            SessionMessage::Ready { cols, rows } => self.mark_ready(id, cols, rows),
            SessionMessage::Input { data } => self.write_input(id, &data),
            SessionMessage::Resize { cols, rows } => self.resize(id, cols, rows),
            SessionMessage::Bell => self.bell(id),
            SessionMessage::OpenFile { path, line, column } => {
                if self.appearance().runtime.file_links {
                    self.open_file(id, path, line, column);
                }
            }
            SessionMessage::OpenUrl { url } => self.open_url(&url),
            SessionMessage::BatchPathCheck { batch_id, paths } => {
                self.check_paths(id, batch_id, paths)
            }
        }
    }

    pub fn handle_shared_message(&mut self, inbound: SharedInbound) {
        let message = match inbound {
            SharedInbound::Session { tab_id, message } => {
                return self.handle_session_message(&tab_id, message);
            }
            SharedInbound::Shared(message) => message,
        };

        debug!(kind = message.kind(), "Dispatching shared");
        match message {
            SharedMessage::SurfaceReady => self.restore_tabs(),
            SharedMessage::TabReady { tab_id, cols, rows } => self.mark_ready(&tab_id, cols, rows),
            SharedMessage::TabActivate { tab_id, cols, rows } => {
                self.activate_tab(&tab_id, cols, rows)
            }
            SharedMessage::TabClose { tab_id } => {
                self.destroy(&tab_id);
            }
            SharedMessage::NewTab => {
                self.open_shared_tab(None, true);
            }
            SharedMessage::NewTabWithTitle { title, active } => {
                self.open_shared_tab(Some(title), active);
            }
            SharedMessage::TabRename { tab_id, title } => self.rename_session(&tab_id, title),
            SharedMessage::ToggleRequest => self.toggle_surface(),
            SharedMessage::VisibilityChanged { visible } => self.set_surface_visible(visible),
        }
    }

    fn open_url(&self, raw: &str) {
        if !self.appearance().runtime.url_links {
            return;
        }
        match validate_external_url(raw) {
            Ok(url) => self.services().open_url(&url),
            Err(e) => warn!(url = raw, error = %e, "Dropping external open request"),
        }
    }
}
