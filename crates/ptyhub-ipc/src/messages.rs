//! Messages exchanged with UI surfaces.
//!
//! Frames are JSON objects tagged by `type` (kebab-case) with camelCase
//! fields. An isolated surface speaks `SessionMessage` only; the shared
//! surface adds `SharedMessage` kinds and addresses session messages with a
//! `tabId`.

use serde::Deserialize;
use serde::Serialize;

use crate::error::ProtocolError;
use crate::session_id::SessionId;
use crate::settings::DisplaySettings;
use crate::settings::RuntimeConfig;
use crate::settings::Theme;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathExists {
    pub path: String,
    pub exists: bool,
}

/// Inbound kinds every surface topology understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SessionMessage {
    /// Ready handshake with the measured terminal size.
    Ready { cols: u16, rows: u16 },
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Bell,
    OpenFile {
        path: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        column: Option<u32>,
    },
    OpenUrl { url: String },
    BatchPathCheck { batch_id: u64, paths: Vec<String> },
}

impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Ready { .. } => "ready",
            SessionMessage::Input { .. } => "input",
            SessionMessage::Resize { .. } => "resize",
            SessionMessage::Bell => "bell",
            SessionMessage::OpenFile { .. } => "open-file",
            SessionMessage::OpenUrl { .. } => "open-url",
            SessionMessage::BatchPathCheck { .. } => "batch-path-check",
        }
    }
}

/// Inbound kinds only the shared (tabbed) surface sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SharedMessage {
    SurfaceReady,
    TabReady { tab_id: SessionId, cols: u16, rows: u16 },
    TabActivate { tab_id: SessionId, cols: u16, rows: u16 },
    TabClose { tab_id: SessionId },
    NewTab,
    NewTabWithTitle {
        title: String,
        #[serde(default)]
        active: bool,
    },
    TabRename { tab_id: SessionId, title: String },
    ToggleRequest,
    VisibilityChanged { visible: bool },
}

impl SharedMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SharedMessage::SurfaceReady => "surface-ready",
            SharedMessage::TabReady { .. } => "tab-ready",
            SharedMessage::TabActivate { .. } => "tab-activate",
            SharedMessage::TabClose { .. } => "tab-close",
            SharedMessage::NewTab => "new-tab",
            SharedMessage::NewTabWithTitle { .. } => "new-tab-with-title",
            SharedMessage::TabRename { .. } => "tab-rename",
            SharedMessage::ToggleRequest => "toggle-request",
            SharedMessage::VisibilityChanged { .. } => "visibility-changed",
        }
    }
}

/// A frame from the shared surface: either a shared-only kind or a common
/// session message addressed to one tab.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SharedInbound {
    Shared(SharedMessage),
    Session {
        #[serde(rename = "tabId")]
        tab_id: SessionId,
        #[serde(flatten)]
        message: SessionMessage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Output { data: String },
    Exit { code: u32 },
    SettingsUpdate { settings: DisplaySettings },
    ThemeUpdate { theme: Theme },
    RuntimeConfigUpdate { config: RuntimeConfig },
    CwdUpdate { cwd: String },
    BatchResult { batch_id: u64, results: Vec<PathExists> },
    Notice { level: NoticeLevel, message: String },
    AddTab { tab_id: SessionId, title: String, active: bool },
    RemoveTab { tab_id: SessionId },
    RenameTab { tab_id: SessionId, title: String },
    ActivateTab { tab_id: SessionId },
    FocusRequest,
    HideSurface,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Output { .. } => "output",
            OutboundMessage::Exit { .. } => "exit",
            OutboundMessage::SettingsUpdate { .. } => "settings-update",
            OutboundMessage::ThemeUpdate { .. } => "theme-update",
            OutboundMessage::RuntimeConfigUpdate { .. } => "runtime-config-update",
            OutboundMessage::CwdUpdate { .. } => "cwd-update",
            OutboundMessage::BatchResult { .. } => "batch-result",
            OutboundMessage::Notice { .. } => "notice",
            OutboundMessage::AddTab { .. } => "add-tab",
            OutboundMessage::RemoveTab { .. } => "remove-tab",
            OutboundMessage::RenameTab { .. } => "rename-tab",
            OutboundMessage::ActivateTab { .. } => "activate-tab",
            OutboundMessage::FocusRequest => "focus-request",
            OutboundMessage::HideSurface => "hide-surface",
        }
    }
}

/// An outbound message plus, on the shared surface, the tab it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<SessionId>,
    #[serde(flatten)]
    pub message: OutboundMessage,
}

impl Envelope {
    pub fn direct(message: OutboundMessage) -> Self {
        Self {
            tab_id: None,
            message,
        }
    }

    pub fn for_tab(tab_id: SessionId, message: OutboundMessage) -> Self {
        Self {
            tab_id: Some(tab_id),
            message,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

pub fn parse_session_frame(text: &str) -> Result<SessionMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn parse_shared_frame(text: &str) -> Result<SharedInbound, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ready_handshake() {
        let msg = parse_session_frame(r#"{"type":"ready","cols":100,"rows":30}"#).unwrap();
        assert_eq!(msg, SessionMessage::Ready { cols: 100, rows: 30 });
    }

    #[test]
    fn test_parse_open_file_optional_position() {
        let msg = parse_session_frame(r#"{"type":"open-file","path":"src/main.rs","line":12}"#)
            .unwrap();
        assert_eq!(
            msg,
            SessionMessage::OpenFile {
                path: "src/main.rs".into(),
                line: Some(12),
                column: None
            }
        );
    }

    #[test]
    fn test_parse_batch_path_check_camel_case() {
        let msg = parse_session_frame(
            r#"{"type":"batch-path-check","batchId":4,"paths":["/a.txt","/b.txt"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SessionMessage::BatchPathCheck {
                batch_id: 4,
                paths: vec!["/a.txt".into(), "/b.txt".into()]
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert!(parse_session_frame(r#"{"type":"explode"}"#).is_err());
        assert!(parse_session_frame("not json").is_err());
    }

    #[test]
    fn test_shared_frame_shared_kind() {
        let frame = parse_shared_frame(r#"{"type":"tab-close","tabId":"abc"}"#).unwrap();
        assert_eq!(
            frame,
            SharedInbound::Shared(SharedMessage::TabClose {
                tab_id: SessionId::new("abc")
            })
        );

        let frame = parse_shared_frame(r#"{"type":"surface-ready"}"#).unwrap();
        assert_eq!(frame, SharedInbound::Shared(SharedMessage::SurfaceReady));
    }

    #[test]
    fn test_shared_frame_falls_through_to_session_message() {
        let frame = parse_shared_frame(r#"{"type":"input","tabId":"t1","data":"ls\r"}"#).unwrap();
        assert_eq!(
            frame,
            SharedInbound::Session {
                tab_id: SessionId::new("t1"),
                message: SessionMessage::Input {
                    data: "ls\r".into()
                }
            }
        );
    }

    #[test]
    fn test_shared_frame_session_message_requires_tab() {
        assert!(parse_shared_frame(r#"{"type":"input","data":"x"}"#).is_err());
    }

    #[test]
    fn test_envelope_serialization() {
        let direct = Envelope::direct(OutboundMessage::Exit { code: 0 });
        let value: serde_json::Value = serde_json::from_str(&direct.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "exit", "code": 0}));

        let tabbed = Envelope::for_tab(
            SessionId::new("t1"),
            OutboundMessage::CwdUpdate {
                cwd: "/home/user/project".into(),
            },
        );
        let value: serde_json::Value = serde_json::from_str(&tabbed.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "cwd-update", "tabId": "t1", "cwd": "/home/user/project"})
        );
    }

    #[test]
    fn test_batch_result_serialization() {
        let envelope = Envelope::direct(OutboundMessage::BatchResult {
            batch_id: 9,
            results: vec![PathExists {
                path: "/a.txt".into(),
                exists: true,
            }],
        });
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "batch-result", "batchId": 9, "results": [{"path": "/a.txt", "exists": true}]})
        );
    }

    #[test]
    fn test_unit_variant_serialization() {
        let envelope = Envelope::direct(OutboundMessage::FocusRequest);
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "focus-request"}));
    }
}
