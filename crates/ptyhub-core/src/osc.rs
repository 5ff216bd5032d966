//! Out-of-band reports embedded in PTY output.
//!
//! Only two operating-system commands are recognised: `OSC 7` (working
//! directory as a `file://` URI) and the notification reports `OSC 9` and
//! `OSC 777;notify`. The chunk itself is never modified; callers forward it
//! untouched and treat whatever is extracted as metadata.
//!
//! Scanning is per chunk. A report split across two reads is not seen.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

static CWD_REPORT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\x1b\]7;file://([^/\x07\x1b]*)(/[^\x07\x1b]*)(?:\x07|\x1b\\)").ok()
});

static NOTIFY_REPORT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\x1b\]9;([^\x07\x1b]*)(?:\x07|\x1b\\)").ok());

static NOTIFY_777_REPORT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\x1b\]777;notify;([^;\x07\x1b]*);([^\x07\x1b]*)(?:\x07|\x1b\\)").ok()
});

/// The most recent working directory reported in `chunk`, percent-decoded.
pub fn extract_working_directory(chunk: &str) -> Option<String> {
    if !chunk.contains("\x1b]7;") {
        return None;
    }
    let re = CWD_REPORT.as_ref()?;
    let caps = re.captures_iter(chunk).last()?;
    let raw = caps.get(2)?.as_str();
    let decoded = percent_decode_str(raw).decode_utf8_lossy().into_owned();
    Some(strip_drive_slash(decoded))
}

/// The most recent notification message reported in `chunk`.
pub fn extract_notification(chunk: &str) -> Option<String> {
    if !chunk.contains("\x1b]9;") && !chunk.contains("\x1b]777;") {
        return None;
    }

    let mut found: Option<(usize, String)> = None;

    if let Some(re) = NOTIFY_REPORT.as_ref() {
        for caps in re.captures_iter(chunk) {
            let Some(payload) = caps.get(1) else {
                continue;
            };
            let text = payload.as_str();
            // ConEmu reuses OSC 9 with numeric sub-commands (9;4 is progress).
            if text.is_empty() || is_conemu_subcommand(text) {
                continue;
            }
            found = Some((payload.start(), text.to_string()));
        }
    }

    if let Some(re) = NOTIFY_777_REPORT.as_ref() {
        for caps in re.captures_iter(chunk) {
            let (Some(title), Some(body)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let message = if title.as_str().is_empty() {
                body.as_str().to_string()
            } else {
                format!("{}: {}", title.as_str(), body.as_str())
            };
            if message.is_empty() {
                continue;
            }
            if found.as_ref().map_or(true, |(pos, _)| title.start() > *pos) {
                found = Some((title.start(), message));
            }
        }
    }

    found.map(|(_, message)| message)
}

fn is_conemu_subcommand(text: &str) -> bool {
    let mut parts = text.splitn(2, ';');
    let head = parts.next().unwrap_or_default();
    parts.next().is_some() && !head.is_empty() && head.chars().all(|c| c.is_ascii_digit())
}

/// `/C:/Users/me` -> `C:/Users/me`
fn strip_drive_slash(path: String) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        path[1..].to_string()
    } else {
        path
    }
}
