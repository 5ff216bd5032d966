//! Link-click validation: URL scheme allow-list and file path resolution.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

pub const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto", "ftp", "ssh", "git", "tel"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LinkError {
    #[error("Malformed URL '{url}': {reason}")]
    Malformed { url: String, reason: String },
    #[error("URL scheme '{scheme}' is not allowed")]
    DisallowedScheme { scheme: String },
}

/// Parse `raw` and accept it only if its scheme is on the allow-list.
pub fn validate_external_url(raw: &str) -> Result<Url, LinkError> {
    let url = Url::parse(raw.trim()).map_err(|e| LinkError::Malformed {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !ALLOWED_URL_SCHEMES.contains(&url.scheme()) {
        return Err(LinkError::DisallowedScheme {
            scheme: url.scheme().to_string(),
        });
    }
    Ok(url)
}

/// Resolve a path as printed in terminal output.
///
/// `file://` URLs are unwrapped, `~` expands to `home`, and relative paths
/// join onto the session cwd (or `home` when the cwd is unknown).
pub fn resolve_link_path(raw: &str, cwd: Option<&Path>, home: Option<&Path>) -> PathBuf {
    let raw = raw.trim();
    let raw = match Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => match url.to_file_path() {
            Ok(path) => return path,
            Err(()) => raw,
        },
        _ => raw,
    };

    if raw == "~" {
        if let Some(home) = home {
            return home.to_path_buf();
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home {
            return home.join(rest);
        }
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_path_buf();
    }

    match cwd.or(home) {
        Some(base) => base.join(path),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_schemes_pass() {
        for raw in [
            "https://example.com/a?b=c",
            "http://localhost:8080",
            "mailto:dev@example.com",
            "ssh://git@example.com/repo",
            "tel:+15551234",
        ] {
            assert!(validate_external_url(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn test_disallowed_scheme_rejected() {
        assert_eq!(
            validate_external_url("vscode://file/etc/passwd"),
            Err(LinkError::DisallowedScheme {
                scheme: "vscode".to_string()
            })
        );
        assert!(matches!(
            validate_external_url("javascript:alert(1)"),
            Err(LinkError::DisallowedScheme { .. })
        ));
        assert!(matches!(
            validate_external_url("file:///etc/passwd"),
            Err(LinkError::DisallowedScheme { .. })
        ));
    }

    #[test]
    fn test_malformed_url_rejected() {
        assert!(matches!(
            validate_external_url("not a url"),
            Err(LinkError::Malformed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_link_path() {
        let cwd = Path::new("/work/project");
        let home = Path::new("/home/dev");

        assert_eq!(
            resolve_link_path("src/main.rs", Some(cwd), Some(home)),
            PathBuf::from("/work/project/src/main.rs")
        );
        assert_eq!(
            resolve_link_path("/etc/hosts", Some(cwd), Some(home)),
            PathBuf::from("/etc/hosts")
        );
        assert_eq!(
            resolve_link_path("~/notes.md", Some(cwd), Some(home)),
            PathBuf::from("/home/dev/notes.md")
        );
        assert_eq!(
            resolve_link_path("notes.md", None, Some(home)),
            PathBuf::from("/home/dev/notes.md")
        );
        assert_eq!(
            resolve_link_path("file:///tmp/a%20b.txt", Some(cwd), Some(home)),
            PathBuf::from("/tmp/a b.txt")
        );
    }
}
