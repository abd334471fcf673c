//! Path restriction — every filesystem-touching tool resolves its path
//! through here, which normalizes and rejects traversal outside the
//! user's workspace directory.

use std::path::{Component, Path, PathBuf};

/// Resolve `requested` inside `<workspace_root>/user_<id>/`.
///
/// 1. Rejects raw `..` components before any resolution.
/// 2. Strips a leading `/` (models frequently emit workspace-absolute
///    paths) and joins onto the user directory.
/// 3. Normalizes `.` components and verifies containment.
///
/// Returns the resolved absolute path. The user directory itself does
/// not need to exist yet.
pub fn resolve_user_path(
    workspace_root: &Path,
    user_id: &str,
    requested: &str,
) -> Result<PathBuf, String> {
    if requested.trim().is_empty() {
        return Err("path must not be empty".to_owned());
    }

    let trimmed = requested.trim().trim_start_matches('/');
    let requested_path = Path::new(trimmed);

    let mut normalized = PathBuf::new();
    for component in requested_path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!(
                    "path '{requested}' must not contain '..' components"
                ));
            }
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("path '{requested}' must be workspace-relative"));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(format!("path '{requested}' resolves to the workspace root"));
    }

    let user_dir = workspace_root.join(format!("user_{user_id}"));
    let resolved = user_dir.join(&normalized);

    if !resolved.starts_with(&user_dir) {
        return Err(format!(
            "path '{}' resolves outside '{}'",
            requested,
            user_dir.display()
        ));
    }

    Ok(resolved)
}

/// The user workspace directory for an id.
pub fn user_dir(workspace_root: &Path, user_id: &str) -> PathBuf {
    workspace_root.join(format!("user_{user_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        let err = resolve_user_path(Path::new("/ws"), "7", "../etc/passwd").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn rejects_hidden_traversal() {
        let err = resolve_user_path(Path::new("/ws"), "7", "a/../../b").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn strips_leading_slash() {
        let path = resolve_user_path(Path::new("/ws"), "7", "/src/main.py").unwrap();
        assert_eq!(path, PathBuf::from("/ws/user_7/src/main.py"));
    }

    #[test]
    fn normalizes_curdir() {
        let path = resolve_user_path(Path::new("/ws"), "7", "./a/./b.txt").unwrap();
        assert_eq!(path, PathBuf::from("/ws/user_7/a/b.txt"));
    }

    #[test]
    fn rejects_empty() {
        assert!(resolve_user_path(Path::new("/ws"), "7", "   ").is_err());
    }

    #[test]
    fn rejects_root_only() {
        assert!(resolve_user_path(Path::new("/ws"), "7", "/").is_err());
    }
}
