use crate::error::AppError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Expands tilde (~) in a path string to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).as_ref())
}

/// Collapses `.` and `..` without touching the filesystem. `..` above the
/// root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                } else if components.is_empty() {
                    components.push(component);
                }
                // Otherwise we are at RootDir or Prefix: /.. -> /
            }
            _ => components.push(component),
        }
    }
    if components.is_empty() {
        return PathBuf::from(".");
    }
    components.iter().collect()
}

/// Resolves a caller-supplied directory against `base` into the absolute
/// path both services are asked to bind. The remote hosts may not share our
/// filesystem, so nothing is canonicalized.
pub fn resolve_remote_dir(path_str: &str, base: &Path) -> Result<PathBuf, AppError> {
    if path_str.trim().is_empty() {
        return Err(AppError::InvalidPath("Working directory must not be empty".to_string()));
    }
    let expanded = expand_tilde_path_buf(path_str);
    let joined = if expanded.is_absolute() { expanded } else { base.join(expanded) };
    if !joined.is_absolute() {
        return Err(AppError::InvalidPath(format!(
            "Cannot resolve '{}' to an absolute path from '{}'",
            path_str,
            base.display()
        )));
    }
    let resolved = normalize_lexically(&joined);
    debug!(input = %path_str, resolved = %resolved.display(), "Resolved working directory");
    Ok(resolved)
}

/// Remote paths travel as `/`-separated strings regardless of platform.
pub fn to_remote_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
