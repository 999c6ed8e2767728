use std::env;
use std::path::{Path, PathBuf};

/// Resolve a command name to an executable path.
///
/// Names containing a path separator are checked directly; bare names are
/// looked up in `PATH`.
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }

    if command.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(command);
        return is_executable(&path).then_some(path);
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command() {
        assert!(find_in_path("").is_none());
    }

    #[test]
    fn test_missing_command() {
        assert!(find_in_path("definitely-not-a-real-binary-4f2a").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_explicit_path() {
        assert_eq!(find_in_path("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert!(find_in_path("/nonexistent/codex").is_none());
    }

    #[test]
    fn test_lookup_uses_path_var() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("fake-codex");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        temp_env::with_var("PATH", Some(dir.path()), || {
            assert_eq!(find_in_path("fake-codex"), Some(bin.clone()));
        });
    }
}
