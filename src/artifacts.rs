//! Where screenshots and snapshots are written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Files or directories that mark a project root.
pub const PROJECT_MARKERS: &[&str] = &[
    ".git",
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "composer.json",
    "Gemfile",
    ".hg",
];

/// Nearest ancestor of `start` (inclusive) that contains a project marker.
#[must_use]
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().any(|m| dir.join(m).exists()))
        .map(Path::to_path_buf)
}

/// Directory for artifacts: the configured directory if any, else the
/// project root above `cwd`, else `cwd` itself.
#[must_use]
pub fn resolve_output_dir(configured: Option<&Path>, cwd: &Path) -> PathBuf {
    match configured {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
        None => find_project_root(cwd).unwrap_or_else(|| cwd.to_path_buf()),
    }
}

/// `{prefix}-YYYYMMDD-HHMMSS-mmm.{extension}`
#[must_use]
pub fn timestamped_name(prefix: &str, extension: &str, at: DateTime<Local>) -> String {
    format!("{prefix}-{}.{extension}", at.format("%Y%m%d-%H%M%S-%3f"))
}

/// Final path for an artifact. An explicit `--output` path wins outright.
///
/// # Errors
///
/// Returns an I/O error if the working directory cannot be read or the
/// output directory cannot be created.
pub fn artifact_path(
    explicit: Option<&Path>,
    configured_dir: Option<&Path>,
    prefix: &str,
    extension: &str,
) -> std::io::Result<PathBuf> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let cwd = std::env::current_dir()?;
            resolve_output_dir(configured_dir, &cwd).join(timestamped_name(
                prefix,
                extension,
                Local::now(),
            ))
        }
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_has_millisecond_timestamp() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(89);
        assert_eq!(
            timestamped_name("screenshot", "png", at),
            "screenshot-20260304-050607-089.png"
        );
    }

    #[test]
    fn marker_walk_finds_nearest_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("package.json"), "{}").unwrap();

        assert_eq!(find_project_root(&nested), Some(root.clone()));
        assert_eq!(resolve_output_dir(None, &nested), root);
    }

    #[test]
    fn configured_dir_beats_marker_walk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let configured = dir.path().join("artifacts");
        assert_eq!(resolve_output_dir(Some(&configured), dir.path()), configured);
    }

    #[test]
    fn relative_configured_dir_is_under_cwd() {
        let cwd = Path::new("/work/app");
        assert_eq!(
            resolve_output_dir(Some(Path::new("out")), cwd),
            PathBuf::from("/work/app/out")
        );
    }

    #[test]
    fn explicit_output_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("shots").join("home.png");
        let path = artifact_path(Some(&explicit), None, "screenshot", "png").unwrap();
        assert_eq!(path, explicit);
        assert!(explicit.parent().unwrap().is_dir());
    }
}
