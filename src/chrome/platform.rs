use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ChromeError;

/// Chromium-family browser to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Chromium,
    Chrome,
    Edge,
}

impl Engine {
    /// Parse an engine name. Anything unrecognized falls back to Chromium.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "chromium" => Self::Chromium,
            "chrome" | "google-chrome" => Self::Chrome,
            "edge" | "msedge" => Self::Edge,
            other => {
                tracing::warn!(engine = other, "unknown engine, falling back to chromium");
                Self::Chromium
            }
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locate the executable for `engine`.
///
/// An explicit path wins, then `CHROME_PATH`, then the platform's well-known
/// install locations.
///
/// # Errors
///
/// Returns `ChromeError::NotFound` if nothing runnable is found.
pub fn find_executable(engine: Engine, explicit: Option<&Path>) -> Result<PathBuf, ChromeError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(ChromeError::NotFound(format!(
            "{} does not exist",
            p.display()
        )));
    }
    let env_override = std::env::var("CHROME_PATH").ok().map(PathBuf::from);
    find_executable_from(engine, env_override.as_deref())
}

fn find_executable_from(engine: Engine, env_override: Option<&Path>) -> Result<PathBuf, ChromeError> {
    if let Some(p) = env_override {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        tracing::debug!(path = %p.display(), "CHROME_PATH does not exist, ignoring");
    }

    candidates(engine)
        .into_iter()
        .find(|c| c.exists())
        .ok_or_else(|| {
            ChromeError::NotFound(format!(
                "no {engine} installation found; pass --executable or set CHROME_PATH"
            ))
        })
}

fn candidates(engine: Engine) -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        macos_candidates(engine)
    }

    #[cfg(target_os = "linux")]
    {
        linux_candidates(engine)
    }

    #[cfg(target_os = "windows")]
    {
        windows_candidates(engine)
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        let _ = engine;
        vec![]
    }
}

#[cfg(target_os = "macos")]
fn macos_candidates(engine: Engine) -> Vec<PathBuf> {
    let chrome = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";
    let chromium = "/Applications/Chromium.app/Contents/MacOS/Chromium";
    let edge = "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge";
    let paths: &[&str] = match engine {
        // Any Chromium build will do when the plain engine is asked for.
        Engine::Chromium => &[chromium, chrome],
        Engine::Chrome => &[chrome],
        Engine::Edge => &[edge],
    };
    paths.iter().map(PathBuf::from).collect()
}

#[cfg(target_os = "linux")]
fn linux_candidates(engine: Engine) -> Vec<PathBuf> {
    let path_dirs: Vec<PathBuf> = std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .map(PathBuf::from)
        .collect();

    let names: &[&str] = match engine {
        Engine::Chromium => &[
            "chromium",
            "chromium-browser",
            "google-chrome",
            "google-chrome-stable",
        ],
        Engine::Chrome => &["google-chrome", "google-chrome-stable"],
        Engine::Edge => &["microsoft-edge", "microsoft-edge-stable"],
    };

    names
        .iter()
        .flat_map(|name| path_dirs.iter().map(move |dir| dir.join(name)))
        .collect()
}

#[cfg(target_os = "windows")]
fn windows_candidates(engine: Engine) -> Vec<PathBuf> {
    let program_files = PathBuf::from(std::env::var("ProgramFiles").unwrap_or_default());
    let program_files_x86 = PathBuf::from(std::env::var("ProgramFiles(x86)").unwrap_or_default());
    let local_app_data = PathBuf::from(std::env::var("LOCALAPPDATA").unwrap_or_default());

    let chrome = "Google/Chrome/Application/chrome.exe";
    match engine {
        Engine::Chromium => vec![
            local_app_data.join("Chromium/Application/chrome.exe"),
            program_files.join(chrome),
            program_files_x86.join(chrome),
        ],
        Engine::Chrome => vec![program_files.join(chrome), program_files_x86.join(chrome)],
        Engine::Edge => vec![
            program_files_x86.join("Microsoft/Edge/Application/msedge.exe"),
            program_files.join("Microsoft/Edge/Application/msedge.exe"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_parse() {
        assert_eq!(Engine::from_name("chrome"), Engine::Chrome);
        assert_eq!(Engine::from_name("EDGE"), Engine::Edge);
        assert_eq!(Engine::from_name(" chromium "), Engine::Chromium);
    }

    #[test]
    fn unknown_engine_falls_back_to_chromium() {
        assert_eq!(Engine::from_name("firefox"), Engine::Chromium);
        assert_eq!(Engine::from_name(""), Engine::Chromium);
    }

    #[test]
    fn engine_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Engine::Edge).unwrap(), "edge");
        let e: Engine = serde_json::from_str("\"chrome\"").unwrap();
        assert_eq!(e, Engine::Chrome);
    }

    #[test]
    fn env_override_that_exists_wins() {
        let exe = std::env::current_exe().unwrap();
        let found = find_executable_from(Engine::Edge, Some(&exe)).unwrap();
        assert_eq!(found, exe);
    }

    #[test]
    fn missing_explicit_path_is_not_found() {
        let err = find_executable(Engine::Chromium, Some(Path::new("/nonexistent/chromium")))
            .unwrap_err();
        assert!(matches!(err, ChromeError::NotFound(_)));
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
    #[test]
    fn every_engine_has_candidates() {
        for engine in [Engine::Chromium, Engine::Chrome, Engine::Edge] {
            assert!(!candidates(engine).is_empty(), "{engine} has no candidates");
        }
    }
}
