use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chrome::Engine;
use crate::error::{AppError, ErrorKind};

/// Page viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Everything a later invocation needs to reattach to a kept-open session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub engine: Engine,
    pub ws_url: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// CDP `browserContextId` of the isolated context.
    pub context_id: String,
    pub target_id: String,
    pub headless: bool,
    pub viewport: Viewport,
    /// Throwaway profile to remove on release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    pub created_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid session file: {0}")]
    InvalidFormat(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

/// `~/.browser-probe/session.json`
///
/// # Errors
///
/// Returns `SessionError::NoHomeDir` if the home directory cannot be determined.
pub fn default_record_path() -> Result<PathBuf, SessionError> {
    dirs::home_dir()
        .map(|home| home.join(".browser-probe").join("session.json"))
        .ok_or(SessionError::NoHomeDir)
}

/// Write the record atomically (temp file then rename), readable only by the
/// owner on Unix.
///
/// # Errors
///
/// Returns `SessionError::Io` on I/O failure.
pub fn write_record_to(path: &Path, record: &SessionRecord) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    let json = serde_json::to_string_pretty(record)
        .map_err(|e| SessionError::InvalidFormat(e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `Ok(None)` when no record exists.
///
/// # Errors
///
/// `SessionError::InvalidFormat` for unparseable content, `SessionError::Io`
/// for other read failures.
pub fn read_record_from(path: &Path) -> Result<Option<SessionRecord>, SessionError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| SessionError::InvalidFormat(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SessionError::Io(e)),
    }
}

/// Succeeds when the file is already gone.
///
/// # Errors
///
/// Returns `SessionError::Io` on errors other than "not found".
pub fn delete_record_from(path: &Path) -> Result<(), SessionError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SessionError::Io(e)),
    }
}
