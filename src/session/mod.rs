//! The per-process session registry.
//!
//! A session is one browser launched with a throwaway profile, an isolated
//! browser context and one page in that context. Its [`SessionRecord`] is
//! persisted so that a later invocation can reattach when the previous one
//! asked to keep the browser open.

mod page;
mod record;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::cdp::{CdpClient, CdpConfig};
use crate::chrome::{
    self, ChromeError, DetachedProcess, Engine, LaunchConfig, kill_pid, launch_chrome,
    query_version, remove_profile,
};
use crate::error::AppError;
use crate::report::now_iso8601;

pub use page::{ManagedSession, PageInfo, apply_viewport, describe_exception, page_info};
pub use record::{
    SessionError, SessionRecord, Viewport, default_record_path, delete_record_from,
    read_record_from, write_record_to,
};

/// How long `release` waits for the browser to exit after `Browser.close`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What a command asks for when it needs a page.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub engine: Engine,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub viewport: Viewport,
    pub timeout_ms: u64,
    pub extra_args: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            headless: true,
            executable: None,
            viewport: Viewport::default(),
            timeout_ms: crate::config::DEFAULT_TIMEOUT_MS,
            extra_args: Vec::new(),
        }
    }
}

impl SessionOptions {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connectivity of the registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Absent,
    Connected,
    Disconnected,
}

/// What a read-only look at the persisted session found.
#[derive(Debug, Clone)]
pub struct PersistedStatus {
    pub record: SessionRecord,
    pub state: SessionState,
    pub page: PageInfo,
}

/// A live, attached session.
#[derive(Debug)]
pub struct Session {
    client: CdpClient,
    page: ManagedSession,
    record: SessionRecord,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.session_id
    }

    #[must_use]
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    #[must_use]
    pub fn page(&self) -> &ManagedSession {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut ManagedSession {
        &mut self.page
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected() && self.page.is_connected()
    }
}

/// Holds at most one session for the lifetime of the process.
#[derive(Debug)]
pub struct SessionStore {
    record_path: PathBuf,
    current: Option<Session>,
}

impl SessionStore {
    /// Store backed by `~/.browser-probe/session.json`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoHomeDir` if the home directory is unknown.
    pub fn new() -> Result<Self, SessionError> {
        Ok(Self::with_record_path(default_record_path()?))
    }

    #[must_use]
    pub fn with_record_path(record_path: PathBuf) -> Self {
        Self {
            record_path,
            current: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.current {
            None => SessionState::Absent,
            Some(s) if s.is_connected() => SessionState::Connected,
            Some(_) => SessionState::Disconnected,
        }
    }

    /// The connected session, reattaching or launching as needed.
    ///
    /// # Errors
    ///
    /// `SessionLaunchFailure` when a new browser cannot be started.
    pub async fn acquire(&mut self, options: &SessionOptions) -> Result<&mut Session, AppError> {
        self.discard_disconnected();
        if self.current.is_none() {
            let session = match self.reattach(options).await? {
                Some(session) => session,
                None => self.launch(options).await?,
            };
            self.current = Some(session);
        }
        self.current.as_mut().ok_or_else(AppError::no_active_session)
    }

    /// Like [`SessionStore::acquire`] but never launches.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` when nothing is connected and no record can be
    /// reattached.
    pub async fn attach_existing(
        &mut self,
        options: &SessionOptions,
    ) -> Result<&mut Session, AppError> {
        self.discard_disconnected();
        if self.current.is_none() {
            self.current = self.reattach(options).await?;
        }
        self.current.as_mut().ok_or_else(AppError::no_active_session)
    }

    /// The active page, if a connected session exists.
    pub fn current_page(&mut self) -> Option<&mut ManagedSession> {
        self.current
            .as_mut()
            .filter(|s| s.is_connected())
            .map(Session::page_mut)
    }

    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Read the persisted record without touching the browser.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the record exists but cannot be read.
    pub fn persisted(&self) -> Result<Option<SessionRecord>, SessionError> {
        read_record_from(&self.record_path)
    }

    /// Check whether the persisted browser and its page are still alive.
    ///
    /// Unlike reattaching, this never closes the browser, kills a process or
    /// deletes the record; only a short-lived WebSocket is opened.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the record exists but cannot be read.
    pub async fn inspect_persisted(
        &self,
        options: &SessionOptions,
    ) -> Result<Option<PersistedStatus>, AppError> {
        let Some(record) = self.persisted()? else {
            return Ok(None);
        };
        let page = match find_target(&record, options).await {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(
                    session_id = %record.session_id,
                    error = %e,
                    "persisted session is not reachable"
                );
                None
            }
        };
        let state = if page.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        Ok(Some(PersistedStatus {
            record,
            state,
            page: page.unwrap_or_default(),
        }))
    }

    /// Tear the session down: dispose the context, close the browser, remove
    /// the profile and the record.
    ///
    /// Without a live session this still deletes the record and its profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError` only if the record file cannot be deleted.
    pub async fn release(&mut self) -> Result<(), AppError> {
        match self.current.take() {
            Some(session) => {
                tracing::debug!(session_id = %session.id(), "releasing session");
                shutdown(session).await;
            }
            None => {
                if let Ok(Some(record)) = self.persisted() {
                    if let Some(dir) = &record.user_data_dir {
                        remove_profile(dir);
                    }
                }
            }
        }
        delete_record_from(&self.record_path)?;
        Ok(())
    }

    /// Leave the browser running and the record on disk; only this process's
    /// WebSocket is closed.
    pub async fn keep_open(&mut self) {
        if let Some(session) = self.current.take() {
            tracing::debug!(session_id = %session.id(), "keeping session open");
            let _ = session.client.close().await;
        }
    }

    fn discard_disconnected(&mut self) {
        if self.current.as_ref().is_some_and(|s| !s.is_connected()) {
            tracing::debug!("dropping disconnected session");
            self.current = None;
        }
    }

    /// Reattach to the persisted session. Stale records are cleaned up and
    /// yield `Ok(None)`.
    async fn reattach(&self, options: &SessionOptions) -> Result<Option<Session>, AppError> {
        let record = match self.persisted() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable session record");
                delete_record_from(&self.record_path)?;
                return Ok(None);
            }
        };

        if record.engine != options.engine {
            tracing::debug!(
                recorded = %record.engine,
                requested = %options.engine,
                "reusing kept-open session with a different engine"
            );
        }

        let Ok(version) = query_version(record.port).await else {
            tracing::debug!(port = record.port, "session record is stale, browser not reachable");
            self.discard_record(&record)?;
            return Ok(None);
        };

        let client = CdpClient::connect(
            &version.ws_debugger_url,
            CdpConfig::with_command_timeout(options.timeout()),
        )
        .await?;

        let targets = client.send_command("Target.getTargets", None).await?;
        let target_alive = targets["targetInfos"].as_array().is_some_and(|infos| {
            infos
                .iter()
                .any(|t| t["targetId"] == record.target_id.as_str() && t["type"] == "page")
        });
        if !target_alive {
            tracing::debug!(target_id = %record.target_id, "session page is gone, closing browser");
            if client.send_command("Browser.close", None).await.is_err() {
                if let Some(pid) = record.pid {
                    kill_pid(pid);
                }
            }
            let _ = client.close().await;
            self.discard_record(&record)?;
            return Ok(None);
        }

        let page = ManagedSession::new(client.attach(&record.target_id).await?);
        apply_viewport(&page, record.viewport).await?;
        tracing::debug!(session_id = %record.session_id, "reattached to session");

        Ok(Some(Session {
            client,
            page,
            record,
        }))
    }

    fn discard_record(&self, record: &SessionRecord) -> Result<(), AppError> {
        if let Some(dir) = &record.user_data_dir {
            remove_profile(dir);
        }
        delete_record_from(&self.record_path)?;
        Ok(())
    }

    async fn launch(&self, options: &SessionOptions) -> Result<Session, AppError> {
        let executable = chrome::find_executable(options.engine, options.executable.as_deref())?;
        let config = LaunchConfig {
            executable,
            headless: options.headless,
            window_size: (options.viewport.width, options.viewport.height),
            extra_args: options.extra_args.clone(),
        };
        let process = launch_chrome(&config, options.timeout()).await?;

        let client = CdpClient::connect(
            process.ws_url(),
            CdpConfig::with_command_timeout(options.timeout()),
        )
        .await
        .map_err(|e| AppError::launch_failed(format!("could not connect to browser: {e}")))?;

        let (context_id, target_id, page) = open_isolated_page(&client, options.viewport)
            .await
            .map_err(|e| AppError::launch_failed(format!("could not open page: {e}")))?;

        let record = SessionRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            engine: options.engine,
            ws_url: process.ws_url().to_owned(),
            port: process.port(),
            pid: Some(process.pid()),
            context_id,
            target_id,
            headless: options.headless,
            viewport: options.viewport,
            user_data_dir: Some(process.user_data_dir().to_path_buf()),
            created_at: now_iso8601(),
        };
        write_record_to(&self.record_path, &record)?;

        // The record is on disk, so from here on the browser must survive
        // this handle.
        let DetachedProcess { pid, port, .. } = process.detach();
        tracing::debug!(session_id = %record.session_id, pid, port, "launched new session");

        Ok(Session {
            client,
            page,
            record,
        })
    }
}

async fn open_isolated_page(
    client: &CdpClient,
    viewport: Viewport,
) -> Result<(String, String, ManagedSession), AppError> {
    let context = client
        .send_command(
            "Target.createBrowserContext",
            Some(json!({ "disposeOnDetach": false })),
        )
        .await?;
    let context_id = context["browserContextId"]
        .as_str()
        .ok_or_else(|| ChromeError::ParseError("createBrowserContext returned no id".into()))?
        .to_owned();

    let target = client
        .send_command(
            "Target.createTarget",
            Some(json!({ "url": "about:blank", "browserContextId": context_id })),
        )
        .await?;
    let target_id = target["targetId"]
        .as_str()
        .ok_or_else(|| ChromeError::ParseError("createTarget returned no targetId".into()))?
        .to_owned();

    let page = ManagedSession::new(client.attach(&target_id).await?);
    apply_viewport(&page, viewport).await?;
    Ok((context_id, target_id, page))
}

/// The recorded page's url and title, or `None` if the browser no longer
/// lists it.
async fn find_target(
    record: &SessionRecord,
    options: &SessionOptions,
) -> Result<Option<PageInfo>, AppError> {
    let version = query_version(record.port).await?;
    let client = CdpClient::connect(
        &version.ws_debugger_url,
        CdpConfig::with_command_timeout(options.timeout()),
    )
    .await?;
    let targets = client.send_command("Target.getTargets", None).await;
    let _ = client.close().await;

    let targets = targets?;
    let page = targets["targetInfos"].as_array().and_then(|infos| {
        infos
            .iter()
            .find(|t| t["targetId"] == record.target_id.as_str() && t["type"] == "page")
            .map(|t| PageInfo {
                url: t["url"].as_str().unwrap_or_default().to_owned(),
                title: t["title"].as_str().unwrap_or_default().to_owned(),
            })
    });
    Ok(page)
}

async fn shutdown(session: Session) {
    let Session { client, record, .. } = session;

    if let Err(e) = client
        .send_command(
            "Target.disposeBrowserContext",
            Some(json!({ "browserContextId": record.context_id })),
        )
        .await
    {
        tracing::warn!(error = %e, "could not dispose browser context");
    }

    if let Err(e) = client.send_command("Browser.close", None).await {
        tracing::debug!(error = %e, "Browser.close failed, killing process");
        if let Some(pid) = record.pid {
            kill_pid(pid);
        }
    }
    let _ = client.close().await;

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while tokio::time::Instant::now() < deadline && query_version(record.port).await.is_ok() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(dir) = &record.user_data_dir {
        remove_profile(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::with_record_path(dir.path().join("session.json"));
        assert_eq!(store.state(), SessionState::Absent);
        assert!(store.current_page().is_none());
    }

    #[tokio::test]
    async fn attach_existing_without_record_is_no_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SessionStore::with_record_path(dir.path().join("session.json"));
        let err = store
            .attach_existing(&SessionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NoActiveSession);
    }

    #[tokio::test]
    async fn stale_record_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(&profile).unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let record = SessionRecord {
            session_id: "stale".into(),
            engine: Engine::Chromium,
            ws_url: format!("ws://127.0.0.1:{port}/devtools/browser/x"),
            port,
            pid: None,
            context_id: "CTX".into(),
            target_id: "T".into(),
            headless: true,
            viewport: Viewport::default(),
            user_data_dir: Some(profile.clone()),
            created_at: now_iso8601(),
        };
        write_record_to(&path, &record).unwrap();

        let mut store = SessionStore::with_record_path(path.clone());
        let err = store
            .attach_existing(&SessionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NoActiveSession);
        assert!(!path.exists());
        assert!(!profile.exists());
    }

    #[tokio::test]
    async fn unreachable_record_reports_disconnected_and_stays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let record = SessionRecord {
            session_id: "gone".into(),
            engine: Engine::Chromium,
            ws_url: format!("ws://127.0.0.1:{port}/devtools/browser/x"),
            port,
            pid: None,
            context_id: "CTX".into(),
            target_id: "T".into(),
            headless: true,
            viewport: Viewport::default(),
            user_data_dir: None,
            created_at: now_iso8601(),
        };
        write_record_to(&path, &record).unwrap();

        let store = SessionStore::with_record_path(path.clone());
        let status = store
            .inspect_persisted(&SessionOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.record.session_id, "gone");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn release_without_session_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        let mut store = SessionStore::with_record_path(path.clone());
        store.release().await.unwrap();
        assert!(!path.exists());
    }
}
