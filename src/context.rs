use serde::Serialize;

use browser_probe::config::{Overrides, ResolvedConfig, load_config, resolve_config};
use browser_probe::error::{AppError, ErrorKind};
use browser_probe::report::print_success;
use browser_probe::session::{
    ManagedSession, PageInfo, Session, SessionOptions, SessionStore, page_info,
};
use browser_probe::wait::{POLL_INTERVAL, navigate, normalize_url};

use crate::cli::{GlobalOpts, TargetArgs};

/// Attempts to read the page while it may still be swapping documents.
const PAGE_INFO_ATTEMPTS: u32 = 20;

/// Settings shared by every command of one invocation.
#[derive(Debug)]
pub struct CommandContext {
    pub config: ResolvedConfig,
}

impl CommandContext {
    /// # Errors
    ///
    /// `InvalidArgument` when an explicit `--config` file does not exist.
    pub fn from_global(global: &GlobalOpts) -> Result<Self, AppError> {
        let (path, file) = load_config(global.config.as_deref())?;
        let overrides = Overrides {
            engine: global.engine.clone(),
            headless: global.headless,
            timeout_ms: global.timeout,
            width: global.width,
            height: global.height,
            executable: global.executable.clone(),
            output_dir: global.output_dir.clone(),
            pretty: global.pretty,
        };
        let config = resolve_config(&file, path, &overrides);
        tracing::debug!(?config, "resolved configuration");
        Ok(Self { config })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            engine: self.config.engine,
            headless: self.config.headless,
            executable: self.config.executable.clone(),
            viewport: self.config.viewport,
            timeout_ms: self.config.timeout_ms,
            extra_args: self.config.extra_args.clone(),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }
}

/// Acquire the session and run the optional preliminary navigation.
///
/// The URL is validated before anything is launched.
pub async fn open_page<'a>(
    store: &'a mut SessionStore,
    ctx: &CommandContext,
    target: &TargetArgs,
) -> Result<&'a mut Session, AppError> {
    let url = target.url.as_deref().map(normalize_url).transpose()?;
    let session = store.acquire(&ctx.session_options()).await?;
    if let Some(url) = url {
        navigate(session.page_mut(), &url, target.wait_until, ctx.timeout_ms()).await?;
    }
    Ok(session)
}

/// Page location and title, retried while a navigation replaces the
/// execution context.
pub async fn settled_page_info(page: &ManagedSession) -> Result<PageInfo, AppError> {
    let mut attempt = 1;
    loop {
        match page_info(page).await {
            Err(e) if e.kind == ErrorKind::Protocol && attempt < PAGE_INFO_ATTEMPTS => {
                tracing::debug!(error = %e, attempt, "page not ready, retrying");
                attempt += 1;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            other => return other,
        }
    }
}

/// Print the success envelope for `session`.
pub async fn emit<T: Serialize>(
    session: &Session,
    ctx: &CommandContext,
    payload: &T,
) -> Result<(), AppError> {
    let info = settled_page_info(session.page()).await?;
    print_success(&info, Some(session.id()), payload, ctx.config.pretty)
}
