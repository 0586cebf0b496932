use serde::Serialize;

use browser_probe::chrome::Engine;
use browser_probe::error::{AppError, ErrorKind};
use browser_probe::report::print_success;
use browser_probe::session::{PageInfo, SessionRecord, SessionState, SessionStore};

use crate::context::CommandContext;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResult {
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<Engine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

impl StatusResult {
    fn new(state: SessionState, record: Option<&SessionRecord>) -> Self {
        Self {
            state,
            engine: record.map(|r| r.engine),
            pid: record.and_then(|r| r.pid),
            port: record.map(|r| r.port),
        }
    }
}

#[derive(Debug, Serialize)]
struct CloseResult {
    closed: bool,
}

/// Report the persisted session without launching or tearing anything down.
pub async fn execute_status(ctx: &CommandContext, store: &SessionStore) -> Result<(), AppError> {
    let Some(status) = store.inspect_persisted(&ctx.session_options()).await? else {
        let result = StatusResult::new(SessionState::Absent, None);
        return print_success(&PageInfo::default(), None, &result, ctx.config.pretty);
    };
    let result = StatusResult::new(status.state, Some(&status.record));
    print_success(
        &status.page,
        Some(&status.record.session_id),
        &result,
        ctx.config.pretty,
    )
}

/// Release the persisted session. The record is removed either way.
pub async fn execute_close(ctx: &CommandContext, store: &mut SessionStore) -> Result<(), AppError> {
    let record = store.persisted().ok().flatten();
    let closed = match store.attach_existing(&ctx.session_options()).await {
        Ok(_) => true,
        Err(e) => {
            if e.kind != ErrorKind::NoActiveSession {
                tracing::warn!(error = %e, "could not reattach, removing the record only");
            }
            false
        }
    };
    store.release().await?;
    print_success(
        &PageInfo::default(),
        record.as_ref().map(|r| r.session_id.as_str()),
        &CloseResult { closed },
        ctx.config.pretty,
    )
}
