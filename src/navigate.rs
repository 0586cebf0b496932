use serde::Serialize;

use browser_probe::error::AppError;
use browser_probe::session::SessionStore;
use browser_probe::wait::{navigate, normalize_url};

use crate::cli::NavigateArgs;
use crate::context::{CommandContext, emit};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigateResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

pub async fn execute_navigate(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &NavigateArgs,
) -> Result<(), AppError> {
    let url = normalize_url(&args.url)?;
    let session = store.acquire(&ctx.session_options()).await?;
    let status = navigate(session.page_mut(), &url, args.wait_until, ctx.timeout_ms()).await?;
    tracing::debug!(%url, ?status, "navigation finished");
    emit(session, ctx, &NavigateResult { status }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_omitted_when_unknown() {
        let json = serde_json::to_value(NavigateResult { status: None }).unwrap();
        assert!(json.get("status").is_none());
        let json = serde_json::to_value(NavigateResult { status: Some(404) }).unwrap();
        assert_eq!(json["status"], 404);
    }
}
