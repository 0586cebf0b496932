use serde::Serialize;

use browser_probe::error::AppError;
use browser_probe::monitor::network::{NetworkRequestRecord, NetworkSummary};
use browser_probe::monitor::{NetworkCollector, TypeFilter, run_window};
use browser_probe::session::{Session, SessionStore};
use browser_probe::wait::normalize_url;

use crate::cli::MonitorArgs;
use crate::context::{CommandContext, emit};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkResult {
    requests: Vec<NetworkRequestRecord>,
    summary: NetworkSummary,
    filter: TypeFilter,
    duration_ms: u64,
    elapsed_ms: u64,
}

/// The session a monitor observes. With a URL one is launched if needed;
/// without one only an existing session will do.
pub async fn monitored_session<'a>(
    ctx: &CommandContext,
    store: &'a mut SessionStore,
    args: &MonitorArgs,
) -> Result<(&'a mut Session, Option<String>), AppError> {
    let options = ctx.session_options();
    match args.url.as_deref() {
        Some(raw) => {
            let url = normalize_url(raw)?;
            Ok((store.acquire(&options).await?, Some(url)))
        }
        None => Ok((store.attach_existing(&options).await?, None)),
    }
}

pub async fn execute_network(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &MonitorArgs,
) -> Result<(), AppError> {
    let (session, url) = monitored_session(ctx, store, args).await?;
    let collector = NetworkCollector::new(&args.types);
    let filter = collector.filter().clone();
    let duration_ms = args.duration.unwrap_or(ctx.config.monitor_duration_ms);

    let outcome = run_window(session.page_mut(), collector, duration_ms, url.as_deref()).await?;
    tracing::debug!(
        requests = outcome.report.summary.total,
        failed = outcome.report.summary.failed,
        elapsed_ms = outcome.elapsed_ms,
        "network window closed"
    );

    let result = NetworkResult {
        requests: outcome.report.requests,
        summary: outcome.report.summary,
        filter,
        duration_ms: outcome.duration_ms,
        elapsed_ms: outcome.elapsed_ms,
    };
    emit(session, ctx, &result).await
}
