use serde::Serialize;

use browser_probe::error::AppError;
use browser_probe::monitor::console::{ConsoleMessageRecord, ConsoleSummary};
use browser_probe::monitor::{ConsoleCollector, TypeFilter, run_window};
use browser_probe::session::SessionStore;

use crate::cli::MonitorArgs;
use crate::context::{CommandContext, emit};
use crate::network::monitored_session;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleResult {
    messages: Vec<ConsoleMessageRecord>,
    summary: ConsoleSummary,
    filter: TypeFilter,
    duration_ms: u64,
    elapsed_ms: u64,
}

pub async fn execute_console(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &MonitorArgs,
) -> Result<(), AppError> {
    let (session, url) = monitored_session(ctx, store, args).await?;
    let collector = ConsoleCollector::new(&args.types);
    let filter = collector.filter().clone();
    let duration_ms = args.duration.unwrap_or(ctx.config.monitor_duration_ms);

    let outcome = run_window(session.page_mut(), collector, duration_ms, url.as_deref()).await?;
    tracing::debug!(
        messages = outcome.report.summary.total,
        elapsed_ms = outcome.elapsed_ms,
        "console window closed"
    );

    let result = ConsoleResult {
        messages: outcome.report.messages,
        summary: outcome.report.summary,
        filter,
        duration_ms: outcome.duration_ms,
        elapsed_ms: outcome.elapsed_ms,
    };
    emit(session, ctx, &result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_carries_window_timing_and_filter() {
        let result = ConsoleResult {
            messages: Vec::new(),
            summary: ConsoleSummary::default(),
            filter: TypeFilter::new(["error"]),
            duration_ms: 5_000,
            elapsed_ms: 5_012,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["durationMs"], 5_000);
        assert_eq!(json["elapsedMs"], 5_012);
        assert_eq!(json["filter"], serde_json::json!(["error"]));
        assert_eq!(json["summary"]["total"], 0);
        assert!(json["summary"]["byType"].as_object().unwrap().is_empty());
    }
}
