//! Time-boxed observation of page events.
//!
//! A monitor subscribes once to every CDP method its collector understands,
//! so events reach the collector in the order Chrome emitted them. The
//! window deadline is fixed when capture begins and any navigation happens
//! inside the window.

pub mod console;
pub mod network;

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cdp::CdpEvent;
use crate::error::{AppError, ErrorKind};
use crate::report::epoch_millis;
use crate::session::ManagedSession;
use crate::wait::start_navigation;

pub use console::{ConsoleCollector, ConsoleMessageRecord, ConsoleReport, ConsoleSummary};
pub use network::{NetworkCollector, NetworkReport, NetworkRequestRecord, NetworkSummary};

/// Where a monitor run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Attached,
    Navigating,
    Capturing,
    Summarizing,
    Done,
}

/// Turns a stream of CDP events into records.
pub trait EventCollector {
    type Report;

    /// Every event method the collector wants, on one subscription.
    const METHODS: &'static [&'static str];
    /// Domains to enable after subscribing.
    const DOMAINS: &'static [&'static str];

    /// Called once with the wall-clock start of the window (milliseconds
    /// since the epoch), before any domain is enabled.
    fn window_opened(&mut self, _started_at_ms: f64) {}

    fn handle(&mut self, event: &CdpEvent);

    fn finish(self) -> Self::Report;
}

/// Category filter shared by the monitors. Empty means "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TypeFilter(Option<BTreeSet<String>>);

impl TypeFilter {
    /// Build from user input; entries are trimmed and lowercased.
    #[must_use]
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = types
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self((!set.is_empty()).then_some(set))
    }

    #[must_use]
    pub fn allows(&self, kind: &str) -> bool {
        self.0
            .as_ref()
            .is_none_or(|set| set.contains(&kind.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Result of one observation window.
#[derive(Debug)]
pub struct WindowOutcome<R> {
    pub report: R,
    pub duration_ms: u64,
    pub elapsed_ms: u64,
}

/// Observe `page` for `duration_ms`, optionally navigating to `url` once
/// capture has started.
///
/// # Errors
///
/// `NavigationFailure` if the navigation is rejected, `Connection` if the
/// browser goes away mid-window.
pub async fn run_window<C: EventCollector>(
    page: &mut ManagedSession,
    mut collector: C,
    duration_ms: u64,
    url: Option<&str>,
) -> Result<WindowOutcome<C::Report>, AppError> {
    let mut phase = MonitorPhase::Idle;
    advance(&mut phase, MonitorPhase::Attached);

    let mut rx = page.subscribe(C::METHODS).await?;

    // Enabling a domain replays what the page buffered earlier, so the
    // window opens first.
    let start = Instant::now();
    let deadline = start + Duration::from_millis(duration_ms);
    collector.window_opened(epoch_millis());
    for domain in C::DOMAINS {
        page.ensure_domain(domain).await?;
    }

    if let Some(url) = url {
        advance(&mut phase, MonitorPhase::Navigating);
        start_navigation(page, url).await?;
    }

    advance(&mut phase, MonitorPhase::Capturing);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => collector.handle(&event),
                None => {
                    return Err(AppError::new(
                        ErrorKind::Connection,
                        "browser connection closed during monitoring",
                    ));
                }
            },
            () = tokio::time::sleep_until(deadline) => break,
        }
    }
    // Anything already queued was emitted before the deadline.
    while let Ok(event) = rx.try_recv() {
        collector.handle(&event);
    }
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    advance(&mut phase, MonitorPhase::Summarizing);
    let report = collector.finish();
    advance(&mut phase, MonitorPhase::Done);

    Ok(WindowOutcome {
        report,
        duration_ms,
        elapsed_ms,
    })
}

fn advance(phase: &mut MonitorPhase, next: MonitorPhase) {
    tracing::debug!(from = ?*phase, to = ?next, "monitor phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_allows_everything() {
        let filter = TypeFilter::new(Vec::<String>::new());
        assert!(filter.is_empty());
        assert!(filter.allows("log"));
        assert_eq!(serde_json::to_value(&filter).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let filter = TypeFilter::new(["Script", " XHR "]);
        assert!(filter.allows("script"));
        assert!(filter.allows("xhr"));
        assert!(filter.allows("XHR"));
        assert!(!filter.allows("image"));
    }

    #[test]
    fn filter_serializes_as_sorted_list() {
        let filter = TypeFilter::new(["xhr", "script"]);
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            serde_json::json!(["script", "xhr"])
        );
    }
}
