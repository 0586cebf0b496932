use serde::Serialize;

use browser_probe::error::AppError;
use browser_probe::field::fill_field;
use browser_probe::session::SessionStore;
use browser_probe::wait::wait_for_element;

use crate::cli::FillArgs;
use crate::context::{CommandContext, emit, open_page};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FillResult {
    selector: String,
    value: String,
    actual_value: String,
    matched: bool,
}

impl FillResult {
    fn new(selector: &str, value: &str, actual_value: String) -> Self {
        Self {
            matched: actual_value == value,
            selector: selector.to_owned(),
            value: value.to_owned(),
            actual_value,
        }
    }
}

pub async fn execute_fill(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &FillArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let page = session.page();
    let selector = args.selector.as_str();

    wait_for_element(page, selector, ctx.timeout_ms()).await?;
    let actual = fill_field(page, selector, &args.value, args.clear).await?;

    let result = FillResult::new(selector, &args.value, actual);
    if !result.matched {
        tracing::debug!(
            selector,
            expected = %result.value,
            actual = %result.actual_value,
            "page changed the filled value"
        );
    }
    emit(session, ctx, &result).await
}
