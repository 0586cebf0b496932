use serde::Serialize;
use serde_json::json;

use browser_probe::error::{AppError, ErrorKind};
use browser_probe::inspect::{ElementDescriptor, describe_element, scroll_into_view};
use browser_probe::session::{ManagedSession, SessionStore};
use browser_probe::wait::wait_for_element;

use crate::cli::ClickArgs;
use crate::context::{CommandContext, emit, open_page, settled_page_info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClickResult {
    clicked: String,
    element: ElementDescriptor,
    navigated: bool,
    warnings: Vec<String>,
}

pub async fn execute_click(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &ClickArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let page = session.page();
    let selector = args.selector.as_str();

    wait_for_element(page, selector, ctx.timeout_ms()).await?;
    if !describe_element(page, selector).await?.visible {
        return Err(AppError::element_not_visible(selector));
    }
    scroll_into_view(page, selector).await?;
    // Coordinates are viewport-relative, so read them after scrolling.
    let element = describe_element(page, selector).await?;
    let (x, y) = element.bounding_box.center();

    let before = settled_page_info(page).await?.url;
    dispatch_click(page, x, y).await?;

    let mut warnings = Vec::new();
    if let Some(expected) = &args.wait_for {
        match wait_for_element(page, expected, ctx.timeout_ms()).await {
            Ok(_) => {}
            Err(e) if e.kind == ErrorKind::ElementNotFound => {
                tracing::warn!(selector = %expected, "post-click element did not appear");
                warnings.push(format!(
                    "'{expected}' did not appear within {}ms after the click",
                    ctx.timeout_ms()
                ));
            }
            Err(e) => return Err(e),
        }
    }
    let navigated = settled_page_info(page).await?.url != before;

    let result = ClickResult {
        clicked: selector.to_owned(),
        element,
        navigated,
        warnings,
    };
    emit(session, ctx, &result).await
}

/// Left button press and release at viewport coordinates.
async fn dispatch_click(page: &ManagedSession, x: f64, y: f64) -> Result<(), AppError> {
    for kind in ["mousePressed", "mouseReleased"] {
        page.send_command(
            "Input.dispatchMouseEvent",
            Some(json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": 1,
            })),
        )
        .await?;
    }
    Ok(())
}
