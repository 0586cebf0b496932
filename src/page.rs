use std::path::PathBuf;

use base64::Engine as _;
use serde::Serialize;
use serde_json::{Value, json};

use browser_probe::artifacts::artifact_path;
use browser_probe::error::{AppError, ErrorKind};
use browser_probe::inspect::{ElementDescriptor, describe_element, document_box, snapshot_elements};
use browser_probe::report::{now_iso8601, render};
use browser_probe::session::{ManagedSession, SessionStore};
use browser_probe::wait::wait_for_element;

use crate::cli::{ScreenshotArgs, SelectorArgs, SnapshotArgs};
use crate::context::{CommandContext, emit, open_page, settled_page_info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotResult {
    path: PathBuf,
    full_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<String>,
    bytes: usize,
}

#[derive(Debug, Serialize)]
struct SnapshotFile<'a> {
    url: &'a str,
    title: &'a str,
    timestamp: String,
    elements: &'a [ElementDescriptor],
}

#[derive(Debug, Serialize)]
struct SnapshotResult {
    path: PathBuf,
    count: usize,
    elements: Vec<ElementDescriptor>,
}

#[derive(Debug, Serialize)]
struct DescribeResult {
    element: ElementDescriptor,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaitResult {
    element: ElementDescriptor,
    waited_ms: u64,
}

// =============================================================================
// Screenshot
// =============================================================================

pub async fn execute_screenshot(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &ScreenshotArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let page = session.page();

    let params = if args.full_page {
        full_page_params(page).await?
    } else if let Some(selector) = &args.selector {
        wait_for_element(page, selector, ctx.timeout_ms()).await?;
        element_params(page, selector).await?
    } else {
        json!({ "format": "png" })
    };

    let response = page
        .send_command("Page.captureScreenshot", Some(params))
        .await?;
    let data = response["data"].as_str().unwrap_or_default();
    let png = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| AppError::new(ErrorKind::Protocol, format!("invalid screenshot data: {e}")))?;

    let path = artifact_path(
        args.output.as_deref(),
        ctx.config.output_dir.as_deref(),
        "screenshot",
        "png",
    )?;
    std::fs::write(&path, &png)?;
    tracing::debug!(path = %path.display(), bytes = png.len(), "screenshot written");

    let result = ScreenshotResult {
        path,
        full_page: args.full_page,
        selector: args.selector.clone(),
        bytes: png.len(),
    };
    emit(session, ctx, &result).await
}

async fn full_page_params(page: &ManagedSession) -> Result<Value, AppError> {
    let metrics = page.send_command("Page.getLayoutMetrics", None).await?;
    let size = if metrics["cssContentSize"].is_object() {
        &metrics["cssContentSize"]
    } else {
        &metrics["contentSize"]
    };
    let width = size["width"].as_f64().unwrap_or(0.0);
    let height = size["height"].as_f64().unwrap_or(0.0);
    Ok(json!({
        "format": "png",
        "captureBeyondViewport": true,
        "clip": { "x": 0, "y": 0, "width": width, "height": height, "scale": 1 },
    }))
}

async fn element_params(page: &ManagedSession, selector: &str) -> Result<Value, AppError> {
    let rect = document_box(page, selector).await?;
    if !rect.has_area() {
        return Err(AppError::element_not_visible(selector));
    }
    Ok(json!({
        "format": "png",
        "captureBeyondViewport": true,
        "clip": {
            "x": rect.x,
            "y": rect.y,
            "width": rect.width,
            "height": rect.height,
            "scale": 1,
        },
    }))
}

// =============================================================================
// Snapshot
// =============================================================================

pub async fn execute_snapshot(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &SnapshotArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let page = session.page();

    let info = settled_page_info(page).await?;
    let elements = snapshot_elements(page).await?;
    let file = SnapshotFile {
        url: &info.url,
        title: &info.title,
        timestamp: now_iso8601(),
        elements: &elements,
    };
    let path = artifact_path(
        args.output.as_deref(),
        ctx.config.output_dir.as_deref(),
        "snapshot",
        "json",
    )?;
    std::fs::write(&path, render(&file, true)?)?;
    tracing::debug!(path = %path.display(), count = elements.len(), "snapshot written");

    let result = SnapshotResult {
        path,
        count: elements.len(),
        elements,
    };
    emit(session, ctx, &result).await
}

// =============================================================================
// Describe / wait
// =============================================================================

pub async fn execute_describe(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &SelectorArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let element = describe_element(session.page(), &args.selector).await?;
    emit(session, ctx, &DescribeResult { element }).await
}

pub async fn execute_wait(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &SelectorArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let waited_ms = wait_for_element(session.page(), &args.selector, ctx.timeout_ms()).await?;
    let element = describe_element(session.page(), &args.selector).await?;
    emit(session, ctx, &WaitResult { element, waited_ms }).await
}
