//! Element discovery in the page: descriptors, snapshots and geometry.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, ErrorKind};
use crate::session::ManagedSession;

/// Elements a snapshot considers interactive.
pub const INTERACTIVE_SELECTOR: &str = "a[href], button, input, textarea, select, \
    [role=button], [role=link], [role=checkbox], [role=radio], [role=tab], \
    [role=menuitem], [role=textbox], [role=combobox], [role=switch], [role=option], \
    [tabindex]";

/// Longest text kept on a descriptor.
pub const MAX_TEXT_CHARS: usize = 200;

/// Axis-aligned box in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// What the page reports about one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub tag: String,
    pub id: Option<String>,
    pub selector: String,
    pub xpath: String,
    pub visible: bool,
    pub bounding_box: BoundingBox,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Defines `__bpDescribe(el)` inside an expression. The selector and path
/// rules must stay deterministic: running it twice on an unchanged page gives
/// the same output.
const DESCRIBE_JS: &str = r#"
const __bpSelector = (el) => {
    const tag = el.tagName.toLowerCase();
    if (el.id) return '#' + CSS.escape(el.id);
    const classes = Array.from(el.classList).filter(Boolean).map((c) => CSS.escape(c));
    return classes.length ? tag + '.' + classes.join('.') : tag;
};
const __bpLiteral = (s) => {
    if (!s.includes('"')) return '"' + s + '"';
    if (!s.includes("'")) return "'" + s + "'";
    return 'concat(' + s.split('"').map((p) => '"' + p + '"').join(", '\"', ") + ')';
};
const __bpXPath = (el) => {
    if (el.id) return '//*[@id=' + __bpLiteral(el.id) + ']';
    const parts = [];
    for (let node = el; node && node.nodeType === 1; node = node.parentElement) {
        const tag = node.tagName.toLowerCase();
        if (node === document.documentElement || tag === 'body' || tag === 'head') {
            parts.unshift(tag);
            continue;
        }
        let index = 1;
        for (let sib = node.previousElementSibling; sib; sib = sib.previousElementSibling) {
            if (sib.tagName === node.tagName) index++;
        }
        parts.unshift(tag + '[' + index + ']');
    }
    return '/' + parts.join('/');
};
// SVG links expose `href` as an SVGAnimatedString.
const __bpHref = (el) => {
    const href = el.href;
    if (typeof href === 'string') return href;
    const raw = href && href.baseVal != null ? href.baseVal : el.getAttribute('href');
    try { return new URL(raw, document.baseURI).href; } catch (_) { return String(raw); }
};
const __bpDescribe = (el) => {
    const r = el.getBoundingClientRect();
    const raw = (el.innerText || el.value || el.getAttribute('aria-label') || '');
    return {
        tag: el.tagName.toLowerCase(),
        id: el.id || null,
        selector: __bpSelector(el),
        xpath: __bpXPath(el),
        visible: r.width > 0 && r.height > 0,
        boundingBox: { x: r.x, y: r.y, width: r.width, height: r.height },
        text: String(raw).replace(/\s+/g, ' ').trim().slice(0, __MAX_TEXT__),
        href: el.hasAttribute('href') ? __bpHref(el) : null,
    };
};
"#;

fn describe_prelude() -> String {
    DESCRIBE_JS.replace("__MAX_TEXT__", &MAX_TEXT_CHARS.to_string())
}

/// Expression that describes the first match of `selector`, or yields null.
#[must_use]
pub fn describe_expression(selector: &str) -> String {
    format!(
        "(() => {{ {} const el = document.querySelector({}); return el ? __bpDescribe(el) : null; }})()",
        describe_prelude(),
        json!(selector)
    )
}

/// Expression that describes every interactive element in document order.
#[must_use]
pub fn snapshot_expression() -> String {
    format!(
        "(() => {{ {} return Array.from(document.querySelectorAll({})).map(__bpDescribe); }})()",
        describe_prelude(),
        json!(INTERACTIVE_SELECTOR)
    )
}

/// # Errors
///
/// `ElementNotFound` when nothing matches `selector`.
pub async fn describe_element(
    page: &ManagedSession,
    selector: &str,
) -> Result<ElementDescriptor, AppError> {
    let value = page
        .evaluate(&describe_expression(selector))
        .await
        .map_err(|e| selector_error(selector, e))?;
    parse_descriptor(value)?.ok_or_else(|| AppError::element_not_found(selector, None))
}

/// Every interactive element, in document order, without duplicates.
///
/// # Errors
///
/// Returns `AppError` if the page cannot be evaluated.
pub async fn snapshot_elements(page: &ManagedSession) -> Result<Vec<ElementDescriptor>, AppError> {
    let value = page.evaluate(&snapshot_expression()).await?;
    parse_descriptors(value)
}

/// Scroll the first match of `selector` to the centre of the viewport.
///
/// # Errors
///
/// `ElementNotFound` when nothing matches.
pub async fn scroll_into_view(page: &ManagedSession, selector: &str) -> Result<(), AppError> {
    let found = page
        .evaluate(&format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             el.scrollIntoView({{ block: 'center', inline: 'center' }}); return true; }})()",
            json!(selector)
        ))
        .await
        .map_err(|e| selector_error(selector, e))?;
    if found == Value::Bool(true) {
        Ok(())
    } else {
        Err(AppError::element_not_found(selector, None))
    }
}

/// Bounding box of the first match in document coordinates, for clipping
/// screenshots.
///
/// # Errors
///
/// `ElementNotFound` when nothing matches.
pub async fn document_box(page: &ManagedSession, selector: &str) -> Result<BoundingBox, AppError> {
    let value = page
        .evaluate(&format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.x + window.scrollX, y: r.y + window.scrollY, width: r.width, height: r.height }}; }})()",
            json!(selector)
        ))
        .await
        .map_err(|e| selector_error(selector, e))?;
    if value.is_null() {
        return Err(AppError::element_not_found(selector, None));
    }
    serde_json::from_value(value).map_err(AppError::from)
}

/// A page rejecting the selector itself is the caller's mistake, not a
/// script failure.
#[must_use]
pub fn selector_error(selector: &str, e: AppError) -> AppError {
    if e.kind == ErrorKind::ScriptExecutionFailure {
        AppError::invalid_argument(format!("invalid selector '{selector}': {}", e.message))
    } else {
        e
    }
}

/// `Ok(None)` only when the page found nothing. A node that was found but
/// described in an unexpected shape is a protocol error.
fn parse_descriptor(value: Value) -> Result<Option<ElementDescriptor>, AppError> {
    if value.is_null() {
        return Ok(None);
    }
    let mut descriptor: ElementDescriptor = serde_json::from_value(value).map_err(|e| {
        AppError::new(
            ErrorKind::Protocol,
            format!("unexpected element description: {e}"),
        )
    })?;
    descriptor.visible = descriptor.bounding_box.has_area();
    Ok(Some(descriptor))
}

fn parse_descriptors(value: Value) -> Result<Vec<ElementDescriptor>, AppError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| parse_descriptor(item).transpose())
            .collect(),
        _ => Ok(Vec::new()),
    }
}
