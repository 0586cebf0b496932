//! Setting form-control values the way a user's typing would.

use serde_json::{Value, json};

use crate::error::AppError;
use crate::session::ManagedSession;

/// Tags `fill` accepts.
pub const FILLABLE_TAGS: &[&str] = &["input", "textarea", "select"];

const TAG_JS: &str = "function() { return this.tagName.toLowerCase(); }";

/// Sets the value through the prototype setter so framework-managed inputs
/// see the change, then fires `input` and `change`.
const FILL_JS: &str = r"
function(value) {
    const el = this;
    const tag = el.tagName.toLowerCase();
    if (tag === 'select') {
        const options = Array.from(el.options);
        const idx = options.findIndex(o => o.value === value || o.textContent.trim() === value);
        if (idx >= 0) el.selectedIndex = idx;
    } else if (el.type === 'checkbox' || el.type === 'radio') {
        el.checked = value === 'true' || value === 'checked' || value === 'on';
    } else {
        const proto = tag === 'textarea' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value')?.set;
        if (setter) setter.call(el, value); else el.value = value;
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
}
";

const CLEAR_JS: &str = r"
function() {
    const el = this;
    const tag = el.tagName.toLowerCase();
    if (tag === 'select') {
        el.selectedIndex = -1;
    } else if (el.type === 'checkbox' || el.type === 'radio') {
        el.checked = false;
    } else {
        const proto = tag === 'textarea' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value')?.set;
        if (setter) setter.call(el, ''); else el.value = '';
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
}
";

/// Runs in its own round trip, after microtasks queued by the fill's event
/// handlers have settled.
const READ_JS: &str = "function() { \
    return (this.type === 'checkbox' || this.type === 'radio') ? String(this.checked) : String(this.value); }";

/// # Errors
///
/// `NotFillable` when the element is not a form control.
pub async fn ensure_fillable(page: &ManagedSession, selector: &str) -> Result<(), AppError> {
    let tag = page.call_on_selector(selector, TAG_JS, &[]).await?;
    let tag = tag.as_str().unwrap_or_default();
    if FILLABLE_TAGS.contains(&tag) {
        Ok(())
    } else {
        Err(AppError::not_fillable(selector, tag))
    }
}

/// Fill the first match of `selector` with `value`, optionally clearing it
/// first, and return what the element holds afterwards.
///
/// # Errors
///
/// `NotFillable` for non form controls, `ElementNotFound` when nothing
/// matches, or a script failure raised by the page.
pub async fn fill_field(
    page: &ManagedSession,
    selector: &str,
    value: &str,
    clear: bool,
) -> Result<String, AppError> {
    ensure_fillable(page, selector).await?;
    if clear {
        page.call_on_selector(selector, CLEAR_JS, &[]).await?;
    }
    page.call_on_selector(selector, FILL_JS, &[json!(value)]).await?;
    read_value(page, selector).await
}

/// # Errors
///
/// `ElementNotFound` when nothing matches.
pub async fn read_value(page: &ManagedSession, selector: &str) -> Result<String, AppError> {
    Ok(match page.call_on_selector(selector, READ_JS, &[]).await? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_scripts_fire_input_and_change() {
        for script in [FILL_JS, CLEAR_JS] {
            assert!(script.contains("new Event('input'"));
            assert!(script.contains("new Event('change'"));
        }
    }

    #[test]
    fn value_is_read_outside_the_fill_call() {
        assert!(!FILL_JS.contains("return"));
        assert!(READ_JS.contains("String(this.value)"));
        assert!(!READ_JS.contains("dispatchEvent"));
    }

    #[test]
    fn only_form_controls_are_fillable() {
        assert!(FILLABLE_TAGS.contains(&"textarea"));
        assert!(!FILLABLE_TAGS.contains(&"div"));
    }
}
