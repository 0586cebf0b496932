use serde::Serialize;
use serde_json::{Value, json};

use browser_probe::error::AppError;
use browser_probe::session::{SessionStore, describe_exception};

use crate::cli::EvaluateArgs;
use crate::context::{CommandContext, emit, open_page};

#[derive(Debug, Serialize)]
struct EvaluateResult {
    result: Value,
    r#type: String,
}

pub async fn execute_evaluate(
    ctx: &CommandContext,
    store: &mut SessionStore,
    args: &EvaluateArgs,
) -> Result<(), AppError> {
    let session = open_page(store, ctx, &args.target).await?;
    let response = session
        .page()
        .send_command(
            "Runtime.evaluate",
            Some(json!({
                "expression": args.script,
                "returnByValue": true,
                "awaitPromise": true,
                "userGesture": true,
            })),
        )
        .await?;
    let result = into_result(&response)?;
    emit(session, ctx, &result).await
}

fn into_result(response: &Value) -> Result<EvaluateResult, AppError> {
    if let Some(details) = response.get("exceptionDetails") {
        let (message, stack) = describe_exception(details);
        return Err(AppError::script_failed(&message, stack));
    }
    let remote = &response["result"];
    Ok(EvaluateResult {
        result: result_value(remote),
        r#type: type_name(remote).to_owned(),
    })
}

/// `null` and arrays are reported by subtype, everything else by type.
fn type_name(remote: &Value) -> &str {
    match remote["subtype"].as_str() {
        Some(sub @ ("null" | "array")) => sub,
        _ => remote["type"].as_str().unwrap_or("undefined"),
    }
}

fn result_value(remote: &Value) -> Value {
    if remote["type"] == "undefined" {
        return Value::Null;
    }
    if let Some(value) = remote.get("value") {
        return value.clone();
    }
    // Values that cannot be returned by value (functions, DOM nodes, NaN).
    remote["unserializableValue"]
        .as_str()
        .or_else(|| remote["description"].as_str())
        .map_or(Value::Null, |d| Value::String(d.to_owned()))
}
