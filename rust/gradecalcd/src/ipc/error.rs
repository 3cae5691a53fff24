use serde_json::json;

use crate::calc::CalcError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// The `error` object shared by request-level and per-row failures.
pub fn error_body(
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    error
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    json!({
        "id": id,
        "ok": false,
        "error": error_body(code, message, details),
    })
}

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}
