use serde_json::{json, Value};

use crate::ipc::error::{err, error_body};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn add_detail(mut self, key: &str, value: Value) -> Self {
        match self.details.as_mut().and_then(|d| d.as_object_mut()) {
            Some(obj) => {
                obj.insert(key.to_string(), value);
            }
            None => self.details = Some(json!({ key: value })),
        }
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn into_body(self) -> Value {
        error_body(self.code, self.message, self.details)
    }
}

/// Results are promised as numbers; serde_json would write NaN or infinity
/// as `null`.
pub fn ensure_finite(values: &[(&str, f64)]) -> Result<(), HandlerErr> {
    for (name, v) in values {
        if !v.is_finite() {
            return Err(HandlerErr::bad_params(format!(
                "inputs produce a non-finite {}",
                name
            ))
            .with_details(json!({ "field": name })));
        }
    }
    Ok(())
}

/// Number-or-numeric-string, the way form inputs arrive. Anything else is NaN
/// so the clamp step turns it into 0.
pub fn lenient_f64(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

pub fn require_f64(obj: &Value, key: &str, path: &str) -> Result<f64, HandlerErr> {
    obj.get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{}.{} must be a number", path, key)))
}

pub fn optional_f64(obj: &Value, key: &str, path: &str) -> Result<Option<f64>, HandlerErr> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{}.{} must be a number or null", path, key))),
    }
}

pub fn require_object<'a>(obj: &'a Value, key: &str) -> Result<&'a Value, HandlerErr> {
    match obj.get(key) {
        Some(v) if v.is_object() => Ok(v),
        _ => Err(HandlerErr::bad_params(format!("{} must be an object", key))),
    }
}

pub fn require_array<'a>(obj: &'a Value, key: &str) -> Result<&'a Vec<Value>, HandlerErr> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))
}

/// Ids come from the backend as either strings or integers.
pub fn require_id(obj: &Value, key: &str, path: &str) -> Result<String, HandlerErr> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(
            HandlerErr::bad_params(format!("{}.{} must be a non-empty string or number", path, key))
                .with_details(json!({ "field": key })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_f64_accepts_numbers_and_numeric_strings() {
        assert_eq!(lenient_f64(Some(&json!(4.5))), 4.5);
        assert_eq!(lenient_f64(Some(&json!(" 7 "))), 7.0);
        assert!(lenient_f64(Some(&json!("abc"))).is_nan());
        assert!(lenient_f64(Some(&json!(null))).is_nan());
        assert!(lenient_f64(None).is_nan());
    }

    #[test]
    fn require_id_accepts_strings_and_integers() {
        let row = json!({ "a": "tg-1", "b": 42, "c": "  ", "d": true });
        assert_eq!(require_id(&row, "a", "row").ok(), Some("tg-1".to_string()));
        assert_eq!(require_id(&row, "b", "row").ok(), Some("42".to_string()));
        assert!(require_id(&row, "c", "row").is_err());
        assert!(require_id(&row, "d", "row").is_err());
    }

    #[test]
    fn ensure_finite_names_the_offending_field() {
        assert!(ensure_finite(&[("points", 73.0), ("percentage", 0.0)]).is_ok());
        let e = match ensure_finite(&[("points", 1.0), ("percentage", f64::INFINITY)]) {
            Ok(()) => panic!("infinite percentage accepted"),
            Err(e) => e,
        };
        assert_eq!(e.code, "bad_params");
        let e = e.add_detail("testGroupId", json!("tg-1"));
        assert_eq!(
            e.into_body(),
            json!({
                "code": "bad_params",
                "message": "inputs produce a non-finite percentage",
                "details": { "field": "percentage", "testGroupId": "tg-1" }
            })
        );
    }
}
