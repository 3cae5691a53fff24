use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::calc::CalcConfig;
use crate::db;

pub const CALC_CONFIG_KEY: &str = "calc.config";

const MAX_FALLBACK_MULTIPLIER: f64 = 1000.0;
const MAX_WEIGHT_TOLERANCE: f64 = 5.0;

fn parse_positive_max(v: &Value, key: &str, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(n > 0.0 && n <= max) {
        return Err(format!("{} must be in (0, {}]", key, max));
    }
    Ok(n)
}

/// Applies a camelCase patch on top of `cfg`. Fails on the first bad field and
/// leaves `cfg` partially updated; callers work on a copy.
pub fn merge_calc_config_patch(cfg: &mut CalcConfig, patch: &Map<String, Value>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "fallbackMaxMultiplier" => {
                cfg.fallback_max_multiplier = parse_positive_max(v, k, MAX_FALLBACK_MULTIPLIER)?;
            }
            "weightTolerance" => {
                cfg.weight_tolerance = parse_positive_max(v, k, MAX_WEIGHT_TOLERANCE)?;
            }
            _ => return Err(format!("unknown calc config field: {}", k)),
        }
    }
    Ok(())
}

pub fn load_override(conn: &Connection) -> anyhow::Result<Option<Value>> {
    db::settings_get_json(conn, CALC_CONFIG_KEY)
}

pub fn load_calc_config(conn: &Connection) -> CalcConfig {
    let mut cfg = CalcConfig::default();
    let saved = match load_override(conn) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read calc config override; using defaults");
            None
        }
    };
    if let Some(saved_obj) = saved.as_ref().and_then(|v| v.as_object()) {
        let mut candidate = cfg;
        match merge_calc_config_patch(&mut candidate, saved_obj) {
            Ok(()) => cfg = candidate,
            // Malformed historical values should not block calculation.
            Err(msg) => tracing::warn!(%msg, "ignoring stored calc config override"),
        }
    }
    cfg
}

/// Merges `patch` into the stored override and persists the result.
pub fn update_override(conn: &Connection, patch: &Map<String, Value>) -> Result<CalcConfig, ConfigUpdateError> {
    let mut next = load_calc_config(conn);
    merge_calc_config_patch(&mut next, patch).map_err(ConfigUpdateError::Invalid)?;

    let value = json!({
        "fallbackMaxMultiplier": next.fallback_max_multiplier,
        "weightTolerance": next.weight_tolerance,
    });
    db::settings_set_json(conn, CALC_CONFIG_KEY, &value).map_err(ConfigUpdateError::Store)?;
    Ok(next)
}

pub enum ConfigUpdateError {
    Invalid(String),
    Store(anyhow::Error),
}
