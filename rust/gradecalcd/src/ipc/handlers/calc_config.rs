use crate::calc::CalcConfig;
use crate::config::{self, ConfigUpdateError, CALC_CONFIG_KEY};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (override_value, updated_at) = match state.db.as_ref() {
        Some(conn) => {
            let value = match config::load_override(conn) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let at = match db::settings_updated_at(conn, CALC_CONFIG_KEY) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            (value, at)
        }
        None => (None, None),
    };

    ok(
        &req.id,
        json!({
            "effective": state.calc_config(),
            "override": override_value,
            "overrideUpdatedAt": updated_at,
            "defaults": CalcConfig::default(),
        }),
    )
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };

    match config::update_override(conn, patch) {
        Ok(effective) => {
            tracing::info!(
                fallback_max_multiplier = effective.fallback_max_multiplier,
                weight_tolerance = effective.weight_tolerance,
                "calc config override updated"
            );
            ok(&req.id, json!({ "ok": true, "effective": effective }))
        }
        Err(ConfigUpdateError::Invalid(msg)) => err(&req.id, "bad_params", msg, None),
        Err(ConfigUpdateError::Store(e)) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_config_clear_override(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = db::settings_delete(conn, CALC_CONFIG_KEY) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "ok": true, "effective": CalcConfig::default() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.config.get" => Some(handle_config_get(state, req)),
        "calc.config.update" => Some(handle_config_update(state, req)),
        "calc.config.clearOverride" => Some(handle_config_clear_override(state, req)),
        _ => None,
    }
}
