use crate::calc::{recompute_aggregate, AnswerScore, CalcConfig, OldAggregate, RecomputedAggregate};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    ensure_finite, lenient_f64, optional_f64, require_array, require_f64, require_object, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const RECOMPUTE_BATCH_MAX_EDITS: usize = 5000;

struct Regrade {
    old: OldAggregate,
    old_points: f64,
    answer: AnswerScore,
}

/// Caller-side sanitization for one regrade: the new points are parsed
/// leniently and clamped to the question's range before any arithmetic.
fn parse_regrade(params: &Value) -> Result<Regrade, HandlerErr> {
    let old_score = require_object(params, "oldScore")?;
    let old = OldAggregate {
        points: require_f64(old_score, "points", "oldScore")?,
        percentage: require_f64(old_score, "percentage", "oldScore")?,
        max_points: optional_f64(old_score, "maxPoints", "oldScore")?,
    };

    let question = require_object(params, "question")?;
    let question_points = require_f64(question, "points", "question")?;

    let answer = AnswerScore::clamped(lenient_f64(params.get("pointsEarned")), question_points);
    let old_points = match params.get("oldPoints") {
        None | Some(Value::Null) => 0.0,
        Some(_) => {
            let raw = lenient_f64(params.get("oldPoints"));
            if raw.is_nan() {
                return Err(HandlerErr::bad_params("oldPoints must be a number"));
            }
            raw
        }
    };

    Ok(Regrade {
        old,
        old_points,
        answer,
    })
}

fn result_json(r: &RecomputedAggregate, points_earned: f64) -> Value {
    json!({
        "points": r.points,
        "percentage": r.percentage,
        "maxPoints": r.max_points,
        "maxPointsSource": r.max_points_source,
        "estimated": r.is_estimated(),
        "pointsEarned": points_earned,
    })
}

fn recompute_one(params: &Value, cfg: &CalcConfig) -> Result<Value, HandlerErr> {
    let g = parse_regrade(params)?;
    let r = recompute_aggregate(
        &g.old,
        g.old_points,
        g.answer.points_earned,
        g.answer.max_points,
        cfg,
    );
    ensure_finite(&[
        ("points", r.points),
        ("percentage", r.percentage),
        ("maxPoints", r.max_points),
    ])?;
    if r.is_estimated() {
        tracing::debug!(
            max_points = r.max_points,
            multiplier = cfg.fallback_max_multiplier,
            "max points estimated from question points"
        );
    }
    Ok(result_json(&r, g.answer.points_earned))
}

fn handle_recompute(state: &mut AppState, req: &Request) -> Value {
    let cfg = state.calc_config();
    match recompute_one(&req.params, &cfg) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_recompute_batch(state: &mut AppState, req: &Request) -> Value {
    let edits = match require_array(&req.params, "edits") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if edits.len() > RECOMPUTE_BATCH_MAX_EDITS {
        return HandlerErr::bad_params("too many edits")
            .with_details(json!({
                "count": edits.len(),
                "max": RECOMPUTE_BATCH_MAX_EDITS
            }))
            .response(&req.id);
    }

    let cfg = state.calc_config();
    let mut results = Vec::with_capacity(edits.len());
    let mut failed = 0_usize;
    for edit in edits {
        let row_id = edit.get("rowId").cloned().unwrap_or(Value::Null);
        match recompute_one(edit, &cfg) {
            Ok(result) => results.push(json!({
                "rowId": row_id,
                "ok": true,
                "result": result,
            })),
            Err(e) => {
                failed += 1;
                results.push(json!({
                    "rowId": row_id,
                    "ok": false,
                    "error": e.into_body(),
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "results": results,
            "failed": failed,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grading.recompute" => Some(handle_recompute(state, req)),
        "grading.recomputeBatch" => Some(handle_recompute_batch(state, req)),
        _ => None,
    }
}
