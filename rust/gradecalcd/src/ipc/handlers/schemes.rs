use crate::calc::{
    aggregate_subject_score, clamp_weight, overall_average, participating_weights,
    prepare_scheme_submission, validate_weights, GradingScheme, SubjectAggregate, TestGroupScore,
    WeightEntry,
};
use crate::ipc::error::{calc_err, ok};
use crate::ipc::helpers::{
    ensure_finite, lenient_f64, require_array, require_f64, require_id, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::collections::HashSet;

fn parse_test_groups(raw: &[Value], path: &str) -> Result<Vec<TestGroupScore>, HandlerErr> {
    let mut groups = Vec::with_capacity(raw.len());
    let mut seen: HashSet<String> = HashSet::new();
    for (i, row) in raw.iter().enumerate() {
        let at = format!("{}[{}]", path, i);
        if !row.is_object() {
            return Err(HandlerErr::bad_params(format!("{} must be an object", at)));
        }
        let test_group_id = require_id(row, "testGroupId", &at)?;
        if !seen.insert(test_group_id.clone()) {
            return Err(
                HandlerErr::bad_params(format!("{}.testGroupId is repeated", at))
                    .with_details(json!({ "testGroupId": test_group_id })),
            );
        }
        groups.push(TestGroupScore {
            test_group_id,
            weight: require_f64(row, "weight", &at)?,
            student_score: require_f64(row, "studentScore", &at)?,
            total_possible: require_f64(row, "totalPossible", &at)?,
        });
    }
    Ok(groups)
}

/// Weight editor input: each entry is parsed leniently and clamped to
/// `[0, 100]` as it would be on keystroke.
fn parse_weights(raw: &[Value]) -> Result<Vec<WeightEntry>, HandlerErr> {
    let mut weights = Vec::with_capacity(raw.len());
    for (i, row) in raw.iter().enumerate() {
        let at = format!("weights[{}]", i);
        if !row.is_object() {
            return Err(HandlerErr::bad_params(format!("{} must be an object", at)));
        }
        weights.push(WeightEntry {
            test_group_id: require_id(row, "testGroupId", &at)?,
            weight: clamp_weight(lenient_f64(row.get("weight"))),
        });
    }
    Ok(weights)
}

fn ensure_finite_aggregate(agg: &SubjectAggregate) -> Result<(), HandlerErr> {
    ensure_finite(&[("subjectScore", agg.subject_score)])?;
    for g in &agg.groups {
        ensure_finite(&[
            ("percentage", g.percentage.unwrap_or(0.0)),
            ("contribution", g.contribution.unwrap_or(0.0)),
        ])
        .map_err(|e| e.add_detail("testGroupId", json!(g.test_group_id)))?;
    }
    Ok(())
}

fn handle_aggregate(_state: &mut AppState, req: &Request) -> Value {
    let groups = match require_array(&req.params, "testGroups")
        .and_then(|raw| parse_test_groups(raw, "testGroups"))
    {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let agg = aggregate_subject_score(&groups);
    if let Err(e) = ensure_finite_aggregate(&agg) {
        return e.response(&req.id);
    }
    ok(&req.id, json!(agg))
}

fn handle_overall(_state: &mut AppState, req: &Request) -> Value {
    let subjects_raw = match require_array(&req.params, "subjects") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut ids: Vec<String> = Vec::with_capacity(subjects_raw.len());
    let mut aggregates: Vec<SubjectAggregate> = Vec::with_capacity(subjects_raw.len());
    for (i, subject) in subjects_raw.iter().enumerate() {
        let at = format!("subjects[{}]", i);
        let subject_id = match require_id(subject, "subjectId", &at) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let groups_path = format!("{}.testGroups", at);
        let groups = match subject
            .get("testGroups")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", groups_path)))
            .and_then(|raw| parse_test_groups(raw, &groups_path))
        {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let agg = aggregate_subject_score(&groups);
        if let Err(e) = ensure_finite_aggregate(&agg) {
            return e
                .add_detail("subjectId", json!(subject_id))
                .response(&req.id);
        }
        ids.push(subject_id);
        aggregates.push(agg);
    }

    let overall = overall_average(&aggregates);
    if let Err(e) = ensure_finite(&[("overallAverage", overall.unwrap_or(0.0))]) {
        return e.response(&req.id);
    }
    let subjects_with_data = aggregates.iter().filter(|a| a.has_data).count();
    let subjects: Vec<Value> = ids
        .iter()
        .zip(&aggregates)
        .map(|(id, agg)| {
            let mut v = json!(agg);
            v["subjectId"] = json!(id);
            v
        })
        .collect();

    ok(
        &req.id,
        json!({
            "subjects": subjects,
            "overallAverage": overall,
            "subjectsWithData": subjects_with_data,
        }),
    )
}

fn handle_validate_weights(state: &mut AppState, req: &Request) -> Value {
    let weights = match require_array(&req.params, "weights").and_then(|raw| parse_weights(raw)) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let tolerance = state.calc_config().weight_tolerance;
    let validation = validate_weights(&weights, tolerance);
    ok(
        &req.id,
        json!({
            "total": validation.total,
            "isValid": validation.is_valid,
            "tolerance": tolerance,
            "participating": participating_weights(&weights),
        }),
    )
}

fn handle_prepare_submission(state: &mut AppState, req: &Request) -> Value {
    let weights = match require_array(&req.params, "weights").and_then(|raw| parse_weights(raw)) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = match require_id(&req.params, "subjectId", "params") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let session_class_id = match require_id(&req.params, "sessionClassId", "params") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let scheme = GradingScheme {
        subject_id,
        session_class_id,
        weights,
    };
    match prepare_scheme_submission(&scheme, state.calc_config().weight_tolerance) {
        Ok(prepared) => ok(&req.id, json!({ "scheme": prepared })),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schemes.aggregate" => Some(handle_aggregate(state, req)),
        "schemes.overall" => Some(handle_overall(state, req)),
        "schemes.validateWeights" => Some(handle_validate_weights(state, req)),
        "schemes.prepareSubmission" => Some(handle_prepare_submission(state, req)),
        _ => None,
    }
}
