use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FALLBACK_MAX_MULTIPLIER: f64 = 10.0;
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 0.01;
pub const WEIGHT_TOTAL: f64 = 100.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcConfig {
    /// Multiplier applied to a question's points when neither the reported
    /// max nor the old percentage can recover the test's max points.
    pub fallback_max_multiplier: f64,
    pub weight_tolerance: f64,
}

impl Default for CalcConfig {
    fn default() -> Self {
        Self {
            fallback_max_multiplier: DEFAULT_FALLBACK_MAX_MULTIPLIER,
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
        }
    }
}

/// `score / possible * 100`, or 0 when there is nothing to divide by.
pub fn percent_of(score: f64, possible: f64) -> f64 {
    if possible > 0.0 {
        100.0 * score / possible
    } else {
        0.0
    }
}

/// A test group's share of the subject score. `None` means the group has no
/// data yet, which is different from contributing 0.
pub fn weighted_contribution(score: f64, possible: f64, weight: f64) -> Option<f64> {
    if possible > 0.0 {
        Some(percent_of(score, possible) / 100.0 * weight)
    } else {
        None
    }
}

/// Parse-and-clamp rule for a regraded answer: NaN is 0, then `[0, max]`.
pub fn clamp_points(value: f64, max: f64) -> f64 {
    let max = if max.is_nan() || max < 0.0 { 0.0 } else { max };
    let v = if value.is_nan() { 0.0 } else { value };
    v.clamp(0.0, max)
}

pub fn clamp_weight(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, WEIGHT_TOTAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerScore {
    pub points_earned: f64,
    pub max_points: f64,
}

impl AnswerScore {
    pub fn clamped(points_earned: f64, max_points: f64) -> Self {
        Self {
            points_earned: clamp_points(points_earned, max_points),
            max_points,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OldAggregate {
    pub points: f64,
    pub percentage: f64,
    #[serde(default)]
    pub max_points: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxPointsSource {
    /// The backend reported the test's max points alongside the old score.
    Reported,
    /// Inverted from the old points and percentage.
    Derived,
    /// Question points times the configured multiplier. Low confidence.
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputedAggregate {
    pub points: f64,
    pub percentage: f64,
    pub max_points: f64,
    pub max_points_source: MaxPointsSource,
}

impl RecomputedAggregate {
    pub fn is_estimated(&self) -> bool {
        self.max_points_source == MaxPointsSource::Estimated
    }
}

pub fn resolve_max_points(
    old: &OldAggregate,
    answer_max_points: f64,
    cfg: &CalcConfig,
) -> (f64, MaxPointsSource) {
    if let Some(m) = old.max_points {
        return (m, MaxPointsSource::Reported);
    }
    if old.points > 0.0 && old.percentage > 0.0 {
        return (old.points / (old.percentage / 100.0), MaxPointsSource::Derived);
    }
    (
        answer_max_points * cfg.fallback_max_multiplier,
        MaxPointsSource::Estimated,
    )
}

/// Applies a single answer's point change to a previously reported test total
/// without a server round-trip. `new_points` is expected to be clamped already.
pub fn recompute_aggregate(
    old: &OldAggregate,
    old_points: f64,
    new_points: f64,
    answer_max_points: f64,
    cfg: &CalcConfig,
) -> RecomputedAggregate {
    let difference = new_points - old_points;
    let points = old.points + difference;
    let (max_points, max_points_source) = resolve_max_points(old, answer_max_points, cfg);
    let percentage = if max_points > 0.0 {
        points / max_points * 100.0
    } else {
        0.0
    };
    RecomputedAggregate {
        points,
        percentage,
        max_points,
        max_points_source,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestGroupScore {
    pub test_group_id: String,
    pub weight: f64,
    pub student_score: f64,
    pub total_possible: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBreakdown {
    pub test_group_id: String,
    pub weight: f64,
    pub applicable: bool,
    pub percentage: Option<f64>,
    pub contribution: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub groups: Vec<GroupBreakdown>,
    #[serde(rename = "contributions")]
    pub per_group_contribution: BTreeMap<String, f64>,
    pub not_applicable: Vec<String>,
    pub subject_score: f64,
    pub has_data: bool,
}

pub fn aggregate_subject_score(groups: &[TestGroupScore]) -> SubjectAggregate {
    let mut breakdown = Vec::with_capacity(groups.len());
    let mut parts: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut missing: Vec<String> = Vec::new();

    for g in groups {
        let contribution = weighted_contribution(g.student_score, g.total_possible, g.weight);
        match contribution {
            Some(c) => parts.entry(g.test_group_id.clone()).or_default().push(c),
            None => {
                if !missing.contains(&g.test_group_id) {
                    missing.push(g.test_group_id.clone());
                }
            }
        }
        breakdown.push(GroupBreakdown {
            test_group_id: g.test_group_id.clone(),
            weight: g.weight,
            applicable: contribution.is_some(),
            percentage: contribution.map(|_| percent_of(g.student_score, g.total_possible)),
            contribution,
        });
    }

    // Repeated ids are summed in value order and then across ids in key order,
    // so the score is identical for any permutation of the input.
    let per_group_contribution: BTreeMap<String, f64> = parts
        .into_iter()
        .map(|(id, mut values)| {
            values.sort_by(f64::total_cmp);
            (id, values.into_iter().sum::<f64>())
        })
        .collect();
    let subject_score: f64 = per_group_contribution.values().sum();
    let has_data = !per_group_contribution.is_empty();

    // An id with any applicable copy has data.
    let not_applicable: Vec<String> = missing
        .into_iter()
        .filter(|id| !per_group_contribution.contains_key(id))
        .collect();

    SubjectAggregate {
        groups: breakdown,
        per_group_contribution,
        not_applicable,
        subject_score,
        has_data,
    }
}

/// Mean subject score over subjects that have data. Subjects without data are
/// left out rather than averaged in as 0.
pub fn overall_average<'a, I>(subjects: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a SubjectAggregate>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for s in subjects {
        if !s.has_data {
            continue;
        }
        sum += s.subject_score;
        count += 1;
    }
    if count > 0 {
        Some(sum / count as f64)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightEntry {
    pub test_group_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightValidation {
    pub total: f64,
    pub is_valid: bool,
}

pub fn validate_weights(weights: &[WeightEntry], tolerance: f64) -> WeightValidation {
    let total: f64 = weights.iter().map(|w| clamp_weight(w.weight)).sum();
    WeightValidation {
        total,
        is_valid: (total - WEIGHT_TOTAL).abs() < tolerance,
    }
}

/// Entries that take part in the scheme. A weight of exactly 0 means the test
/// group is not part of the scheme at all.
pub fn participating_weights(weights: &[WeightEntry]) -> Vec<WeightEntry> {
    weights
        .iter()
        .map(|w| WeightEntry {
            test_group_id: w.test_group_id.clone(),
            weight: clamp_weight(w.weight),
        })
        .filter(|w| w.weight != 0.0)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScheme {
    pub subject_id: String,
    pub session_class_id: String,
    pub weights: Vec<WeightEntry>,
}

pub fn prepare_scheme_submission(
    scheme: &GradingScheme,
    tolerance: f64,
) -> Result<GradingScheme, CalcError> {
    let subject_id = scheme.subject_id.trim();
    if subject_id.is_empty() {
        return Err(CalcError::new("bad_params", "subjectId must not be empty"));
    }
    let session_class_id = scheme.session_class_id.trim();
    if session_class_id.is_empty() {
        return Err(CalcError::new(
            "bad_params",
            "sessionClassId must not be empty",
        ));
    }

    let validation = validate_weights(&scheme.weights, tolerance);
    if !validation.is_valid {
        return Err(CalcError::new(
            "weights_invalid",
            format!("weights must total {} (got {})", WEIGHT_TOTAL, validation.total),
        )
        .with_details(serde_json::json!({
            "total": validation.total,
            "tolerance": tolerance,
        })));
    }

    Ok(GradingScheme {
        subject_id: subject_id.to_string(),
        session_class_id: session_class_id.to_string(),
        weights: participating_weights(&scheme.weights),
    })
}
